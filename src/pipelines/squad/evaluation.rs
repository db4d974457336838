// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # SQuAD evaluation
//! Exact match and F1 scores following the official SQuAD v2.0 evaluation:
//! answers are lower cased, stripped of punctuation and articles before comparison, and every
//! prediction is scored against its best matching gold answer. Questions without gold answers
//! expect an empty prediction.
//!
//! When no-answer probabilities (null odds) are given, predictions whose no-answer probability
//! exceeds `na_prob_thresh` are treated as "no answer", and the threshold maximizing each metric is
//! searched (`best_exact`, `best_exact_thresh`, `best_f1`, `best_f1_thresh`).

use crate::pipelines::squad::example::SquadDataset;
use lazy_static::lazy_static;
use ordered_float::OrderedFloat;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// Metric name -> value
pub type EvaluationResults = BTreeMap<String, f64>;

/// No-answer probability above which a prediction is replaced by "no answer"
pub const DEFAULT_NA_PROB_THRESH: f64 = 1.0;

lazy_static! {
    static ref ARTICLES: Regex = Regex::new(r"\b(a|an|the)\b").unwrap();
}

/// Lower case, remove punctuation, articles and extra whitespace
pub fn normalize_answer(text: &str) -> String {
    let lower = text.to_lowercase();
    let without_punctuation: String = lower
        .chars()
        .filter(|character| !character.is_ascii_punctuation())
        .collect();
    let without_articles = ARTICLES.replace_all(&without_punctuation, " ");
    without_articles.split_whitespace().collect::<Vec<&str>>().join(" ")
}

fn get_tokens(text: &str) -> Vec<String> {
    normalize_answer(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub fn compute_exact(gold_answer: &str, prediction: &str) -> f64 {
    if normalize_answer(gold_answer) == normalize_answer(prediction) {
        1.0
    } else {
        0.0
    }
}

pub fn compute_f1(gold_answer: &str, prediction: &str) -> f64 {
    let gold_tokens = get_tokens(gold_answer);
    let pred_tokens = get_tokens(prediction);
    if gold_tokens.is_empty() || pred_tokens.is_empty() {
        return if gold_tokens == pred_tokens { 1.0 } else { 0.0 };
    }
    let mut gold_counts: HashMap<&str, usize> = HashMap::new();
    for token in gold_tokens.iter() {
        *gold_counts.entry(token.as_str()).or_insert(0) += 1;
    }
    let mut num_same = 0;
    for token in pred_tokens.iter() {
        if let Some(count) = gold_counts.get_mut(token.as_str()) {
            if *count > 0 {
                *count -= 1;
                num_same += 1;
            }
        }
    }
    if num_same == 0 {
        return 0.0;
    }
    let precision = num_same as f64 / pred_tokens.len() as f64;
    let recall = num_same as f64 / gold_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

struct GoldQuestion {
    qas_id: String,
    answers: Vec<String>,
    has_answer: bool,
}

fn gold_questions(dataset: &SquadDataset) -> Vec<GoldQuestion> {
    let mut questions = vec![];
    for article in dataset.data.iter() {
        for paragraph in article.paragraphs.iter() {
            for qa in paragraph.qas.iter() {
                let mut answers: Vec<String> = qa
                    .answers
                    .iter()
                    .map(|answer| answer.text.clone())
                    .filter(|text| !normalize_answer(text).is_empty())
                    .collect();
                if answers.is_empty() {
                    answers.push(String::new());
                }
                questions.push(GoldQuestion {
                    qas_id: qa.id.clone(),
                    answers,
                    has_answer: !qa.answers.is_empty(),
                });
            }
        }
    }
    questions
}

fn make_eval_dict(
    exact_scores: &HashMap<&str, f64>,
    f1_scores: &HashMap<&str, f64>,
    qas_ids: &[&str],
    prefix: &str,
    results: &mut EvaluationResults,
) {
    let total = qas_ids.len() as f64;
    let exact: f64 = qas_ids.iter().map(|id| exact_scores[id]).sum();
    let f1: f64 = qas_ids.iter().map(|id| f1_scores[id]).sum();
    results.insert(format!("{}exact", prefix), 100.0 * exact / total);
    results.insert(format!("{}f1", prefix), 100.0 * f1 / total);
    results.insert(format!("{}total", prefix), total);
}

fn apply_no_answer_threshold<'a>(
    questions: &'a [GoldQuestion],
    scores: &HashMap<&'a str, f64>,
    na_probs: &HashMap<&'a str, f64>,
    na_prob_thresh: f64,
) -> HashMap<&'a str, f64> {
    questions
        .iter()
        .map(|question| {
            let qas_id = question.qas_id.as_str();
            let score = if na_probs[qas_id] > na_prob_thresh {
                if question.has_answer {
                    0.0
                } else {
                    1.0
                }
            } else {
                scores[qas_id]
            };
            (qas_id, score)
        })
        .collect()
}

/// Sweeps the no-answer threshold over the sorted no-answer probabilities and returns the best
/// score (in percent) with its threshold.
fn find_best_thresh(
    questions: &[GoldQuestion],
    predictions: &BTreeMap<String, String>,
    scores: &HashMap<&str, f64>,
    na_probs: &HashMap<&str, f64>,
) -> (f64, f64) {
    let num_no_answer = questions.iter().filter(|q| !q.has_answer).count();
    let mut current_score = num_no_answer as f64;
    let mut best_score = current_score;
    let mut best_thresh = 0.0;

    let mut sorted_questions: Vec<&GoldQuestion> = questions.iter().collect();
    sorted_questions.sort_by_key(|question| OrderedFloat(na_probs[question.qas_id.as_str()]));
    for question in sorted_questions {
        let qas_id = question.qas_id.as_str();
        let diff = if question.has_answer {
            scores[qas_id]
        } else if predictions.get(qas_id).map_or(false, |p| !p.is_empty()) {
            -1.0
        } else {
            0.0
        };
        current_score += diff;
        if current_score > best_score {
            best_score = current_score;
            best_thresh = na_probs[qas_id];
        }
    }
    (100.0 * best_score / questions.len() as f64, best_thresh)
}

/// Scores predictions against the gold answers of a dataset.
///
/// Questions without prediction are scored as an empty prediction (with a warning).
///
/// # Arguments
///
/// * `dataset` - gold dataset
/// * `predictions` - question id -> predicted answer
/// * `na_probs` - optional question id -> no-answer probability (null odds)
/// * `na_prob_thresh` - no-answer probability above which predictions count as "no answer"
pub fn evaluate_predictions(
    dataset: &SquadDataset,
    predictions: &BTreeMap<String, String>,
    na_probs: Option<&BTreeMap<String, f64>>,
    na_prob_thresh: f64,
) -> EvaluationResults {
    let questions = gold_questions(dataset);
    let mut results = EvaluationResults::new();
    if questions.is_empty() {
        return results;
    }

    let mut exact_raw: HashMap<&str, f64> = HashMap::with_capacity(questions.len());
    let mut f1_raw: HashMap<&str, f64> = HashMap::with_capacity(questions.len());
    for question in questions.iter() {
        let prediction = match predictions.get(&question.qas_id) {
            Some(prediction) => prediction.as_str(),
            None => {
                log::warn!("Missing prediction for {}", question.qas_id);
                ""
            }
        };
        let exact = question
            .answers
            .iter()
            .map(|gold| compute_exact(gold, prediction))
            .fold(0.0, f64::max);
        let f1 = question
            .answers
            .iter()
            .map(|gold| compute_f1(gold, prediction))
            .fold(0.0, f64::max);
        exact_raw.insert(question.qas_id.as_str(), exact);
        f1_raw.insert(question.qas_id.as_str(), f1);
    }

    let has_na_probs = na_probs.is_some();
    let na_probs: HashMap<&str, f64> = questions
        .iter()
        .map(|question| {
            let probability = na_probs
                .and_then(|probabilities| probabilities.get(&question.qas_id))
                .copied()
                .unwrap_or(0.0);
            (question.qas_id.as_str(), probability)
        })
        .collect();

    let exact_thresh =
        apply_no_answer_threshold(&questions, &exact_raw, &na_probs, na_prob_thresh);
    let f1_thresh = apply_no_answer_threshold(&questions, &f1_raw, &na_probs, na_prob_thresh);

    let all_ids: Vec<&str> = questions.iter().map(|q| q.qas_id.as_str()).collect();
    make_eval_dict(&exact_thresh, &f1_thresh, &all_ids, "", &mut results);

    let has_answer_ids: Vec<&str> = questions
        .iter()
        .filter(|q| q.has_answer)
        .map(|q| q.qas_id.as_str())
        .collect();
    if !has_answer_ids.is_empty() {
        make_eval_dict(
            &exact_thresh,
            &f1_thresh,
            &has_answer_ids,
            "HasAns_",
            &mut results,
        );
    }
    let no_answer_ids: Vec<&str> = questions
        .iter()
        .filter(|q| !q.has_answer)
        .map(|q| q.qas_id.as_str())
        .collect();
    if !no_answer_ids.is_empty() {
        make_eval_dict(
            &exact_thresh,
            &f1_thresh,
            &no_answer_ids,
            "NoAns_",
            &mut results,
        );
    }

    if has_na_probs {
        let (best_exact, best_exact_thresh) =
            find_best_thresh(&questions, predictions, &exact_raw, &na_probs);
        let (best_f1, best_f1_thresh) =
            find_best_thresh(&questions, predictions, &f1_raw, &na_probs);
        results.insert("best_exact".to_string(), best_exact);
        results.insert("best_exact_thresh".to_string(), best_exact_thresh);
        results.insert("best_f1".to_string(), best_f1);
        results.insert("best_f1_thresh".to_string(), best_f1_thresh);
    }
    results
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pipelines::squad::example::{
        SquadAnswer, SquadArticle, SquadParagraph, SquadQuestion,
    };

    fn question(id: &str, answers: &[&str]) -> SquadQuestion {
        SquadQuestion {
            id: id.to_string(),
            question: "question".to_string(),
            answers: answers
                .iter()
                .map(|text| SquadAnswer {
                    text: text.to_string(),
                    answer_start: 0,
                })
                .collect(),
            is_impossible: answers.is_empty(),
        }
    }

    fn dataset(qas: Vec<SquadQuestion>) -> SquadDataset {
        SquadDataset {
            version: Some("v2.0".to_string()),
            data: vec![SquadArticle {
                title: "title".to_string(),
                paragraphs: vec![SquadParagraph {
                    context: "context".to_string(),
                    qas,
                }],
            }],
        }
    }

    fn predictions(values: &[(&str, &str)]) -> BTreeMap<String, String> {
        values
            .iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect()
    }

    #[test]
    fn answers_are_normalized() {
        assert_eq!(normalize_answer("The  Eiffel Tower!"), "eiffel tower");
        assert_eq!(normalize_answer("an apple, a pear"), "apple pear");
        assert_eq!(compute_exact("the Eiffel tower", "Eiffel Tower."), 1.0);
        assert_eq!(compute_exact("", ""), 1.0);
    }

    #[test]
    fn f1_counts_overlapping_tokens() {
        // 2 common tokens, precision 2/3, recall 2/2
        let f1 = compute_f1("Gustave Eiffel", "engineer Gustave Eiffel");
        assert!((f1 - 0.8).abs() < 1e-9);
        assert_eq!(compute_f1("Paris", "London"), 0.0);
        assert_eq!(compute_f1("", "Paris"), 0.0);
        assert_eq!(compute_f1("the", ""), 1.0);
    }

    #[test]
    fn scores_use_the_best_gold_answer() {
        let gold = dataset(vec![
            question("q1", &["Paris", "the city of Paris"]),
            question("q2", &["1889"]),
        ]);
        let results = evaluate_predictions(
            &gold,
            &predictions(&[("q1", "city of Paris"), ("q2", "in 1889")]),
            None,
            DEFAULT_NA_PROB_THRESH,
        );
        assert_eq!(results["total"], 2.0);
        assert_eq!(results["exact"], 50.0);
        // q1 exact, q2 f1 = 2 * (1/2 * 1) / 1.5
        assert!((results["f1"] - 100.0 * (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-9);
        assert_eq!(results["HasAns_total"], 2.0);
        assert!(!results.contains_key("NoAns_total"));
        assert!(!results.contains_key("best_f1"));
    }

    #[test]
    fn no_answer_questions_expect_empty_predictions() {
        let gold = dataset(vec![question("q1", &["Paris"]), question("q2", &[])]);
        let results = evaluate_predictions(
            &gold,
            &predictions(&[("q1", "Paris"), ("q2", "")]),
            None,
            DEFAULT_NA_PROB_THRESH,
        );
        assert_eq!(results["exact"], 100.0);
        assert_eq!(results["NoAns_exact"], 100.0);
        assert_eq!(results["NoAns_total"], 1.0);

        let results = evaluate_predictions(
            &gold,
            &predictions(&[("q1", "Paris")]),
            None,
            DEFAULT_NA_PROB_THRESH,
        );
        assert_eq!(results["NoAns_exact"], 100.0);
    }

    #[test]
    fn best_threshold_is_searched_over_null_odds() {
        let gold = dataset(vec![
            question("q1", &["Paris"]),
            question("q2", &[]),
            question("q3", &["Lyon"]),
        ]);
        let preds = predictions(&[("q1", "Paris"), ("q2", "Nice"), ("q3", "Lyon")]);
        let na_probs: BTreeMap<String, f64> = vec![
            ("q1".to_string(), -2.0),
            ("q2".to_string(), 0.5),
            ("q3".to_string(), -1.0),
        ]
        .into_iter()
        .collect();
        let results = evaluate_predictions(&gold, &preds, Some(&na_probs), DEFAULT_NA_PROB_THRESH);
        assert!((results["exact"] - 200.0 / 3.0).abs() < 1e-9);
        // sweep: 1 (no answer) + 1 (q1) + 1 (q3) = 3, then q2 predicted non-empty: 2
        assert_eq!(results["best_exact"], 100.0);
        assert_eq!(results["best_exact_thresh"], -1.0);
        assert_eq!(results["best_f1_thresh"], -1.0);

        let strict = evaluate_predictions(&gold, &preds, Some(&na_probs), 0.0);
        assert_eq!(strict["exact"], 100.0);
    }
}
