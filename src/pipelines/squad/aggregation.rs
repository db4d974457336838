// Copyright 2018 The Google AI Language Team Authors and The HuggingFace Inc. team.
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

//! # Answer aggregation
//! Converts the ranked token spans of an example into answer texts. The text of a span is read
//! from the original context words, then trimmed to the part matching the predicted sub-tokens
//! (e.g. the model predicts "steve smith" while the context word span is "Steve Smith's").
//! Candidates with the same text are merged, keeping the best scoring one, and the n-best list is
//! scored with a softmax over the span scores.

use crate::common::error::ReaderError;
use crate::pipelines::common::QaTokenizer;
use crate::pipelines::squad::decoding::{PrelimPredictions, RawResult, SpanCandidate, SpanDecoder};
use crate::pipelines::squad::example::{whitespace_tokenize, SquadExample};
use crate::pipelines::squad::features::QaFeature;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// # Entry of the n-best list of an example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NbestEntry {
    pub text: String,
    pub probability: f64,
    /// Start logit (start log-probability for beam outputs)
    pub start_logit: f64,
    /// End logit (end log-probability for beam outputs)
    pub end_logit: f64,
}

impl NbestEntry {
    pub fn score(&self) -> f64 {
        self.start_logit + self.end_logit
    }
}

/// # Final prediction for an example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamplePrediction {
    pub qas_id: String,
    pub title: String,
    pub context: String,
    /// Predicted answer, empty for "no answer"
    pub answer: String,
    /// Probability of the predicted answer within the n-best list
    pub probability: f64,
    /// Score of the predicted answer (null score for "no answer")
    pub score: f64,
    /// Best non-null answer, if any
    pub best_non_null: Option<NbestEntry>,
    /// Null score minus the best non-null score (SQuAD 2.0 only)
    pub null_odds: Option<f64>,
    pub nbest: Vec<NbestEntry>,
}

/// # Builds the final predictions from the ranked candidates
#[derive(Debug, Clone)]
pub struct AnswerAggregator {
    /// Maximum number of distinct answers kept per example
    pub n_best_size: usize,
    /// Enables the "no answer" decision
    pub version_2_with_negative: bool,
    /// "No answer" is predicted if the null odds exceed this threshold
    pub null_score_diff_threshold: f64,
    /// Logs the candidates whose text could not be aligned with the context
    pub verbose_logging: bool,
}

impl AnswerAggregator {
    /// Builds the prediction for an example from its windows and ranked candidates
    pub fn aggregate<T: QaTokenizer + ?Sized>(
        &self,
        example: &SquadExample,
        features: &[&QaFeature],
        prelim: &PrelimPredictions,
        tokenizer: &T,
    ) -> Result<ExamplePrediction, ReaderError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut entries: Vec<NbestEntry> = Vec::with_capacity(self.n_best_size);

        for candidate in prelim.candidates.iter() {
            if entries.len() >= self.n_best_size {
                break;
            }
            let text = if candidate.is_null {
                String::new()
            } else {
                self.candidate_text(example, features, candidate, tokenizer)?
            };
            if !seen.insert(dedup_key(&text)) {
                continue;
            }
            entries.push(NbestEntry {
                text,
                probability: 0.0,
                start_logit: candidate.start_score,
                end_logit: candidate.end_score,
            });
        }

        if !seen.contains("") {
            if let Some(null) = prelim.candidates.iter().find(|candidate| candidate.is_null) {
                entries.push(NbestEntry {
                    text: String::new(),
                    probability: 0.0,
                    start_logit: null.start_score,
                    end_logit: null.end_score,
                });
            }
        }

        let probabilities =
            compute_softmax(&entries.iter().map(NbestEntry::score).collect::<Vec<f64>>());
        for (entry, probability) in entries.iter_mut().zip(probabilities) {
            entry.probability = probability;
        }

        let best_non_null = entries.iter().find(|entry| !entry.text.is_empty()).cloned();
        let null_odds = if self.version_2_with_negative {
            let null_score = prelim.null_score.unwrap_or(0.0);
            let best_score = best_non_null.as_ref().map_or(0.0, NbestEntry::score);
            Some(null_score - best_score)
        } else {
            None
        };

        let selected = match null_odds {
            Some(null_odds) if null_odds > self.null_score_diff_threshold => None,
            _ => best_non_null.as_ref(),
        };
        let (answer, probability, score) = match selected {
            Some(entry) => (entry.text.clone(), entry.probability, entry.score()),
            None => {
                let probability = entries
                    .iter()
                    .find(|entry| entry.text.is_empty())
                    .map_or(0.0, |entry| entry.probability);
                (
                    String::new(),
                    probability,
                    prelim.null_score.unwrap_or(0.0),
                )
            }
        };

        Ok(ExamplePrediction {
            qas_id: example.qas_id.clone(),
            title: example.title.clone(),
            context: example.context_text.clone(),
            answer,
            probability,
            score,
            best_non_null,
            null_odds,
            nbest: entries,
        })
    }

    fn candidate_text<T: QaTokenizer + ?Sized>(
        &self,
        example: &SquadExample,
        features: &[&QaFeature],
        candidate: &SpanCandidate,
        tokenizer: &T,
    ) -> Result<String, ReaderError> {
        let feature = features.get(candidate.feature_index).ok_or_else(|| {
            ReaderError::DataError(format!(
                "candidate refers to missing window {} of example {}",
                candidate.feature_index, example.qas_id
            ))
        })?;
        let (orig_doc_start, orig_doc_end) = match (
            feature.token_to_orig_map.get(&candidate.start_index),
            feature.token_to_orig_map.get(&candidate.end_index),
        ) {
            (Some(start), Some(end)) if start <= end && *end < example.doc_tokens.len() => {
                (*start, *end)
            }
            _ => {
                return Err(ReaderError::DataError(format!(
                    "span ({}, {}) of feature {} is outside of the context",
                    candidate.start_index, candidate.end_index, feature.unique_id
                )));
            }
        };

        let tok_text = tokenizer
            .convert_tokens_to_string(&feature.tokens[candidate.start_index..=candidate.end_index]);
        let tok_text = whitespace_tokenize(&tok_text).join(" ");
        let orig_text = example.doc_tokens[orig_doc_start..=orig_doc_end].join(" ");
        Ok(get_final_text(
            &tok_text,
            &orig_text,
            tokenizer,
            self.verbose_logging,
        ))
    }
}

fn dedup_key(text: &str) -> String {
    whitespace_tokenize(text).join(" ").to_lowercase()
}

/// Decodes and aggregates the predictions of all examples.
///
/// Features are grouped by `example_index` and joined with the model outputs on `unique_id`.
/// Every feature must have a model output.
pub fn compute_predictions<T: QaTokenizer + ?Sized>(
    examples: &[SquadExample],
    features: &[QaFeature],
    results: &[RawResult],
    decoder: &SpanDecoder,
    aggregator: &AnswerAggregator,
    tokenizer: &T,
) -> Result<Vec<ExamplePrediction>, ReaderError> {
    let mut features_per_example: HashMap<usize, Vec<&QaFeature>> = HashMap::new();
    for feature in features.iter() {
        features_per_example
            .entry(feature.example_index)
            .or_insert_with(Vec::new)
            .push(feature);
    }
    let results_per_id: HashMap<usize, &RawResult> = results
        .iter()
        .map(|result| (result.unique_id, result))
        .collect();

    let mut predictions = Vec::with_capacity(examples.len());
    for (example_index, example) in examples.iter().enumerate() {
        let example_features = features_per_example
            .remove(&example_index)
            .unwrap_or_default();
        let windows = example_features
            .iter()
            .map(|feature| {
                results_per_id
                    .get(&feature.unique_id)
                    .map(|result| (*feature, *result))
                    .ok_or_else(|| {
                        ReaderError::DataError(format!(
                            "no model output for feature {}",
                            feature.unique_id
                        ))
                    })
            })
            .collect::<Result<Vec<_>, ReaderError>>()?;
        let prelim = decoder.decode(&windows)?;
        predictions.push(aggregator.aggregate(example, &example_features, &prelim, tokenizer)?);
    }
    Ok(predictions)
}

/// Softmax of raw scores, empty for empty inputs
pub fn compute_softmax(scores: &[f64]) -> Vec<f64> {
    let max_score = match scores.iter().copied().reduce(f64::max) {
        Some(max_score) => max_score,
        None => return vec![],
    };
    let exp_scores: Vec<f64> = scores
        .iter()
        .map(|score| (score - max_score).exp())
        .collect();
    let total: f64 = exp_scores.iter().sum();
    exp_scores.iter().map(|score| score / total).collect()
}

/// Projects the tokenized prediction back to the original text.
///
/// The original text is normalized by the pre-tokenizer of the model (casing, accents, punctuation
/// split), the prediction is located in the normalized text, and both are aligned character by
/// character after removing spaces. If the alignment fails, the original text is returned.
pub fn get_final_text<T: QaTokenizer + ?Sized>(
    pred_text: &str,
    orig_text: &str,
    tokenizer: &T,
    verbose_logging: bool,
) -> String {
    let tok_text = tokenizer.basic_tokenize(orig_text).join(" ");

    let start_position = match tok_text.find(pred_text) {
        Some(byte_position) if !pred_text.is_empty() => tok_text[..byte_position].chars().count(),
        _ => {
            if verbose_logging {
                log::debug!("Unable to find text: '{}' in '{}'", pred_text, orig_text);
            }
            return orig_text.to_string();
        }
    };
    let end_position = start_position + pred_text.chars().count() - 1;

    let (orig_ns_text, orig_ns_to_s_map) = strip_spaces(orig_text);
    let (tok_ns_text, tok_ns_to_s_map) = strip_spaces(&tok_text);
    if orig_ns_text.chars().count() != tok_ns_text.chars().count() {
        if verbose_logging {
            log::debug!(
                "Length not equal after stripping spaces: '{}' vs '{}'",
                orig_ns_text,
                tok_ns_text
            );
        }
        return orig_text.to_string();
    }

    let tok_s_to_ns_map: HashMap<usize, usize> = tok_ns_to_s_map
        .iter()
        .enumerate()
        .map(|(ns_index, s_index)| (*s_index, ns_index))
        .collect();
    let orig_position = |tok_position: usize| {
        tok_s_to_ns_map
            .get(&tok_position)
            .and_then(|ns_index| orig_ns_to_s_map.get(*ns_index))
            .copied()
    };

    match (orig_position(start_position), orig_position(end_position)) {
        (Some(orig_start), Some(orig_end)) if orig_start <= orig_end => orig_text
            .chars()
            .skip(orig_start)
            .take(orig_end - orig_start + 1)
            .collect(),
        _ => {
            if verbose_logging {
                log::debug!("Couldn't map positions of '{}' in '{}'", pred_text, orig_text);
            }
            orig_text.to_string()
        }
    }
}

/// Removes the spaces of a text, returning the mapping from the positions of the stripped text to
/// the positions of the original text (in characters).
fn strip_spaces(text: &str) -> (String, Vec<usize>) {
    let mut ns_text = String::with_capacity(text.len());
    let mut ns_to_s_map = Vec::with_capacity(text.len());
    for (index, character) in text.chars().enumerate() {
        if character == ' ' {
            continue;
        }
        ns_to_s_map.push(index);
        ns_text.push(character);
    }
    (ns_text, ns_to_s_map)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pipelines::common::OutputKind;
    use crate::pipelines::squad::decoding::SpanDecoder;
    use crate::pipelines::squad::features::{FeatureBuilder, FIRST_UNIQUE_ID};
    use crate::pipelines::squad::test_utils::{beam_result, standard_result, WordTokenizer};

    fn aggregator(version_2_with_negative: bool) -> AnswerAggregator {
        AnswerAggregator {
            n_best_size: 20,
            version_2_with_negative,
            null_score_diff_threshold: 0.0,
            verbose_logging: false,
        }
    }

    #[test]
    fn final_text_is_trimmed_to_prediction() {
        let tokenizer = WordTokenizer::default();
        assert_eq!(
            get_final_text("steve smith", "Steve Smith's", &tokenizer, false),
            "Steve Smith"
        );
        assert_eq!(get_final_text("1895", "(1895-1943).", &tokenizer, false), "1895");
        // cased prediction against lower cased alignment falls back to the original text
        assert_eq!(
            get_final_text("Steve Smith", "Steve Smith's", &tokenizer, false),
            "Steve Smith's"
        );
        assert_eq!(
            get_final_text("Steve Smith", "Steve Smith's", &WordTokenizer::cased(), false),
            "Steve Smith"
        );
        assert_eq!(get_final_text("", "Paris", &tokenizer, false), "Paris");
    }

    #[test]
    fn final_text_keeps_accents_of_the_context() {
        let tokenizer = WordTokenizer::default();
        assert_eq!(get_final_text("cafe", "Café.", &tokenizer, false), "Café");
        assert_eq!(
            get_final_text("creme brulee", "(Crème brûlée),", &tokenizer, false),
            "Crème brûlée"
        );
    }

    #[test]
    fn softmax_sums_to_one() {
        let probabilities = compute_softmax(&[1.0, 2.0, 3.0]);
        assert!((probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(probabilities[2] > probabilities[1] && probabilities[1] > probabilities[0]);
        assert!(compute_softmax(&[]).is_empty());
    }

    fn amsterdam_windows() -> (SquadExample, Vec<QaFeature>) {
        let tokenizer = WordTokenizer::default();
        let example = SquadExample::new(
            "id",
            "Where does Amy live?",
            "Amy lives in Amsterdam. Amy lives in amsterdam.",
            "Amy",
        );
        let builder = FeatureBuilder::new(&tokenizer, 24, 4, 8).unwrap();
        let features = builder.convert_example(&example, 0, FIRST_UNIQUE_ID, false).unwrap();
        (example, features)
    }

    #[test]
    fn duplicated_texts_are_merged() -> anyhow::Result<()> {
        let tokenizer = WordTokenizer::default();
        let (example, features) = amsterdam_windows();
        assert_eq!(features.len(), 1);
        let feature = &features[0];
        // [CLS] where does amy live ? [SEP] amy lives in amster ##dam . amy lives in amster ##dam . [SEP]
        let mut start_logits = vec![0.0; 24];
        let mut end_logits = vec![0.0; 24];
        start_logits[10] = 5.0;
        end_logits[11] = 5.0;
        start_logits[16] = 4.0;
        end_logits[17] = 4.0;
        let result = standard_result(feature.unique_id, start_logits, end_logits);
        let decoder = SpanDecoder::new(OutputKind::Standard, 20, 30, false, 5, 5);

        let predictions = compute_predictions(
            &[example],
            &features,
            &[result],
            &decoder,
            &aggregator(false),
            &tokenizer,
        )?;
        let prediction = &predictions[0];
        assert_eq!(prediction.answer, "Amsterdam");
        assert_eq!(prediction.null_odds, None);
        let texts: Vec<&str> = prediction.nbest.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts.iter().filter(|t| t.to_lowercase() == "amsterdam").count(), 1);
        assert!((prediction.nbest.iter().map(|e| e.probability).sum::<f64>() - 1.0).abs() < 1e-9);
        for pair in prediction.nbest.windows(2) {
            assert!(pair[0].score() >= pair[1].score());
        }
        Ok(())
    }

    #[test]
    fn null_answer_above_threshold() -> anyhow::Result<()> {
        let tokenizer = WordTokenizer::default();
        let (example, features) = amsterdam_windows();
        let feature = &features[0];
        let mut start_logits = vec![0.0; 24];
        let mut end_logits = vec![0.0; 24];
        start_logits[0] = 6.0;
        end_logits[0] = 6.0;
        start_logits[10] = 5.0;
        end_logits[11] = 5.0;
        let result = standard_result(feature.unique_id, start_logits, end_logits);
        let decoder = SpanDecoder::new(OutputKind::Standard, 20, 30, true, 5, 5);

        let predictions = compute_predictions(
            &[example.clone()],
            &features,
            &[result.clone()],
            &decoder,
            &aggregator(true),
            &tokenizer,
        )?;
        assert_eq!(predictions[0].answer, "");
        assert_eq!(predictions[0].null_odds, Some(2.0));
        assert_eq!(predictions[0].score, 12.0);
        assert!(predictions[0].nbest.iter().any(|entry| entry.text.is_empty()));
        assert_eq!(
            predictions[0].best_non_null.as_ref().map(|e| e.text.as_str()),
            Some("Amsterdam")
        );

        let lenient = AnswerAggregator {
            null_score_diff_threshold: 2.5,
            ..aggregator(true)
        };
        let predictions =
            compute_predictions(&[example], &features, &[result], &decoder, &lenient, &tokenizer)?;
        assert_eq!(predictions[0].answer, "Amsterdam");
        Ok(())
    }

    #[test]
    fn null_entry_is_kept_when_outranked() -> anyhow::Result<()> {
        let tokenizer = WordTokenizer::default();
        let (example, features) = amsterdam_windows();
        let feature = &features[0];
        let mut start_logits = vec![0.0; 24];
        let mut end_logits = vec![0.0; 24];
        start_logits[10] = 5.0;
        start_logits[7] = 4.0;
        end_logits[11] = 5.0;
        let result = standard_result(feature.unique_id, start_logits, end_logits);
        let decoder = SpanDecoder::new(OutputKind::Standard, 2, 30, true, 5, 5);
        let aggregator = AnswerAggregator {
            n_best_size: 2,
            null_score_diff_threshold: -20.0,
            ..aggregator(true)
        };

        let predictions =
            compute_predictions(&[example], &features, &[result], &decoder, &aggregator, &tokenizer)?;
        let prediction = &predictions[0];
        let texts: Vec<&str> = prediction.nbest.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Amsterdam", "Amy lives in Amsterdam", ""]);
        assert_eq!(prediction.answer, "");
        assert_eq!(prediction.null_odds, Some(-10.0));
        assert!(prediction.probability > 0.0);
        assert_eq!(prediction.probability, prediction.nbest[2].probability);
        assert!((prediction.nbest.iter().map(|e| e.probability).sum::<f64>() - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn beam_predictions_exclude_null_from_nbest() -> anyhow::Result<()> {
        let tokenizer = WordTokenizer::default();
        let (example, features) = amsterdam_windows();
        let feature = &features[0];
        let result = beam_result(
            feature.unique_id,
            vec![-0.2, -1.5],
            vec![10, 0],
            vec![-0.1, -0.4],
            vec![11, 12],
            -3.0,
        );
        let decoder = SpanDecoder::new(OutputKind::Beam, 20, 30, true, 2, 2);

        let predictions = compute_predictions(
            &[example],
            &features,
            &[result],
            &decoder,
            &aggregator(true),
            &tokenizer,
        )?;
        let prediction = &predictions[0];
        assert_eq!(prediction.answer, "Amsterdam");
        assert!(prediction.nbest.iter().all(|entry| !entry.text.is_empty()));
        assert!((prediction.null_odds.unwrap() + 2.7).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn missing_model_output_is_an_error() {
        let tokenizer = WordTokenizer::default();
        let (example, features) = amsterdam_windows();
        let decoder = SpanDecoder::new(OutputKind::Standard, 20, 30, false, 5, 5);
        assert!(matches!(
            compute_predictions(
                &[example],
                &features,
                &[],
                &decoder,
                &aggregator(false),
                &tokenizer
            ),
            Err(ReaderError::DataError(_))
        ));
    }

    #[test]
    fn example_without_candidates_predicts_empty_answer() -> anyhow::Result<()> {
        let tokenizer = WordTokenizer::default();
        let example = SquadExample::new("id", "Where?", "", "");
        let decoder = SpanDecoder::new(OutputKind::Standard, 20, 30, false, 5, 5);
        let predictions = compute_predictions(
            &[example],
            &[],
            &[],
            &decoder,
            &aggregator(false),
            &tokenizer,
        )?;
        assert_eq!(predictions[0].answer, "");
        assert!(predictions[0].nbest.is_empty());
        Ok(())
    }
}
