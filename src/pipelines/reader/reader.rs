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

use crate::common::config::Config;
use crate::common::error::ReaderError;
use crate::pipelines::reader::config::{ReaderConfig, TRAINING_ARGS_NAME};
use crate::pipelines::reader::distributed::{Coordinator, SingleProcess};
use crate::pipelines::reader::model::WEIGHTS_NAME;
use crate::pipelines::reader::runtime::RuntimeContext;
use crate::pipelines::reader::training::{train, TrainingSummary};
use crate::pipelines::squad::aggregation::{
    compute_predictions, AnswerAggregator, ExamplePrediction, NbestEntry,
};
use crate::pipelines::squad::cache::FeatureCache;
use crate::pipelines::squad::decoding::{RawResult, SpanDecoder};
use crate::pipelines::squad::evaluation::{
    evaluate_predictions, EvaluationResults, DEFAULT_NA_PROB_THRESH,
};
use crate::pipelines::squad::example::{QaInput, SquadDataset, SquadExample, SquadInput};
use crate::pipelines::squad::features::{FeatureBuilder, QaFeature};
use crate::pipelines::squad::predictions::PredictionOutput;
use std::fs;
use std::path::{Path, PathBuf};

/// # Final answer selected across the paragraphs of a prediction
#[derive(Debug, Clone, PartialEq)]
pub struct FinalPrediction {
    /// Answer text, empty if every paragraph predicted "no answer"
    pub answer: String,
    /// Title of the document the answer was extracted from
    pub title: String,
    /// Paragraph the answer was extracted from
    pub paragraph: String,
    /// Score (start + end) of the answer
    pub score: f64,
}

/// Sizes used to build features
struct FeatureSizes {
    max_seq_length: usize,
    doc_stride: usize,
    max_query_length: usize,
    overwrite_cache: bool,
}

/// # Extractive question answering reader
/// Fine-tunes a question answering model on SQuAD data, evaluates it with the official SQuAD
/// metrics and extracts answers from candidate paragraphs.
///
/// The reader owns its configuration and a `RuntimeContext` (tokenizer and model) created once.
/// Multi-process training is coordinated by an injected `Coordinator`, by default a single process.
pub struct Reader {
    config: ReaderConfig,
    context: RuntimeContext,
    coordinator: Box<dyn Coordinator>,
}

impl Reader {
    /// Build a new `Reader`, loading the tokenizer and the model from the configuration resources
    ///
    /// # Arguments
    ///
    /// * `config` - `ReaderConfig` object containing the resource references and settings
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use squad_reader::pipelines::common::ModelType;
    /// use squad_reader::pipelines::reader::{Reader, ReaderConfig};
    /// use squad_reader::resources::LocalResource;
    /// use std::path::PathBuf;
    ///
    /// let config = ReaderConfig::new(
    ///     ModelType::Bert,
    ///     LocalResource::from(PathBuf::from("path/to/model.pt")),
    ///     LocalResource::from(PathBuf::from("path/to/vocab.txt")),
    /// );
    /// let reader = Reader::new(config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: ReaderConfig) -> Result<Reader, ReaderError> {
        let context = RuntimeContext::new(&config)?;
        Ok(Reader::from_context(config, context))
    }

    /// Builds a reader from an already initialized runtime context.
    pub fn from_context(config: ReaderConfig, context: RuntimeContext) -> Reader {
        Reader {
            config,
            context,
            coordinator: Box::new(SingleProcess),
        }
    }

    /// Replaces the process coordinator.
    pub fn with_coordinator<C: Coordinator + 'static>(mut self, coordinator: C) -> Reader {
        self.coordinator = Box::new(coordinator);
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// Fine-tunes the model on a SQuAD training set.
    ///
    /// The trained model, the vocabulary and the training configuration are saved to the output
    /// directory, which must be empty unless `overwrite_output_dir` is set.
    ///
    /// # Arguments
    ///
    /// * `input` - SQuAD training data (file or in-memory dataset)
    pub fn fit(&mut self, input: &SquadInput) -> Result<TrainingSummary, ReaderError> {
        let output_dir = self.config.training.output_dir.clone();
        if is_non_empty_dir(&output_dir)? && !self.config.training.overwrite_output_dir {
            return Err(ReaderError::ConfigError(format!(
                "output directory {:?} already exists and is not empty, set overwrite_output_dir to overwrite it",
                output_dir
            )));
        }

        let dataset = input.load()?;
        let examples =
            dataset.examples(true, self.config.training.version_2_with_negative)?;
        let sizes = FeatureSizes {
            max_seq_length: self.config.training.max_seq_length,
            doc_stride: self.config.training.doc_stride,
            max_query_length: self.config.training.max_query_length,
            overwrite_cache: self.config.training.overwrite_cache,
        };
        let features = self.load_features(input, &examples, false, &sizes)?;

        let summary = train(
            self.context.model_mut(),
            &features,
            &self.config.training,
            self.coordinator.as_ref(),
        )?;
        log::info!(
            "global_step = {}, average loss = {}",
            summary.global_step,
            summary.average_loss
        );

        if self.coordinator.is_main_process() {
            log::info!("Saving model to {:?}", output_dir);
            self.context.model().save(&output_dir)?;
            if let Some(vocab_path) = self.context.vocab_path() {
                if let Some(file_name) = vocab_path.file_name() {
                    fs::copy(vocab_path, output_dir.join(file_name))?;
                }
            }
            self.config
                .training
                .to_file(output_dir.join(TRAINING_ARGS_NAME))?;
        }
        self.coordinator.barrier()?;
        Ok(summary)
    }

    /// Evaluates the model against the gold answers of a SQuAD dataset.
    ///
    /// Prediction files are written to the inference output directory. If
    /// `eval_all_checkpoints` is set, every `checkpoint-{step}` directory holding weights is
    /// loaded and evaluated in turn, its metrics suffixed with `_{step}`; the final model saved
    /// in the output directory (if any) is evaluated last, without suffix.
    ///
    /// # Arguments
    ///
    /// * `input` - SQuAD data with gold answers
    ///
    /// # Returns
    /// * `EvaluationResults` metric name -> value (`exact`, `f1`, `total`, `HasAns_*`, `NoAns_*`,
    /// `best_*` when null odds are available)
    pub fn evaluate(&mut self, input: &SquadInput) -> Result<EvaluationResults, ReaderError> {
        let mut results = EvaluationResults::new();
        if !self.coordinator.is_main_process() {
            return Ok(results);
        }
        let dataset = input.load()?;
        let examples = dataset.examples(false, self.config.inference.version_2_with_negative)?;
        let sizes = FeatureSizes {
            max_seq_length: self.config.inference.max_seq_length,
            doc_stride: self.config.inference.doc_stride,
            max_query_length: self.config.inference.max_query_length,
            overwrite_cache: self.config.inference.overwrite_cache,
        };
        let features = self.load_features(input, &examples, true, &sizes)?;

        let output_dir = self.config.inference.output_dir.clone();
        let checkpoints = if self.config.inference.eval_all_checkpoints {
            list_checkpoints(&output_dir)?
        } else {
            vec![]
        };
        if checkpoints.is_empty() {
            return self.evaluate_current(&dataset, &examples, &features, "");
        }

        log::info!("Evaluate the following checkpoints: {:?}", checkpoints);
        for (step, checkpoint) in checkpoints.iter() {
            self.context.model_mut().load_checkpoint(checkpoint)?;
            let suffix = step.to_string();
            let checkpoint_results =
                self.evaluate_current(&dataset, &examples, &features, &suffix)?;
            for (name, value) in checkpoint_results {
                results.insert(format!("{}_{}", name, suffix), value);
            }
        }
        if output_dir.join(WEIGHTS_NAME).is_file() {
            self.context.model_mut().load_checkpoint(&output_dir)?;
            results.extend(self.evaluate_current(&dataset, &examples, &features, "")?);
        }
        log::info!("Results: {:?}", results);
        Ok(results)
    }

    /// Extracts the answer to a question from candidate paragraphs.
    ///
    /// # Arguments
    ///
    /// * `inputs` - question / paragraph pairs, typically one question against the paragraphs
    /// returned by a retriever
    ///
    /// # Returns
    /// * `PredictionOutput` with the prediction, n-best list and null odds of every pair
    /// * `FinalPrediction` the best non-null answer across all pairs
    pub fn predict(
        &self,
        inputs: &[QaInput],
    ) -> Result<(PredictionOutput, FinalPrediction), ReaderError> {
        let dataset = SquadDataset::from_inputs(inputs);
        let examples = dataset.examples(false, self.config.inference.version_2_with_negative)?;
        let builder = FeatureBuilder::new(
            self.context.inference_tokenizer(),
            self.config.inference.max_seq_length,
            self.config.inference.doc_stride,
            self.config.inference.max_query_length,
        )?;
        let features = builder.convert_examples(&examples, false)?;
        let predictions = self.compute_predictions(&examples, &features)?;
        Ok((
            PredictionOutput::new(&predictions),
            select_final_prediction(&predictions),
        ))
    }

    fn evaluate_current(
        &self,
        dataset: &SquadDataset,
        examples: &[SquadExample],
        features: &[QaFeature],
        prefix: &str,
    ) -> Result<EvaluationResults, ReaderError> {
        log::info!("***** Running evaluation {} *****", prefix);
        log::info!("  Num examples = {}", examples.len());
        log::info!("  Batch size = {}", self.config.inference.eval_batch_size);
        let predictions = self.compute_predictions(examples, features)?;
        let output = PredictionOutput::new(&predictions);
        output.write(&self.config.inference.output_dir, prefix)?;

        let results = evaluate_predictions(
            dataset,
            &output.predictions,
            output.null_odds.as_ref(),
            DEFAULT_NA_PROB_THRESH,
        );
        log::info!("Results {}: {:?}", prefix, results);
        Ok(results)
    }

    fn compute_predictions(
        &self,
        examples: &[SquadExample],
        features: &[QaFeature],
    ) -> Result<Vec<ExamplePrediction>, ReaderError> {
        let results = self.run_inference(features)?;
        let inference = &self.config.inference;
        let decoder = SpanDecoder::new(
            self.context.output_kind(),
            inference.n_best_size,
            inference.max_answer_length,
            inference.version_2_with_negative,
            inference.start_n_top,
            inference.end_n_top,
        );
        let aggregator = AnswerAggregator {
            n_best_size: inference.n_best_size,
            version_2_with_negative: inference.version_2_with_negative,
            null_score_diff_threshold: inference.null_score_diff_threshold,
            verbose_logging: inference.verbose_logging,
        };
        compute_predictions(
            examples,
            features,
            &results,
            &decoder,
            &aggregator,
            self.context.inference_tokenizer(),
        )
    }

    fn run_inference(&self, features: &[QaFeature]) -> Result<Vec<RawResult>, ReaderError> {
        let batch_size = self.config.inference.eval_batch_size.max(1);
        let mut results = Vec::with_capacity(features.len());
        for batch in features.chunks(batch_size) {
            let batch: Vec<&QaFeature> = batch.iter().collect();
            let outputs = self.context.model().predict(&batch)?;
            if outputs.len() != batch.len() {
                return Err(ReaderError::DataError(format!(
                    "model returned {} outputs for a batch of {} features",
                    outputs.len(),
                    batch.len()
                )));
            }
            results.extend(
                batch
                    .iter()
                    .zip(outputs.into_iter())
                    .map(|(feature, output)| RawResult {
                        unique_id: feature.unique_id,
                        output,
                    }),
            );
        }
        Ok(results)
    }

    /// Reads the features from the cache next to the input file, or builds (and caches) them.
    fn load_features(
        &self,
        input: &SquadInput,
        examples: &[SquadExample],
        evaluate: bool,
        sizes: &FeatureSizes,
    ) -> Result<Vec<QaFeature>, ReaderError> {
        let cache = input.path().map(|path| {
            FeatureCache::new(
                path,
                evaluate,
                &self.config.training.model_name_or_path,
                sizes.max_seq_length,
            )
        });

        if let Some(cache) = cache.as_ref() {
            if cache.exists() && !sizes.overwrite_cache {
                match cache.load() {
                    Ok(features) => {
                        log::info!("Loading features from cached file {:?}", cache.path());
                        return Ok(features);
                    }
                    Err(error) => {
                        log::warn!("{}, recomputing the features", error);
                    }
                }
            }
        }

        log::info!("Creating features from {} examples", examples.len());
        let tokenizer = if evaluate {
            self.context.inference_tokenizer()
        } else {
            self.context.training_tokenizer()
        };
        let builder = FeatureBuilder::new(
            tokenizer,
            sizes.max_seq_length,
            sizes.doc_stride,
            sizes.max_query_length,
        )?;
        let features = builder.convert_examples(examples, !evaluate)?;
        if let Some(cache) = cache.as_ref() {
            if self.coordinator.is_main_process() {
                log::info!("Saving features into cached file {:?}", cache.path());
                if let Err(error) = cache.save(&features) {
                    log::warn!("Could not save the feature cache: {}", error);
                }
            }
        }
        self.coordinator.barrier()?;
        Ok(features)
    }
}

fn is_non_empty_dir(path: &Path) -> Result<bool, ReaderError> {
    if !path.is_dir() {
        return Ok(false);
    }
    Ok(fs::read_dir(path)?.next().is_some())
}

/// `checkpoint-{step}` sub-directories holding weights, sorted by step
fn list_checkpoints(output_dir: &Path) -> Result<Vec<(usize, PathBuf)>, ReaderError> {
    let mut checkpoints = vec![];
    if !output_dir.is_dir() {
        return Ok(checkpoints);
    }
    for entry in fs::read_dir(output_dir)? {
        let path = entry?.path();
        let step = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix("checkpoint-"))
            .and_then(|step| step.parse::<usize>().ok());
        if let Some(step) = step {
            if path.join(WEIGHTS_NAME).is_file() {
                checkpoints.push((step, path));
            }
        }
    }
    checkpoints.sort_by_key(|(step, _)| *step);
    Ok(checkpoints)
}

fn select_final_prediction(predictions: &[ExamplePrediction]) -> FinalPrediction {
    let mut best: Option<(&ExamplePrediction, &NbestEntry)> = None;
    for prediction in predictions.iter() {
        if let Some(entry) = prediction.best_non_null.as_ref() {
            if best.map_or(true, |(_, current)| entry.score() > current.score()) {
                best = Some((prediction, entry));
            }
        }
    }
    match best {
        Some((prediction, entry)) => FinalPrediction {
            answer: entry.text.clone(),
            title: prediction.title.clone(),
            paragraph: prediction.context.clone(),
            score: entry.score(),
        },
        None => FinalPrediction {
            answer: String::new(),
            title: String::new(),
            paragraph: String::new(),
            score: 0.0,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn prediction(qas_id: &str, title: &str, best: Option<(&str, f64)>) -> ExamplePrediction {
        let best_non_null = best.map(|(text, score)| NbestEntry {
            text: text.to_string(),
            probability: 1.0,
            start_logit: score,
            end_logit: 0.0,
        });
        ExamplePrediction {
            qas_id: qas_id.to_string(),
            title: title.to_string(),
            context: format!("{} context", title),
            answer: best.map(|(text, _)| text.to_string()).unwrap_or_default(),
            probability: 1.0,
            score: best.map(|(_, score)| score).unwrap_or_default(),
            best_non_null: best_non_null.clone(),
            null_odds: None,
            nbest: best_non_null.into_iter().collect(),
        }
    }

    #[test]
    fn final_prediction_is_the_best_non_null_answer() {
        let predictions = vec![
            prediction("a", "first", Some(("Paris", 3.0))),
            prediction("b", "second", None),
            prediction("c", "third", Some(("Lyon", 7.5))),
            prediction("d", "fourth", Some(("Nice", 7.5))),
        ];
        let final_prediction = select_final_prediction(&predictions);
        assert_eq!(final_prediction.answer, "Lyon");
        assert_eq!(final_prediction.title, "third");
        assert_eq!(final_prediction.paragraph, "third context");
        assert_eq!(final_prediction.score, 7.5);
    }

    #[test]
    fn final_prediction_without_answer_is_empty() {
        let final_prediction = select_final_prediction(&[prediction("a", "first", None)]);
        assert_eq!(final_prediction.answer, "");
        assert_eq!(final_prediction.title, "");
    }

    #[test]
    fn checkpoints_are_sorted_by_step() -> anyhow::Result<()> {
        let output_dir = tempfile::tempdir()?;
        for name in &["checkpoint-100", "checkpoint-50", "checkpoint-7", "runs"] {
            let directory = output_dir.path().join(name);
            fs::create_dir_all(&directory)?;
            fs::write(directory.join(WEIGHTS_NAME), "")?;
        }
        fs::create_dir_all(output_dir.path().join("checkpoint-200"))?;

        let checkpoints = list_checkpoints(output_dir.path())?;
        let steps: Vec<usize> = checkpoints.iter().map(|(step, _)| *step).collect();
        assert_eq!(steps, vec![7, 50, 100]);
        assert_eq!(checkpoints[0].1, output_dir.path().join("checkpoint-7"));
        Ok(())
    }

    #[test]
    fn missing_output_dir_is_empty() -> anyhow::Result<()> {
        let output_dir = tempfile::tempdir()?;
        assert!(!is_non_empty_dir(&output_dir.path().join("missing"))?);
        assert!(!is_non_empty_dir(output_dir.path())?);
        fs::write(output_dir.path().join("file"), "")?;
        assert!(is_non_empty_dir(output_dir.path())?);
        Ok(())
    }
}
