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
use crate::common::resources::ResourceProvider;
use crate::pipelines::common::ModelType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tch::Device;

/// Name of the training configuration file saved next to the trained weights
pub const TRAINING_ARGS_NAME: &str = "training_args.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// # Configuration for fine-tuning a reader
pub struct TrainingConfig {
    /// Model family (default: Bert)
    pub model_type: ModelType,
    /// Model identifier, its last path component names the feature caches (default: "bert-base-uncased")
    pub model_name_or_path: String,
    /// Directory receiving the checkpoints and the trained model (default: "output")
    pub output_dir: PathBuf,
    /// Length of the model inputs (default: 384)
    pub max_seq_length: usize,
    /// Stride between successive windows over a long context (default: 128)
    pub doc_stride: usize,
    /// Maximum number of question tokens (default: 64)
    pub max_query_length: usize,
    /// Lower case inputs (default: true)
    pub do_lower_case: bool,
    /// Number of features per training batch (default: 8)
    pub train_batch_size: usize,
    /// Peak learning rate (default: 5e-5)
    pub learning_rate: f64,
    /// Number of batches accumulated before each optimizer step (default: 1)
    pub gradient_accumulation_steps: usize,
    /// Weight decay (default: 0.0)
    pub weight_decay: f64,
    /// Epsilon of the Adam optimizer (default: 1e-8)
    pub adam_epsilon: f64,
    /// Gradient clipping norm (default: 1.0)
    pub max_grad_norm: f64,
    /// Number of training epochs (default: 3.0)
    pub num_train_epochs: f64,
    /// Total number of optimizer steps, overrides `num_train_epochs` if set (default: None)
    pub max_steps: Option<usize>,
    /// Linear warmup steps (default: 0)
    pub warmup_steps: usize,
    /// Log the training loss every `logging_steps` optimizer steps (default: 50)
    pub logging_steps: usize,
    /// Save a checkpoint every `save_steps` optimizer steps (default: 50)
    pub save_steps: usize,
    /// Random seed (default: 42)
    pub seed: u64,
    /// Allow training into a non-empty output directory (default: false)
    pub overwrite_output_dir: bool,
    /// Recompute the features even if a cache exists (default: false)
    pub overwrite_cache: bool,
    /// SQuAD 2.0 data with unanswerable questions (default: true)
    pub version_2_with_negative: bool,
}

impl Default for TrainingConfig {
    fn default() -> TrainingConfig {
        TrainingConfig {
            model_type: ModelType::Bert,
            model_name_or_path: "bert-base-uncased".to_string(),
            output_dir: PathBuf::from("output"),
            max_seq_length: 384,
            doc_stride: 128,
            max_query_length: 64,
            do_lower_case: true,
            train_batch_size: 8,
            learning_rate: 5e-5,
            gradient_accumulation_steps: 1,
            weight_decay: 0.0,
            adam_epsilon: 1e-8,
            max_grad_norm: 1.0,
            num_train_epochs: 3.0,
            max_steps: None,
            warmup_steps: 0,
            logging_steps: 50,
            save_steps: 50,
            seed: 42,
            overwrite_output_dir: false,
            overwrite_cache: false,
            version_2_with_negative: true,
        }
    }
}

impl Config for TrainingConfig {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// # Configuration for evaluation and prediction
pub struct InferenceConfig {
    /// Directory receiving the prediction files (default: "output")
    pub output_dir: PathBuf,
    /// Length of the model inputs (default: 384)
    pub max_seq_length: usize,
    /// Stride between successive windows over a long context (default: 128)
    pub doc_stride: usize,
    /// Maximum number of question tokens (default: 64)
    pub max_query_length: usize,
    /// Lower case inputs of evaluation and prediction (default: true)
    pub do_lower_case: bool,
    /// Number of features per inference batch (default: 8)
    pub eval_batch_size: usize,
    /// Number of candidates considered per window and kept per example (default: 20)
    pub n_best_size: usize,
    /// Maximum answer length in tokens (default: 30)
    pub max_answer_length: usize,
    /// "No answer" is predicted if the null odds exceed this threshold (default: 0.0)
    pub null_score_diff_threshold: f64,
    /// SQuAD 2.0 mode, enabling "no answer" predictions (default: true)
    pub version_2_with_negative: bool,
    /// Log answer text alignment failures (default: false)
    pub verbose_logging: bool,
    /// Evaluate every `checkpoint-{step}` directory of the output directory (default: false)
    pub eval_all_checkpoints: bool,
    /// Number of start positions returned by beam heads (default: 5)
    pub start_n_top: usize,
    /// Number of end positions returned by beam heads (default: 5)
    pub end_n_top: usize,
    /// Recompute the features even if a cache exists (default: false)
    pub overwrite_cache: bool,
}

impl Default for InferenceConfig {
    fn default() -> InferenceConfig {
        InferenceConfig {
            output_dir: PathBuf::from("output"),
            max_seq_length: 384,
            doc_stride: 128,
            max_query_length: 64,
            do_lower_case: true,
            eval_batch_size: 8,
            n_best_size: 20,
            max_answer_length: 30,
            null_score_diff_threshold: 0.0,
            version_2_with_negative: true,
            verbose_logging: false,
            eval_all_checkpoints: false,
            start_n_top: 5,
            end_n_top: 5,
            overwrite_cache: false,
        }
    }
}

impl Config for InferenceConfig {}

/// # Configuration for a reader
/// Groups the training and inference settings with the model resources and the device.
pub struct ReaderConfig {
    /// TorchScript module of the question answering model
    pub model_resource: Box<dyn ResourceProvider + Send>,
    /// Fine-tuned weights loaded into the module, if any
    pub weights_resource: Option<Box<dyn ResourceProvider + Send>>,
    /// Vocabulary of the tokenizer
    pub vocab_resource: Box<dyn ResourceProvider + Send>,
    /// Strip accents when tokenizing (default: same as `do_lower_case`)
    pub strip_accents: Option<bool>,
    pub training: TrainingConfig,
    pub inference: InferenceConfig,
    /// Device on which the model runs (default: CUDA if available)
    pub device: Device,
}

impl ReaderConfig {
    /// Creates a reader configuration with default training and inference settings.
    ///
    /// # Arguments
    ///
    /// * `model_type` - `ModelType` of the model
    /// * `model_resource` - TorchScript module (e.g. `RemoteResource` or `LocalResource`)
    /// * `vocab_resource` - vocabulary of the tokenizer
    ///
    /// # Example
    ///
    /// ```no_run
    /// use squad_reader::pipelines::common::ModelType;
    /// use squad_reader::pipelines::reader::ReaderConfig;
    /// use squad_reader::resources::LocalResource;
    /// use std::path::PathBuf;
    ///
    /// let config = ReaderConfig::new(
    ///     ModelType::Bert,
    ///     LocalResource::from(PathBuf::from("path/to/model.pt")),
    ///     LocalResource::from(PathBuf::from("path/to/vocab.txt")),
    /// );
    /// ```
    pub fn new<RM, RV>(model_type: ModelType, model_resource: RM, vocab_resource: RV) -> ReaderConfig
    where
        RM: ResourceProvider + Send + 'static,
        RV: ResourceProvider + Send + 'static,
    {
        let training = TrainingConfig {
            model_type,
            ..Default::default()
        };
        ReaderConfig {
            model_resource: Box::new(model_resource),
            weights_resource: None,
            vocab_resource: Box::new(vocab_resource),
            strip_accents: None,
            training,
            inference: InferenceConfig::default(),
            device: Device::cuda_if_available(),
        }
    }

    pub fn model_type(&self) -> ModelType {
        self.training.model_type
    }
}
