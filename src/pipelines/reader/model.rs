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

//! # Question answering models
//! The reader drives its model through the `QuestionAnsweringModel` trait: batched inference on
//! features, and the training primitives (loss and backward pass, optimizer step, checkpoints).
//!
//! `TorchScriptModel` implements it on top of a TorchScript export of a question answering model.
//! The exported module is called with the tensors of a batch:
//! - `input_ids`, `attention_mask`, `token_type_ids` (omitted for DistilBERT)
//! - beam heads only: `cls_index`, `p_mask`
//! - training only: `start_positions`, `end_positions` (and `is_impossible` for beam heads)
//!
//! In training mode the first output is the loss. In inference mode the outputs are
//! `(start_logits, end_logits)` for standard heads and
//! `(start_top_log_probs, start_top_index, end_top_log_probs, end_top_index, cls_logits)` for beam
//! heads.

use crate::common::error::ReaderError;
use crate::pipelines::common::{ModelType, OutputKind};
use crate::pipelines::squad::decoding::{BeamOutput, FeatureOutput, StandardOutput};
use crate::pipelines::squad::features::QaFeature;
use std::fs;
use std::path::{Path, PathBuf};
use tch::nn::{self, OptimizerConfig};
use tch::{no_grad, CModule, Device, IValue, Kind, Tensor, TrainableCModule};

/// TorchScript module file name within a saved model directory
pub const MODULE_NAME: &str = "model.pt";
/// Weights file name within a saved model directory
pub const WEIGHTS_NAME: &str = "rust_model.ot";

/// Optimizer settings used by the training primitives
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub weight_decay: f64,
    pub max_grad_norm: f64,
}

/// # Capability required from a question answering model
pub trait QuestionAnsweringModel {
    /// Kind of output produced by the model head
    fn output_kind(&self) -> OutputKind;

    /// Runs inference on a batch of features, returning one output per feature.
    fn predict(&self, features: &[&QaFeature]) -> Result<Vec<FeatureOutput>, ReaderError>;

    /// Computes the loss of a training batch, scaled by `loss_scale`, and accumulates its
    /// gradients. Returns the scaled loss.
    fn train_step(&mut self, features: &[&QaFeature], loss_scale: f64) -> Result<f64, ReaderError>;

    /// Applies the accumulated gradients with the given learning rate and resets them.
    fn optimizer_step(
        &mut self,
        learning_rate: f64,
        settings: &OptimizerSettings,
    ) -> Result<(), ReaderError>;

    /// Saves the model to a directory.
    fn save(&self, directory: &Path) -> Result<(), ReaderError>;

    /// Loads the model weights saved in a directory.
    fn load_checkpoint(&mut self, directory: &Path) -> Result<(), ReaderError>;
}

/// # Question answering model exported with TorchScript
pub struct TorchScriptModel {
    model_type: ModelType,
    module: TrainableCModule,
    module_path: PathBuf,
    var_store: nn::VarStore,
    optimizer: Option<nn::Optimizer<nn::AdamW>>,
}

impl TorchScriptModel {
    /// Loads a TorchScript module, optionally overriding its weights.
    ///
    /// # Arguments
    ///
    /// * `model_type` - model family, deciding the inputs passed to the module and its outputs
    /// * `module_path` - TorchScript module file
    /// * `weights_path` - optional fine-tuned weights saved by a previous training
    /// * `device` - device the module runs on
    pub fn new(
        model_type: ModelType,
        module_path: &Path,
        weights_path: Option<&Path>,
        device: Device,
    ) -> Result<TorchScriptModel, ReaderError> {
        let mut var_store = nn::VarStore::new(device);
        let mut module = TrainableCModule::load(module_path, var_store.root())?;
        module.set_eval();
        if let Some(weights_path) = weights_path {
            var_store.load(weights_path)?;
        }
        Ok(TorchScriptModel {
            model_type,
            module,
            module_path: module_path.to_path_buf(),
            var_store,
            optimizer: None,
        })
    }

    pub fn device(&self) -> Device {
        self.var_store.device()
    }

    fn stack_i64<F>(&self, features: &[&QaFeature], values: F) -> Tensor
    where
        F: Fn(&QaFeature) -> Vec<i64>,
    {
        let rows = features
            .iter()
            .map(|feature| Tensor::of_slice(&values(feature)))
            .collect::<Vec<_>>();
        Tensor::stack(rows.as_slice(), 0).to(self.device())
    }

    fn column_i64<F>(&self, features: &[&QaFeature], value: F) -> Tensor
    where
        F: Fn(&QaFeature) -> i64,
    {
        let values = features.iter().map(|feature| value(feature)).collect::<Vec<i64>>();
        Tensor::of_slice(&values).to(self.device())
    }

    fn model_inputs(&self, features: &[&QaFeature], training: bool) -> Vec<IValue> {
        let output_kind = self.model_type.output_kind();
        let mut inputs = vec![
            IValue::Tensor(self.stack_i64(features, |f| f.input_ids.clone())),
            IValue::Tensor(self.stack_i64(features, |f| f.attention_mask.clone())),
        ];
        if self.model_type.uses_token_type_ids() {
            inputs.push(IValue::Tensor(
                self.stack_i64(features, |f| f.token_type_ids.clone()),
            ));
        }
        if training {
            inputs.push(IValue::Tensor(self.column_i64(features, |f| {
                f.start_position.unwrap_or(f.cls_index) as i64
            })));
            inputs.push(IValue::Tensor(self.column_i64(features, |f| {
                f.end_position.unwrap_or(f.cls_index) as i64
            })));
        }
        if output_kind == OutputKind::Beam {
            inputs.push(IValue::Tensor(
                self.column_i64(features, |f| f.cls_index as i64),
            ));
            if training {
                inputs.push(IValue::Tensor(
                    self.column_i64(features, |f| f.is_impossible as i64)
                        .to_kind(Kind::Float),
                ));
            }
            inputs.push(IValue::Tensor(
                self.stack_i64(features, |f| f.p_mask.iter().map(|v| *v as i64).collect())
                    .to_kind(Kind::Float),
            ));
        }
        inputs
    }

    fn module(&self) -> &CModule {
        &self.module.inner
    }
}

fn output_tensors(output: IValue, expected: usize) -> Result<Vec<Tensor>, ReaderError> {
    let values = match output {
        IValue::Tuple(values) | IValue::GenericList(values) => values,
        IValue::Tensor(tensor) => vec![IValue::Tensor(tensor)],
        _ => {
            return Err(ReaderError::ConfigError(
                "model output is not a tuple of tensors".to_string(),
            ));
        }
    };
    if values.len() < expected {
        return Err(ReaderError::ConfigError(format!(
            "model returned {} outputs, expected {}",
            values.len(),
            expected
        )));
    }
    values
        .into_iter()
        .take(expected)
        .map(|value| match value {
            IValue::Tensor(tensor) => Ok(tensor),
            _ => Err(ReaderError::ConfigError(
                "model output is not a tensor".to_string(),
            )),
        })
        .collect()
}

fn row_f64(tensor: &Tensor, index: i64) -> Vec<f64> {
    Vec::<f64>::from(&tensor.get(index).to_kind(Kind::Double).to_device(Device::Cpu))
}

fn row_usize(tensor: &Tensor, index: i64) -> Vec<usize> {
    Vec::<i64>::from(&tensor.get(index).to_kind(Kind::Int64).to_device(Device::Cpu))
        .into_iter()
        .map(|value| value as usize)
        .collect()
}

impl QuestionAnsweringModel for TorchScriptModel {
    fn output_kind(&self) -> OutputKind {
        self.model_type.output_kind()
    }

    fn predict(&self, features: &[&QaFeature]) -> Result<Vec<FeatureOutput>, ReaderError> {
        if features.is_empty() {
            return Ok(vec![]);
        }
        let inputs = self.model_inputs(features, false);
        let output = no_grad(|| self.module().forward_is(&inputs))?;
        let batch_size = features.len() as i64;

        match self.output_kind() {
            OutputKind::Standard => {
                let tensors = output_tensors(output, 2)?;
                Ok((0..batch_size)
                    .map(|index| {
                        FeatureOutput::Standard(StandardOutput {
                            start_logits: row_f64(&tensors[0], index),
                            end_logits: row_f64(&tensors[1], index),
                        })
                    })
                    .collect())
            }
            OutputKind::Beam => {
                let tensors = output_tensors(output, 5)?;
                let cls_logits = tensors[4]
                    .view([-1])
                    .to_kind(Kind::Double)
                    .to_device(Device::Cpu);
                Ok((0..batch_size)
                    .map(|index| {
                        FeatureOutput::Beam(BeamOutput {
                            start_top_log_probs: row_f64(&tensors[0], index),
                            start_top_index: row_usize(&tensors[1], index),
                            end_top_log_probs: row_f64(&tensors[2], index),
                            end_top_index: row_usize(&tensors[3], index),
                            cls_logits: cls_logits.double_value(&[index]),
                        })
                    })
                    .collect())
            }
        }
    }

    fn train_step(&mut self, features: &[&QaFeature], loss_scale: f64) -> Result<f64, ReaderError> {
        self.module.set_train();
        let inputs = self.model_inputs(features, true);
        let output = self.module().forward_is(&inputs)?;
        let loss = output_tensors(output, 1)?.remove(0) * loss_scale;
        loss.backward();
        self.module.set_eval();
        Ok(loss.double_value(&[]))
    }

    fn optimizer_step(
        &mut self,
        learning_rate: f64,
        settings: &OptimizerSettings,
    ) -> Result<(), ReaderError> {
        if self.optimizer.is_none() {
            let optimizer = nn::AdamW {
                wd: settings.weight_decay,
                ..Default::default()
            }
            .build(&self.var_store, learning_rate)?;
            self.optimizer = Some(optimizer);
        }
        if let Some(optimizer) = self.optimizer.as_mut() {
            optimizer.set_lr(learning_rate);
            optimizer.clip_grad_norm(settings.max_grad_norm);
            optimizer.step();
            optimizer.zero_grad();
        }
        Ok(())
    }

    fn save(&self, directory: &Path) -> Result<(), ReaderError> {
        fs::create_dir_all(directory)?;
        let module_path = directory.join(MODULE_NAME);
        if module_path != self.module_path {
            fs::copy(&self.module_path, &module_path)?;
        }
        self.var_store.save(directory.join(WEIGHTS_NAME))?;
        Ok(())
    }

    fn load_checkpoint(&mut self, directory: &Path) -> Result<(), ReaderError> {
        self.var_store.load(directory.join(WEIGHTS_NAME))?;
        Ok(())
    }
}
