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

//! # Training loop
//! Features are shuffled at every epoch (with a seeded generator) and split into batches.
//! Gradients of `gradient_accumulation_steps` batches are accumulated before each optimizer step.
//! The learning rate increases linearly during `warmup_steps` optimizer steps, then decreases
//! linearly to 0 at the last step. Checkpoints are saved every `save_steps` optimizer steps in
//! `checkpoint-{step}` sub-directories of the output directory.

use crate::common::config::Config;
use crate::common::error::ReaderError;
use crate::pipelines::reader::config::{TrainingConfig, TRAINING_ARGS_NAME};
use crate::pipelines::reader::distributed::Coordinator;
use crate::pipelines::reader::model::{OptimizerSettings, QuestionAnsweringModel};
use crate::pipelines::squad::features::QaFeature;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

/// # Linear warmup followed by a linear decay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSchedule {
    pub learning_rate: f64,
    pub warmup_steps: usize,
    pub total_steps: usize,
}

impl LinearSchedule {
    /// Learning rate of the optimizer step `step` (starting at 0)
    pub fn learning_rate(&self, step: usize) -> f64 {
        let factor = if step < self.warmup_steps {
            step as f64 / self.warmup_steps.max(1) as f64
        } else {
            let remaining = self.total_steps.saturating_sub(step) as f64;
            let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
            (remaining / decay_steps).max(0.0)
        };
        self.learning_rate * factor
    }
}

/// Number of epochs and optimizer steps of a training run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingPlan {
    pub num_epochs: usize,
    pub total_steps: usize,
}

impl TrainingPlan {
    pub fn new(num_batches: usize, config: &TrainingConfig) -> TrainingPlan {
        let steps_per_epoch = num_batches / config.gradient_accumulation_steps.max(1);
        match config.max_steps {
            Some(max_steps) => TrainingPlan {
                num_epochs: max_steps / steps_per_epoch.max(1) + 1,
                total_steps: max_steps,
            },
            None => TrainingPlan {
                num_epochs: config.num_train_epochs as usize,
                total_steps: (steps_per_epoch as f64 * config.num_train_epochs) as usize,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    /// Number of optimizer steps performed
    pub global_step: usize,
    /// Average training loss per optimizer step
    pub average_loss: f64,
    /// Checkpoints saved during training
    pub checkpoints: Vec<PathBuf>,
}

/// Directory of the checkpoint saved after `global_step` optimizer steps
pub fn checkpoint_dir(output_dir: &Path, global_step: usize) -> PathBuf {
    output_dir.join(format!("checkpoint-{}", global_step))
}

/// Trains a model on features.
///
/// # Arguments
///
/// * `model` - model to train
/// * `features` - training features (with gold start / end positions)
/// * `config` - training settings
/// * `coordinator` - process coordination, each process trains on its shard of the features
pub fn train(
    model: &mut dyn QuestionAnsweringModel,
    features: &[QaFeature],
    config: &TrainingConfig,
    coordinator: &dyn Coordinator,
) -> Result<TrainingSummary, ReaderError> {
    let batch_size = config.train_batch_size.max(1);
    let accumulation_steps = config.gradient_accumulation_steps.max(1);
    let mut indices = coordinator.shard(features.len());
    let num_batches = (indices.len() + batch_size - 1) / batch_size;
    let plan = TrainingPlan::new(num_batches, config);
    let schedule = LinearSchedule {
        learning_rate: config.learning_rate,
        warmup_steps: config.warmup_steps,
        total_steps: plan.total_steps,
    };
    let settings = OptimizerSettings {
        weight_decay: config.weight_decay,
        max_grad_norm: config.max_grad_norm,
    };

    log::info!("***** Running training *****");
    log::info!("  Num features = {}", indices.len());
    log::info!("  Num epochs = {}", plan.num_epochs);
    log::info!("  Batch size = {}", batch_size);
    log::info!("  Gradient accumulation steps = {}", accumulation_steps);
    log::info!("  Total optimization steps = {}", plan.total_steps);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut global_step = 0;
    let mut total_loss = 0.0;
    let mut logging_loss = 0.0;
    let mut checkpoints = vec![];

    'epochs: for epoch in 0..plan.num_epochs {
        indices.shuffle(&mut rng);
        log::debug!("Epoch {}", epoch);
        for (step, batch_indices) in indices.chunks(batch_size).enumerate() {
            let batch: Vec<&QaFeature> = batch_indices.iter().map(|i| &features[*i]).collect();
            total_loss += model.train_step(&batch, 1.0 / accumulation_steps as f64)?;

            if (step + 1) % accumulation_steps != 0 {
                continue;
            }
            model.optimizer_step(schedule.learning_rate(global_step), &settings)?;
            global_step += 1;

            if coordinator.is_main_process() {
                if config.logging_steps > 0 && global_step % config.logging_steps == 0 {
                    log::info!(
                        "Step {}: lr = {:e}, loss = {:.6}",
                        global_step,
                        schedule.learning_rate(global_step),
                        (total_loss - logging_loss) / config.logging_steps as f64
                    );
                    logging_loss = total_loss;
                }
                if config.save_steps > 0 && global_step % config.save_steps == 0 {
                    let directory = checkpoint_dir(&config.output_dir, global_step);
                    model.save(&directory)?;
                    config.to_file(directory.join(TRAINING_ARGS_NAME))?;
                    log::info!("Saving model checkpoint to {:?}", directory);
                    checkpoints.push(directory);
                }
            }
            if config.max_steps.map_or(false, |max_steps| global_step >= max_steps) {
                break 'epochs;
            }
        }
    }

    let average_loss = if global_step > 0 {
        total_loss / global_step as f64
    } else {
        0.0
    };
    Ok(TrainingSummary {
        global_step,
        average_loss,
        checkpoints,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pipelines::common::OutputKind;
    use crate::pipelines::reader::distributed::SingleProcess;
    use crate::pipelines::squad::decoding::FeatureOutput;
    use crate::pipelines::squad::test_utils::feature_with_context;
    use std::fs;

    #[derive(Default)]
    struct RecordingModel {
        batches: Vec<Vec<usize>>,
        learning_rates: Vec<f64>,
    }

    impl QuestionAnsweringModel for RecordingModel {
        fn output_kind(&self) -> OutputKind {
            OutputKind::Standard
        }

        fn predict(&self, features: &[&QaFeature]) -> Result<Vec<FeatureOutput>, ReaderError> {
            Ok(Vec::with_capacity(features.len()))
        }

        fn train_step(
            &mut self,
            features: &[&QaFeature],
            loss_scale: f64,
        ) -> Result<f64, ReaderError> {
            self.batches
                .push(features.iter().map(|f| f.unique_id).collect());
            Ok(2.0 * loss_scale)
        }

        fn optimizer_step(
            &mut self,
            learning_rate: f64,
            _settings: &OptimizerSettings,
        ) -> Result<(), ReaderError> {
            self.learning_rates.push(learning_rate);
            Ok(())
        }

        fn save(&self, directory: &Path) -> Result<(), ReaderError> {
            fs::create_dir_all(directory)?;
            fs::write(directory.join("weights"), "")?;
            Ok(())
        }

        fn load_checkpoint(&mut self, _directory: &Path) -> Result<(), ReaderError> {
            Ok(())
        }
    }

    fn features(count: usize) -> Vec<QaFeature> {
        (0..count)
            .map(|index| {
                let mut feature = feature_with_context(8, 3, 3);
                feature.unique_id += index;
                feature
            })
            .collect()
    }

    #[test]
    fn schedule_warms_up_then_decays() {
        let schedule = LinearSchedule {
            learning_rate: 1.0,
            warmup_steps: 2,
            total_steps: 6,
        };
        let rates: Vec<f64> = (0..7).map(|step| schedule.learning_rate(step)).collect();
        assert_eq!(rates, vec![0.0, 0.5, 1.0, 0.75, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn schedule_without_warmup_starts_at_peak() {
        let schedule = LinearSchedule {
            learning_rate: 2.0,
            warmup_steps: 0,
            total_steps: 4,
        };
        assert_eq!(schedule.learning_rate(0), 2.0);
        assert_eq!(schedule.learning_rate(2), 1.0);
    }

    #[test]
    fn training_plan_from_epochs_and_max_steps() {
        let config = TrainingConfig {
            gradient_accumulation_steps: 2,
            num_train_epochs: 3.0,
            ..Default::default()
        };
        assert_eq!(
            TrainingPlan::new(10, &config),
            TrainingPlan {
                num_epochs: 3,
                total_steps: 15
            }
        );
        let config = TrainingConfig {
            max_steps: Some(12),
            ..config
        };
        assert_eq!(
            TrainingPlan::new(10, &config),
            TrainingPlan {
                num_epochs: 3,
                total_steps: 12
            }
        );
    }

    #[test]
    fn gradients_are_accumulated_and_checkpoints_saved() -> anyhow::Result<()> {
        let output_dir = tempfile::tempdir()?;
        let config = TrainingConfig {
            output_dir: output_dir.path().to_path_buf(),
            train_batch_size: 2,
            gradient_accumulation_steps: 2,
            num_train_epochs: 2.0,
            save_steps: 2,
            logging_steps: 1,
            ..Default::default()
        };
        let mut model = RecordingModel::default();
        let summary = train(&mut model, &features(8), &config, &SingleProcess)?;

        // 4 batches per epoch, 2 optimizer steps per epoch
        assert_eq!(model.batches.len(), 8);
        assert_eq!(summary.global_step, 4);
        assert_eq!(model.learning_rates.len(), 4);
        assert!((summary.average_loss - 2.0).abs() < 1e-12);
        assert_eq!(
            summary.checkpoints,
            vec![
                output_dir.path().join("checkpoint-2"),
                output_dir.path().join("checkpoint-4")
            ]
        );
        assert!(output_dir
            .path()
            .join("checkpoint-2")
            .join(TRAINING_ARGS_NAME)
            .exists());

        let mut seen: Vec<usize> = model.batches[..4].concat();
        seen.sort_unstable();
        assert_eq!(seen.len(), 8);
        seen.dedup();
        assert_eq!(seen.len(), 8);
        Ok(())
    }

    #[test]
    fn shuffling_is_seeded() -> anyhow::Result<()> {
        let output_dir = tempfile::tempdir()?;
        let config = TrainingConfig {
            output_dir: output_dir.path().to_path_buf(),
            train_batch_size: 3,
            num_train_epochs: 1.0,
            save_steps: 0,
            ..Default::default()
        };
        let mut first = RecordingModel::default();
        let mut second = RecordingModel::default();
        train(&mut first, &features(9), &config, &SingleProcess)?;
        train(&mut second, &features(9), &config, &SingleProcess)?;
        assert_eq!(first.batches, second.batches);
        Ok(())
    }

    #[test]
    fn training_stops_at_max_steps() -> anyhow::Result<()> {
        let output_dir = tempfile::tempdir()?;
        let config = TrainingConfig {
            output_dir: output_dir.path().to_path_buf(),
            train_batch_size: 1,
            max_steps: Some(3),
            save_steps: 0,
            ..Default::default()
        };
        let mut model = RecordingModel::default();
        let summary = train(&mut model, &features(10), &config, &SingleProcess)?;
        assert_eq!(summary.global_step, 3);
        assert_eq!(model.learning_rates.len(), 3);
        Ok(())
    }
}
