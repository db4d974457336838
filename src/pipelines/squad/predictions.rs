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

//! # Prediction files
//! - `predictions_{prefix}.json`: question id -> answer text
//! - `nbest_predictions_{prefix}.json`: question id -> n-best list
//! - `null_odds_{prefix}.json`: question id -> null odds (SQuAD 2.0)
//!
//! Files are written to a temporary file in the output directory and moved in place once complete.

use crate::common::error::ReaderError;
use crate::pipelines::squad::aggregation::{ExamplePrediction, NbestEntry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// # Content of the prediction files
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionOutput {
    pub predictions: BTreeMap<String, String>,
    pub nbest: BTreeMap<String, Vec<NbestEntry>>,
    pub null_odds: Option<BTreeMap<String, f64>>,
}

/// # Paths of the written prediction files
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionFiles {
    pub predictions: PathBuf,
    pub nbest: PathBuf,
    pub null_odds: Option<PathBuf>,
}

impl PredictionOutput {
    pub fn new(predictions: &[ExamplePrediction]) -> PredictionOutput {
        let mut output = PredictionOutput::default();
        for prediction in predictions.iter() {
            output
                .predictions
                .insert(prediction.qas_id.clone(), prediction.answer.clone());
            output
                .nbest
                .insert(prediction.qas_id.clone(), prediction.nbest.clone());
            if let Some(null_odds) = prediction.null_odds {
                output
                    .null_odds
                    .get_or_insert_with(BTreeMap::new)
                    .insert(prediction.qas_id.clone(), null_odds);
            }
        }
        output
    }

    /// Writes the prediction files to `output_dir`, creating it if needed.
    pub fn write(&self, output_dir: &Path, prefix: &str) -> Result<PredictionFiles, ReaderError> {
        fs::create_dir_all(output_dir)?;
        let files = PredictionFiles {
            predictions: output_dir.join(format!("predictions_{}.json", prefix)),
            nbest: output_dir.join(format!("nbest_predictions_{}.json", prefix)),
            null_odds: self
                .null_odds
                .as_ref()
                .map(|_| output_dir.join(format!("null_odds_{}.json", prefix))),
        };

        log::info!("Writing predictions to: {:?}", files.predictions);
        write_json(&self.predictions, &files.predictions)?;
        log::info!("Writing nbest to: {:?}", files.nbest);
        write_json(&self.nbest, &files.nbest)?;
        if let (Some(null_odds), Some(path)) = (self.null_odds.as_ref(), files.null_odds.as_ref()) {
            write_json(null_odds, path)?;
        }
        Ok(files)
    }
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ReaderError> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(directory)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.write_all(b"\n")?;
    file.persist(path)?;
    Ok(())
}
