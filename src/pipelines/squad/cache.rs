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

//! # Feature cache
//! Features computed from a SQuAD file are stored next to it, in
//! `cached_{train|dev}_{model_name}_{max_seq_length}`.

use crate::common::error::ReaderError;
use crate::pipelines::squad::features::QaFeature;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// # On-disk cache of the features of a SQuAD file
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCache {
    path: PathBuf,
}

impl FeatureCache {
    /// Cache location for the features of `input_file`.
    ///
    /// # Arguments
    ///
    /// * `input_file` - SQuAD file the features are computed from
    /// * `evaluate` - `true` for evaluation features, `false` for training features
    /// * `model_name_or_path` - model identifier, only its last path component is used
    /// * `max_seq_length` - length of the features
    pub fn new(
        input_file: &Path,
        evaluate: bool,
        model_name_or_path: &str,
        max_seq_length: usize,
    ) -> FeatureCache {
        let model_name = model_name_or_path
            .split(|c| c == '/' || c == '\\')
            .filter(|part| !part.is_empty())
            .last()
            .unwrap_or(model_name_or_path);
        let file_name = format!(
            "cached_{}_{}_{}",
            if evaluate { "dev" } else { "train" },
            model_name,
            max_seq_length
        );
        let directory = input_file.parent().unwrap_or_else(|| Path::new(""));
        FeatureCache {
            path: directory.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads the cached features. Any failure is reported as a `CacheError`.
    pub fn load(&self) -> Result<Vec<QaFeature>, ReaderError> {
        let file = File::open(&self.path).map_err(|error| {
            ReaderError::CacheError(format!("could not open {:?}: {}", self.path, error))
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|error| {
            ReaderError::CacheError(format!("could not read {:?}: {}", self.path, error))
        })
    }

    pub fn save(&self, features: &[QaFeature]) -> Result<(), ReaderError> {
        let directory = match self.path.parent() {
            Some(directory) if !directory.as_os_str().is_empty() => directory,
            _ => Path::new("."),
        };
        let file = NamedTempFile::new_in(directory)?;
        {
            let mut writer = BufWriter::new(file.as_file());
            serde_json::to_writer(&mut writer, features)?;
            writer.flush()?;
        }
        file.persist(&self.path)?;
        Ok(())
    }
}
