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

use crate::common::error::ReaderError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// # Utility to serialize and deserialize JSON configurations
/// Implemented by the reader configurations so that they can be persisted next to the trained
/// weights and reloaded for evaluation or prediction.
pub trait Config
where
    for<'de> Self: Deserialize<'de> + Serialize,
{
    /// Loads a `Config` object from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `path` - `Path` to the configuration JSON file.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use squad_reader::pipelines::reader::TrainingConfig;
    /// use squad_reader::Config;
    /// use std::path::Path;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config_path = Path::new("path/to/training_args.json");
    /// let config = TrainingConfig::from_file(config_path)?;
    /// # Ok(())
    /// # }
    /// ```
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ReaderError> {
        let f = File::open(path.as_ref()).map_err(|error| {
            ReaderError::ConfigError(format!(
                "could not open configuration file {:?}: {}",
                path.as_ref(),
                error
            ))
        })?;
        let br = BufReader::new(f);
        Ok(serde_json::from_reader(br)?)
    }

    /// Saves the configuration as pretty-printed JSON.
    fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ReaderError> {
        let f = File::create(path)?;
        let bw = BufWriter::new(f);
        serde_json::to_writer_pretty(bw, self)?;
        Ok(())
    }
}
