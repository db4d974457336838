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

//! # Process coordination
//! A reader may run as one of several training processes. Only the main process builds the
//! feature caches, writes checkpoints and prediction files, and every process trains on its own
//! shard of the features.

use crate::common::error::ReaderError;

/// # Coordination between the processes of a training job
pub trait Coordinator {
    /// Index of this process, 0 for the main process
    fn rank(&self) -> usize;

    /// Number of processes
    fn world_size(&self) -> usize;

    /// Blocks until every process reached this point
    fn barrier(&self) -> Result<(), ReaderError>;

    fn is_main_process(&self) -> bool {
        self.rank() == 0
    }

    /// Indices of the items processed by this process (round robin over the processes)
    fn shard(&self, num_items: usize) -> Vec<usize> {
        let world_size = self.world_size().max(1);
        (0..num_items)
            .filter(|index| index % world_size == self.rank())
            .collect()
    }
}

/// # Single process, no coordination needed
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Coordinator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), ReaderError> {
        Ok(())
    }
}
