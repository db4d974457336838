use crate::common::error::ReaderError;
use crate::resources::ResourceProvider;
use std::path::PathBuf;

/// # Local resource
#[derive(PartialEq, Clone, Debug)]
pub struct LocalResource {
    /// Local path for the resource
    pub local_path: PathBuf,
}

impl From<PathBuf> for LocalResource {
    fn from(local_path: PathBuf) -> Self {
        LocalResource { local_path }
    }
}

impl ResourceProvider for LocalResource {
    /// Gets the path for a local resource. Fails with an `IOError` if the file does not exist, so
    /// that a missing model file is reported before any computation starts.
    fn get_local_path(&self) -> Result<PathBuf, ReaderError> {
        if !self.local_path.exists() {
            return Err(ReaderError::IOError(format!(
                "resource {:?} does not exist",
                self.local_path
            )));
        }
        Ok(self.local_path.clone())
    }
}
