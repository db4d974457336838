//! # Resource definitions for model weights, vocabularies and configuration files
//!
//! The reader relies on the concept of Resources to access the files used by the models.
//! This includes:
//! - TorchScript model files
//! - model weights
//! - vocabularies
//!
//! Two types of resources are pre-defined:
//! - LocalResource: points to a local file
//! - RemoteResource: points to a remote file via a URL
//!
//! For both types of resources, the local location of the file can be retrieved using
//! `get_local_path`, allowing to reference the resource file location regardless if it is a remote
//! or local resource.

mod local;
mod remote;

use crate::common::error::ReaderError;
pub use local::LocalResource;
pub use remote::{RemoteResource, CACHE};
use std::path::PathBuf;

/// # Resource Trait that can provide the location of the model, configuration or vocabulary resources
pub trait ResourceProvider {
    /// Provides the local path for a resource.
    ///
    /// # Returns
    ///
    /// * `PathBuf` pointing to the resource file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use squad_reader::resources::{LocalResource, ResourceProvider};
    /// use std::path::PathBuf;
    /// let vocab_resource = LocalResource {
    ///     local_path: PathBuf::from("path/to/vocab.txt"),
    /// };
    /// let vocab_path = vocab_resource.get_local_path();
    /// ```
    fn get_local_path(&self) -> Result<PathBuf, ReaderError>;
}

impl<T: ResourceProvider + ?Sized> ResourceProvider for Box<T> {
    fn get_local_path(&self) -> Result<PathBuf, ReaderError> {
        T::get_local_path(self)
    }
}

/// Resolves a resource location: `http(s)` URLs are downloaded to `cache_subdir` of the cache
/// root, any other location is a local file.
///
/// # Example
///
/// ```no_run
/// use squad_reader::resources::resource_from_location;
/// let vocab_resource = resource_from_location("https://host/bert/vocab.txt", "bert-qa");
/// let local_resource = resource_from_location("path/to/model.pt", "bert-qa");
/// ```
pub fn resource_from_location(
    location: &str,
    cache_subdir: &str,
) -> Box<dyn ResourceProvider + Send> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(RemoteResource::new(location, cache_subdir))
    } else {
        Box::new(LocalResource::from(PathBuf::from(location)))
    }
}
