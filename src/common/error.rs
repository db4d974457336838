use rust_tokenizers::error::TokenizerError;
use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Endpoint not available error: {0}")]
    FileDownloadError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Tokenizer error: {0}")]
    TokenizerError(String),

    #[error("Invalid configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid data error: {0}")]
    DataError(String),

    #[error("Feature cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<cached_path::Error> for ReaderError {
    fn from(error: cached_path::Error) -> Self {
        ReaderError::FileDownloadError(error.to_string())
    }
}

impl From<std::io::Error> for ReaderError {
    fn from(error: std::io::Error) -> Self {
        ReaderError::IOError(error.to_string())
    }
}

impl From<serde_json::Error> for ReaderError {
    fn from(error: serde_json::Error) -> Self {
        ReaderError::SerializationError(error.to_string())
    }
}

impl From<tempfile::PersistError> for ReaderError {
    fn from(error: tempfile::PersistError) -> Self {
        ReaderError::IOError(error.to_string())
    }
}

impl From<TokenizerError> for ReaderError {
    fn from(error: TokenizerError) -> Self {
        ReaderError::TokenizerError(error.to_string())
    }
}

impl From<TchError> for ReaderError {
    fn from(error: TchError) -> Self {
        ReaderError::TchError(error.to_string())
    }
}
