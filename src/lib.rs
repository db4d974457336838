//! Extractive question answering reader for SQuAD-style data, built on
//! [tch-rs](https://github.com/LaurentMazare/tch-rs) and
//! [rust-tokenizers](https://github.com/guillaume-be/rust-tokenizers).
//!
//! The crate provides:
//! - a feature builder splitting long paragraphs into overlapping windows of tokens
//! - span decoders for standard (start/end logits) and beam (top-k log-probabilities) question
//! answering heads
//! - an answer aggregator producing n-best lists and SQuAD 2.0 "no answer" decisions
//! - the official SQuAD evaluation (exact match and F1 with no-answer threshold search)
//! - a `Reader` fine-tuning, evaluating and running a TorchScript question answering model
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use squad_reader::pipelines::common::ModelType;
//! use squad_reader::pipelines::reader::{Reader, ReaderConfig};
//! use squad_reader::pipelines::squad::SquadInput;
//! use squad_reader::resources::LocalResource;
//! use std::path::PathBuf;
//!
//! let config = ReaderConfig::new(
//!     ModelType::Bert,
//!     LocalResource::from(PathBuf::from("path/to/model.pt")),
//!     LocalResource::from(PathBuf::from("path/to/vocab.txt")),
//! );
//! let mut reader = Reader::new(config)?;
//! let results = reader.evaluate(&SquadInput::from(PathBuf::from("path/to/dev-v2.0.json")))?;
//! println!("exact: {:?}, f1: {:?}", results.get("exact"), results.get("f1"));
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod pipelines;

pub use common::error::ReaderError;
pub use common::resources;
pub use common::Config;
