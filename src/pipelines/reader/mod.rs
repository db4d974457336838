//! # Question answering reader
//!
//! `Reader` exposes the fit / evaluate / predict interface of an extractive question answering
//! model:
//! - `fit` fine-tunes the model on a SQuAD training set and saves it with its vocabulary and
//! training configuration
//! - `evaluate` scores the predictions of the model (or of every saved checkpoint) with the
//! official SQuAD metrics
//! - `predict` extracts the best answer to a question from candidate paragraphs
//!
//! The model is loaded from a TorchScript export (see `TorchScriptModel`) and the tokenizer from
//! a vocabulary file, both referenced as resources in the `ReaderConfig`.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use squad_reader::pipelines::common::ModelType;
//! use squad_reader::pipelines::reader::{Reader, ReaderConfig};
//! use squad_reader::pipelines::squad::QaInput;
//! use squad_reader::resources::LocalResource;
//! use std::path::PathBuf;
//!
//! let config = ReaderConfig::new(
//!     ModelType::Bert,
//!     LocalResource::from(PathBuf::from("path/to/model.pt")),
//!     LocalResource::from(PathBuf::from("path/to/vocab.txt")),
//! );
//! let reader = Reader::new(config)?;
//! let input = QaInput {
//!     question: "Where does Amy live ?".to_string(),
//!     context: "Amy lives in Amsterdam".to_string(),
//!     title: "Amy".to_string(),
//! };
//! let (details, final_prediction) = reader.predict(&[input])?;
//! # Ok(())
//! # }
//! ```

mod config;
mod distributed;
mod model;
#[allow(clippy::module_inception)]
mod reader;
mod runtime;
mod training;

pub use config::{InferenceConfig, ReaderConfig, TrainingConfig, TRAINING_ARGS_NAME};
pub use distributed::{Coordinator, SingleProcess};
pub use model::{
    OptimizerSettings, QuestionAnsweringModel, TorchScriptModel, MODULE_NAME, WEIGHTS_NAME,
};
pub use reader::{FinalPrediction, Reader};
pub use runtime::RuntimeContext;
pub use training::{checkpoint_dir, train, LinearSchedule, TrainingPlan, TrainingSummary};
