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

//! squad-reader - extractive question answering CLI
//!
//! ```bash
//! # Fine-tune a model on SQuAD 2.0
//! squad-reader fit --model-type bert --model model.pt --vocab vocab.txt \
//!     --train-file train-v2.0.json --output-dir output
//!
//! # Evaluate the fine-tuned model (and every saved checkpoint)
//! squad-reader evaluate --model output/model.pt --weights output/rust_model.ot \
//!     --vocab output/vocab.txt --predict-file dev-v2.0.json --output-dir output \
//!     --eval-all-checkpoints
//!
//! # Answer a question
//! squad-reader predict --model output/model.pt --weights output/rust_model.ot \
//!     --vocab output/vocab.txt --question "Where does Amy live ?" \
//!     --context "Amy lives in Amsterdam"
//! ```

use clap::{Args, Parser, Subcommand};
use squad_reader::pipelines::common::ModelType;
use squad_reader::pipelines::reader::{InferenceConfig, Reader, ReaderConfig, TrainingConfig};
use squad_reader::pipelines::squad::{QaInput, SquadInput};
use squad_reader::resources::resource_from_location;
use squad_reader::{Config, ReaderError};
use std::path::PathBuf;
use tch::Device;

/// Extractive question answering reader (BERT, DistilBERT, XLNet)
#[derive(Parser)]
#[command(name = "squad-reader", author, version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fine-tune a model on a SQuAD training set
    Fit(FitArgs),
    /// Evaluate a model against a SQuAD dataset with gold answers
    Evaluate(EvaluateArgs),
    /// Answer a question from a paragraph
    Predict(PredictArgs),
}

#[derive(Args)]
struct ModelArgs {
    /// Model family: bert, distilbert or xlnet
    #[arg(long, default_value = "bert")]
    model_type: ModelType,

    /// TorchScript export of the question answering model (file or URL)
    #[arg(long)]
    model: String,

    /// Fine-tuned weights to load into the model (file or URL)
    #[arg(long)]
    weights: Option<String>,

    /// Vocabulary file of the tokenizer (file or URL)
    #[arg(long)]
    vocab: String,

    /// Cache sub-directory receiving the downloaded resources
    #[arg(long, default_value = "squad-reader")]
    cache_subdir: String,

    /// JSON file overriding the default settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory receiving checkpoints and prediction files
    #[arg(long, env = "SQUAD_READER_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Run on CPU even if CUDA is available
    #[arg(long)]
    cpu: bool,
}

#[derive(Args)]
struct FitArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// SQuAD training file
    #[arg(long)]
    train_file: PathBuf,

    /// Overwrite the content of the output directory
    #[arg(long)]
    overwrite_output_dir: bool,
}

#[derive(Args)]
struct EvaluateArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// SQuAD file with gold answers
    #[arg(long)]
    predict_file: PathBuf,

    /// Evaluate every checkpoint saved in the output directory
    #[arg(long)]
    eval_all_checkpoints: bool,
}

#[derive(Args)]
struct PredictArgs {
    #[command(flatten)]
    model: ModelArgs,

    #[arg(long)]
    question: String,

    /// Paragraph, may be repeated to search several paragraphs
    #[arg(long, required = true)]
    context: Vec<String>,

    /// Title of the paragraphs
    #[arg(long, default_value = "")]
    title: String,
}

fn reader_config(args: &ModelArgs) -> Result<ReaderConfig, ReaderError> {
    let mut config = ReaderConfig::new(
        args.model_type,
        resource_from_location(&args.model, &args.cache_subdir),
        resource_from_location(&args.vocab, &args.cache_subdir),
    );
    config.weights_resource = args
        .weights
        .as_ref()
        .map(|location| resource_from_location(location, &args.cache_subdir));
    if let Some(path) = &args.config {
        config.training = TrainingConfig::from_file(path)?;
        config.training.model_type = args.model_type;
        config.inference = InferenceConfig::from_file(path)?;
    }
    if let Some(output_dir) = &args.output_dir {
        config.training.output_dir = output_dir.clone();
        config.inference.output_dir = output_dir.clone();
    }
    if args.cpu {
        config.device = Device::Cpu;
    }
    Ok(config)
}

fn main() -> Result<(), ReaderError> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Fit(args) => {
            let mut config = reader_config(&args.model)?;
            config.training.overwrite_output_dir |= args.overwrite_output_dir;
            let mut reader = Reader::new(config)?;
            let summary = reader.fit(&SquadInput::from(args.train_file))?;
            println!(
                "global_step = {}, average loss = {}",
                summary.global_step, summary.average_loss
            );
        }
        Commands::Evaluate(args) => {
            let mut config = reader_config(&args.model)?;
            config.inference.eval_all_checkpoints |= args.eval_all_checkpoints;
            let mut reader = Reader::new(config)?;
            let results = reader.evaluate(&SquadInput::from(args.predict_file))?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Predict(args) => {
            let reader = Reader::new(reader_config(&args.model)?)?;
            let (question, title) = (args.question, args.title);
            let inputs = args
                .context
                .into_iter()
                .map(|context| QaInput {
                    question: question.clone(),
                    context,
                    title: title.clone(),
                })
                .collect::<Vec<_>>();
            let (_, final_prediction) = reader.predict(&inputs)?;
            println!("{}", final_prediction.answer);
        }
    }
    Ok(())
}
