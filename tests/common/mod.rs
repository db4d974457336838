#![allow(dead_code)]

use squad_reader::pipelines::common::{ModelType, OutputKind, QaTokenizer, SequenceLayout};
use squad_reader::pipelines::reader::{
    OptimizerSettings, QuestionAnsweringModel, Reader, ReaderConfig, RuntimeContext, MODULE_NAME,
    WEIGHTS_NAME,
};
use squad_reader::pipelines::squad::{BeamOutput, FeatureOutput, QaFeature, StandardOutput};
use squad_reader::resources::LocalResource;
use rust_tokenizers::tokenizer::{BaseTokenizer, Tokenizer};
use rust_tokenizers::vocab::BaseVocab;
use squad_reader::ReaderError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const BNP_CONTEXT: &str = "BNP Paribas' commitment to universities and schools is named the \
Excellence Program, and has existed since January 2016.";
pub const BNP_QUESTION: &str = "Since when does the Excellence Program of BNP Paribas exist?";
pub const BNP_TITLE: &str = "BNP Paribas' commitment to universities and schools";

pub const MUSEUM_CONTEXT: &str = "The museum opened its doors to the public in the spring.";
pub const MUSEUM_QUESTION: &str = "Who founded the museum?";

const MAX_PIECE_LENGTH: usize = 6;

/// Splits on whitespace and punctuation with the BERT pre-tokenizer (lower casing and accent
/// stripping), and cuts words longer than 6 characters into `##` continuation pieces.
pub struct WordTokenizer {
    layout: SequenceLayout,
    basic_tokenizer: BaseTokenizer<BaseVocab>,
}

impl WordTokenizer {
    pub fn new(layout: SequenceLayout) -> WordTokenizer {
        let vocab = BaseVocab {
            values: HashMap::new(),
            indices: HashMap::new(),
            unknown_value: "[UNK]",
            special_values: HashMap::new(),
            special_indices: HashMap::new(),
        };
        WordTokenizer {
            layout,
            basic_tokenizer: BaseTokenizer::from_existing_vocab(vocab, true, true),
        }
    }

    fn split_word(word: &str, output: &mut Vec<String>) {
        let chars: Vec<char> = word.chars().collect();
        for (index, chunk) in chars.chunks(MAX_PIECE_LENGTH).enumerate() {
            let piece: String = chunk.iter().collect();
            if index == 0 {
                output.push(piece);
            } else {
                output.push(format!("##{}", piece));
            }
        }
    }
}

impl QaTokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = vec![];
        for word in self.basic_tokenize(text) {
            Self::split_word(&word, &mut tokens);
        }
        tokens
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<i64> {
        tokens
            .iter()
            .map(|token| 1000 + token.chars().map(|c| c as i64).sum::<i64>())
            .collect()
    }

    fn convert_tokens_to_string(&self, tokens: &[String]) -> String {
        tokens.join(" ").replace(" ##", "").trim().to_string()
    }

    fn basic_tokenize(&self, text: &str) -> Vec<String> {
        self.basic_tokenizer.tokenize(text)
    }

    fn layout(&self) -> &SequenceLayout {
        &self.layout
    }
}

/// Calls made to a `ScriptedModel`, shared with the test
#[derive(Debug, Default)]
pub struct ModelCalls {
    pub predicted_features: usize,
    pub train_steps: usize,
    pub optimizer_steps: Vec<f64>,
    pub loaded_checkpoints: Vec<PathBuf>,
}

/// Model giving a high score to the span between the first context tokens equal to `start_token`
/// and `end_token`, and `null_logit` to the classification token.
pub struct ScriptedModel {
    pub output_kind: OutputKind,
    pub start_token: String,
    pub end_token: String,
    pub null_logit: f64,
    pub calls: Rc<RefCell<ModelCalls>>,
}

impl ScriptedModel {
    pub fn standard(start_token: &str, end_token: &str, null_logit: f64) -> ScriptedModel {
        ScriptedModel {
            output_kind: OutputKind::Standard,
            start_token: start_token.to_string(),
            end_token: end_token.to_string(),
            null_logit,
            calls: Rc::new(RefCell::new(ModelCalls::default())),
        }
    }

    pub fn beam(start_token: &str, end_token: &str, null_logit: f64) -> ScriptedModel {
        ScriptedModel {
            output_kind: OutputKind::Beam,
            ..ScriptedModel::standard(start_token, end_token, null_logit)
        }
    }

    fn context_position(feature: &QaFeature, token: &str) -> Option<usize> {
        feature
            .tokens
            .iter()
            .enumerate()
            .position(|(index, candidate)| candidate == token && feature.p_mask[index] == 0)
    }

    fn output(&self, feature: &QaFeature) -> FeatureOutput {
        let start = Self::context_position(feature, &self.start_token);
        let end = Self::context_position(feature, &self.end_token);
        match self.output_kind {
            OutputKind::Standard => {
                let length = feature.input_ids.len();
                let mut start_logits = vec![0.0; length];
                let mut end_logits = vec![0.0; length];
                start_logits[feature.cls_index] = self.null_logit;
                end_logits[feature.cls_index] = self.null_logit;
                if let Some(start) = start {
                    start_logits[start] = 10.0;
                }
                if let Some(end) = end {
                    end_logits[end] = 10.0;
                }
                FeatureOutput::Standard(StandardOutput {
                    start_logits,
                    end_logits,
                })
            }
            OutputKind::Beam => FeatureOutput::Beam(BeamOutput {
                start_top_log_probs: vec![-0.1],
                start_top_index: vec![start.unwrap_or(feature.cls_index)],
                end_top_log_probs: vec![-0.2],
                end_top_index: vec![end.unwrap_or(feature.cls_index)],
                cls_logits: self.null_logit,
            }),
        }
    }
}

impl QuestionAnsweringModel for ScriptedModel {
    fn output_kind(&self) -> OutputKind {
        self.output_kind
    }

    fn predict(&self, features: &[&QaFeature]) -> Result<Vec<FeatureOutput>, ReaderError> {
        self.calls.borrow_mut().predicted_features += features.len();
        Ok(features.iter().map(|feature| self.output(feature)).collect())
    }

    fn train_step(&mut self, _features: &[&QaFeature], loss_scale: f64) -> Result<f64, ReaderError> {
        self.calls.borrow_mut().train_steps += 1;
        Ok(0.5 * loss_scale)
    }

    fn optimizer_step(
        &mut self,
        learning_rate: f64,
        _settings: &OptimizerSettings,
    ) -> Result<(), ReaderError> {
        self.calls.borrow_mut().optimizer_steps.push(learning_rate);
        Ok(())
    }

    fn save(&self, directory: &Path) -> Result<(), ReaderError> {
        fs::create_dir_all(directory)?;
        fs::write(directory.join(MODULE_NAME), "")?;
        fs::write(directory.join(WEIGHTS_NAME), "")?;
        Ok(())
    }

    fn load_checkpoint(&mut self, directory: &Path) -> Result<(), ReaderError> {
        self.calls
            .borrow_mut()
            .loaded_checkpoints
            .push(directory.to_path_buf());
        Ok(())
    }
}

/// Reader configuration with small sequences, the resources are never loaded.
pub fn small_config(model_type: ModelType, output_dir: &Path) -> ReaderConfig {
    let mut config = ReaderConfig::new(
        model_type,
        LocalResource::from(PathBuf::from("model.pt")),
        LocalResource::from(PathBuf::from("vocab.txt")),
    );
    config.training.output_dir = output_dir.to_path_buf();
    config.training.max_seq_length = 64;
    config.training.max_query_length = 24;
    config.training.doc_stride = 32;
    config.training.train_batch_size = 1;
    config.training.num_train_epochs = 2.0;
    config.training.save_steps = 1;
    config.inference.output_dir = output_dir.to_path_buf();
    config.inference.max_seq_length = 64;
    config.inference.max_query_length = 24;
    config.inference.doc_stride = 32;
    config.inference.start_n_top = 1;
    config.inference.end_n_top = 1;
    config
}

/// Reader running a scripted model, returned with the record of the model calls
pub fn scripted_reader(
    config: ReaderConfig,
    model: ScriptedModel,
) -> (Reader, Rc<RefCell<ModelCalls>>) {
    let layout = match model.output_kind {
        OutputKind::Standard => SequenceLayout::bert(0),
        OutputKind::Beam => SequenceLayout::xlnet(5),
    };
    let calls = model.calls.clone();
    let context =
        RuntimeContext::from_parts(Box::new(WordTokenizer::new(layout)), Box::new(model));
    (Reader::from_context(config, context), calls)
}

/// SQuAD 2.0 dataset with an answerable question about BNP Paribas and an unanswerable one
pub fn squad_json() -> serde_json::Value {
    let answer_start = BNP_CONTEXT.find("January 2016").unwrap_or_default();
    serde_json::json!({
        "version": "v2.0",
        "data": [
            {
                "title": BNP_TITLE,
                "paragraphs": [{
                    "context": BNP_CONTEXT,
                    "qas": [{
                        "id": "bnp",
                        "question": BNP_QUESTION,
                        "answers": [{"text": "January 2016", "answer_start": answer_start}],
                        "is_impossible": false
                    }]
                }]
            },
            {
                "title": "Museum",
                "paragraphs": [{
                    "context": MUSEUM_CONTEXT,
                    "qas": [{
                        "id": "museum",
                        "question": MUSEUM_QUESTION,
                        "answers": [],
                        "is_impossible": true
                    }]
                }]
            }
        ]
    })
}

/// Writes the dataset to `directory` and returns its path
pub fn write_squad_file(directory: &Path) -> anyhow::Result<PathBuf> {
    let path = directory.join("train-v2.0.json");
    fs::write(&path, serde_json::to_string(&squad_json())?)?;
    Ok(path)
}
