// Copyright 2019-present, the HuggingFace Inc. team, The Google AI Language Team and Facebook, Inc.
// Copyright 2019-2020 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Common blocks for the question answering reader
//! Provides the model family selection and the tokenization capability used by the feature
//! builder. The model family is resolved once, when the reader is configured: it decides the
//! special tokens layout of the encoded sequences and which kind of output (start/end logits or
//! top-k beams) the encoder produces.
use crate::common::error::ReaderError;
use rust_tokenizers::tokenizer::{BaseTokenizer, BertTokenizer, Tokenizer, XLNetTokenizer};
use rust_tokenizers::vocab::{BertVocab, XLNetVocab};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
/// # Identifies the type of model
pub enum ModelType {
    Bert,
    DistilBert,
    XLNet,
}

/// # Kind of output produced by a question answering head
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// One start and one end logit per token position
    Standard,
    /// Top-k start / end log-probabilities with their indices and an answerability logit
    Beam,
}

impl ModelType {
    /// Output kind of the question answering head for this model family
    pub fn output_kind(&self) -> OutputKind {
        match self {
            ModelType::Bert | ModelType::DistilBert => OutputKind::Standard,
            ModelType::XLNet => OutputKind::Beam,
        }
    }

    /// DistilBERT does not use segment embeddings
    pub fn uses_token_type_ids(&self) -> bool {
        !matches!(self, ModelType::DistilBert)
    }
}

impl FromStr for ModelType {
    type Err = ReaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "bert" => Ok(ModelType::Bert),
            "distilbert" => Ok(ModelType::DistilBert),
            "xlnet" => Ok(ModelType::XLNet),
            other => Err(ReaderError::ConfigError(format!(
                "Unknown model type {}, expected one of bert, distilbert, xlnet",
                other
            ))),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelType::Bert => "bert",
            ModelType::DistilBert => "distilbert",
            ModelType::XLNet => "xlnet",
        };
        write!(f, "{}", name)
    }
}

/// # Layout of the special tokens around a (question, context) pair
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceLayout {
    pub cls_token: String,
    pub sep_token: String,
    pub pad_token_id: i64,
    /// `true` for XLNet-like models that append the classification token
    pub cls_token_at_end: bool,
    pub cls_token_segment_id: i8,
    pub pad_token_segment_id: i8,
    pub sequence_a_segment_id: i8,
    pub sequence_b_segment_id: i8,
}

impl SequenceLayout {
    /// `[CLS] question [SEP] context [SEP]`
    pub fn bert(pad_token_id: i64) -> SequenceLayout {
        SequenceLayout {
            cls_token: BertVocab::cls_value().to_string(),
            sep_token: BertVocab::sep_value().to_string(),
            pad_token_id,
            cls_token_at_end: false,
            cls_token_segment_id: 0,
            pad_token_segment_id: 0,
            sequence_a_segment_id: 0,
            sequence_b_segment_id: 1,
        }
    }

    /// `question <sep> context <sep> <cls>`
    pub fn xlnet(pad_token_id: i64) -> SequenceLayout {
        SequenceLayout {
            cls_token: XLNetVocab::cls_value().to_string(),
            sep_token: XLNetVocab::sep_value().to_string(),
            pad_token_id,
            cls_token_at_end: true,
            cls_token_segment_id: 2,
            pad_token_segment_id: 4,
            sequence_a_segment_id: 0,
            sequence_b_segment_id: 1,
        }
    }
}

/// # Tokenization capability required by the feature builder and the answer aggregator
pub trait QaTokenizer {
    /// Splits a text into sub-word tokens
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Maps sub-word tokens to vocabulary indices
    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<i64>;

    /// Joins sub-word tokens back into text, removing the sub-word markers
    fn convert_tokens_to_string(&self, tokens: &[String]) -> String;

    /// Splits a text on whitespace, punctuation and CJK characters, applying the same casing and
    /// accent normalization as `tokenize` but without sub-word splitting
    fn basic_tokenize(&self, text: &str) -> Vec<String>;

    /// Special tokens layout used when building model inputs
    fn layout(&self) -> &SequenceLayout;
}

/// # Abstraction that holds a particular tokenizer, can be of any of the supported models
/// Each variant also holds the pre-tokenizer used to project predictions back to the context.
pub enum TokenizerOption {
    /// Bert Tokenizer (also used by DistilBERT)
    Bert(BertTokenizer, BaseTokenizer<BertVocab>, SequenceLayout),
    /// XLNet Tokenizer
    XLNet(XLNetTokenizer, BaseTokenizer<XLNetVocab>, SequenceLayout),
}

impl TokenizerOption {
    /// Interface method to load a tokenizer from file
    pub fn from_file(
        model_type: ModelType,
        vocab_path: &str,
        lower_case: bool,
        strip_accents: Option<bool>,
    ) -> Result<Self, ReaderError> {
        let tokenizer = match model_type {
            ModelType::Bert | ModelType::DistilBert => {
                let strip_accents = strip_accents.unwrap_or(lower_case);
                let tokenizer = BertTokenizer::from_file(vocab_path, lower_case, strip_accents)?;
                let vocab = Tokenizer::vocab(&tokenizer);
                let pad_id = special_token_id(&vocab.special_values, BertVocab::pad_value())?;
                let basic_tokenizer =
                    BaseTokenizer::from_existing_vocab(vocab.clone(), lower_case, strip_accents);
                TokenizerOption::Bert(tokenizer, basic_tokenizer, SequenceLayout::bert(pad_id))
            }
            ModelType::XLNet => {
                let strip_accents = strip_accents.unwrap_or(false);
                let tokenizer = XLNetTokenizer::from_file(vocab_path, lower_case, strip_accents)?;
                let vocab = Tokenizer::vocab(&tokenizer);
                let pad_id = special_token_id(&vocab.special_values, XLNetVocab::pad_value())?;
                let basic_tokenizer =
                    BaseTokenizer::from_existing_vocab(vocab.clone(), lower_case, strip_accents);
                TokenizerOption::XLNet(tokenizer, basic_tokenizer, SequenceLayout::xlnet(pad_id))
            }
        };
        Ok(tokenizer)
    }
}

fn special_token_id(
    special_values: &HashMap<String, i64>,
    token: &str,
) -> Result<i64, ReaderError> {
    special_values.get(token).copied().ok_or_else(|| {
        ReaderError::TokenizerError(format!("{} token not found in vocabulary", token))
    })
}

impl QaTokenizer for TokenizerOption {
    fn tokenize(&self, text: &str) -> Vec<String> {
        match *self {
            Self::Bert(ref tokenizer, ..) => tokenizer.tokenize(text),
            Self::XLNet(ref tokenizer, ..) => tokenizer.tokenize(text),
        }
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<i64> {
        match *self {
            Self::Bert(ref tokenizer, ..) => tokenizer.convert_tokens_to_ids(tokens),
            Self::XLNet(ref tokenizer, ..) => tokenizer.convert_tokens_to_ids(tokens),
        }
    }

    fn convert_tokens_to_string(&self, tokens: &[String]) -> String {
        match *self {
            Self::Bert(ref tokenizer, ..) => tokenizer.convert_tokens_to_string(tokens.to_vec()),
            Self::XLNet(ref tokenizer, ..) => tokenizer.convert_tokens_to_string(tokens.to_vec()),
        }
    }

    fn basic_tokenize(&self, text: &str) -> Vec<String> {
        match *self {
            Self::Bert(_, ref basic_tokenizer, _) => basic_tokenizer.tokenize(text),
            Self::XLNet(_, ref basic_tokenizer, _) => basic_tokenizer.tokenize(text),
        }
    }

    fn layout(&self) -> &SequenceLayout {
        match *self {
            Self::Bert(.., ref layout) => layout,
            Self::XLNet(.., ref layout) => layout,
        }
    }
}
