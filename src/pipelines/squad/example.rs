// Copyright 2018 The Google AI Language Team Authors and The HuggingFace Inc. team.
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

//! # SQuAD examples
//! Reading of SQuAD-formatted datasets (v1.1 and v2.0) into `SquadExample`s. The context of each
//! example is split on whitespace into words, and every character of the context is mapped to the
//! index of the word it belongs to. Gold answers are converted from character offsets to word
//! indices.

use crate::common::error::ReaderError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// # SQuAD dataset, as found in the `train-v2.0.json` / `dev-v2.0.json` files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadDataset {
    #[serde(default)]
    pub version: Option<String>,
    pub data: Vec<SquadArticle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadArticle {
    #[serde(default)]
    pub title: String,
    pub paragraphs: Vec<SquadParagraph>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadParagraph {
    pub context: String,
    pub qas: Vec<SquadQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadQuestion {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub answers: Vec<SquadAnswer>,
    #[serde(default)]
    pub is_impossible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadAnswer {
    pub text: String,
    pub answer_start: usize,
}

/// # Question and context pair to run a prediction on
#[derive(Debug, Clone)]
pub struct QaInput {
    pub question: String,
    pub context: String,
    /// Title of the document the context was extracted from
    pub title: String,
}

/// # Source of SQuAD-formatted data: a file on disk or an in-memory dataset
#[derive(Debug, Clone)]
pub enum SquadInput {
    File(PathBuf),
    Dataset(SquadDataset),
}

impl From<PathBuf> for SquadInput {
    fn from(path: PathBuf) -> Self {
        SquadInput::File(path)
    }
}

impl From<&Path> for SquadInput {
    fn from(path: &Path) -> Self {
        SquadInput::File(path.to_path_buf())
    }
}

impl From<SquadDataset> for SquadInput {
    fn from(dataset: SquadDataset) -> Self {
        SquadInput::Dataset(dataset)
    }
}

impl SquadInput {
    /// Loads the dataset, reading and parsing the file if needed
    pub fn load(&self) -> Result<SquadDataset, ReaderError> {
        match self {
            SquadInput::File(path) => SquadDataset::from_file(path),
            SquadInput::Dataset(dataset) => Ok(dataset.clone()),
        }
    }

    /// Path of the underlying file, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            SquadInput::File(path) => Some(path.as_path()),
            SquadInput::Dataset(_) => None,
        }
    }
}

impl SquadDataset {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SquadDataset, ReaderError> {
        let file = File::open(path.as_ref()).map_err(|error| {
            ReaderError::IOError(format!(
                "could not open SQuAD file {:?}: {}",
                path.as_ref(),
                error
            ))
        })?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Builds a dataset with one article per input, each question receiving a random identifier.
    pub fn from_inputs(inputs: &[QaInput]) -> SquadDataset {
        let data = inputs
            .iter()
            .map(|input| SquadArticle {
                title: input.title.clone(),
                paragraphs: vec![SquadParagraph {
                    context: input.context.clone(),
                    qas: vec![SquadQuestion {
                        id: Uuid::new_v4().to_string(),
                        question: input.question.clone(),
                        answers: vec![],
                        is_impossible: false,
                    }],
                }],
            })
            .collect();
        SquadDataset {
            version: None,
            data,
        }
    }

    /// Reads the examples of the dataset.
    ///
    /// For training, each answerable question must have exactly one answer, and the answer text
    /// must be found in the context at the stated offset (after whitespace normalization).
    /// Examples failing this check are skipped with a warning.
    pub fn examples(
        &self,
        is_training: bool,
        version_2_with_negative: bool,
    ) -> Result<Vec<SquadExample>, ReaderError> {
        let mut examples = Vec::new();
        for article in self.data.iter() {
            for paragraph in article.paragraphs.iter() {
                let (doc_tokens, char_to_word_offset) = split_context(&paragraph.context);
                for qa in paragraph.qas.iter() {
                    let example = SquadExample::from_parts(
                        qa,
                        &article.title,
                        &paragraph.context,
                        doc_tokens.clone(),
                        char_to_word_offset.clone(),
                        is_training,
                        version_2_with_negative,
                    );
                    match example {
                        Ok(example) => examples.push(example),
                        Err(ReaderError::DataError(message)) => {
                            log::warn!("Skipping example {}: {}", qa.id, message);
                        }
                        Err(error) => return Err(error),
                    }
                }
            }
        }
        Ok(examples)
    }
}

/// # A single question with its context paragraph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadExample {
    pub qas_id: String,
    pub question_text: String,
    pub title: String,
    pub context_text: String,
    /// Whitespace-separated words of the context
    pub doc_tokens: Vec<String>,
    /// Word index for every character of the context
    pub char_to_word_offset: Vec<usize>,
    /// Character offset of the start of every word of the context
    pub word_char_offsets: Vec<usize>,
    pub orig_answer_text: Option<String>,
    /// Word index of the first word of the gold answer
    pub start_position: Option<usize>,
    /// Word index of the last word of the gold answer
    pub end_position: Option<usize>,
    pub is_impossible: bool,
}

impl SquadExample {
    /// Creates an example without gold answer (used for inference)
    pub fn new(qas_id: &str, question: &str, context: &str, title: &str) -> SquadExample {
        let (doc_tokens, char_to_word_offset) = split_context(context);
        let word_char_offsets = word_char_offsets(context);
        SquadExample {
            qas_id: qas_id.to_string(),
            question_text: question.to_string(),
            title: title.to_string(),
            context_text: context.to_string(),
            doc_tokens,
            char_to_word_offset,
            word_char_offsets,
            orig_answer_text: None,
            start_position: None,
            end_position: None,
            is_impossible: false,
        }
    }

    /// Creates a training example and locates the gold answer in the context.
    pub fn with_answer(
        qas_id: &str,
        question: &str,
        context: &str,
        title: &str,
        answer_text: &str,
        answer_start: usize,
    ) -> Result<SquadExample, ReaderError> {
        let mut example = SquadExample::new(qas_id, question, context, title);
        example.set_answer(answer_text, answer_start)?;
        Ok(example)
    }

    fn from_parts(
        qa: &SquadQuestion,
        title: &str,
        context: &str,
        doc_tokens: Vec<String>,
        char_to_word_offset: Vec<usize>,
        is_training: bool,
        version_2_with_negative: bool,
    ) -> Result<SquadExample, ReaderError> {
        let word_char_offsets = word_char_offsets(context);
        let mut example = SquadExample {
            qas_id: qa.id.clone(),
            question_text: qa.question.clone(),
            title: title.to_string(),
            context_text: context.to_string(),
            doc_tokens,
            char_to_word_offset,
            word_char_offsets,
            orig_answer_text: None,
            start_position: None,
            end_position: None,
            is_impossible: version_2_with_negative && qa.is_impossible,
        };
        if is_training && !example.is_impossible {
            if qa.answers.len() != 1 {
                return Err(ReaderError::DataError(format!(
                    "answerable training questions must have exactly one answer, got {}",
                    qa.answers.len()
                )));
            }
            let answer = &qa.answers[0];
            example.set_answer(&answer.text, answer.answer_start)?;
        }
        Ok(example)
    }

    fn set_answer(&mut self, answer_text: &str, answer_start: usize) -> Result<(), ReaderError> {
        let answer_length = answer_text.chars().count();
        if answer_length == 0 {
            return Err(ReaderError::DataError("empty answer text".to_string()));
        }
        let end_char = answer_start + answer_length - 1;
        if end_char >= self.char_to_word_offset.len() {
            return Err(ReaderError::DataError(format!(
                "answer offset {} out of the context bounds",
                answer_start
            )));
        }
        let start_position = self.char_to_word_offset[answer_start];
        let end_position = self.char_to_word_offset[end_char];

        let actual_text = self.doc_tokens[start_position..=end_position].join(" ");
        let cleaned_answer_text = whitespace_tokenize(answer_text).join(" ");
        if !actual_text.contains(&cleaned_answer_text) {
            return Err(ReaderError::DataError(format!(
                "could not find answer: '{}' vs. '{}'",
                actual_text, cleaned_answer_text
            )));
        }
        self.orig_answer_text = Some(answer_text.to_string());
        self.start_position = Some(start_position);
        self.end_position = Some(end_position);
        Ok(())
    }

    /// Character span `[start, end)` of the context covered by the words `start_word..=end_word`
    pub fn word_span_to_char_span(&self, start_word: usize, end_word: usize) -> (usize, usize) {
        let start = self.word_char_offsets[start_word];
        let end = self.word_char_offsets[end_word] + self.doc_tokens[end_word].chars().count();
        (start, end)
    }
}

pub(crate) fn is_whitespace(character: char) -> bool {
    character == ' '
        || character == '\t'
        || character == '\r'
        || character == '\n'
        || character as u32 == 0x202F
}

/// Splits a context into words and maps every character to the index of its word.
/// Whitespace characters are mapped to the preceding word.
pub fn split_context(context: &str) -> (Vec<String>, Vec<usize>) {
    let mut doc_tokens: Vec<String> = vec![];
    let mut char_to_word_offset: Vec<usize> = vec![];
    let mut previous_whitespace = true;

    for character in context.chars() {
        if is_whitespace(character) {
            previous_whitespace = true;
        } else {
            if previous_whitespace {
                doc_tokens.push(String::new());
            }
            if let Some(word) = doc_tokens.last_mut() {
                word.push(character);
            }
            previous_whitespace = false;
        }
        char_to_word_offset.push(doc_tokens.len().saturating_sub(1));
    }
    (doc_tokens, char_to_word_offset)
}

fn word_char_offsets(context: &str) -> Vec<usize> {
    let mut offsets = vec![];
    let mut previous_whitespace = true;
    for (char_index, character) in context.chars().enumerate() {
        let whitespace = is_whitespace(character);
        if !whitespace && previous_whitespace {
            offsets.push(char_index);
        }
        previous_whitespace = whitespace;
    }
    offsets
}

pub(crate) fn whitespace_tokenize(text: &str) -> Vec<&str> {
    text.split(is_whitespace)
        .filter(|token| !token.is_empty())
        .collect()
}
