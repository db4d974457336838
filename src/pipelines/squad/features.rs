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

//! # Feature builder
//! Converts `SquadExample`s into fixed-length model inputs. Contexts longer than the space left
//! by the question are covered by overlapping windows ("doc spans") moving by `doc_stride`
//! sub-tokens. Each window keeps the mapping from its token positions back to the words of the
//! original context, and flags for every context token whether this window is the one giving it
//! the most surrounding context.

use crate::common::error::ReaderError;
use crate::pipelines::common::QaTokenizer;
use crate::pipelines::squad::example::SquadExample;
use serde::{Deserialize, Serialize};
use std::cmp::min;
use std::collections::HashMap;

/// Identifier of the first feature generated by a `FeatureBuilder`
pub const FIRST_UNIQUE_ID: usize = 1_000_000_000;

/// # Sliding window tokenization of a `SquadExample`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaFeature {
    /// Join key with the model output for this feature
    pub unique_id: usize,
    /// Index of the example this feature was generated from
    pub example_index: usize,
    /// Index of the window within the example
    pub doc_span_index: usize,
    pub tokens: Vec<String>,
    /// Token position -> word index in the original context (context tokens only)
    pub token_to_orig_map: HashMap<usize, usize>,
    /// `true` if this window gives the token at this position its maximum context
    pub token_is_max_context: Vec<bool>,
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
    /// Position of the classification token, used as the null answer anchor
    pub cls_index: usize,
    /// 1 for positions that cannot be part of an answer (question, special tokens, padding)
    pub p_mask: Vec<i8>,
    /// Number of context tokens in the window
    pub paragraph_len: usize,
    /// Token position of the first context token
    pub paragraph_offset: usize,
    pub start_position: Option<usize>,
    pub end_position: Option<usize>,
    pub is_impossible: bool,
}

impl QaFeature {
    /// Returns `true` if the token at `position` belongs to the context of this window
    pub fn is_context_position(&self, position: usize) -> bool {
        position < self.p_mask.len()
            && self.p_mask[position] == 0
            && self.token_to_orig_map.contains_key(&position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DocSpan {
    start: usize,
    length: usize,
}

impl DocSpan {
    fn end(&self) -> usize {
        self.start + self.length - 1
    }
}

/// # Builds `QaFeature`s from `SquadExample`s
pub struct FeatureBuilder<'a, T: QaTokenizer + ?Sized> {
    tokenizer: &'a T,
    max_seq_length: usize,
    doc_stride: usize,
    max_query_length: usize,
}

impl<'a, T: QaTokenizer + ?Sized> FeatureBuilder<'a, T> {
    /// Creates a new feature builder.
    ///
    /// # Arguments
    ///
    /// * `tokenizer` - tokenizer providing the sub-word segmentation and special tokens layout
    /// * `max_seq_length` - total length of the generated sequences (after padding)
    /// * `doc_stride` - number of tokens between the starts of two successive windows
    /// * `max_query_length` - maximum number of question tokens, longer questions are truncated
    pub fn new(
        tokenizer: &'a T,
        max_seq_length: usize,
        doc_stride: usize,
        max_query_length: usize,
    ) -> Result<FeatureBuilder<'a, T>, ReaderError> {
        if doc_stride == 0 {
            return Err(ReaderError::ConfigError(
                "doc_stride must be strictly positive".to_string(),
            ));
        }
        if max_seq_length <= max_query_length + 3 {
            return Err(ReaderError::ConfigError(format!(
                "max_seq_length ({}) must be larger than max_query_length ({}) + 3",
                max_seq_length, max_query_length
            )));
        }
        Ok(FeatureBuilder {
            tokenizer,
            max_seq_length,
            doc_stride,
            max_query_length,
        })
    }

    /// Converts a list of examples into features. Unique ids are assigned sequentially starting
    /// from `FIRST_UNIQUE_ID`.
    pub fn convert_examples(
        &self,
        examples: &[SquadExample],
        is_training: bool,
    ) -> Result<Vec<QaFeature>, ReaderError> {
        let mut features = Vec::with_capacity(examples.len());
        let mut unique_id = FIRST_UNIQUE_ID;
        for (example_index, example) in examples.iter().enumerate() {
            let example_features =
                self.convert_example(example, example_index, unique_id, is_training)?;
            unique_id += example_features.len();
            features.extend(example_features);
        }
        Ok(features)
    }

    /// Converts a single example into one feature per window.
    pub fn convert_example(
        &self,
        example: &SquadExample,
        example_index: usize,
        first_unique_id: usize,
        is_training: bool,
    ) -> Result<Vec<QaFeature>, ReaderError> {
        let layout = self.tokenizer.layout();

        let mut query_tokens = self.tokenizer.tokenize(&example.question_text);
        query_tokens.truncate(self.max_query_length);

        let mut tok_to_orig_index: Vec<usize> = vec![];
        let mut orig_to_tok_index: Vec<usize> = vec![];
        let mut all_doc_tokens: Vec<String> = vec![];
        for (word_index, word) in example.doc_tokens.iter().enumerate() {
            orig_to_tok_index.push(all_doc_tokens.len());
            for sub_token in self.tokenizer.tokenize(word) {
                tok_to_orig_index.push(word_index);
                all_doc_tokens.push(sub_token);
            }
        }

        let answer_token_span = if is_training && !example.is_impossible {
            Some(self.answer_token_span(
                example,
                &orig_to_tok_index,
                &all_doc_tokens,
            )?)
        } else {
            None
        };

        let max_tokens_for_doc = self.max_seq_length - query_tokens.len() - 3;
        let doc_spans = doc_spans(all_doc_tokens.len(), max_tokens_for_doc, self.doc_stride);

        let mut features = Vec::with_capacity(doc_spans.len());
        for (doc_span_index, doc_span) in doc_spans.iter().enumerate() {
            let mut tokens: Vec<String> = Vec::with_capacity(self.max_seq_length);
            let mut segment_ids: Vec<i8> = Vec::with_capacity(self.max_seq_length);
            let mut p_mask: Vec<i8> = Vec::with_capacity(self.max_seq_length);
            let mut token_to_orig_map = HashMap::with_capacity(doc_span.length);
            let mut token_is_max_context = Vec::with_capacity(self.max_seq_length);
            let mut cls_index = 0;

            if !layout.cls_token_at_end {
                tokens.push(layout.cls_token.clone());
                segment_ids.push(layout.cls_token_segment_id);
                p_mask.push(0);
                token_is_max_context.push(false);
            }

            for token in query_tokens.iter() {
                tokens.push(token.clone());
                segment_ids.push(layout.sequence_a_segment_id);
                p_mask.push(1);
                token_is_max_context.push(false);
            }
            tokens.push(layout.sep_token.clone());
            segment_ids.push(layout.sequence_a_segment_id);
            p_mask.push(1);
            token_is_max_context.push(false);

            let paragraph_offset = tokens.len();
            for i in 0..doc_span.length {
                let split_token_index = doc_span.start + i;
                token_to_orig_map.insert(tokens.len(), tok_to_orig_index[split_token_index]);
                token_is_max_context.push(is_max_context(
                    &doc_spans,
                    doc_span_index,
                    split_token_index,
                ));
                tokens.push(all_doc_tokens[split_token_index].clone());
                segment_ids.push(layout.sequence_b_segment_id);
                p_mask.push(0);
            }

            tokens.push(layout.sep_token.clone());
            segment_ids.push(layout.sequence_b_segment_id);
            p_mask.push(1);
            token_is_max_context.push(false);

            if layout.cls_token_at_end {
                cls_index = tokens.len();
                tokens.push(layout.cls_token.clone());
                segment_ids.push(layout.cls_token_segment_id);
                p_mask.push(0);
                token_is_max_context.push(false);
            }

            let mut input_ids = self.tokenizer.convert_tokens_to_ids(&tokens);
            let mut attention_mask = vec![1i64; input_ids.len()];
            let padding = self.max_seq_length.saturating_sub(input_ids.len());
            input_ids.extend(vec![layout.pad_token_id; padding]);
            attention_mask.extend(vec![0i64; padding]);
            segment_ids.extend(vec![layout.pad_token_segment_id; padding]);
            p_mask.extend(vec![1i8; padding]);
            token_is_max_context.extend(vec![false; padding]);

            let mut is_impossible = example.is_impossible;
            let mut start_position = None;
            let mut end_position = None;
            if is_training {
                match answer_token_span {
                    Some((tok_start, tok_end))
                        if tok_start >= doc_span.start && tok_end <= doc_span.end() =>
                    {
                        start_position = Some(tok_start - doc_span.start + paragraph_offset);
                        end_position = Some(tok_end - doc_span.start + paragraph_offset);
                    }
                    _ => {
                        is_impossible = true;
                        start_position = Some(cls_index);
                        end_position = Some(cls_index);
                    }
                }
            }

            features.push(QaFeature {
                unique_id: first_unique_id + doc_span_index,
                example_index,
                doc_span_index,
                tokens,
                token_to_orig_map,
                token_is_max_context,
                input_ids,
                attention_mask,
                token_type_ids: segment_ids.into_iter().map(i64::from).collect(),
                cls_index,
                p_mask,
                paragraph_len: doc_span.length,
                paragraph_offset,
                start_position,
                end_position,
                is_impossible,
            });
        }
        Ok(features)
    }

    /// Sub-token span of the gold answer, tightened to the tokenized answer text when possible
    fn answer_token_span(
        &self,
        example: &SquadExample,
        orig_to_tok_index: &[usize],
        all_doc_tokens: &[String],
    ) -> Result<(usize, usize), ReaderError> {
        let (start_position, end_position, answer_text) = match (
            example.start_position,
            example.end_position,
            example.orig_answer_text.as_ref(),
        ) {
            (Some(start), Some(end), Some(text)) => (start, end, text),
            _ => {
                return Err(ReaderError::DataError(format!(
                    "training example {} has no located gold answer",
                    example.qas_id
                )));
            }
        };
        if all_doc_tokens.is_empty() {
            return Err(ReaderError::DataError(format!(
                "context of example {} is empty after tokenization",
                example.qas_id
            )));
        }
        let tok_start = match orig_to_tok_index.get(start_position) {
            Some(tok_start) if *tok_start < all_doc_tokens.len() => *tok_start,
            _ => {
                return Err(ReaderError::DataError(format!(
                    "gold answer of example {} starts on a word without sub-tokens",
                    example.qas_id
                )));
            }
        };
        let tok_end = match orig_to_tok_index.get(end_position + 1) {
            Some(next_word_start) => next_word_start.saturating_sub(1),
            None => all_doc_tokens.len() - 1,
        }
        .min(all_doc_tokens.len() - 1);
        Ok(self.improve_answer_span(all_doc_tokens, tok_start, tok_end.max(tok_start), answer_text))
    }

    /// The gold answer is annotated on whole words, while the model predicts sub-tokens. Finds
    /// the smallest sub-token span matching the tokenized answer text, e.g. "1895" within
    /// "(1895-1943)." once split into sub-tokens.
    fn improve_answer_span(
        &self,
        doc_tokens: &[String],
        input_start: usize,
        input_end: usize,
        orig_answer_text: &str,
    ) -> (usize, usize) {
        let tok_answer_text = self.tokenizer.tokenize(orig_answer_text).join(" ");
        for new_start in input_start..=input_end {
            for new_end in (new_start..=input_end).rev() {
                if doc_tokens[new_start..=new_end].join(" ") == tok_answer_text {
                    return (new_start, new_end);
                }
            }
        }
        (input_start, input_end)
    }
}

fn doc_spans(num_doc_tokens: usize, max_tokens_for_doc: usize, doc_stride: usize) -> Vec<DocSpan> {
    let mut doc_spans = vec![];
    let mut start_offset = 0;
    while start_offset < num_doc_tokens {
        let length = min(num_doc_tokens - start_offset, max_tokens_for_doc);
        doc_spans.push(DocSpan {
            start: start_offset,
            length,
        });
        if start_offset + length == num_doc_tokens {
            break;
        }
        start_offset += min(length, doc_stride);
    }
    doc_spans
}

/// A token appearing in several windows is scored in each of them by the minimum of its left and
/// right context, with a small bonus for longer windows. The first window with the best score
/// wins.
fn is_max_context(doc_spans: &[DocSpan], current_span_index: usize, position: usize) -> bool {
    let mut best_score = None;
    let mut best_span_index = None;
    for (span_index, doc_span) in doc_spans.iter().enumerate() {
        if position < doc_span.start || position > doc_span.end() {
            continue;
        }
        let num_left_context = position - doc_span.start;
        let num_right_context = doc_span.end() - position;
        let score =
            min(num_left_context, num_right_context) as f64 + 0.01 * doc_span.length as f64;
        if best_score.map_or(true, |best| score > best) {
            best_score = Some(score);
            best_span_index = Some(span_index);
        }
    }
    best_span_index == Some(current_span_index)
}
