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

//! # Span decoders
//! Turn the model outputs of all the windows of an example into a ranked list of candidate
//! answer spans (in token space).
//!
//! - `StandardDecoder` works on one start and one end logit per token. The best `n_best_size`
//!   start and end positions of every window are combined and filtered.
//! - `BeamDecoder` works on the top-k start positions returned by the model and the top-k end
//!   positions returned for each of them, scored by the sum of their log-probabilities.
//!
//! Both decoders only keep spans that start and end within the context of the window, that start
//! on a token for which the window provides the maximum context, that do not end before they
//! start, and that are not longer than `max_answer_length` tokens. Candidates of all windows are
//! ranked together by decreasing score (ties keep the window / position order).

use crate::common::error::ReaderError;
use crate::pipelines::common::OutputKind;
use crate::pipelines::squad::features::QaFeature;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// # Start and end logits for every token position of a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardOutput {
    pub start_logits: Vec<f64>,
    pub end_logits: Vec<f64>,
}

/// # Top-k beams for a window
/// `end_top_log_probs` / `end_top_index` hold either `end_n_top` entries shared by all start
/// positions, or `start_n_top * end_n_top` entries where entry `i * end_n_top + j` is the j-th best
/// end for the i-th best start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamOutput {
    pub start_top_log_probs: Vec<f64>,
    pub start_top_index: Vec<usize>,
    pub end_top_log_probs: Vec<f64>,
    pub end_top_index: Vec<usize>,
    /// Answerability logit (higher means more likely to have no answer)
    pub cls_logits: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureOutput {
    Standard(StandardOutput),
    Beam(BeamOutput),
}

/// # Model output for one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// `unique_id` of the feature this output was computed for
    pub unique_id: usize,
    pub output: FeatureOutput,
}

/// # Candidate answer span, in the token space of one of the windows of an example
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanCandidate {
    /// Index of the window among the features of the example
    pub feature_index: usize,
    pub start_index: usize,
    pub end_index: usize,
    /// Start logit (standard) or start log-probability (beam)
    pub start_score: f64,
    /// End logit (standard) or end log-probability (beam)
    pub end_score: f64,
    /// `true` for the classification token span standing for "no answer"
    pub is_null: bool,
}

impl SpanCandidate {
    pub fn score(&self) -> f64 {
        self.start_score + self.end_score
    }
}

/// # Ranked candidates for one example
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrelimPredictions {
    /// Candidates sorted by decreasing score
    pub candidates: Vec<SpanCandidate>,
    /// Score of the "no answer" option (SQuAD 2.0), minimum over the windows of the example
    pub null_score: Option<f64>,
}

/// # Decoder for start / end logits outputs
#[derive(Debug, Clone)]
pub struct StandardDecoder {
    pub n_best_size: usize,
    pub max_answer_length: usize,
    pub version_2_with_negative: bool,
}

/// # Decoder for top-k beams outputs
#[derive(Debug, Clone)]
pub struct BeamDecoder {
    pub max_answer_length: usize,
    pub start_n_top: usize,
    pub end_n_top: usize,
}

/// # Span decoder matching the output kind of the model
#[derive(Debug, Clone)]
pub enum SpanDecoder {
    Standard(StandardDecoder),
    Beam(BeamDecoder),
}

impl SpanDecoder {
    /// Selects the decoder for the output kind of the model.
    pub fn new(
        output_kind: OutputKind,
        n_best_size: usize,
        max_answer_length: usize,
        version_2_with_negative: bool,
        start_n_top: usize,
        end_n_top: usize,
    ) -> SpanDecoder {
        match output_kind {
            OutputKind::Standard => SpanDecoder::Standard(StandardDecoder {
                n_best_size,
                max_answer_length,
                version_2_with_negative,
            }),
            OutputKind::Beam => SpanDecoder::Beam(BeamDecoder {
                max_answer_length,
                start_n_top,
                end_n_top,
            }),
        }
    }

    pub fn output_kind(&self) -> OutputKind {
        match self {
            SpanDecoder::Standard(_) => OutputKind::Standard,
            SpanDecoder::Beam(_) => OutputKind::Beam,
        }
    }

    /// Decodes the candidates of an example from the (feature, model output) pairs of its windows.
    pub fn decode(
        &self,
        windows: &[(&QaFeature, &RawResult)],
    ) -> Result<PrelimPredictions, ReaderError> {
        match self {
            SpanDecoder::Standard(decoder) => {
                let outputs = windows
                    .iter()
                    .map(|(feature, result)| match &result.output {
                        FeatureOutput::Standard(output) => Ok((*feature, output)),
                        FeatureOutput::Beam(_) => Err(output_mismatch(result, "start/end logits")),
                    })
                    .collect::<Result<Vec<_>, ReaderError>>()?;
                decoder.decode(&outputs)
            }
            SpanDecoder::Beam(decoder) => {
                let outputs = windows
                    .iter()
                    .map(|(feature, result)| match &result.output {
                        FeatureOutput::Beam(output) => Ok((*feature, output)),
                        FeatureOutput::Standard(_) => Err(output_mismatch(result, "top-k beams")),
                    })
                    .collect::<Result<Vec<_>, ReaderError>>()?;
                decoder.decode(&outputs)
            }
        }
    }
}

fn output_mismatch(result: &RawResult, expected: &str) -> ReaderError {
    ReaderError::ConfigError(format!(
        "model output for feature {} does not match the decoder, expected {}",
        result.unique_id, expected
    ))
}

/// Indices of the `n_best_size` largest values, by decreasing value
pub fn best_indexes(logits: &[f64], n_best_size: usize) -> Vec<usize> {
    let mut indexed: Vec<(usize, f64)> = logits.iter().copied().enumerate().collect();
    indexed.sort_by_key(|(_, logit)| Reverse(OrderedFloat(*logit)));
    indexed
        .into_iter()
        .take(n_best_size)
        .map(|(index, _)| index)
        .collect()
}

fn is_valid_span(
    feature: &QaFeature,
    start_index: usize,
    end_index: usize,
    max_answer_length: usize,
) -> bool {
    feature.is_context_position(start_index)
        && feature.is_context_position(end_index)
        && feature
            .token_is_max_context
            .get(start_index)
            .copied()
            .unwrap_or(false)
        && end_index >= start_index
        && end_index - start_index + 1 <= max_answer_length
}

fn sort_candidates(candidates: &mut [SpanCandidate]) {
    candidates.sort_by_key(|candidate| Reverse(OrderedFloat(candidate.score())));
}

impl StandardDecoder {
    pub fn decode(
        &self,
        windows: &[(&QaFeature, &StandardOutput)],
    ) -> Result<PrelimPredictions, ReaderError> {
        let mut candidates = vec![];
        let mut null_candidate: Option<SpanCandidate> = None;

        for (feature_index, (feature, output)) in windows.iter().enumerate() {
            if self.version_2_with_negative {
                let cls_index = feature.cls_index;
                let (null_start, null_end) = match (
                    output.start_logits.get(cls_index),
                    output.end_logits.get(cls_index),
                ) {
                    (Some(start), Some(end)) => (*start, *end),
                    _ => {
                        return Err(ReaderError::DataError(format!(
                            "logits of feature {} do not cover its classification token",
                            feature.unique_id
                        )));
                    }
                };
                let feature_null_score = null_start + null_end;
                if null_candidate.map_or(true, |null| feature_null_score < null.score()) {
                    null_candidate = Some(SpanCandidate {
                        feature_index,
                        start_index: cls_index,
                        end_index: cls_index,
                        start_score: null_start,
                        end_score: null_end,
                        is_null: true,
                    });
                }
            }

            let start_indexes = best_indexes(&output.start_logits, self.n_best_size);
            let end_indexes = best_indexes(&output.end_logits, self.n_best_size);
            for &start_index in start_indexes.iter() {
                for &end_index in end_indexes.iter() {
                    if !is_valid_span(feature, start_index, end_index, self.max_answer_length) {
                        continue;
                    }
                    candidates.push(SpanCandidate {
                        feature_index,
                        start_index,
                        end_index,
                        start_score: output.start_logits[start_index],
                        end_score: output.end_logits[end_index],
                        is_null: false,
                    });
                }
            }
        }

        if let Some(null_candidate) = null_candidate {
            candidates.push(null_candidate);
        }
        sort_candidates(&mut candidates);
        Ok(PrelimPredictions {
            candidates,
            null_score: null_candidate.map(|candidate| candidate.score()),
        })
    }
}

impl BeamDecoder {
    pub fn decode(
        &self,
        windows: &[(&QaFeature, &BeamOutput)],
    ) -> Result<PrelimPredictions, ReaderError> {
        let mut candidates = vec![];
        let mut null_score: Option<f64> = None;

        for (feature_index, (feature, output)) in windows.iter().enumerate() {
            if null_score.map_or(true, |score| output.cls_logits < score) {
                null_score = Some(output.cls_logits);
            }
            let conditioned_ends = self.check_beam_sizes(feature, output)?;

            for i in 0..self.start_n_top {
                let start_log_prob = output.start_top_log_probs[i];
                let start_index = output.start_top_index[i];
                for j in 0..self.end_n_top {
                    let j_index = if conditioned_ends {
                        i * self.end_n_top + j
                    } else {
                        j
                    };
                    let end_log_prob = output.end_top_log_probs[j_index];
                    let end_index = output.end_top_index[j_index];
                    if !is_valid_span(feature, start_index, end_index, self.max_answer_length) {
                        continue;
                    }
                    candidates.push(SpanCandidate {
                        feature_index,
                        start_index,
                        end_index,
                        start_score: start_log_prob,
                        end_score: end_log_prob,
                        is_null: false,
                    });
                }
            }
        }

        sort_candidates(&mut candidates);
        Ok(PrelimPredictions {
            candidates,
            null_score,
        })
    }

    /// Returns `true` if the end beams are conditioned on each start beam
    fn check_beam_sizes(
        &self,
        feature: &QaFeature,
        output: &BeamOutput,
    ) -> Result<bool, ReaderError> {
        if output.start_top_log_probs.len() < self.start_n_top
            || output.start_top_index.len() < self.start_n_top
        {
            return Err(ReaderError::DataError(format!(
                "feature {} has less than {} start beams",
                feature.unique_id, self.start_n_top
            )));
        }
        let num_ends = output.end_top_index.len();
        if output.end_top_log_probs.len() != num_ends {
            return Err(ReaderError::DataError(format!(
                "feature {} has {} end log-probabilities for {} end indices",
                feature.unique_id,
                output.end_top_log_probs.len(),
                num_ends
            )));
        }
        if num_ends == self.start_n_top * self.end_n_top {
            Ok(true)
        } else if num_ends == self.end_n_top {
            Ok(false)
        } else {
            Err(ReaderError::DataError(format!(
                "feature {} has {} end beams, expected {} or {}",
                feature.unique_id,
                num_ends,
                self.end_n_top,
                self.start_n_top * self.end_n_top
            )))
        }
    }
}
