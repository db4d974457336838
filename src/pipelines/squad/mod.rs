//! # SQuAD data processing
//!
//! Building blocks turning SQuAD examples into model inputs and model outputs back into answers:
//! - `example`: SQuAD JSON data model and whitespace split of the contexts
//! - `features`: sliding window tokenization into fixed-length features
//! - `decoding`: span decoders for start/end logits and top-k beams outputs
//! - `aggregation`: answer text reconstruction, n-best lists and the null answer decision
//! - `predictions`: prediction files
//! - `evaluation`: SQuAD v1.1 / v2.0 metrics
//! - `cache`: on-disk cache of computed features

pub mod aggregation;
pub mod cache;
pub mod decoding;
pub mod evaluation;
pub mod example;
pub mod features;
pub mod predictions;

pub use aggregation::{compute_predictions, AnswerAggregator, ExamplePrediction, NbestEntry};
pub use cache::FeatureCache;
pub use decoding::{
    BeamDecoder, BeamOutput, FeatureOutput, PrelimPredictions, RawResult, SpanCandidate,
    SpanDecoder, StandardDecoder, StandardOutput,
};
pub use evaluation::{evaluate_predictions, EvaluationResults};
pub use example::{QaInput, SquadDataset, SquadExample, SquadInput};
pub use features::{FeatureBuilder, QaFeature, FIRST_UNIQUE_ID};
pub use predictions::{PredictionFiles, PredictionOutput};

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::pipelines::common::{QaTokenizer, SequenceLayout};
    use crate::pipelines::squad::decoding::{
        BeamOutput, FeatureOutput, RawResult, StandardOutput,
    };
    use crate::pipelines::squad::features::{QaFeature, FIRST_UNIQUE_ID};
    use rust_tokenizers::tokenizer::{BaseTokenizer, Tokenizer};
    use rust_tokenizers::vocab::BaseVocab;
    use std::collections::HashMap;

    const MAX_PIECE_LENGTH: usize = 6;

    /// Splits on whitespace and punctuation with the BERT pre-tokenizer (lower casing and accent
    /// stripping unless cased), and cuts words longer than 6 characters into `##` pieces.
    pub struct WordTokenizer {
        layout: SequenceLayout,
        basic_tokenizer: BaseTokenizer<BaseVocab>,
    }

    fn basic_tokenizer(lower_case: bool) -> BaseTokenizer<BaseVocab> {
        let vocab = BaseVocab {
            values: HashMap::new(),
            indices: HashMap::new(),
            unknown_value: "[UNK]",
            special_values: HashMap::new(),
            special_indices: HashMap::new(),
        };
        BaseTokenizer::from_existing_vocab(vocab, lower_case, lower_case)
    }

    impl Default for WordTokenizer {
        fn default() -> Self {
            WordTokenizer::with_layout(SequenceLayout::bert(0))
        }
    }

    impl WordTokenizer {
        pub fn with_layout(layout: SequenceLayout) -> Self {
            WordTokenizer {
                layout,
                basic_tokenizer: basic_tokenizer(true),
            }
        }

        pub fn cased() -> Self {
            WordTokenizer {
                layout: SequenceLayout::bert(0),
                basic_tokenizer: basic_tokenizer(false),
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
                .map(|token| {
                    if *token == self.layout.cls_token {
                        101
                    } else if *token == self.layout.sep_token {
                        102
                    } else {
                        1000 + token.chars().map(|c| c as i64).sum::<i64>()
                    }
                })
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

    /// `[CLS]`, question tokens up to `paragraph_offset`, `paragraph_len` context tokens mapped
    /// to words 0.., `[SEP]` and padding up to `max_seq_length`.
    pub fn feature_with_context(
        max_seq_length: usize,
        paragraph_offset: usize,
        paragraph_len: usize,
    ) -> QaFeature {
        let mut tokens = vec!["[CLS]".to_string()];
        let mut p_mask = vec![0i8];
        for index in 1..paragraph_offset - 1 {
            tokens.push(format!("q{}", index));
            p_mask.push(1);
        }
        tokens.push("[SEP]".to_string());
        p_mask.push(1);
        let mut token_to_orig_map = HashMap::new();
        for index in 0..paragraph_len {
            token_to_orig_map.insert(tokens.len(), index);
            tokens.push(format!("c{}", index));
            p_mask.push(0);
        }
        tokens.push("[SEP]".to_string());
        p_mask.push(1);
        let num_tokens = tokens.len();
        p_mask.resize(max_seq_length, 1);
        let token_is_max_context = (0..max_seq_length)
            .map(|position| token_to_orig_map.contains_key(&position))
            .collect();
        let mut attention_mask = vec![1i64; num_tokens];
        attention_mask.resize(max_seq_length, 0);

        QaFeature {
            unique_id: FIRST_UNIQUE_ID,
            example_index: 0,
            doc_span_index: 0,
            tokens,
            token_to_orig_map,
            token_is_max_context,
            input_ids: vec![0; max_seq_length],
            attention_mask,
            token_type_ids: vec![0; max_seq_length],
            cls_index: 0,
            p_mask,
            paragraph_len,
            paragraph_offset,
            start_position: None,
            end_position: None,
            is_impossible: false,
        }
    }

    pub fn standard_result(
        unique_id: usize,
        start_logits: Vec<f64>,
        end_logits: Vec<f64>,
    ) -> RawResult {
        RawResult {
            unique_id,
            output: FeatureOutput::Standard(StandardOutput {
                start_logits,
                end_logits,
            }),
        }
    }

    pub fn beam_result(
        unique_id: usize,
        start_top_log_probs: Vec<f64>,
        start_top_index: Vec<usize>,
        end_top_log_probs: Vec<f64>,
        end_top_index: Vec<usize>,
        cls_logits: f64,
    ) -> RawResult {
        RawResult {
            unique_id,
            output: FeatureOutput::Beam(BeamOutput {
                start_top_log_probs,
                start_top_index,
                end_top_log_probs,
                end_top_index,
                cls_logits,
            }),
        }
    }
}
