//! # Extractive question answering pipeline
//!
//! The pipeline turns SQuAD-formatted questions and paragraphs into answer spans:
//!
//! #### 1. Feature building
//! Each (question, paragraph) example is tokenized and split into overlapping windows of
//! `max_seq_length` tokens, stepping by `doc_stride` tokens. Every window keeps the mapping from its
//! tokens back to the words of the paragraph (`squad::FeatureBuilder`).
//!
//! #### 2. Span decoding
//! The model outputs of every window are turned into ranked candidate spans, either from start/end
//! logits (BERT, DistilBERT) or from top-k start/end log-probabilities and an answerability logit
//! (XLNet) (`squad::SpanDecoder`).
//!
//! #### 3. Answer aggregation
//! Candidates are mapped back to the original text, deduplicated and normalized into an n-best list.
//! For SQuAD 2.0, "no answer" is predicted when the null score exceeds the best answer score by
//! more than a threshold (`squad::AnswerAggregator`).
//!
//! #### 4. Reader
//! `reader::Reader` wraps a tokenizer and a TorchScript model and exposes fit / evaluate / predict.

pub mod common;
pub mod reader;
pub mod squad;
