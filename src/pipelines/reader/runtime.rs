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

use crate::common::error::ReaderError;
use crate::common::resources::ResourceProvider;
use crate::pipelines::common::{OutputKind, QaTokenizer, TokenizerOption};
use crate::pipelines::reader::config::ReaderConfig;
use crate::pipelines::reader::model::{QuestionAnsweringModel, TorchScriptModel};
use std::path::PathBuf;

/// # Runtime state of a reader
/// Tokenizers and model, created once from a `ReaderConfig` and passed to every operation.
/// A separate inference tokenizer is only loaded when evaluation and prediction use a different
/// casing than training.
pub struct RuntimeContext {
    tokenizer: Box<dyn QaTokenizer>,
    inference_tokenizer: Option<Box<dyn QaTokenizer>>,
    model: Box<dyn QuestionAnsweringModel>,
    vocab_path: Option<PathBuf>,
}

/// Tokenizers for training and, if its casing differs, for inference
fn load_tokenizers(
    config: &ReaderConfig,
    vocab_path: &str,
) -> Result<(TokenizerOption, Option<TokenizerOption>), ReaderError> {
    let model_type = config.model_type();
    let training_lower_case = config.training.do_lower_case;
    let inference_lower_case = config.inference.do_lower_case;
    let tokenizer = TokenizerOption::from_file(
        model_type,
        vocab_path,
        training_lower_case,
        config.strip_accents,
    )?;
    let inference_tokenizer = if inference_lower_case != training_lower_case {
        Some(TokenizerOption::from_file(
            model_type,
            vocab_path,
            inference_lower_case,
            config.strip_accents,
        )?)
    } else {
        None
    };
    Ok((tokenizer, inference_tokenizer))
}

impl RuntimeContext {
    /// Loads the tokenizers and the model described by a configuration.
    pub fn new(config: &ReaderConfig) -> Result<RuntimeContext, ReaderError> {
        let model_type = config.model_type();
        let vocab_path = config.vocab_resource.get_local_path()?;
        let vocab_str = vocab_path.to_str().ok_or_else(|| {
            ReaderError::ConfigError(format!("invalid vocabulary path {:?}", vocab_path))
        })?;
        let (tokenizer, inference_tokenizer) = load_tokenizers(config, vocab_str)?;

        let module_path = config.model_resource.get_local_path()?;
        let weights_path = match &config.weights_resource {
            Some(resource) => Some(resource.get_local_path()?),
            None => None,
        };
        let model = TorchScriptModel::new(
            model_type,
            &module_path,
            weights_path.as_deref(),
            config.device,
        )?;
        log::info!(
            "Loaded {} model from {:?} on {:?}",
            model_type,
            module_path,
            config.device
        );

        Ok(RuntimeContext {
            tokenizer: Box::new(tokenizer),
            inference_tokenizer: inference_tokenizer
                .map(|tokenizer| Box::new(tokenizer) as Box<dyn QaTokenizer>),
            model: Box::new(model),
            vocab_path: Some(vocab_path),
        })
    }

    /// Builds a context from an existing tokenizer and model.
    pub fn from_parts(
        tokenizer: Box<dyn QaTokenizer>,
        model: Box<dyn QuestionAnsweringModel>,
    ) -> RuntimeContext {
        RuntimeContext {
            tokenizer,
            inference_tokenizer: None,
            model,
            vocab_path: None,
        }
    }

    /// Tokenizer used to build training features
    pub fn training_tokenizer(&self) -> &dyn QaTokenizer {
        self.tokenizer.as_ref()
    }

    /// Tokenizer used by evaluation and prediction
    pub fn inference_tokenizer(&self) -> &dyn QaTokenizer {
        match self.inference_tokenizer {
            Some(ref tokenizer) => tokenizer.as_ref(),
            None => self.tokenizer.as_ref(),
        }
    }

    pub fn model(&self) -> &dyn QuestionAnsweringModel {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn QuestionAnsweringModel {
        self.model.as_mut()
    }

    pub fn output_kind(&self) -> OutputKind {
        self.model.output_kind()
    }

    /// Vocabulary file of the tokenizer, copied next to the trained models
    pub fn vocab_path(&self) -> Option<&PathBuf> {
        self.vocab_path.as_ref()
    }
}
