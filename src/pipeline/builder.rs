use std::path::Path;

use rustfst::fst_impls::VectorFst;
use rustfst::prelude::*;
use rustfst::semirings::TropicalWeight;

use crate::config::DecoderConfig;
use crate::error::DecodeError;
use crate::pipeline::runtime::{CtcDecoder, CtcDecoderParts};
use crate::pipeline::traits::LanguageModel;
use crate::scorer::ngram::NGramFstModel;
use crate::scorer::ExternalScorer;

pub struct CtcDecoderBuilder {
    config: DecoderConfig,
    language_model: Option<Box<dyn LanguageModel>>,
    lexicon: Option<VectorFst<TropicalWeight>>,
}

impl CtcDecoderBuilder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            language_model: None,
            lexicon: None,
        }
    }

    /// Overrides the language model; `lm_path` in the config is then
    /// ignored.
    pub fn with_language_model(mut self, language_model: Box<dyn LanguageModel>) -> Self {
        self.language_model = Some(language_model);
        self
    }

    /// Overrides the lexicon FST; `lexicon_path` in the config is then
    /// ignored.
    pub fn with_lexicon(mut self, lexicon: VectorFst<TropicalWeight>) -> Self {
        self.lexicon = Some(lexicon);
        self
    }

    pub fn build(self) -> Result<CtcDecoder, DecodeError> {
        let config = self.config;
        if config.vocab.is_empty() {
            return Err(DecodeError::invalid_input("decoder vocabulary is empty"));
        }
        if config.blank_id < 0 || config.blank_id as usize >= config.vocab.len() {
            return Err(DecodeError::invalid_input(format!(
                "blank_id {} outside the vocabulary of {} tokens",
                config.blank_id,
                config.vocab.len()
            )));
        }
        if config.beam_width == 0 {
            return Err(DecodeError::invalid_input("beam_width must be at least 1"));
        }

        let language_model = match self.language_model {
            Some(language_model) => Some(language_model),
            None => match &config.lm_path {
                Some(path) => {
                    let model = NGramFstModel::load(Path::new(path))?;
                    Some(Box::new(model) as Box<dyn LanguageModel>)
                }
                None => None,
            },
        };

        let lexicon = match self.lexicon {
            Some(lexicon) => Some(lexicon),
            None => match &config.lexicon_path {
                Some(path) => {
                    let fst = VectorFst::read(Path::new(path))
                        .map_err(|e| DecodeError::fst("reading the lexicon FST", e))?;
                    tracing::info!(path = %path, "loaded lexicon FST");
                    Some(fst)
                }
                None => None,
            },
        };

        let ext_scorer = ExternalScorer::new(
            config.tok_sep,
            config.apostrophe_id,
            config.alpha,
            config.beta,
            config.lex_penalty,
            language_model,
            lexicon,
        );

        Ok(CtcDecoder::from_parts(CtcDecoderParts {
            thread_count: config.thread_count.max(1),
            blank_id: config.blank_id,
            cutoff_top_n: config.cutoff_top_n,
            nucleus_prob_per_timestep: config.nucleus_prob_per_timestep,
            beam_width: config.beam_width,
            min_tok_prob: config.min_tok_prob.exp(),
            max_beam_score_deviation: config.max_beam_score_deviation,
            vocab: config.vocab,
            ext_scorer,
        }))
    }
}

/// Reads a line-per-token vocabulary file; returns the tokens and the
/// apostrophe id (`-1` when the vocabulary has none).
pub fn load_vocab(path: &Path) -> Result<(Vec<String>, i32), DecodeError> {
    let data =
        std::fs::read_to_string(path).map_err(|e| DecodeError::io("read vocab file", e))?;
    Ok(parse_vocab(&data))
}

fn parse_vocab(data: &str) -> (Vec<String>, i32) {
    let mut vocab = Vec::new();
    let mut apostrophe_id = -1;
    for line in data.lines() {
        let token = line.trim_end();
        if token == "'" {
            apostrophe_id = vocab.len() as i32;
        }
        vocab.push(token.to_string());
    }
    (vocab, apostrophe_id)
}
