use std::path::Path;

use crate::error::DecodeError;

/// Decoder construction parameters.
///
/// `min_tok_prob` is given in natural-log scale and converted to a linear
/// floor (`exp`) when the decoder is built. `max_beam_score_deviation` is
/// negative: beams more than that many nats worse than the best are dropped
/// before the final beam-width cut.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub thread_count: usize,
    pub blank_id: i32,
    pub cutoff_top_n: usize,
    pub apostrophe_id: i32,
    pub nucleus_prob_per_timestep: f64,
    pub alpha: f64,
    pub beta: f64,
    pub beam_width: usize,
    pub lex_penalty: f64,
    pub min_tok_prob: f64,
    pub max_beam_score_deviation: f64,
    pub tok_sep: char,
    pub vocab: Vec<String>,
    pub lm_path: Option<String>,
    pub lexicon_path: Option<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            thread_count: 1,
            blank_id: 0,
            cutoff_top_n: 40,
            apostrophe_id: -1,
            nucleus_prob_per_timestep: 1.0,
            alpha: 0.17,
            beta: 0.24,
            beam_width: 25,
            lex_penalty: -5.0,
            min_tok_prob: -5.0,
            max_beam_score_deviation: -10.0,
            tok_sep: '#',
            vocab: Vec::new(),
            lm_path: None,
            lexicon_path: None,
        }
    }
}

impl DecoderConfig {
    pub fn load(path: &Path) -> Result<Self, DecodeError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DecodeError::io("read decoder config", e))?;
        serde_json::from_str(&data).map_err(|e| DecodeError::Json {
            context: "parse decoder config",
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = DecoderConfig::default();
        assert_eq!(config.blank_id, 0);
        assert_eq!(config.beam_width, 25);
        assert_eq!(config.tok_sep, '#');
        assert!(config.vocab.is_empty());
        assert!(config.lm_path.is_none());
        assert!(config.lexicon_path.is_none());
    }

    #[test]
    fn config_parses_partial_json() {
        let json = r#"{
            "blank_id": 28,
            "beam_width": 100,
            "vocab": ["_", "'", "a"],
            "nucleus_prob_per_timestep": 0.95
        }"#;
        let config: DecoderConfig = serde_json::from_str(json).expect("valid config json");
        assert_eq!(config.blank_id, 28);
        assert_eq!(config.beam_width, 100);
        assert_eq!(config.vocab.len(), 3);
        // unspecified fields fall back to defaults
        assert_eq!(config.cutoff_top_n, 40);
        assert!((config.nucleus_prob_per_timestep - 0.95).abs() < 1e-12);
    }
}
