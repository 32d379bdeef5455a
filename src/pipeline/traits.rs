use rustfst::StateId;

/// A word id inside the language model's own vocabulary.
pub type LmWordId = u32;

/// Conditional word scorer used by the external scorer.
///
/// States are opaque handles owned by the model; the decoder only threads
/// them from parent to child hypotheses. Scores are log base 10 (the
/// convention of the n-gram toolchain the artifacts come from); the caller
/// converts to natural log.
pub trait LanguageModel: Send + Sync {
    /// State conditioning the first word of an utterance.
    fn begin_state(&self) -> StateId;

    /// Looks the token up in the model vocabulary; `None` means OOV.
    fn word_index(&self, token: &str) -> Option<LmWordId>;

    /// Scores `word` in the context of `state` and writes the follow-up
    /// context into `next_state`. Returns a log10 probability.
    fn base_score(&self, state: StateId, word: LmWordId, next_state: &mut StateId) -> f64;
}
