pub mod config;
pub mod error;
pub mod pipeline;
pub mod scorer;
pub mod search;
pub mod types;

pub use config::DecoderConfig;
pub use error::DecodeError;
pub use pipeline::builder::{load_vocab, CtcDecoderBuilder};
pub use pipeline::runtime::{CtcDecoder, HotwordRequest};
pub use pipeline::surface::{BatchProbs, BeamSink, FlatLogits, LogitsBatch};
pub use pipeline::traits::{LanguageModel, LmWordId};
pub use scorer::lexicon::LexiconFstBuilder;
pub use scorer::ngram::NGramFstModel;
pub use scorer::ExternalScorer;
pub use types::{LogitPrecision, LogitProb};
