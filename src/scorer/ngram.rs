//! Backoff n-gram language model stored as an FST.
//!
//! Word arcs carry `-ln P` tropical weights; epsilon arcs are backoff
//! transitions whose weights accumulate while the lookup retreats to
//! shorter contexts. The model vocabulary is the FST's input symbol table.

use std::path::Path;

use rustfst::fst_impls::VectorFst;
use rustfst::prelude::*;
use rustfst::semirings::{Semiring, TropicalWeight};
use rustfst::{Label, StateId, EPS_LABEL};

use crate::error::DecodeError;
use crate::pipeline::traits::{LanguageModel, LmWordId};
use crate::scorer::find_input_tr;

/// log10 floor returned when neither a word arc nor a further backoff
/// resolves the query.
const BACKOFF_FLOOR_LOG10: f64 = -99.0;

const BOS_SYMBOL: &str = "<s>";

#[derive(Debug)]
pub struct NGramFstModel {
    fst: VectorFst<TropicalWeight>,
    begin: StateId,
}

impl NGramFstModel {
    pub fn load(path: &Path) -> Result<Self, DecodeError> {
        let fst = VectorFst::read(path)
            .map_err(|e| DecodeError::fst("reading the language model FST", e))?;
        let model = Self::from_fst(fst)?;
        tracing::info!(
            states = model.fst.num_states(),
            "loaded n-gram language model"
        );
        Ok(model)
    }

    pub fn from_fst(fst: VectorFst<TropicalWeight>) -> Result<Self, DecodeError> {
        let start = fst
            .start()
            .ok_or_else(|| DecodeError::runtime("language model FST", "missing start state"))?;
        if fst.input_symbols().is_none() {
            return Err(DecodeError::runtime(
                "language model FST",
                "missing input symbol table",
            ));
        }

        // begin-of-sentence context when the model has one, else the start
        let begin = fst
            .input_symbols()
            .and_then(|symbols| symbols.get_label(BOS_SYMBOL))
            .and_then(|label| find_input_tr(&fst, start, label))
            .map(|tr| tr.nextstate)
            .unwrap_or(start);

        Ok(Self { fst, begin })
    }
}

impl LanguageModel for NGramFstModel {
    fn begin_state(&self) -> StateId {
        self.begin
    }

    fn word_index(&self, token: &str) -> Option<LmWordId> {
        let symbols = self.fst.input_symbols()?;
        let label = symbols.get_label(token)?;
        if label == EPS_LABEL {
            return None;
        }
        Some(label as LmWordId)
    }

    fn base_score(&self, state: StateId, word: LmWordId, next_state: &mut StateId) -> f64 {
        let mut state = state;
        let mut backoff = 0.0f64;
        // a well-formed model bottoms out at the unigram state; the hop
        // bound only guards against malformed backoff cycles
        for _ in 0..self.fst.num_states() {
            if let Some(tr) = find_input_tr(&self.fst, state, word as Label) {
                *next_state = tr.nextstate;
                return backoff - (*tr.weight.value() as f64) / std::f64::consts::LN_10;
            }
            match find_input_tr(&self.fst, state, EPS_LABEL) {
                Some(backoff_tr) => {
                    backoff -= (*backoff_tr.weight.value() as f64) / std::f64::consts::LN_10;
                    state = backoff_tr.nextstate;
                }
                None => break,
            }
        }
        *next_state = state;
        BACKOFF_FLOOR_LOG10
    }
}
