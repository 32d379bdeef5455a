//! External scoring: n-gram LM, lexicon FST and per-request hotword FST.

pub mod hotword;
pub mod lexicon;
pub mod ngram;

use rustfst::fst_impls::VectorFst;
use rustfst::prelude::*;
use rustfst::semirings::{Semiring, TropicalWeight};
use rustfst::{Label, StateId, Tr};

use crate::pipeline::traits::LanguageModel;
use crate::search::node::{NodeArena, NodeId};

/// Flat score added for words the LM has never seen.
const OOV_SCORE: f64 = -1000.0;

/// First matching arc on `label` leaving `state`, if any. Arc fans are tiny
/// in the FSTs this crate builds, so a linear scan beats keeping per-state
/// sorted indices alive across threads.
pub(crate) fn find_input_tr(
    fst: &VectorFst<TropicalWeight>,
    state: StateId,
    label: Label,
) -> Option<Tr<TropicalWeight>> {
    fst.get_trs(state)
        .ok()?
        .trs()
        .iter()
        .find(|tr| tr.ilabel == label)
        .cloned()
}

/// Composition of the three optional scoring engines, applied once to every
/// newly extended node.
///
/// LM and lexicon contributions accumulate into the node's `lm_lex_score`,
/// which children inherit; the hotword bonus is per-extension and never
/// inherited.
pub struct ExternalScorer {
    pub tok_sep: char,
    pub apostrophe_id: i32,
    pub alpha: f64,
    pub beta: f64,
    pub lex_penalty: f64,
    lm: Option<Box<dyn LanguageModel>>,
    lexicon: Option<VectorFst<TropicalWeight>>,
}

impl ExternalScorer {
    pub fn new(
        tok_sep: char,
        apostrophe_id: i32,
        alpha: f64,
        beta: f64,
        lex_penalty: f64,
        lm: Option<Box<dyn LanguageModel>>,
        lexicon: Option<VectorFst<TropicalWeight>>,
    ) -> Self {
        Self {
            tok_sep,
            apostrophe_id,
            alpha,
            beta,
            lex_penalty,
            lm,
            lexicon,
        }
    }

    /// Whether the full-beam pruning bound may be applied.
    pub fn enabled(&self) -> bool {
        self.lm.is_some() || self.lexicon.is_some()
    }

    pub fn lexicon(&self) -> Option<&VectorFst<TropicalWeight>> {
        self.lexicon.as_ref()
    }

    pub(crate) fn init_start_states(
        &self,
        arena: &mut NodeArena,
        root: NodeId,
        hotword_fst: Option<&VectorFst<TropicalWeight>>,
    ) {
        if let Some(lexicon) = &self.lexicon {
            arena[root].lexicon_state = lexicon.start();
        }
        if let Some(lm) = &self.lm {
            arena[root].lm_state = Some(lm.begin_state());
        }
        if let Some(hotword_fst) = hotword_fst {
            arena[root].hotword_state = hotword_fst.start();
        }
    }

    /// A node begins a new word unless it is the apostrophe, follows the
    /// apostrophe, or its token is a subword continuation (leading
    /// separator char). Start-of-word nodes restart the lexicon and
    /// hotword walks.
    fn start_of_word_check(
        &self,
        arena: &mut NodeArena,
        node: NodeId,
        hotword_fst: Option<&VectorFst<TropicalWeight>>,
    ) {
        let parent = arena[node].parent.expect("scored node has a parent");
        let is_start_of_word = !(arena[node].id == self.apostrophe_id
            || arena[parent].id == self.apostrophe_id
            || arena[node].token.starts_with(self.tok_sep));
        arena[node].is_start_of_word = is_start_of_word;

        if !is_start_of_word {
            return;
        }

        if let Some(lexicon) = &self.lexicon {
            arena[node].lexicon_state = lexicon.start();
        }
        if let Some(hotword_fst) = hotword_fst {
            arena[node].hotword_state = hotword_fst.start();
        }
    }

    /// Scores one newly extended node.
    pub(crate) fn score(
        &self,
        arena: &mut NodeArena,
        node: NodeId,
        hotword_fst: Option<&VectorFst<TropicalWeight>>,
    ) {
        let parent = arena[node].parent.expect("scored node has a parent");

        if let Some(lm) = &self.lm {
            let token = arena[node].token.clone();
            match lm.word_index(&token) {
                None => arena[node].lm_lex_score += OOV_SCORE,
                Some(word) => {
                    let state = arena[parent].lm_state.unwrap_or_else(|| lm.begin_state());
                    let mut next_state = state;
                    let log10_prob = lm.base_score(state, word, &mut next_state);
                    arena[node].lm_state = Some(next_state);
                    // log10 -> natural log, then the LM weight and the
                    // per-symbol insertion reward
                    arena[node].lm_lex_score +=
                        self.alpha * (log10_prob / std::f64::consts::LOG10_E) + self.beta;
                }
            }
        }

        self.start_of_word_check(arena, node, hotword_fst);

        if let Some(lexicon) = &self.lexicon {
            if !(arena[parent].is_lex_path || arena[node].is_start_of_word) {
                arena[node].is_lex_path = false;
                arena[node].lm_lex_score += self.lex_penalty;
            } else {
                let state = if arena[node].is_start_of_word {
                    arena[node].lexicon_state
                } else {
                    arena[parent].lexicon_state
                };
                match state.and_then(|s| find_input_tr(lexicon, s, arena[node].id as Label)) {
                    Some(tr) => {
                        arena[node].lexicon_state = Some(tr.nextstate);
                        arena[node].is_lex_path = true;
                    }
                    None => {
                        arena[node].is_lex_path = false;
                        arena[node].lm_lex_score += self.lex_penalty;
                    }
                }
            }
        }

        if let Some(hotword_fst) = hotword_fst {
            if arena[parent].is_hotpath || arena[node].is_start_of_word {
                let state = if arena[node].is_start_of_word {
                    arena[node].hotword_state
                } else {
                    arena[parent].hotword_state
                };
                if let Some(tr) = state.and_then(|s| find_input_tr(hotword_fst, s, arena[node].id as Label))
                {
                    // olabel carries the 1-based position inside the
                    // hotword, the weight is the per-token split
                    arena[node].hotword_state = Some(tr.nextstate);
                    arena[node].hw_score = tr.olabel as f64 * *tr.weight.value() as f64;
                    arena[node].is_hotpath = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rustfst::fst_traits::MutableFst;

    use super::*;

    struct StubLm {
        known: Vec<(String, f64)>,
    }

    impl LanguageModel for StubLm {
        fn begin_state(&self) -> StateId {
            0
        }

        fn word_index(&self, token: &str) -> Option<u32> {
            self.known
                .iter()
                .position(|(w, _)| w == token)
                .map(|i| i as u32)
        }

        fn base_score(&self, state: StateId, word: u32, next_state: &mut StateId) -> f64 {
            *next_state = state + 1;
            self.known[word as usize].1
        }
    }

    fn lexicon_accepting_b() -> VectorFst<TropicalWeight> {
        let mut fst = VectorFst::<TropicalWeight>::new();
        let start = fst.add_state();
        let end = fst.add_state();
        fst.set_start(start).unwrap();
        fst.add_tr(start, Tr::new(2, 2, TropicalWeight::new(0.0), end))
            .unwrap();
        fst.set_final(end, TropicalWeight::one()).unwrap();
        fst
    }

    fn scored_child(
        scorer: &ExternalScorer,
        arena: &mut NodeArena,
        parent: NodeId,
        id: i32,
        token: &str,
    ) -> NodeId {
        let child = arena.new_child(id, 0, 0.5, token, parent, false);
        arena[parent].children.push(child);
        scorer.score(arena, child, None);
        child
    }

    #[test]
    fn in_vocab_word_gets_weighted_converted_score_plus_beta() {
        let lm = StubLm {
            known: vec![("b".to_string(), -0.5)],
        };
        let scorer = ExternalScorer::new('#', 1, 2.0, 0.3, -5.0, Some(Box::new(lm)), None);
        let mut arena = NodeArena::with_capacity(4);
        let root = arena.new_root();
        scorer.init_start_states(&mut arena, root, None);

        let child = scored_child(&scorer, &mut arena, root, 2, "b");
        let expected = 2.0 * (-0.5 / std::f64::consts::LOG10_E) + 0.3;
        assert!((arena[child].lm_lex_score - expected).abs() < 1e-12);
        assert_eq!(arena[child].lm_state, Some(1));
    }

    #[test]
    fn oov_word_gets_flat_penalty() {
        let lm = StubLm { known: vec![] };
        let scorer = ExternalScorer::new('#', 1, 2.0, 0.3, -5.0, Some(Box::new(lm)), None);
        let mut arena = NodeArena::with_capacity(4);
        let root = arena.new_root();
        scorer.init_start_states(&mut arena, root, None);

        let child = scored_child(&scorer, &mut arena, root, 2, "b");
        assert!((arena[child].lm_lex_score - OOV_SCORE).abs() < 1e-12);
    }

    #[test]
    fn lexicon_walk_advances_on_word_paths_and_penalizes_off_paths() {
        let scorer =
            ExternalScorer::new('#', 1, 0.0, 0.0, -5.0, None, Some(lexicon_accepting_b()));
        let mut arena = NodeArena::with_capacity(8);
        let root = arena.new_root();
        scorer.init_start_states(&mut arena, root, None);

        let b = scored_child(&scorer, &mut arena, root, 2, "b");
        assert!(arena[b].is_lex_path);
        assert_eq!(arena[b].lm_lex_score, 0.0);

        // apostrophe is not in the lexicon and does not reset the walk
        let apo = scored_child(&scorer, &mut arena, b, 1, "'");
        assert!(!arena[apo].is_lex_path);
        assert!((arena[apo].lm_lex_score - -5.0).abs() < 1e-12);

        // the token after an apostrophe is not a word start, and its parent
        // already left the lexicon: penalties accumulate down the path
        let after = scored_child(&scorer, &mut arena, apo, 2, "b");
        assert!(!arena[after].is_lex_path);
        assert!((arena[after].lm_lex_score - -10.0).abs() < 1e-12);
    }

    #[test]
    fn subword_continuation_is_not_a_word_start() {
        let scorer =
            ExternalScorer::new('#', 1, 0.0, 0.0, -5.0, None, Some(lexicon_accepting_b()));
        let mut arena = NodeArena::with_capacity(8);
        let root = arena.new_root();
        scorer.init_start_states(&mut arena, root, None);

        let b = scored_child(&scorer, &mut arena, root, 2, "b");
        let cont = scored_child(&scorer, &mut arena, b, 0, "#b");
        assert!(!arena[cont].is_start_of_word);
        // continuation walks on from the parent's lexicon state
        assert!(!arena[cont].is_lex_path);

        // a fresh non-continuation token restarts the walk mid-hypothesis
        let fresh = scored_child(&scorer, &mut arena, b, 2, "b");
        assert!(arena[fresh].is_start_of_word);
        assert!(arena[fresh].is_lex_path);
    }
}
