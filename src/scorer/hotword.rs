//! Request-time hotword FST construction.

use rustfst::fst_impls::VectorFst;
use rustfst::prelude::*;
use rustfst::semirings::TropicalWeight;
use rustfst::{Label, Tr};

use crate::error::DecodeError;
use crate::scorer::find_input_tr;

/// Builds an arc-weighted FST from `(token sequence, weight)` pairs.
///
/// Each hotword contributes a path whose arcs carry the token id as input
/// label, the 1-based position as output label, and `weight / len` as the
/// per-token weight. Shared prefixes reuse existing arcs, so when two
/// hotwords overlap, the one inserted first keeps the prefix arcs' weights;
/// callers should supply hotwords sorted by descending weight.
///
/// A caller-supplied `base` FST is cloned before the paths are overlaid, so
/// the original stays reusable across requests.
pub fn build_hotword_fst(
    hotwords: &[Vec<i32>],
    weights: &[f32],
    base: Option<&VectorFst<TropicalWeight>>,
) -> Result<VectorFst<TropicalWeight>, DecodeError> {
    if hotwords.len() != weights.len() {
        return Err(DecodeError::invalid_input(format!(
            "got {} hotwords but {} weights",
            hotwords.len(),
            weights.len()
        )));
    }
    if hotwords.iter().any(|tokens| tokens.is_empty()) {
        return Err(DecodeError::invalid_input("empty hotword token sequence"));
    }

    let mut fst = match base {
        Some(base) => base.clone(),
        None => VectorFst::new(),
    };
    if fst.start().is_none() {
        let start = fst.add_state();
        fst.set_start(start)
            .map_err(|e| DecodeError::fst("initializing the hotword FST start state", e))?;
    }

    for (tokens, &weight) in hotwords.iter().zip(weights.iter()) {
        let per_token = weight / tokens.len() as f32;
        let mut state = fst.start().expect("start state exists");

        for (pos, &token) in tokens.iter().enumerate() {
            if let Some(tr) = find_input_tr(&fst, state, token as Label) {
                state = tr.nextstate;
                continue;
            }
            let next_state = fst.add_state();
            fst.add_tr(
                state,
                Tr::new(
                    token as Label,
                    (pos + 1) as Label,
                    TropicalWeight::new(per_token),
                    next_state,
                ),
            )
            .map_err(|e| DecodeError::fst("adding a hotword arc", e))?;
            state = next_state;
        }
    }

    Ok(fst)
}

#[cfg(test)]
mod tests {
    use rustfst::semirings::Semiring;

    use super::*;

    #[test]
    fn single_hotword_splits_weight_across_tokens() {
        let fst = build_hotword_fst(&[vec![3, 5]], &[4.0], None).unwrap();
        let start = fst.start().unwrap();

        let first = find_input_tr(&fst, start, 3).expect("arc for first token");
        assert_eq!(first.olabel, 1);
        assert!((*first.weight.value() - 2.0).abs() < 1e-6);

        let second = find_input_tr(&fst, first.nextstate, 5).expect("arc for second token");
        assert_eq!(second.olabel, 2);
        assert!((*second.weight.value() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn overlapping_hotwords_share_prefix_arcs() {
        let fst = build_hotword_fst(&[vec![3, 5], vec![3, 7]], &[4.0, 1.0], None).unwrap();
        let start = fst.start().unwrap();

        let shared = find_input_tr(&fst, start, 3).unwrap();
        // first-inserted (higher-weight) hotword owns the shared arc
        assert!((*shared.weight.value() - 2.0).abs() < 1e-6);
        assert!(find_input_tr(&fst, shared.nextstate, 5).is_some());
        assert!(find_input_tr(&fst, shared.nextstate, 7).is_some());
    }

    #[test]
    fn base_fst_is_cloned_not_mutated() {
        let base = build_hotword_fst(&[vec![1]], &[1.0], None).unwrap();
        let states_before = base.num_states();

        let extended = build_hotword_fst(&[vec![2, 3]], &[2.0], Some(&base)).unwrap();
        assert_eq!(base.num_states(), states_before);
        assert!(extended.num_states() > states_before);
        // the base path is still present in the overlay
        assert!(find_input_tr(&extended, extended.start().unwrap(), 1).is_some());
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = build_hotword_fst(&[vec![1]], &[1.0, 2.0], None).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidInput { .. }));
    }

    #[test]
    fn empty_hotword_is_rejected() {
        let err = build_hotword_fst(&[vec![]], &[1.0], None).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidInput { .. }));
    }
}
