//! Per-utterance prefix beam search.
//!
//! The timestep loop exchanges two node-handle buffers by timestep parity
//! (no copying): the reader holds the surviving prefixes of the previous
//! timestep, the writer collects every node touched in this one. Scores are
//! committed once per node at the end of the timestep, then the writer is
//! pruned back to the beam width.

use ndarray::{ArrayView2, ArrayViewMut1, ArrayViewMut2};
use rustfst::fst_impls::VectorFst;
use rustfst::semirings::TropicalWeight;

use crate::error::DecodeError;
use crate::scorer::ExternalScorer;
use crate::search::node::{NodeArena, NodeId, ROOT_ID};
use crate::types::LogitProb;

pub(crate) struct SearchParams<'a> {
    pub blank_id: i32,
    pub cutoff_top_n: usize,
    pub vocab_size: usize,
    pub nucleus_prob_per_timestep: f64,
    /// Linear-scale floor; tokens below it end the timestep's token loop.
    pub min_tok_prob: f64,
    pub beam_width: usize,
    pub max_beam_score_deviation: f64,
    pub vocab: &'a [String],
    pub ext_scorer: &'a ExternalScorer,
}

/// Moves clone nodes to the front so a clone is always expanded before the
/// deprecated source it shadows.
fn move_clones_to_start(arena: &NodeArena, source: &mut [NodeId]) {
    let mut to_pos = 0;
    for from_pos in 0..source.len() {
        if !arena[source[from_pos]].is_clone {
            continue;
        }
        source.swap(from_pos, to_pos);
        to_pos += 1;
    }
}

/// Removes the listed positions by swapping them to the tail and truncating.
/// `remove_ids` must be ascending; it is drained.
fn remove_from_source(source: &mut Vec<NodeId>, remove_ids: &mut Vec<usize>) {
    if remove_ids.is_empty() {
        return;
    }
    let mut to_pos = source.len();
    for &pos in remove_ids.iter().rev() {
        to_pos -= 1;
        source.swap(pos, to_pos);
    }
    source.truncate(to_pos);
    remove_ids.clear();
}

/// Runs the search over one utterance and returns the arena together with
/// the surviving prefixes, best first.
pub(crate) fn run_search<T: LogitProb>(
    params: &SearchParams<'_>,
    probs: ArrayView2<'_, T>,
    sorted_ids: ArrayView2<'_, i32>,
    seq_len: usize,
    hotword_fst: Option<&VectorFst<TropicalWeight>>,
) -> Result<(NodeArena, Vec<NodeId>), DecodeError> {
    let mut arena = NodeArena::with_capacity(4 * params.beam_width);
    let root = arena.new_root();
    params
        .ext_scorer
        .init_start_states(&mut arena, root, hotword_fst);

    let mut prefixes0: Vec<NodeId> = Vec::with_capacity(2 * params.beam_width);
    let mut prefixes1: Vec<NodeId> = Vec::with_capacity(2 * params.beam_width);
    let mut more_confident_repeats: Vec<NodeId> = Vec::new();
    let mut remove_ids: Vec<usize> = Vec::new();
    prefixes0.push(root);

    let top_n = params.cutoff_top_n.min(params.vocab_size);

    for t in 0..seq_len {
        let (reader, writer) = if t % 2 == 0 {
            (&mut prefixes0, &mut prefixes1)
        } else {
            (&mut prefixes1, &mut prefixes0)
        };

        let mut nucleus_count = 0.0f64;
        let full_beam = reader.len() >= params.beam_width && params.ext_scorer.enabled();
        move_clones_to_start(&arena, reader);

        let min_beam_score = if full_beam {
            let mut min = f64::MAX;
            for &r in reader.iter() {
                if arena[r].ovrl_score < min {
                    min = arena[r].ovrl_score;
                }
            }
            min + probs[[t, params.blank_id as usize]].as_f64().ln()
                - params.ext_scorer.beta.abs()
        } else {
            f64::MIN
        };

        for i in 0..top_n {
            let index = sorted_ids[[t, i]];
            debug_assert!((index as usize) < params.vocab_size);
            let prob = probs[[t, index as usize]].as_f64();

            if prob < params.min_tok_prob {
                break;
            }
            nucleus_count += prob;

            if index == params.blank_id {
                for ri in 0..reader.len() {
                    let r = reader[ri];
                    arena[r].b_prob = prob;
                    if !arena[r].is_at_writer {
                        writer.push(r);
                        arena[r].is_at_writer = true;
                    }
                }
                continue;
            }

            let token = params.vocab[index as usize].as_str();
            for ri in 0..reader.len() {
                let r = reader[ri];
                if full_beam && arena[r].ovrl_score + prob.ln() < min_beam_score {
                    break;
                }
                if let Some(child) =
                    arena.extend_path(r, index, t as i32, prob, token, writer, reader)
                {
                    // New extensions are externally scored exactly once.
                    params.ext_scorer.score(&mut arena, child, hotword_fst);
                }
            }

            if nucleus_count >= params.nucleus_prob_per_timestep {
                break;
            }
        }

        let mut max_beam_score = f64::MIN;
        for pos in 0..writer.len() {
            let w = writer[pos];
            let beam_score = arena.update_score(w, t as i32, &mut more_confident_repeats);

            if arena[w].is_deprecated {
                remove_ids.push(pos);
                continue;
            }
            if beam_score > max_beam_score {
                max_beam_score = beam_score;
            }
        }

        remove_from_source(writer, &mut remove_ids);
        writer.append(&mut more_confident_repeats);

        reader.clear();
        if writer.len() <= params.beam_width {
            continue;
        }

        let score_cutoff = max_beam_score + params.max_beam_score_deviation;
        for (pos, &w) in writer.iter().enumerate() {
            if arena[w].ovrl_score < score_cutoff {
                remove_ids.push(pos);
            }
        }
        remove_from_source(writer, &mut remove_ids);
        if writer.len() <= params.beam_width {
            continue;
        }

        writer.select_nth_unstable_by(params.beam_width, |&a, &b| {
            arena[b].ovrl_score.total_cmp(&arena[a].ovrl_score)
        });
        writer.truncate(params.beam_width);
    }

    let mut beams = if seq_len % 2 == 0 { prefixes0 } else { prefixes1 };
    beams.sort_by(|&a, &b| arena[b].ovrl_score.total_cmp(&arena[a].ovrl_score));

    Ok((arena, beams))
}

/// Writes the beams right-justified into the caller's label/timestep rows
/// and records each row's starting column. Rows without a surviving beam
/// get `seq_pos = max_seq_len` (an empty beam); cells left of the start are
/// never touched.
pub(crate) fn emit_beams(
    arena: &NodeArena,
    beams: &[NodeId],
    labels: &mut ArrayViewMut2<'_, i32>,
    timesteps: &mut ArrayViewMut2<'_, i32>,
    seq_pos: &mut ArrayViewMut1<'_, i32>,
) {
    let beam_rows = labels.nrows();
    let max_seq_len = labels.ncols();

    for (k, &leaf) in beams.iter().take(beam_rows).enumerate() {
        let mut col = max_seq_len;
        let mut node = leaf;
        while arena[node].id != ROOT_ID {
            debug_assert!(col > 0, "beam longer than the output row");
            col -= 1;
            labels[[k, col]] = arena[node].id;
            timesteps[[k, col]] = arena[node].ts;
            node = arena[node].parent.expect("non-root node has a parent");
        }
        seq_pos[k] = col as i32;
    }

    for k in beams.len().min(beam_rows)..beam_rows {
        seq_pos[k] = max_seq_len as i32;
    }
}

/// Decodes one utterance into its output slab.
pub(crate) fn decode_utterance<T: LogitProb>(
    params: &SearchParams<'_>,
    probs: ArrayView2<'_, T>,
    sorted_ids: ArrayView2<'_, i32>,
    seq_len: usize,
    hotword_fst: Option<&VectorFst<TropicalWeight>>,
    labels: &mut ArrayViewMut2<'_, i32>,
    timesteps: &mut ArrayViewMut2<'_, i32>,
    seq_pos: &mut ArrayViewMut1<'_, i32>,
) -> Result<(), DecodeError> {
    if seq_len > probs.nrows() {
        return Err(DecodeError::shape(format!(
            "seq_len {} exceeds the padded sequence length {}",
            seq_len,
            probs.nrows()
        )));
    }

    let (arena, beams) = run_search(params, probs, sorted_ids, seq_len, hotword_fst)?;
    emit_beams(&arena, &beams, labels, timesteps, seq_pos);
    Ok(())
}
