//! Typed views into caller-owned batch arrays.
//!
//! All storage belongs to the caller; the decoder only reads the logit
//! side and writes the output side, each task touching a disjoint `[b, …]`
//! slab. Shapes are validated up front — nothing is decoded from a batch
//! whose arrays disagree.

use ndarray::{ArrayView1, ArrayView3, ArrayViewMut2, ArrayViewMut3};

use crate::error::DecodeError;
use crate::types::LogitPrecision;

/// Post-softmax probabilities, `[batch, max_seq_len, vocab]`, in the
/// caller's element width.
pub enum BatchProbs<'a> {
    F32(ArrayView3<'a, f32>),
    F64(ArrayView3<'a, f64>),
}

impl BatchProbs<'_> {
    pub fn precision(&self) -> LogitPrecision {
        match self {
            Self::F32(_) => LogitPrecision::F32,
            Self::F64(_) => LogitPrecision::F64,
        }
    }

    fn dim(&self) -> (usize, usize, usize) {
        match self {
            Self::F32(view) => view.dim(),
            Self::F64(view) => view.dim(),
        }
    }
}

/// Flat, caller-owned logit storage for the wire-level decode entry point,
/// which shapes it into a [`BatchProbs`] view after checking `logit_bytes`.
pub enum FlatLogits<'a> {
    F32(&'a [f32]),
    F64(&'a [f64]),
}

impl FlatLogits<'_> {
    pub fn precision(&self) -> LogitPrecision {
        match self {
            Self::F32(_) => LogitPrecision::F32,
            Self::F64(_) => LogitPrecision::F64,
        }
    }
}

/// The read-only side of a decode call.
pub struct LogitsBatch<'a> {
    /// `[batch, max_seq_len, vocab]` linear probabilities.
    pub probs: BatchProbs<'a>,
    /// `[batch, max_seq_len, vocab]`: at each `[b, t]` a permutation of
    /// `0..vocab` in descending probability order.
    pub sorted_ids: ArrayView3<'a, i32>,
    /// `[batch]`: unpadded length per utterance.
    pub seq_lens: ArrayView1<'a, i32>,
}

/// The caller-owned output arrays, written right-to-left per beam row.
pub struct BeamSink<'a> {
    /// `[batch, beam_width, max_seq_len]`.
    pub labels: ArrayViewMut3<'a, i32>,
    /// `[batch, beam_width, max_seq_len]`.
    pub timesteps: ArrayViewMut3<'a, i32>,
    /// `[batch, beam_width]`: starting column of each emitted beam.
    pub seq_pos: ArrayViewMut2<'a, i32>,
}

/// Validated batch geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchShape {
    pub batch_size: usize,
    pub max_seq_len: usize,
}

pub(crate) fn validate_shapes(
    batch: &LogitsBatch<'_>,
    sink: &BeamSink<'_>,
    vocab_size: usize,
    beam_width: usize,
) -> Result<BatchShape, DecodeError> {
    let (b, t, v) = batch.probs.dim();
    if v != vocab_size {
        return Err(DecodeError::shape(format!(
            "probs vocab dim {} != decoder vocab size {}",
            v, vocab_size
        )));
    }
    if batch.sorted_ids.dim() != (b, t, v) {
        return Err(DecodeError::shape(format!(
            "sorted_ids dims {:?} != probs dims {:?}",
            batch.sorted_ids.dim(),
            (b, t, v)
        )));
    }
    if batch.seq_lens.dim() != b {
        return Err(DecodeError::shape(format!(
            "seq_len has {} entries for a batch of {}",
            batch.seq_lens.dim(),
            b
        )));
    }
    if sink.labels.dim() != (b, beam_width, t) {
        return Err(DecodeError::shape(format!(
            "labels dims {:?}, expected {:?}",
            sink.labels.dim(),
            (b, beam_width, t)
        )));
    }
    if sink.timesteps.dim() != sink.labels.dim() {
        return Err(DecodeError::shape(format!(
            "timesteps dims {:?} != labels dims {:?}",
            sink.timesteps.dim(),
            sink.labels.dim()
        )));
    }
    if sink.seq_pos.dim() != (b, beam_width) {
        return Err(DecodeError::shape(format!(
            "seq_pos dims {:?}, expected {:?}",
            sink.seq_pos.dim(),
            (b, beam_width)
        )));
    }

    for (i, &len) in batch.seq_lens.iter().enumerate() {
        if len < 0 || len as usize > t {
            return Err(DecodeError::shape(format!(
                "seq_len[{}] = {} outside 0..={}",
                i, len, t
            )));
        }
    }

    Ok(BatchShape {
        batch_size: b,
        max_seq_len: t,
    })
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array2, Array3};

    use super::*;

    fn fixtures(
        b: usize,
        t: usize,
        v: usize,
        k: usize,
    ) -> (
        Array3<f32>,
        Array3<i32>,
        Array1<i32>,
        Array3<i32>,
        Array3<i32>,
        Array2<i32>,
    ) {
        (
            Array3::zeros((b, t, v)),
            Array3::zeros((b, t, v)),
            Array1::from_elem(b, t as i32),
            Array3::zeros((b, k, t)),
            Array3::zeros((b, k, t)),
            Array2::zeros((b, k)),
        )
    }

    #[test]
    fn consistent_shapes_validate() {
        let (probs, ids, lens, mut labels, mut timesteps, mut seq_pos) = fixtures(2, 5, 3, 4);
        let batch = LogitsBatch {
            probs: BatchProbs::F32(probs.view()),
            sorted_ids: ids.view(),
            seq_lens: lens.view(),
        };
        let sink = BeamSink {
            labels: labels.view_mut(),
            timesteps: timesteps.view_mut(),
            seq_pos: seq_pos.view_mut(),
        };
        let shape = validate_shapes(&batch, &sink, 3, 4).unwrap();
        assert_eq!(shape.batch_size, 2);
        assert_eq!(shape.max_seq_len, 5);
    }

    #[test]
    fn vocab_mismatch_is_rejected() {
        let (probs, ids, lens, mut labels, mut timesteps, mut seq_pos) = fixtures(2, 5, 3, 4);
        let batch = LogitsBatch {
            probs: BatchProbs::F32(probs.view()),
            sorted_ids: ids.view(),
            seq_lens: lens.view(),
        };
        let sink = BeamSink {
            labels: labels.view_mut(),
            timesteps: timesteps.view_mut(),
            seq_pos: seq_pos.view_mut(),
        };
        assert!(matches!(
            validate_shapes(&batch, &sink, 7, 4),
            Err(DecodeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn beam_dim_mismatch_is_rejected() {
        let (probs, ids, lens, mut labels, mut timesteps, mut seq_pos) = fixtures(2, 5, 3, 4);
        let batch = LogitsBatch {
            probs: BatchProbs::F32(probs.view()),
            sorted_ids: ids.view(),
            seq_lens: lens.view(),
        };
        let sink = BeamSink {
            labels: labels.view_mut(),
            timesteps: timesteps.view_mut(),
            seq_pos: seq_pos.view_mut(),
        };
        assert!(matches!(
            validate_shapes(&batch, &sink, 3, 9),
            Err(DecodeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn oversized_seq_len_is_rejected() {
        let (probs, ids, mut lens, mut labels, mut timesteps, mut seq_pos) = fixtures(2, 5, 3, 4);
        lens[1] = 6;
        let probs64 = probs.mapv(f64::from);
        let batch = LogitsBatch {
            probs: BatchProbs::F64(probs64.view()),
            sorted_ids: ids.view(),
            seq_lens: lens.view(),
        };
        let sink = BeamSink {
            labels: labels.view_mut(),
            timesteps: timesteps.view_mut(),
            seq_pos: seq_pos.view_mut(),
        };
        assert!(matches!(
            validate_shapes(&batch, &sink, 3, 4),
            Err(DecodeError::ShapeMismatch { .. })
        ));
    }
}
