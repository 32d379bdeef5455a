use ndarray::{ArrayView1, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis};
use rayon::prelude::*;
use rustfst::fst_impls::VectorFst;
use rustfst::semirings::TropicalWeight;

use crate::error::DecodeError;
use crate::pipeline::surface::{
    validate_shapes, BatchProbs, BatchShape, BeamSink, FlatLogits, LogitsBatch,
};
use crate::scorer::hotword::build_hotword_fst;
use crate::scorer::ExternalScorer;
use crate::search::beam::{decode_utterance, SearchParams};
use crate::types::{LogitPrecision, LogitProb};

/// Per-request hotword boosting.
///
/// `hotwords` and `weights` are parallel lists; a non-empty list is built
/// into an FST once per call, overlaid on `base_fst` when one is supplied
/// (the base is cloned, never mutated). An empty list with a `base_fst`
/// reuses the base as-is.
#[derive(Default)]
pub struct HotwordRequest<'a> {
    pub hotwords: &'a [Vec<i32>],
    pub weights: &'a [f32],
    pub base_fst: Option<&'a VectorFst<TropicalWeight>>,
}

pub struct CtcDecoder {
    thread_count: usize,
    blank_id: i32,
    cutoff_top_n: usize,
    nucleus_prob_per_timestep: f64,
    beam_width: usize,
    /// Linear scale; the config value is `exp`'d at build time.
    min_tok_prob: f64,
    max_beam_score_deviation: f64,
    vocab: Vec<String>,
    ext_scorer: ExternalScorer,
}

pub(crate) struct CtcDecoderParts {
    pub thread_count: usize,
    pub blank_id: i32,
    pub cutoff_top_n: usize,
    pub nucleus_prob_per_timestep: f64,
    pub beam_width: usize,
    pub min_tok_prob: f64,
    pub max_beam_score_deviation: f64,
    pub vocab: Vec<String>,
    pub ext_scorer: ExternalScorer,
}

impl std::fmt::Debug for CtcDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtcDecoder")
            .field("thread_count", &self.thread_count)
            .field("blank_id", &self.blank_id)
            .field("cutoff_top_n", &self.cutoff_top_n)
            .field("nucleus_prob_per_timestep", &self.nucleus_prob_per_timestep)
            .field("beam_width", &self.beam_width)
            .field("min_tok_prob", &self.min_tok_prob)
            .field("max_beam_score_deviation", &self.max_beam_score_deviation)
            .field("vocab", &self.vocab)
            .finish()
    }
}

impl CtcDecoder {
    pub(crate) fn from_parts(parts: CtcDecoderParts) -> Self {
        Self {
            thread_count: parts.thread_count,
            blank_id: parts.blank_id,
            cutoff_top_n: parts.cutoff_top_n,
            nucleus_prob_per_timestep: parts.nucleus_prob_per_timestep,
            beam_width: parts.beam_width,
            min_tok_prob: parts.min_tok_prob,
            max_beam_score_deviation: parts.max_beam_score_deviation,
            vocab: parts.vocab,
            ext_scorer: parts.ext_scorer,
        }
    }

    pub fn blank_id(&self) -> i32 {
        self.blank_id
    }

    pub fn beam_width(&self) -> usize {
        self.beam_width
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn vocab(&self) -> &[String] {
        &self.vocab
    }

    /// Builds a hotword FST reusable across `batch_decode` calls.
    pub fn build_hotword_fst(
        &self,
        hotwords: &[Vec<i32>],
        weights: &[f32],
        base_fst: Option<&VectorFst<TropicalWeight>>,
    ) -> Result<VectorFst<TropicalWeight>, DecodeError> {
        build_hotword_fst(hotwords, weights, base_fst)
    }

    /// Decodes a batch of utterances, writing the top beams into the
    /// caller's output arrays.
    ///
    /// One worker per utterance, capped at `min(thread_count, batch_size)`;
    /// any task failure fails the whole batch and leaves the outputs in an
    /// unspecified (but owned-region-only) state.
    pub fn batch_decode(
        &self,
        batch: &LogitsBatch<'_>,
        sink: &mut BeamSink<'_>,
        hotwords: &HotwordRequest<'_>,
    ) -> Result<(), DecodeError> {
        let shape = validate_shapes(batch, sink, self.vocab.len(), self.beam_width)?;

        let mut built = None;
        if !hotwords.hotwords.is_empty() {
            built = Some(build_hotword_fst(
                hotwords.hotwords,
                hotwords.weights,
                hotwords.base_fst,
            )?);
        }
        let hotword_fst = built.as_ref().or(hotwords.base_fst);

        tracing::debug!(
            batch_size = shape.batch_size,
            max_seq_len = shape.max_seq_len,
            hotwords = hotwords.hotwords.len(),
            "decoding batch"
        );

        match &batch.probs {
            BatchProbs::F32(probs) => {
                self.decode_all(*probs, batch.sorted_ids, batch.seq_lens, sink, hotword_fst, shape)
            }
            BatchProbs::F64(probs) => {
                self.decode_all(*probs, batch.sorted_ids, batch.seq_lens, sink, hotword_fst, shape)
            }
        }
    }

    /// Wire-level variant of [`batch_decode`](Self::batch_decode): flat
    /// caller buffers plus the logit element width in bytes, the way
    /// array-protocol callers pass them.
    ///
    /// `logit_bytes` must be 4 or 8 (anything else fails the batch before
    /// any work begins) and must agree with the buffer's element type. The
    /// flat buffers are shaped into `[batch, max_seq_len, vocab]` inputs
    /// and `[batch, beam_width, max_seq_len]` outputs before decoding.
    #[allow(clippy::too_many_arguments)]
    pub fn batch_decode_flat(
        &self,
        logits: FlatLogits<'_>,
        logit_bytes: usize,
        sorted_ids: &[i32],
        labels: &mut [i32],
        timesteps: &mut [i32],
        seq_lens: &[i32],
        seq_pos: &mut [i32],
        batch_size: usize,
        max_seq_len: usize,
        hotwords: &HotwordRequest<'_>,
    ) -> Result<(), DecodeError> {
        let precision = LogitPrecision::from_logit_bytes(logit_bytes)?;
        if precision != logits.precision() {
            return Err(DecodeError::invalid_input(format!(
                "logit_bytes {} does not match the {}-byte elements of the logits buffer",
                logit_bytes,
                logits.precision().logit_bytes()
            )));
        }

        let logit_dims = (batch_size, max_seq_len, self.vocab.len());
        let out_dims = (batch_size, self.beam_width, max_seq_len);
        let probs = match logits {
            FlatLogits::F32(data) => BatchProbs::F32(
                ArrayView3::from_shape(logit_dims, data)
                    .map_err(|e| DecodeError::shape(format!("logits buffer: {e}")))?,
            ),
            FlatLogits::F64(data) => BatchProbs::F64(
                ArrayView3::from_shape(logit_dims, data)
                    .map_err(|e| DecodeError::shape(format!("logits buffer: {e}")))?,
            ),
        };
        let batch = LogitsBatch {
            probs,
            sorted_ids: ArrayView3::from_shape(logit_dims, sorted_ids)
                .map_err(|e| DecodeError::shape(format!("sorted_ids buffer: {e}")))?,
            seq_lens: ArrayView1::from_shape(batch_size, seq_lens)
                .map_err(|e| DecodeError::shape(format!("seq_len buffer: {e}")))?,
        };
        let mut sink = BeamSink {
            labels: ArrayViewMut3::from_shape(out_dims, labels)
                .map_err(|e| DecodeError::shape(format!("labels buffer: {e}")))?,
            timesteps: ArrayViewMut3::from_shape(out_dims, timesteps)
                .map_err(|e| DecodeError::shape(format!("timesteps buffer: {e}")))?,
            seq_pos: ArrayViewMut2::from_shape((batch_size, self.beam_width), seq_pos)
                .map_err(|e| DecodeError::shape(format!("seq_pos buffer: {e}")))?,
        };

        self.batch_decode(&batch, &mut sink, hotwords)
    }

    fn decode_all<T: LogitProb>(
        &self,
        probs: ArrayView3<'_, T>,
        sorted_ids: ArrayView3<'_, i32>,
        seq_lens: ArrayView1<'_, i32>,
        sink: &mut BeamSink<'_>,
        hotword_fst: Option<&VectorFst<TropicalWeight>>,
        shape: BatchShape,
    ) -> Result<(), DecodeError> {
        let params = SearchParams {
            blank_id: self.blank_id,
            cutoff_top_n: self.cutoff_top_n,
            vocab_size: self.vocab.len(),
            nucleus_prob_per_timestep: self.nucleus_prob_per_timestep,
            min_tok_prob: self.min_tok_prob,
            beam_width: self.beam_width,
            max_beam_score_deviation: self.max_beam_score_deviation,
            vocab: &self.vocab,
            ext_scorer: &self.ext_scorer,
        };

        let mut jobs = Vec::with_capacity(shape.batch_size);
        for ((labels, timesteps), seq_pos) in sink
            .labels
            .axis_iter_mut(Axis(0))
            .zip(sink.timesteps.axis_iter_mut(Axis(0)))
            .zip(sink.seq_pos.axis_iter_mut(Axis(0)))
        {
            jobs.push((labels, timesteps, seq_pos));
        }

        let workers = self.thread_count.min(shape.batch_size).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| DecodeError::runtime("building the decode worker pool", e))?;

        pool.install(|| {
            jobs.into_par_iter().enumerate().try_for_each(
                |(b, (mut labels, mut timesteps, mut seq_pos))| {
                    let utt_probs = probs.index_axis(Axis(0), b);
                    let utt_ids = sorted_ids.index_axis(Axis(0), b);
                    let seq_len = seq_lens[b] as usize;
                    decode_utterance(
                        &params,
                        utt_probs,
                        utt_ids,
                        seq_len,
                        hotword_fst,
                        &mut labels,
                        &mut timesteps,
                        &mut seq_pos,
                    )
                },
            )
        })
    }
}
