//! Lexicon FST construction from word-frequency files.
//!
//! Input lines look like `freq-count actual-word tok1 tok2 …`, e.g.
//! `1 the t ##h ##e`. Entries below the frequency threshold and words
//! containing tokens the vocabulary lacks are skipped; the rest are
//! inserted as prefix-sharing token paths whose terminal states are
//! final.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;

use rustfst::fst_impls::VectorFst;
use rustfst::prelude::*;
use rustfst::semirings::{Semiring, TropicalWeight};
use rustfst::{Label, Tr};

use crate::error::DecodeError;
use crate::scorer::find_input_tr;

pub struct LexiconFstBuilder {
    char_map: HashMap<String, i32>,
    fst: Mutex<VectorFst<TropicalWeight>>,
}

impl LexiconFstBuilder {
    pub fn new(vocab: &[String]) -> Self {
        let mut fst = VectorFst::new();
        let start = fst.add_state();
        // a fresh single-state FST always accepts its own start
        fst.set_start(start).expect("start state was just added");
        Self::from_fst(vocab, fst)
    }

    pub fn from_fst(vocab: &[String], fst: VectorFst<TropicalWeight>) -> Self {
        let char_map = vocab
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id as i32))
            .collect();
        Self {
            char_map,
            fst: Mutex::new(fst),
        }
    }

    pub fn read(vocab: &[String], path: &Path) -> Result<Self, DecodeError> {
        let fst = VectorFst::read(path)
            .map_err(|e| DecodeError::fst("reading the lexicon FST", e))?;
        Ok(Self::from_fst(vocab, fst))
    }

    /// Parses one lexicon file; returns the number of words inserted.
    pub fn parse_file(&self, path: &Path, freq_threshold: u64) -> Result<usize, DecodeError> {
        let file = std::fs::File::open(path)
            .map_err(|e| DecodeError::io("opening a lexicon file", e))?;
        self.parse_reader(BufReader::new(file), freq_threshold)
    }

    pub fn parse_reader<R: BufRead>(
        &self,
        reader: R,
        freq_threshold: u64,
    ) -> Result<usize, DecodeError> {
        let mut inserted = 0;
        for line in reader.lines() {
            let line = line.map_err(|e| DecodeError::io("reading a lexicon line", e))?;
            let mut fields = line.split_whitespace();

            let freq = match fields.next().map(str::parse::<u64>) {
                Some(Ok(freq)) => freq,
                Some(Err(_)) => {
                    tracing::warn!(line = %line, "skipping lexicon line with non-numeric count");
                    continue;
                }
                None => continue,
            };
            if freq < freq_threshold {
                continue;
            }

            let Some(word) = fields.next() else { continue };
            let tokens: Option<Vec<i32>> = fields
                .map(|tok| self.char_map.get(tok).copied())
                .collect();
            match tokens {
                Some(tokens) if !tokens.is_empty() => {
                    self.insert(&tokens)?;
                    inserted += 1;
                }
                _ => {
                    tracing::warn!(word, "skipping lexicon word with out-of-vocab tokens");
                }
            }
        }
        Ok(inserted)
    }

    /// Parses several files over a worker pool; the FST is shared behind
    /// the mutex. Returns the total number of words inserted.
    pub fn parse_files(
        &self,
        paths: &[std::path::PathBuf],
        freq_threshold: u64,
        worker_count: usize,
    ) -> Result<usize, DecodeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count.max(1).min(paths.len().max(1)))
            .build()
            .map_err(|e| DecodeError::runtime("building the lexicon worker pool", e))?;
        pool.install(|| {
            use rayon::prelude::*;
            paths
                .par_iter()
                .map(|path| self.parse_file(path, freq_threshold))
                .try_reduce(|| 0, |a, b| Ok(a + b))
        })
    }

    fn insert(&self, tokens: &[i32]) -> Result<(), DecodeError> {
        let mut fst = self.fst.lock().expect("lexicon FST mutex is not poisoned");
        let mut state = fst.start().expect("builder FSTs always have a start");

        for &token in tokens {
            if let Some(tr) = find_input_tr(&fst, state, token as Label) {
                state = tr.nextstate;
                continue;
            }
            let next_state = fst.add_state();
            fst.add_tr(
                state,
                Tr::new(token as Label, token as Label, TropicalWeight::one(), next_state),
            )
            .map_err(|e| DecodeError::fst("adding a lexicon arc", e))?;
            state = next_state;
        }

        fst.set_final(state, TropicalWeight::one())
            .map_err(|e| DecodeError::fst("finalizing a lexicon word", e))
    }

    pub fn write(&self, path: &Path) -> Result<(), DecodeError> {
        let fst = self.fst.lock().expect("lexicon FST mutex is not poisoned");
        fst.write(path)
            .map_err(|e| DecodeError::fst("writing the lexicon FST", e))
    }

    pub fn into_fst(self) -> VectorFst<TropicalWeight> {
        self.fst
            .into_inner()
            .expect("lexicon FST mutex is not poisoned")
    }
}
