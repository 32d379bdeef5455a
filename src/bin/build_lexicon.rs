use std::path::PathBuf;

use clap::Parser;
use ctcdecode_rs::{load_vocab, DecodeError, LexiconFstBuilder};

/// Build a lexicon FST from word-frequency files.
///
/// Input lines look like `freq-count actual-word tok1 tok2 …`; entries
/// whose count is below the threshold are skipped.
#[derive(Debug, Parser)]
struct Args {
    /// Line-per-token vocabulary file.
    #[arg(long)]
    vocab: PathBuf,

    /// Word-frequency lexicon files to parse.
    #[arg(required = true)]
    lexicon_files: Vec<PathBuf>,

    /// Minimum frequency count for a word to be inserted.
    #[arg(long, default_value_t = 1)]
    freq_threshold: u64,

    /// Worker threads for parsing multiple files.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Existing serialized FST to extend instead of starting empty.
    #[arg(long)]
    base_fst: Option<PathBuf>,

    /// Where to write the serialized lexicon FST.
    #[arg(long)]
    output: PathBuf,
}

fn run(args: &Args) -> Result<usize, DecodeError> {
    let (vocab, _) = load_vocab(&args.vocab)?;
    let builder = match &args.base_fst {
        Some(path) => LexiconFstBuilder::read(&vocab, path)?,
        None => LexiconFstBuilder::new(&vocab),
    };
    let inserted = builder.parse_files(&args.lexicon_files, args.freq_threshold, args.workers)?;
    builder.write(&args.output)?;
    Ok(inserted)
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(inserted) => {
            println!("inserted {} words into {}", inserted, args.output.display());
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
