mod config;
mod embeddings;
mod filter;
mod jsonl;
mod logging;
mod protocol;

use std::fs::File;
use std::io::{stdin, stdout, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use crate::embeddings::bert_layers::LayeredBertEncoder;
use crate::embeddings::engine::SentenceEmbeddingEngine;
use crate::embeddings::pooling::PoolingStrategy;
use crate::embeddings::{download, Embedder};
use crate::filter::policy::{FilterPolicy, Thresholds};
use crate::filter::pool::ParaphrasePool;
use crate::protocol::FilteredRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EncoderKind {
    /// BERT hidden states reduced by --strategy
    Layered,
    /// sentence-transformers model, mean pooled (ignores --strategy)
    Sentence,
}

impl EncoderKind {
    fn default_repo(self) -> &'static str {
        match self {
            EncoderKind::Layered => config::model::LAYERED_MODEL_REPO,
            EncoderKind::Sentence => config::model::SENTENCE_MODEL_REPO,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "paraphrase_filter",
    version,
    about = "Filter paraphrase candidates by BERT cosine similarity to their source expression"
)]
struct Cli {
    /// JSON Lines pool, one {"source", "candidates"} object per line [default: stdin]
    #[arg(long)]
    input: Option<PathBuf>,

    /// Where to write filtered records as JSON Lines [default: stdout]
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = FilterPolicy::Selection)]
    policy: FilterPolicy,

    /// Sentence pooling applied to layered BERT hidden states
    #[arg(long, value_enum, default_value_t = PoolingStrategy::SecondToLastMean)]
    strategy: PoolingStrategy,

    #[arg(long, value_enum, default_value_t = EncoderKind::Layered)]
    encoder: EncoderKind,

    /// Candidates scoring at or below this are not paraphrases
    #[arg(long, default_value_t = config::filter::DEFAULT_LOWER_THRESHOLD, allow_negative_numbers = true)]
    lower: f32,

    /// Candidates scoring above this are near-duplicates
    #[arg(long, default_value_t = config::filter::DEFAULT_UPPER_THRESHOLD, allow_negative_numbers = true)]
    upper: f32,

    /// Hugging Face repo to download the model from [default depends on --encoder]
    #[arg(long)]
    model_repo: Option<String>,

    /// Directory with model.safetensors, tokenizer.json and config.json (skips download)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Never download model files
    #[arg(long)]
    offline: bool,

    #[arg(long, default_value = config::logging::DEFAULT_LEVEL)]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = real_main(cli) {
        eprintln!("[paraphrase_filter] fatal error: {e:?}");
        log::error!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}

fn real_main(cli: Cli) -> anyhow::Result<()> {
    logging::init_logging(&cli.log_level)?;

    let thresholds = Thresholds::new(cli.lower, cli.upper)?;
    let pool = read_input(cli.input.as_ref())?;
    if pool.is_empty() {
        log::warn!("Input pool is empty, nothing to filter");
    }

    let model_dir = resolve_model_dir(&cli)?;
    log::info!("Using {:?} encoder from {}", cli.encoder, model_dir.display());

    // Model stays loaded for the whole run and is dropped at exit.
    let filtered = match cli.encoder {
        EncoderKind::Layered => {
            let encoder = LayeredBertEncoder::load(&model_dir).context("failed to load layered BERT encoder")?;
            log::info!(
                "Pooled vectors: {} values ({} strategy)",
                cli.strategy.output_len(encoder.hidden_size()),
                cli.strategy.name()
            );
            let embedder = Embedder::Layered {
                encoder: &encoder,
                strategy: cli.strategy,
            };
            filter::filter_pool(&pool, &embedder, cli.policy, &thresholds)
        }
        EncoderKind::Sentence => {
            let engine = SentenceEmbeddingEngine::load(&model_dir).context("failed to load sentence encoder")?;
            log::info!("Pooled vectors: {} values (sentence encoder)", engine.dims());
            filter::filter_pool(&pool, &Embedder::Sentence(&engine), cli.policy, &thresholds)
        }
    };

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(stdout().lock())),
    };
    for entry in &filtered.entries {
        jsonl::write_record(&mut *out, &FilteredRecord::from(entry))?;
    }
    out.flush().context("failed flushing output")?;

    let s = filtered.summary();
    log::info!(
        "Done: {} sources ({} failed), {} kept, {} rejected, {} skipped",
        s.entries,
        s.failed,
        s.kept,
        s.rejected,
        s.skipped
    );
    if s.failed > 0 {
        log::warn!("{} of {} sources could not be processed, see their error field", s.failed, s.entries);
    }
    Ok(())
}

fn read_input(path: Option<&PathBuf>) -> anyhow::Result<ParaphrasePool> {
    match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("failed to open pool {}", path.display()))?;
            jsonl::read_pool(&mut BufReader::new(file))
        }
        None => jsonl::read_pool(&mut stdin().lock()),
    }
}

fn resolve_model_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
    if let Some(dir) = &cli.model_dir {
        let missing = download::missing_model_files(dir);
        if !missing.is_empty() {
            anyhow::bail!("model dir {} is missing {}", dir.display(), missing.join(", "));
        }
        return Ok(dir.clone());
    }
    let repo = cli.model_repo.as_deref().unwrap_or_else(|| cli.encoder.default_repo());
    download::ensure_model_files(repo, cli.offline)
}
