//! CLI tool for lexing commit diffs into pre-tokenized training data.
//!
//! `percentiles` computes literal length thresholds over a training corpus,
//! `tokenize` writes the filtered token streams of a corpus (computing the
//! thresholds or reusing the ones of another split), and `encode` turns a
//! tokenized output into input ids with a pretrained HuggingFace tokenizer.

mod encode;

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use diff_lexer_core::pipeline::{compute_percentiles, worker_pool, OutputPaths};
use diff_lexer_core::{
    run, CodeAnalyzer, DataFormat, LexerRegistry, ParseErrorPolicy, PercentileSource,
    PipelineConfig, DEFAULT_CHUNK_SIZE, DEFAULT_DELIMITER, DEFAULT_UPPER_QUANTILE,
};

use crate::encode::{encode_file, HfEncoder};

/// Lex commit diffs into delimiter-separated token streams.
#[derive(Parser, Debug)]
#[command(name = "diff-lexer")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute literal length percentiles over a corpus
    Percentiles(PercentilesArgs),
    /// Lex every commit of a corpus and drop overly long literals
    Tokenize(TokenizeArgs),
    /// Encode a tokenized corpus with a pretrained tokenizer
    Encode(EncodeArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Format {
    Csv,
    Jsonl,
}

impl From<Format> for DataFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Csv => DataFormat::Csv,
            Format::Jsonl => DataFormat::Jsonl,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum OnParseError {
    /// Stop the run at the first unparseable diff
    Abort,
    /// Log the commit and leave it out
    Skip,
}

impl From<OnParseError> for ParseErrorPolicy {
    fn from(policy: OnParseError) -> Self {
        match policy {
            OnParseError::Abort => ParseErrorPolicy::Abort,
            OnParseError::Skip => ParseErrorPolicy::Skip,
        }
    }
}

#[derive(clap::Args, Debug)]
struct CorpusArgs {
    /// Input file, or directory of input shards
    #[arg(long)]
    input: PathBuf,

    /// Format of the input shards
    #[arg(long, value_enum, default_value_t = Format::Jsonl)]
    format: Format,

    /// Number of commits read and processed at once
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Worker threads (defaults to all cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Commit id to leave out (repeatable)
    #[arg(long = "exclude-id")]
    exclude_ids: Vec<i64>,

    /// What to do with commits whose diff cannot be parsed
    #[arg(long, value_enum, default_value_t = OnParseError::Abort)]
    on_parse_error: OnParseError,
}

impl CorpusArgs {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            data_format: self.format.into(),
            chunk_size: self.chunk_size,
            workers: self.workers,
            exclude_ids: self.exclude_ids.iter().copied().collect::<BTreeSet<_>>(),
            on_parse_error: self.on_parse_error.into(),
            ..Default::default()
        }
    }
}

#[derive(clap::Args, Debug)]
struct PercentilesArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    /// Directory for literals_len.txt and literals.json
    #[arg(long)]
    literals_dir: PathBuf,
}

#[derive(clap::Args, Debug)]
struct TokenizeArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    /// Output directory for diff.jsonl, diff_sep.jsonl and metadata.json
    #[arg(long)]
    output_dir: PathBuf,

    /// Compute percentiles into this directory (defaults to the output directory)
    #[arg(long)]
    literals_dir: Option<PathBuf>,

    /// Reuse the literals.json computed on another split instead
    #[arg(long, conflicts_with = "literals_dir")]
    percentile_dir: Option<PathBuf>,

    /// Quantile whose threshold bounds literal length
    #[arg(long, default_value_t = DEFAULT_UPPER_QUANTILE)]
    upper_quantile: f64,

    /// Separator between tokens in diff_sep
    #[arg(long, default_value = DEFAULT_DELIMITER)]
    delimiter: String,
}

#[derive(clap::Args, Debug)]
struct EncodeArgs {
    /// Tokenized JSONL written by `tokenize`
    #[arg(long)]
    input: PathBuf,

    /// Output JSONL path
    #[arg(long)]
    output: PathBuf,

    /// Path to a HuggingFace tokenizer.json
    #[arg(long)]
    tokenizer: PathBuf,

    /// Column holding the token stream
    #[arg(long, default_value = "diff")]
    column: String,

    /// Truncate every encoding to this many ids
    #[arg(long)]
    max_length: Option<usize>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn percentiles(args: PercentilesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.corpus.config();
    let pool = worker_pool(config.workers)?;
    let registry = LexerRegistry::new(CodeAnalyzer::default());

    let (table, recorded) =
        compute_percentiles(&args.corpus.input, &args.literals_dir, &registry, &config, &pool)?;

    println!("\n[summary]");
    println!("  Literals recorded: {}", recorded);
    for (quantile, threshold) in table.iter() {
        println!("  q{}: {}", quantile, threshold);
    }
    println!("  Output: {:?}", args.literals_dir);

    Ok(())
}

fn tokenize(args: TokenizeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig {
        upper_quantile: args.upper_quantile,
        delimiter: args.delimiter.clone(),
        ..args.corpus.config()
    };
    let source = match &args.percentile_dir {
        Some(dir) => PercentileSource::Load {
            percentile_dir: dir.clone(),
        },
        None => PercentileSource::Compute {
            literals_dir: args.literals_dir.clone().unwrap_or_else(|| args.output_dir.clone()),
        },
    };
    let outputs = OutputPaths {
        diff: args.output_dir.join("diff.jsonl"),
        diff_sep: args.output_dir.join("diff_sep.jsonl"),
    };

    let result = run(CodeAnalyzer::default(), &args.corpus.input, &outputs, &source, &config)?;

    let metadata_path = args.output_dir.join("metadata.json");
    let metadata = serde_json::json!({
        "config": {
            "input": args.corpus.input.to_string_lossy(),
            "output_dir": args.output_dir.to_string_lossy(),
            "percentiles": source,
            "pipeline": config,
        },
        "result": result,
        "files": outputs,
    });
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    println!("\n[summary]");
    println!("  Commits read: {}", result.stats.rows_read);
    println!("  Commits written: {}", result.stats.commits_written);
    println!("  Excluded: {}", result.stats.excluded);
    println!("  Skipped (unparseable): {}", result.stats.skipped);
    println!("  Literal length threshold (q{}): {}", result.upper_quantile, result.threshold);
    println!("  Output: {:?}/{{diff,diff_sep}}.jsonl", args.output_dir);
    println!("  Metadata: {:?}", metadata_path);

    Ok(())
}

fn encode(args: EncodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(tokenizer = %args.tokenizer.display(), "loading tokenizer");
    let encoder = HfEncoder::load(&args.tokenizer).map_err(|e| e as Box<dyn std::error::Error>)?;

    let written = encode_file(&encoder, &args.input, &args.output, &args.column, args.max_length)?;

    println!("\n[summary]");
    println!("  Rows encoded: {}", written);
    println!("  Output: {:?}", args.output);

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    match Args::parse().command {
        Command::Percentiles(args) => percentiles(args),
        Command::Tokenize(args) => tokenize(args),
        Command::Encode(args) => encode(args),
    }
}
