//! Chunked two-pass processing of a commit corpus.
//!
//! Pass one lexes every commit and logs the lengths of its literals, from
//! which the percentile table is computed (or the table is loaded from a
//! previous run). Pass two lexes every commit again and writes its filtered
//! token stream. Both passes read the corpus in chunks and lex the rows of a
//! chunk in parallel, keeping them in input order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::commit::{CommitTokenizer, TokenizedCommit};
use crate::diff::{parse_diff, Modification};
use crate::error::{Error, ParseError, Result};
use crate::lexer::LexerRegistry;
use crate::percentiles::{
    literal_lengths, LiteralLengthLog, PercentileTable, LENGTHS_FILE, PERCENTILES_FILE,
    REPORTED_QUANTILES,
};
use crate::LexicalAnalyzer;

/// A commit row with all of its columns.
pub type Row = Map<String, Value>;

/// Columns every input row must carry.
pub const REQUIRED_COLUMNS: [&str; 3] = ["id", "author", "mods"];

// Written by pass two; stale copies in the input are dropped.
const OUTPUT_COLUMNS: [&str; 3] = ["pos_in_history", "diff", "diff_sep"];

/// On-disk format of the input shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    #[default]
    Jsonl,
}

impl DataFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Jsonl => "jsonl",
        }
    }
}

/// What to do with a commit whose diff cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseErrorPolicy {
    #[default]
    Abort,
    /// Log the commit and leave it out of the outputs.
    Skip,
}

/// Where the literal-length thresholds come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PercentileSource {
    /// Run pass one over the input and write the log and table to `literals_dir`.
    Compute { literals_dir: PathBuf },
    /// Read the table a previous compute run left in `percentile_dir`.
    Load { percentile_dir: PathBuf },
}

/// Configuration for the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub data_format: DataFormat,
    pub chunk_size: usize,
    /// Worker threads; `None` uses every core.
    pub workers: Option<usize>,
    pub upper_quantile: f64,
    pub delimiter: String,
    /// Commit ids that are never lexed.
    pub exclude_ids: BTreeSet<i64>,
    pub on_parse_error: ParseErrorPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_format: DataFormat::default(),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            workers: None,
            upper_quantile: crate::DEFAULT_UPPER_QUANTILE,
            delimiter: crate::DEFAULT_DELIMITER.to_string(),
            exclude_ids: BTreeSet::new(),
            on_parse_error: ParseErrorPolicy::default(),
        }
    }
}

/// Destinations of the two token stream renderings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputPaths {
    /// Rows with the concatenated `diff` column.
    pub diff: PathBuf,
    /// Rows with the delimited `diff_sep` column.
    pub diff_sep: PathBuf,
}

/// Counters of pass two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenizeStats {
    pub rows_read: usize,
    pub commits_written: usize,
    pub excluded: usize,
    pub skipped: usize,
}

/// Result of a full run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    #[serde(flatten)]
    pub stats: TokenizeStats,
    /// Literal lengths logged by pass one; absent in load mode.
    pub literals_recorded: Option<u64>,
    pub upper_quantile: f64,
    pub threshold: f64,
    pub percentiles: BTreeMap<String, f64>,
}

// `mods` is either a raw diff or an already parsed array of modifications.
fn commit_mods(value: &Value) -> std::result::Result<Vec<Modification>, ParseError> {
    let invalid = |message: String| ParseError::InvalidColumn {
        column: "mods",
        message,
    };
    match value {
        Value::String(diff) => parse_diff(diff),
        Value::Array(_) => Vec::<Modification>::deserialize(value).map_err(|e| invalid(e.to_string())),
        other => Err(invalid(format!(
            "expected a diff string or an array of modifications, found {other}"
        ))),
    }
}

// CSV cells are strings, JSON ids are numbers.
fn integer_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Int(i64),
        Text(String),
    }

    match Id::deserialize(deserializer)? {
        Id::Int(id) => Ok(id),
        Id::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

static NULL: Value = Value::Null;

fn column<'a>(row: &'a Row, name: &str) -> &'a Value {
    row.get(name).unwrap_or(&NULL)
}

fn author_key(row: &Row) -> String {
    match column(row, "author") {
        Value::String(author) => author.clone(),
        other => other.to_string(),
    }
}

/// Discover the input shards: `input` itself, or every file under it with
/// the format's extension, sorted.
pub fn discover_inputs(input: &Path, format: DataFormat) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == format.extension()))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(Error::NoInputs {
            path: input.to_path_buf(),
            extension: format.extension(),
        });
    }
    Ok(paths)
}

fn require_columns(path: &Path, has: impl Fn(&str) -> bool) -> Result<()> {
    match REQUIRED_COLUMNS.into_iter().find(|&column| !has(column)) {
        Some(column) => Err(Error::MissingColumn {
            path: path.to_path_buf(),
            column,
        }),
        None => Ok(()),
    }
}

type RowIter = Box<dyn Iterator<Item = Result<Row>>>;

/// Lazily read the rows of one shard.
pub fn read_rows(path: &Path, format: DataFormat) -> Result<RowIter> {
    match format {
        DataFormat::Csv => {
            let mut reader = csv::Reader::from_path(path)?;
            let headers = reader.headers()?.clone();
            require_columns(path, |column| headers.iter().any(|h| h == column))?;

            Ok(Box::new(reader.into_records().map(move |record| -> Result<Row> {
                let record = record?;
                Ok(headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
                    .collect())
            })))
        }
        DataFormat::Jsonl => {
            let lines = BufReader::new(File::open(path)?).lines();
            let path = path.to_path_buf();

            Ok(Box::new(lines.filter_map(move |line| -> Option<Result<Row>> {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(e.into())),
                };
                if line.trim().is_empty() {
                    return None;
                }
                Some(serde_json::from_str::<Row>(&line).map_err(Error::from).and_then(|row| {
                    require_columns(&path, |column| row.contains_key(column))?;
                    Ok(row)
                }))
            })))
        }
    }
}

/// Rows of every input shard, in order.
pub struct CorpusReader {
    format: DataFormat,
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<RowIter>,
}

impl CorpusReader {
    pub fn open(input: &Path, format: DataFormat) -> Result<Self> {
        let files = discover_inputs(input, format)?;
        tracing::info!(files = files.len(), input = %input.display(), "found input shards");
        Ok(Self {
            format,
            pending: files.into_iter(),
            current: None,
        })
    }

    /// Up to `size` rows; empty once the corpus is exhausted.
    pub fn next_chunk(&mut self, size: usize) -> Result<Vec<Row>> {
        let size = size.max(1);
        let mut chunk = Vec::with_capacity(size);
        while chunk.len() < size {
            match self.next() {
                Some(row) => chunk.push(row?),
                None => break,
            }
        }
        Ok(chunk)
    }
}

impl Iterator for CorpusReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(rows) = self.current.as_mut() {
                if let Some(row) = rows.next() {
                    return Some(row);
                }
                self.current = None;
            }

            let path = self.pending.next()?;
            tracing::debug!(file = %path.display(), "reading shard");
            match read_rows(&path, self.format) {
                Ok(rows) => self.current = Some(rows),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Build the bounded pool both passes run on.
pub fn worker_pool(workers: Option<usize>) -> Result<ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(workers.unwrap_or(0))
        .build()?)
}

enum Outcome<T> {
    Excluded,
    Skipped,
    Done { id: i64, value: T },
}

fn process_row<T>(
    row: &Row,
    config: &PipelineConfig,
    f: impl Fn(i64, &[Modification]) -> T,
) -> Result<Outcome<T>> {
    let id = match integer_id(column(row, "id")) {
        Ok(id) => id,
        Err(e) => {
            let source = ParseError::InvalidColumn {
                column: "id",
                message: e.to_string(),
            };
            return reject(config, None, source);
        }
    };
    if config.exclude_ids.contains(&id) {
        tracing::warn!(id, "commit is excluded, skipping");
        return Ok(Outcome::Excluded);
    }

    match commit_mods(column(row, "mods")) {
        Ok(mods) => Ok(Outcome::Done {
            id,
            value: f(id, &mods),
        }),
        Err(source) => reject(config, Some(id), source),
    }
}

fn reject<T>(config: &PipelineConfig, id: Option<i64>, source: ParseError) -> Result<Outcome<T>> {
    match config.on_parse_error {
        ParseErrorPolicy::Abort => Err(match id {
            Some(id) => Error::Parse { id, source },
            None => Error::InvalidRow { source },
        }),
        ParseErrorPolicy::Skip => {
            tracing::warn!(id = ?id, error = %source, "unparseable commit, skipping");
            Ok(Outcome::Skipped)
        }
    }
}

fn process_chunk<T, F>(
    pool: &ThreadPool,
    chunk: &[Row],
    config: &PipelineConfig,
    f: F,
) -> Result<Vec<Outcome<T>>>
where
    T: Send,
    F: Fn(i64, &[Modification]) -> T + Sync,
{
    let results: Vec<Result<Outcome<T>>> = pool.install(|| {
        chunk
            .par_iter()
            .map(|row| process_row(row, config, &f))
            .collect()
    });
    // First failure in input order, whichever worker hit it.
    results.into_iter().collect()
}

/// Pass one: log the length of every filterable literal in the corpus and
/// compute the reported percentiles from the log.
///
/// Writes `literals_len.txt` and `literals.json` into `literals_dir` and
/// returns the table with the number of lengths logged.
pub fn compute_percentiles<A>(
    input: &Path,
    literals_dir: &Path,
    registry: &LexerRegistry<A>,
    config: &PipelineConfig,
    pool: &ThreadPool,
) -> Result<(PercentileTable, u64)>
where
    A: LexicalAnalyzer + Sync,
{
    fs::create_dir_all(literals_dir)?;
    let mut log = LiteralLengthLog::create(literals_dir.join(LENGTHS_FILE))?;
    let mut reader = CorpusReader::open(input, config.data_format)?;
    tracing::info!(log = %log.path().display(), "collecting literal lengths");

    loop {
        let chunk = reader.next_chunk(config.chunk_size)?;
        if chunk.is_empty() {
            break;
        }

        let outcomes = process_chunk(pool, &chunk, config, |id, mods| {
            literal_lengths(registry, id, mods)
        })?;
        let lengths: Vec<usize> = outcomes
            .into_iter()
            .flat_map(|outcome| match outcome {
                Outcome::Done { value, .. } => value,
                Outcome::Excluded | Outcome::Skipped => Vec::new(),
            })
            .collect();
        log.append(&lengths)?;
        tracing::info!(rows = chunk.len(), literals = log.written(), "chunk processed");
    }

    let log_path = log.path().to_path_buf();
    let histogram = log.finish()?;
    let table = PercentileTable::from_histogram(&histogram, &REPORTED_QUANTILES, &log_path)?;
    table.save(&literals_dir.join(PERCENTILES_FILE))?;
    tracing::info!(literals = histogram.total(), percentiles = ?table.to_map(), "percentiles computed");

    Ok((table, histogram.total()))
}

/// Obtain the percentile table from `source`.
///
/// Load mode never falls back to computing.
pub fn prepare_percentiles<A>(
    input: &Path,
    source: &PercentileSource,
    registry: &LexerRegistry<A>,
    config: &PipelineConfig,
    pool: &ThreadPool,
) -> Result<(PercentileTable, Option<u64>)>
where
    A: LexicalAnalyzer + Sync,
{
    match source {
        PercentileSource::Compute { literals_dir } => {
            let (table, recorded) = compute_percentiles(input, literals_dir, registry, config, pool)?;
            Ok((table, Some(recorded)))
        }
        PercentileSource::Load { percentile_dir } => {
            let table = PercentileTable::load(&percentile_dir.join(PERCENTILES_FILE))?;
            tracing::info!(dir = %percentile_dir.display(), percentiles = ?table.to_map(), "percentiles loaded");
            Ok((table, None))
        }
    }
}

#[derive(Serialize)]
struct DiffRecord<'a> {
    #[serde(flatten)]
    columns: &'a Row,
    pos_in_history: u64,
    diff: &'a str,
}

#[derive(Serialize)]
struct DelimitedRecord<'a> {
    #[serde(flatten)]
    columns: &'a Row,
    pos_in_history: u64,
    diff_sep: &'a str,
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

fn write_record(writer: &mut impl Write, record: &impl Serialize) -> Result<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Pass two: tokenize every commit and append both renderings, chunk by
/// chunk, to the (truncated) outputs.
pub fn tokenize_corpus<A>(
    input: &Path,
    outputs: &OutputPaths,
    tokenizer: &CommitTokenizer<A>,
    config: &PipelineConfig,
    pool: &ThreadPool,
) -> Result<TokenizeStats>
where
    A: LexicalAnalyzer + Sync,
{
    let mut reader = CorpusReader::open(input, config.data_format)?;
    let mut diff_out = create_output(&outputs.diff)?;
    let mut sep_out = create_output(&outputs.diff_sep)?;
    let mut positions: HashMap<String, u64> = HashMap::new();
    let mut stats = TokenizeStats::default();
    tracing::info!(threshold = tokenizer.filter().max_len, "tokenizing commits");

    loop {
        let chunk = reader.next_chunk(config.chunk_size)?;
        if chunk.is_empty() {
            break;
        }
        stats.rows_read += chunk.len();

        let outcomes = process_chunk(pool, &chunk, config, |id, mods| tokenizer.tokenize(id, mods))?;

        for (mut row, outcome) in chunk.into_iter().zip(outcomes) {
            let (id, tokenized): (i64, TokenizedCommit) = match outcome {
                Outcome::Done { id, value } => (id, value),
                Outcome::Excluded => {
                    stats.excluded += 1;
                    continue;
                }
                Outcome::Skipped => {
                    stats.skipped += 1;
                    continue;
                }
            };

            let position = positions.entry(author_key(&row)).or_insert(0);
            let pos_in_history = *position;
            *position += 1;

            for name in OUTPUT_COLUMNS {
                row.remove(name);
            }
            row.insert("id".to_string(), Value::from(id));

            write_record(
                &mut diff_out,
                &DiffRecord {
                    columns: &row,
                    pos_in_history,
                    diff: &tokenized.diff,
                },
            )?;
            write_record(
                &mut sep_out,
                &DelimitedRecord {
                    columns: &row,
                    pos_in_history,
                    diff_sep: &tokenized.diff_sep,
                },
            )?;
            stats.commits_written += 1;
        }

        diff_out.flush()?;
        sep_out.flush()?;
        tracing::info!(rows = stats.rows_read, written = stats.commits_written, "chunk processed");
    }

    if stats.excluded > 0 || stats.skipped > 0 {
        tracing::warn!(excluded = stats.excluded, skipped = stats.skipped, "some commits were left out");
    }
    Ok(stats)
}

/// Run both passes over `input` with `analyzer`.
pub fn run<A>(
    analyzer: A,
    input: &Path,
    outputs: &OutputPaths,
    source: &PercentileSource,
    config: &PipelineConfig,
) -> Result<PipelineResult>
where
    A: LexicalAnalyzer + Sync,
{
    if !(config.upper_quantile > 0.0 && config.upper_quantile < 1.0) {
        return Err(Error::InvalidQuantile(config.upper_quantile));
    }

    let pool = worker_pool(config.workers)?;
    let registry = LexerRegistry::new(analyzer);
    let (table, literals_recorded) = prepare_percentiles(input, source, &registry, config, &pool)?;
    let tokenizer = CommitTokenizer::with_percentiles(
        registry,
        &table,
        config.upper_quantile,
        config.delimiter.as_str(),
    )?;

    let stats = tokenize_corpus(input, outputs, &tokenizer, config, &pool)?;

    Ok(PipelineResult {
        stats,
        literals_recorded,
        upper_quantile: config.upper_quantile,
        threshold: tokenizer.filter().max_len,
        percentiles: table.to_map(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::CodeAnalyzer;
    use serde_json::json;
    use tempfile::TempDir;

    fn modify_diff(path: &str, lines: &str) -> String {
        format!(
            "diff --git a/{path} b/{path}\nindex 1..2 100644\n--- a/{path}\n+++ b/{path}\n@@ -1 +1 @@\n{lines}\n"
        )
    }

    fn write_jsonl(path: &Path, rows: &[Value]) {
        let mut file = File::create(path).unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
    }

    fn read_jsonl(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn outputs(dir: &Path) -> OutputPaths {
        OutputPaths {
            diff: dir.join("out/diff.jsonl"),
            diff_sep: dir.join("out/diff_sep.jsonl"),
        }
    }

    fn save_table(dir: &Path, entries: &[(f64, f64)]) {
        PercentileTable::new(entries.iter().copied())
            .unwrap()
            .save(&dir.join(PERCENTILES_FILE))
            .unwrap();
    }

    #[test]
    fn test_discover_inputs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("b")).unwrap();
        fs::write(temp.path().join("b/2.jsonl"), "").unwrap();
        fs::write(temp.path().join("a.jsonl"), "").unwrap();
        fs::write(temp.path().join("skip.csv"), "").unwrap();

        let files = discover_inputs(temp.path(), DataFormat::Jsonl).unwrap();
        assert_eq!(files, vec![temp.path().join("a.jsonl"), temp.path().join("b/2.jsonl")]);

        let empty = TempDir::new().unwrap();
        assert!(matches!(
            discover_inputs(empty.path(), DataFormat::Csv),
            Err(Error::NoInputs { .. })
        ));
    }

    #[test]
    fn test_csv_compute_mode_end_to_end() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("train.csv");
        let mut writer = csv::Writer::from_path(&input).unwrap();
        writer.write_record(["id", "author", "date", "message", "mods"]).unwrap();
        let first = modify_diff("src/main.py", "-x = 1\n+x = \"hello\"");
        writer
            .write_record(["1", "alice", "2020-01-01", "fix", first.as_str()])
            .unwrap();
        writer
            .write_record([
                "2",
                "bob",
                "2020-01-02",
                "add",
                "diff --git a/b.py b/b.py\nnew file mode 100644\n--- /dev/null\n+++ b/b.py\n@@ -0,0 +1 @@\n+y = 22222222222222222222\n",
            ])
            .unwrap();
        writer.flush().unwrap();

        let literals_dir = temp.path().join("literals");
        let config = PipelineConfig {
            data_format: DataFormat::Csv,
            ..Default::default()
        };
        let result = run(
            CodeAnalyzer::default(),
            &input,
            &outputs(temp.path()),
            &PercentileSource::Compute {
                literals_dir: literals_dir.clone(),
            },
            &config,
        )
        .unwrap();

        // Lengths 1, 7 and 20: q0.95 interpolates to 7 + 0.9 * 13.
        assert_eq!(result.literals_recorded, Some(3));
        assert!((result.threshold - 18.7).abs() < 1e-9);
        assert_eq!(fs::read_to_string(literals_dir.join(LENGTHS_FILE)).unwrap(), "1\n7\n20\n");
        let table = PercentileTable::load(&literals_dir.join(PERCENTILES_FILE)).unwrap();
        assert_eq!(table.iter().count(), REPORTED_QUANTILES.len());

        let rows = read_jsonl(&outputs(temp.path()).diff_sep);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["message"], json!("fix"));
        assert_eq!(rows[0]["diff_sep"], json!("src/main.py - x = 1 + x = \"hello\""));
        assert_eq!(rows[1]["diff_sep"], json!("new file b.py + y ="));

        let rows = read_jsonl(&outputs(temp.path()).diff);
        assert_eq!(rows[1]["diff"], json!("newfileb.py+y="));
        assert!(rows[0].get("diff_sep").is_none());
    }

    #[test]
    fn test_parsed_mods_and_load_mode() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("val.jsonl");
        write_jsonl(
            &input,
            &[json!({
                "id": 5,
                "author": "carol",
                "mods": [
                    {"change_type": "COPY", "old_path": "a.txt", "new_path": "b.txt", "diff": ""},
                    {"change_type": "UNKNOWN", "old_path": null, "new_path": "x.py", "diff": "+1"},
                    {"change_type": "MODIFY", "old_path": "c.rs", "new_path": "c.rs", "diff": "+let s = \"abcdef\";"}
                ]
            })],
        );
        save_table(temp.path(), &[(0.5, 4.0), (0.95, 8.0)]);

        let result = run(
            CodeAnalyzer::default(),
            &input,
            &outputs(temp.path()),
            &PercentileSource::Load {
                percentile_dir: temp.path().to_path_buf(),
            },
            &PipelineConfig::default(),
        )
        .unwrap();

        assert_eq!(result.literals_recorded, None);
        assert_eq!(result.threshold, 8.0);
        let rows = read_jsonl(&outputs(temp.path()).diff_sep);
        assert_eq!(
            rows[0]["diff_sep"],
            json!("copy from a.txt copy to b.txt c.rs + let s = \"abcdef\" ;")
        );
        assert!(rows[0]["mods"].is_array());
    }

    #[test]
    fn test_order_and_pos_in_history_across_chunks() {
        let temp = TempDir::new().unwrap();
        let shards = temp.path().join("shards");
        fs::create_dir_all(&shards).unwrap();
        let row = |id: i64, author: &str| {
            json!({"id": id, "author": author, "mods": modify_diff(&format!("f{id}.py"), "+x")})
        };
        write_jsonl(&shards.join("0.jsonl"), &[row(1, "alice"), row(2, "bob"), row(3, "alice")]);
        write_jsonl(&shards.join("1.jsonl"), &[row(4, "bob"), row(5, "alice")]);
        save_table(temp.path(), &[(0.95, 100.0)]);

        let config = PipelineConfig {
            chunk_size: 2,
            workers: Some(2),
            ..Default::default()
        };
        let result = run(
            CodeAnalyzer::default(),
            &shards,
            &outputs(temp.path()),
            &PercentileSource::Load {
                percentile_dir: temp.path().to_path_buf(),
            },
            &config,
        )
        .unwrap();
        assert_eq!(result.stats.commits_written, 5);

        let rows = read_jsonl(&outputs(temp.path()).diff_sep);
        let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        let positions: Vec<u64> = rows.iter().map(|r| r["pos_in_history"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(positions, vec![0, 0, 1, 1, 2]);
        assert_eq!(rows[2]["diff_sep"], json!("f3.py + x"));
    }

    #[test]
    fn test_excluded_ids_are_left_out() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.jsonl");
        write_jsonl(
            &input,
            &[
                json!({"id": 1, "author": "a", "mods": modify_diff("a.py", "+x")}),
                json!({"id": 2, "author": "a", "mods": modify_diff("b.py", "+y")}),
            ],
        );
        save_table(temp.path(), &[(0.95, 10.0)]);

        let config = PipelineConfig {
            exclude_ids: BTreeSet::from([1]),
            ..Default::default()
        };
        let result = run(
            CodeAnalyzer::default(),
            &input,
            &outputs(temp.path()),
            &PercentileSource::Load {
                percentile_dir: temp.path().to_path_buf(),
            },
            &config,
        )
        .unwrap();

        assert_eq!(result.stats.excluded, 1);
        let rows = read_jsonl(&outputs(temp.path()).diff);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(2));
        assert_eq!(rows[0]["pos_in_history"], json!(0));
    }

    #[test]
    fn test_parse_error_policy() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.jsonl");
        write_jsonl(
            &input,
            &[
                json!({"id": 1, "author": "a", "mods": modify_diff("a.py", "+x")}),
                json!({"id": 2, "author": "a", "mods": "diff --git\nindex 1..2\n+x\n"}),
            ],
        );
        save_table(temp.path(), &[(0.95, 10.0)]);
        let source = PercentileSource::Load {
            percentile_dir: temp.path().to_path_buf(),
        };

        let err = run(
            CodeAnalyzer::default(),
            &input,
            &outputs(temp.path()),
            &source,
            &PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse { id: 2, .. }));

        let config = PipelineConfig {
            on_parse_error: ParseErrorPolicy::Skip,
            ..Default::default()
        };
        let result = run(CodeAnalyzer::default(), &input, &outputs(temp.path()), &source, &config).unwrap();
        assert_eq!(result.stats.skipped, 1);
        assert_eq!(read_jsonl(&outputs(temp.path()).diff).len(), 1);
    }

    #[test]
    fn test_malformed_rows_follow_parse_error_policy() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.jsonl");
        write_jsonl(
            &input,
            &[
                json!({"id": 1, "author": "a", "mods": [
                    {"change_type": "ModificationType.ADD", "old_path": null, "new_path": "a.py", "diff": "+x"}
                ]}),
                json!({"id": "not-a-number", "author": "a", "mods": modify_diff("b.py", "+y")}),
                json!({"id": 3, "author": "a", "mods": 42}),
                json!({"id": 4, "author": "a", "mods": modify_diff("c.py", "+z")}),
            ],
        );
        save_table(temp.path(), &[(0.95, 10.0)]);
        let source = PercentileSource::Load {
            percentile_dir: temp.path().to_path_buf(),
        };

        let err = run(
            CodeAnalyzer::default(),
            &input,
            &outputs(temp.path()),
            &source,
            &PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Parse {
                id: 1,
                source: ParseError::InvalidColumn { column: "mods", .. }
            }
        ));

        let config = PipelineConfig {
            on_parse_error: ParseErrorPolicy::Skip,
            ..Default::default()
        };
        let result = run(CodeAnalyzer::default(), &input, &outputs(temp.path()), &source, &config).unwrap();
        assert_eq!(result.stats.skipped, 3);
        let rows = read_jsonl(&outputs(temp.path()).diff_sep);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(4));
        assert_eq!(rows[0]["pos_in_history"], json!(0));
        assert_eq!(rows[0]["diff_sep"], json!("c.py + z"));
    }

    #[test]
    fn test_row_without_id_aborts_by_default() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.jsonl");
        write_jsonl(&input, &[json!({"id": "x1", "author": "a", "mods": modify_diff("a.py", "+x")})]);
        save_table(temp.path(), &[(0.95, 10.0)]);

        let err = run(
            CodeAnalyzer::default(),
            &input,
            &outputs(temp.path()),
            &PercentileSource::Load {
                percentile_dir: temp.path().to_path_buf(),
            },
            &PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidRow {
                source: ParseError::InvalidColumn { column: "id", .. }
            }
        ));
    }

    #[test]
    fn test_load_mode_requires_artifact() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.jsonl");
        write_jsonl(&input, &[json!({"id": 1, "author": "a", "mods": modify_diff("a.py", "+x")})]);

        let err = run(
            CodeAnalyzer::default(),
            &input,
            &outputs(temp.path()),
            &PercentileSource::Load {
                percentile_dir: temp.path().join("missing"),
            },
            &PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingPercentiles { .. }));
        assert!(!outputs(temp.path()).diff.exists());
    }

    #[test]
    fn test_upper_quantile_must_be_in_table() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.jsonl");
        write_jsonl(&input, &[json!({"id": 1, "author": "a", "mods": modify_diff("a.py", "+x")})]);
        save_table(temp.path(), &[(0.9, 10.0)]);

        let err = run(
            CodeAnalyzer::default(),
            &input,
            &outputs(temp.path()),
            &PercentileSource::Load {
                percentile_dir: temp.path().to_path_buf(),
            },
            &PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownQuantile(q) if q == 0.95));
    }

    #[test]
    fn test_corpus_without_literals_is_fatal() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.jsonl");
        write_jsonl(&input, &[json!({"id": 1, "author": "a", "mods": modify_diff("notes.txt", "+hello world")})]);

        let err = run(
            CodeAnalyzer::default(),
            &input,
            &outputs(temp.path()),
            &PercentileSource::Compute {
                literals_dir: temp.path().join("literals"),
            },
            &PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus { .. }));
    }

    #[test]
    fn test_missing_column_reported() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.csv");
        fs::write(&input, "id,author,message\n1,a,hi\n").unwrap();

        let mut reader = CorpusReader::open(&input, DataFormat::Csv).unwrap();
        let err = reader.next_chunk(10).unwrap_err();
        assert!(matches!(err, Error::MissingColumn { column: "mods", .. }));
    }

    #[test]
    fn test_rejects_out_of_range_upper_quantile() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig {
            upper_quantile: 1.5,
            ..Default::default()
        };
        let err = run(
            CodeAnalyzer::default(),
            temp.path(),
            &outputs(temp.path()),
            &PercentileSource::Load {
                percentile_dir: temp.path().to_path_buf(),
            },
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidQuantile(_)));
    }
}
