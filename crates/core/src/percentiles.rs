//! Corpus-wide literal length statistics.
//!
//! Pass one appends the length of every filterable literal to a log on disk,
//! one integer per line. Pass two streams that log into an exact histogram
//! and evaluates quantiles with linear interpolation (numpy's default), so
//! memory grows with the number of distinct lengths rather than with the
//! corpus.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::diff::{ChangeType, Modification};
use crate::error::{Error, Result};
use crate::lexer::LexerRegistry;
use crate::LexicalAnalyzer;

/// Quantiles computed and persisted for every corpus.
pub const REPORTED_QUANTILES: [f64; 5] = [0.01, 0.05, 0.9, 0.95, 0.99];

/// Length log written by pass one.
pub const LENGTHS_FILE: &str = "literals_len.txt";

/// Percentile artifact written by pass two and read in load mode.
pub const PERCENTILES_FILE: &str = "literals.json";

/// Lengths of all filterable literals in one commit's modifications.
pub fn literal_lengths<A>(
    registry: &LexerRegistry<A>,
    commit_id: i64,
    mods: &[Modification],
) -> Vec<usize>
where
    A: LexicalAnalyzer,
{
    mods.iter()
        .filter(|m| m.change_type != ChangeType::Unknown)
        .flat_map(|m| registry.lex(commit_id, m.lex_path(), &m.diff_body))
        .filter(|lexeme| lexeme.category.is_length_filtered())
        .map(|lexeme| lexeme.char_len())
        .collect()
}

/// Append-only sink for literal lengths.
///
/// Created empty; [`finish`](Self::finish) closes it and reads it back, so the
/// statistic can only be computed once writing is over.
pub struct LiteralLengthLog {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl LiteralLengthLog {
    /// Create (or truncate) the log at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        File::create(&path)?;
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lengths appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append one chunk's lengths and flush them to disk.
    pub fn append(&mut self, lengths: &[usize]) -> Result<()> {
        for len in lengths {
            writeln!(self.writer, "{}", len)?;
        }
        self.writer.flush()?;
        self.written += lengths.len() as u64;
        Ok(())
    }

    /// Close the log and build the histogram of everything written.
    pub fn finish(mut self) -> Result<LengthHistogram> {
        self.writer.flush()?;
        drop(self.writer);
        LengthHistogram::read(&self.path)
    }
}

/// Exact count of each observed length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LengthHistogram {
    counts: BTreeMap<usize, u64>,
    total: u64,
}

impl LengthHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream a length log into a histogram.
    pub fn read(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut histogram = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let value = line.trim();
            if value.is_empty() {
                continue;
            }
            let len = value.parse().map_err(|_| Error::MalformedLengthLog {
                path: path.to_path_buf(),
                line: idx + 1,
                value: value.to_string(),
            })?;
            histogram.record(len);
        }
        Ok(histogram)
    }

    pub fn record(&mut self, len: usize) {
        *self.counts.entry(len).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// The `rank`-th smallest length (0-based).
    fn nth(&self, rank: u64) -> Option<usize> {
        let mut seen = 0;
        for (&len, &count) in &self.counts {
            seen += count;
            if rank < seen {
                return Some(len);
            }
        }
        None
    }

    /// Linearly interpolated quantile, `None` on an empty histogram.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let position = (self.total - 1) as f64 * q;
        let lower = position.floor();
        let fraction = position - lower;
        let below = self.nth(lower as u64)? as f64;
        if fraction == 0.0 {
            return Some(below);
        }
        let above = self.nth(lower as u64 + 1).map_or(below, |len| len as f64);
        Some(below + (above - below) * fraction)
    }
}

/// Quantile to literal length threshold, fixed for a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileTable {
    // Sorted by quantile.
    entries: Vec<(f64, f64)>,
}

impl PercentileTable {
    pub fn new(entries: impl IntoIterator<Item = (f64, f64)>) -> Result<Self> {
        let mut entries: Vec<(f64, f64)> = entries.into_iter().collect();
        if let Some(&(q, _)) = entries.iter().find(|(q, _)| !(*q > 0.0 && *q < 1.0)) {
            return Err(Error::InvalidQuantile(q));
        }
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { entries })
    }

    /// Compute `quantiles` over a histogram; `source` names it in errors.
    pub fn from_histogram(histogram: &LengthHistogram, quantiles: &[f64], source: &Path) -> Result<Self> {
        if histogram.is_empty() {
            return Err(Error::EmptyCorpus {
                path: source.to_path_buf(),
            });
        }
        Self::new(
            quantiles
                .iter()
                .filter_map(|&q| histogram.quantile(q).map(|threshold| (q, threshold))),
        )
    }

    pub fn get(&self, quantile: f64) -> Option<f64> {
        self.entries
            .iter()
            .find(|(q, _)| (q - quantile).abs() < 1e-9)
            .map(|&(_, threshold)| threshold)
    }

    /// Threshold for the configured upper quantile.
    pub fn threshold(&self, quantile: f64) -> Result<f64> {
        self.get(quantile).ok_or(Error::UnknownQuantile(quantile))
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut file, &self.to_map())?;
        file.flush()?;
        Ok(())
    }

    /// Load a table persisted by an earlier compute run.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::MissingPercentiles {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let map: BTreeMap<String, f64> = serde_json::from_reader(BufReader::new(file))?;
        let mut entries = Vec::with_capacity(map.len());
        for (key, threshold) in map {
            let quantile = key.parse().map_err(|_| {
                std::io::Error::new(
                    ErrorKind::InvalidData,
                    format!("{path:?}: quantile key {key:?} is not a number"),
                )
            })?;
            entries.push((quantile, threshold));
        }
        Self::new(entries)
    }

    /// JSON object keyed by the quantile's decimal rendering.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.entries
            .iter()
            .map(|(q, threshold)| (q.to_string(), *threshold))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::CodeAnalyzer;
    use tempfile::TempDir;

    fn histogram(lengths: &[usize]) -> LengthHistogram {
        let mut h = LengthHistogram::new();
        for &len in lengths {
            h.record(len);
        }
        h
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_quantile_matches_linear_interpolation() {
        // numpy.quantile([1, 2, 3, 4, 10], q)
        let h = histogram(&[10, 1, 3, 2, 4]);
        assert!(close(h.quantile(0.5).unwrap(), 3.0));
        assert!(close(h.quantile(0.9).unwrap(), 7.6));
        assert!(close(h.quantile(0.95).unwrap(), 8.8));
        assert!(close(h.quantile(0.01).unwrap(), 1.04));
    }

    #[test]
    fn test_quantile_with_repeated_lengths() {
        // numpy.quantile([2, 2, 2, 5], 0.9) == 4.1
        let h = histogram(&[2, 5, 2, 2]);
        assert!(close(h.quantile(0.9).unwrap(), 4.1));
        assert!(close(h.quantile(0.05).unwrap(), 2.0));
    }

    #[test]
    fn test_single_length() {
        let h = histogram(&[7]);
        for q in REPORTED_QUANTILES {
            assert!(close(h.quantile(q).unwrap(), 7.0));
        }
    }

    #[test]
    fn test_empty_corpus_is_an_error() {
        let err = PercentileTable::from_histogram(&LengthHistogram::new(), &REPORTED_QUANTILES, Path::new("x"))
            .unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus { .. }));
    }

    #[test]
    fn test_log_round_trip_through_histogram() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LENGTHS_FILE);

        let mut log = LiteralLengthLog::create(&path).unwrap();
        log.append(&[3, 1]).unwrap();
        log.append(&[]).unwrap();
        log.append(&[3]).unwrap();
        assert_eq!(log.written(), 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "3\n1\n3\n");

        let h = log.finish().unwrap();
        assert_eq!(h, histogram(&[1, 3, 3]));
    }

    #[test]
    fn test_create_truncates_previous_log() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LENGTHS_FILE);
        std::fs::write(&path, "100\n200\n").unwrap();

        let log = LiteralLengthLog::create(&path).unwrap();
        assert!(log.finish().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_log_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LENGTHS_FILE);
        std::fs::write(&path, "4\nfour\n").unwrap();
        let err = LengthHistogram::read(&path).unwrap_err();
        assert!(matches!(err, Error::MalformedLengthLog { line: 2, .. }));
    }

    #[test]
    fn test_table_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(PERCENTILES_FILE);
        let table = PercentileTable::from_histogram(&histogram(&[1, 2, 3, 4, 10]), &REPORTED_QUANTILES, &path)
            .unwrap();
        table.save(&path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json.get("0.95").is_some());
        assert!(json.get("0.01").is_some());

        let loaded = PercentileTable::load(&path).unwrap();
        assert_eq!(loaded, table);
        assert!(close(loaded.threshold(0.9).unwrap(), 7.6));
    }

    #[test]
    fn test_loaded_thresholds_are_bit_identical() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(PERCENTILES_FILE);
        let table = PercentileTable::new([(0.9, 7.6000000000000005), (0.95, 0.1 + 0.2)]).unwrap();
        table.save(&path).unwrap();

        let loaded = PercentileTable::load(&path).unwrap();
        assert_eq!(loaded.get(0.9), Some(7.6000000000000005));
        assert_eq!(loaded.get(0.95), Some(0.1 + 0.2));
    }

    #[test]
    fn test_load_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let err = PercentileTable::load(&temp.path().join(PERCENTILES_FILE)).unwrap_err();
        assert!(matches!(err, Error::MissingPercentiles { .. }));
    }

    #[test]
    fn test_unknown_and_invalid_quantiles() {
        let table = PercentileTable::new([(0.95, 12.0)]).unwrap();
        assert!(matches!(table.threshold(0.5), Err(Error::UnknownQuantile(_))));
        assert!(matches!(PercentileTable::new([(1.0, 1.0)]), Err(Error::InvalidQuantile(_))));
    }

    #[test]
    fn test_literal_lengths_skip_docs_and_unknown() {
        let registry = LexerRegistry::new(CodeAnalyzer::default());
        let mods = vec![
            Modification {
                change_type: ChangeType::Modify,
                old_path: "a.py".to_string(),
                new_path: "a.py".to_string(),
                diff_body: "+x = \"héllo\" + 12345\n+\"\"\"a long docstring\"\"\"".to_string(),
            },
            Modification {
                change_type: ChangeType::Unknown,
                old_path: "b.py".to_string(),
                new_path: "b.py".to_string(),
                diff_body: "+y = 'ignored'".to_string(),
            },
        ];
        assert_eq!(literal_lengths(&registry, 1, &mods), vec![7, 5]);
    }

    #[test]
    fn test_literal_lengths_use_old_path_for_deletes() {
        let registry = LexerRegistry::new(CodeAnalyzer::default());
        let mods = vec![Modification {
            change_type: ChangeType::Delete,
            old_path: "gone.rs".to_string(),
            new_path: String::new(),
            diff_body: "-let s = \"abc\";".to_string(),
        }];
        assert_eq!(literal_lengths(&registry, 1, &mods), vec![5]);
    }
}
