//! Encoding tokenized diffs into input ids.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tokenizers::Tokenizer as HfTokenizer;

/// Trait for turning a token stream into ids.
pub trait Encoder {
    fn encode(&self, text: &str) -> Result<Vec<u32>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Wrapper around a HuggingFace tokenizer file.
pub struct HfEncoder {
    inner: HfTokenizer,
}

impl HfEncoder {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let inner = HfTokenizer::from_file(path)?;
        Ok(Self { inner })
    }
}

impl Encoder for HfEncoder {
    fn encode(&self, text: &str) -> Result<Vec<u32>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.inner.encode(text, false)?.get_ids().to_vec())
    }
}

static NULL: Value = Value::Null;

#[derive(Serialize)]
struct EncodedRow<'a> {
    id: &'a Value,
    author: &'a Value,
    pos_in_history: &'a Value,
    diff_input_ids: &'a [u32],
}

/// Encode `column` of every row in `input` and write the ids to `output`.
///
/// Returns the number of rows written.
pub fn encode_file<E: Encoder>(
    encoder: &E,
    input: &Path,
    output: &Path,
    column: &str,
    max_length: Option<usize>,
) -> Result<usize, Box<dyn std::error::Error>> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);
    let mut written = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Map<String, Value> = serde_json::from_str(&line)?;
        let text = row
            .get(column)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("{:?}:{}: no string column `{}`", input, index + 1, column))?;

        let mut ids = encoder.encode(text).map_err(|e| e as Box<dyn std::error::Error>)?;
        if let Some(max_length) = max_length {
            ids.truncate(max_length);
        }

        let field = |name: &str| row.get(name).unwrap_or(&NULL);
        serde_json::to_writer(
            &mut writer,
            &EncodedRow {
                id: field("id"),
                author: field("author"),
                pos_in_history: field("pos_in_history"),
                diff_input_ids: &ids,
            },
        )?;
        writer.write_all(b"\n")?;
        written += 1;
    }

    writer.flush()?;
    tracing::info!(rows = written, output = %output.display(), "encoded");
    Ok(written)
}
