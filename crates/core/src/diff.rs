//! Parsing of raw unified diffs into per-file modifications.
//!
//! A commit's diff is split on its `diff --git` lines. Every file section is
//! classified by the first line after its header and reduced to the lines that
//! were actually added or removed.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ParseError, PathSide};

static FILE_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"diff --git(.*?)\n").unwrap());

/// Kind of change a commit made to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Add,
    Delete,
    Rename,
    /// Never produced by [`parse_diff`]; only arrives through pre-parsed input.
    Copy,
    Modify,
    Unknown,
}

/// One file's change within a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub change_type: ChangeType,
    /// Empty for [`ChangeType::Add`].
    #[serde(default, deserialize_with = "empty_if_null")]
    pub old_path: String,
    /// Empty for [`ChangeType::Delete`].
    #[serde(default, deserialize_with = "empty_if_null")]
    pub new_path: String,
    /// Added lines, removed lines and binary markers, sigils included.
    #[serde(rename = "diff", default, deserialize_with = "empty_if_null")]
    pub diff_body: String,
}

// Pre-parsed mods mark a missing side with `null`.
fn empty_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Modification {
    /// Filename the body should be lexed as.
    pub fn lex_path(&self) -> &str {
        match self.change_type {
            ChangeType::Delete => &self.old_path,
            _ => &self.new_path,
        }
    }
}

/// Split a raw multi-file diff into modifications, in file order.
///
/// Text before the first `diff --git` line is ignored. A header without the
/// path tokens its change type needs fails the whole diff.
pub fn parse_diff(raw_diff: &str) -> Result<Vec<Modification>, ParseError> {
    let headers: Vec<(Range<usize>, &str)> = FILE_HEADER_RE
        .captures_iter(raw_diff)
        .filter_map(|caps| {
            let header = caps.get(1).map_or("", |m| m.as_str());
            Some((caps.get(0)?.range(), header))
        })
        .collect();
    let mut mods = Vec::with_capacity(headers.len());

    for (index, (span, header)) in headers.iter().enumerate() {
        let body_end = headers
            .get(index + 1)
            .map_or(raw_diff.len(), |(next, _)| next.start);
        let body = &raw_diff[span.end..body_end];

        mods.push(parse_file_section(index, header, body)?);
    }

    Ok(mods)
}

fn parse_file_section(index: usize, header: &str, body: &str) -> Result<Modification, ParseError> {
    let first_line = body.split('\n').next().unwrap_or("").trim();
    let path = |side: PathSide| header_path(index, header, side);

    let (change_type, old_path, new_path) = if first_line.starts_with("new file") {
        (ChangeType::Add, String::new(), path(PathSide::New)?)
    } else if first_line.starts_with("deleted file") {
        (ChangeType::Delete, path(PathSide::Old)?, String::new())
    } else if first_line.starts_with("similarity index") {
        (ChangeType::Rename, path(PathSide::Old)?, path(PathSide::New)?)
    } else {
        (ChangeType::Modify, path(PathSide::Old)?, path(PathSide::New)?)
    };

    Ok(Modification {
        change_type,
        old_path,
        new_path,
        diff_body: filter_changed_lines(body),
    })
}

fn header_path(index: usize, header: &str, side: PathSide) -> Result<String, ParseError> {
    let (position, prefix) = match side {
        PathSide::Old => (0, "a/"),
        PathSide::New => (1, "b/"),
    };
    let token = header
        .split_whitespace()
        .nth(position)
        .ok_or_else(|| ParseError::MissingPathToken {
            index,
            header: header.trim().to_string(),
            side,
        })?;
    Ok(token.strip_prefix(prefix).unwrap_or(token).to_string())
}

/// Keep only added/removed lines and binary markers, trimmed.
///
/// The `+++ b/..`, `--- a/..` and `/dev/null` path markers never survive;
/// changed lines that merely start with `++` or `--` content (`+---`,
/// `--- comment`, `+++i`) are kept.
pub fn filter_changed_lines(body: &str) -> String {
    let kept: Vec<&str> = body
        .split('\n')
        .filter(|line| is_changed_line(line))
        .map(str::trim)
        .collect();
    kept.join("\n")
}

const PATH_MARKERS: [&str; 4] = ["+++ b/", "+++ /dev/null", "--- a/", "--- /dev/null"];

fn is_changed_line(line: &str) -> bool {
    if line.starts_with('+') || line.starts_with('-') {
        !PATH_MARKERS.iter().any(|marker| line.starts_with(*marker))
    } else {
        let line = line.trim_end();
        line.starts_with("Binary files") && line.ends_with("differ")
    }
}
