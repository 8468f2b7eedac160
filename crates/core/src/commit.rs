//! Turning one commit's modifications into its token stream.

use crate::diff::{ChangeType, Modification};
use crate::error::Result;
use crate::lexer::{Lexeme, LexerRegistry};
use crate::percentiles::PercentileTable;
use crate::LexicalAnalyzer;

/// Drops literals longer than a threshold; documentation always passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiteralFilter {
    pub max_len: f64,
}

impl LiteralFilter {
    pub fn new(max_len: f64) -> Self {
        Self { max_len }
    }

    pub fn from_table(table: &PercentileTable, upper_quantile: f64) -> Result<Self> {
        Ok(Self::new(table.threshold(upper_quantile)?))
    }

    pub fn allows(&self, lexeme: &Lexeme<'_>) -> bool {
        !lexeme.category.is_length_filtered() || lexeme.char_len() as f64 <= self.max_len
    }
}

/// Both renderings of a commit's tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedCommit {
    /// Tokens concatenated without a separator.
    pub diff: String,
    /// Tokens joined with the configured delimiter.
    pub diff_sep: String,
}

/// Lexes modifications and assembles the filtered token stream.
///
/// The output depends only on the modifications, the threshold and the
/// delimiter.
pub struct CommitTokenizer<A> {
    registry: LexerRegistry<A>,
    filter: LiteralFilter,
    delimiter: String,
}

impl<A> CommitTokenizer<A>
where
    A: LexicalAnalyzer,
{
    pub fn new(registry: LexerRegistry<A>, filter: LiteralFilter, delimiter: impl Into<String>) -> Self {
        Self {
            registry,
            filter,
            delimiter: delimiter.into(),
        }
    }

    /// Tokenizer thresholded at `table[upper_quantile]`.
    pub fn with_percentiles(
        registry: LexerRegistry<A>,
        table: &PercentileTable,
        upper_quantile: f64,
        delimiter: impl Into<String>,
    ) -> Result<Self> {
        let filter = LiteralFilter::from_table(table, upper_quantile)?;
        Ok(Self::new(registry, filter, delimiter))
    }

    pub fn filter(&self) -> LiteralFilter {
        self.filter
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Kept tokens of every modification, in input order.
    pub fn tokens<'a>(&self, commit_id: i64, mods: &'a [Modification]) -> Vec<&'a str> {
        let mut tokens = Vec::new();

        for m in mods.iter().filter(|m| m.change_type != ChangeType::Unknown) {
            push_preamble(&mut tokens, m);
            tokens.extend(
                self.registry
                    .lex(commit_id, m.lex_path(), &m.diff_body)
                    .filter(|lexeme| self.filter.allows(lexeme))
                    .map(|lexeme| lexeme.text.trim())
                    .filter(|text| !text.is_empty()),
            );
        }

        tokens
    }

    pub fn tokenize(&self, commit_id: i64, mods: &[Modification]) -> TokenizedCommit {
        let tokens = self.tokens(commit_id, mods);
        TokenizedCommit {
            diff: tokens.concat(),
            diff_sep: tokens.join(&self.delimiter),
        }
    }
}

// Structural description of the change; never filtered.
fn push_preamble<'a>(tokens: &mut Vec<&'a str>, m: &'a Modification) {
    match m.change_type {
        ChangeType::Add => {
            tokens.extend(["new", "file"]);
            tokens.extend(m.new_path.split_whitespace());
        }
        ChangeType::Delete => {
            tokens.extend(["deleted", "file"]);
            tokens.extend(m.old_path.split_whitespace());
        }
        ChangeType::Rename | ChangeType::Copy => {
            let verb = if m.change_type == ChangeType::Rename {
                "rename"
            } else {
                "copy"
            };
            tokens.extend([verb, "from"]);
            tokens.extend(m.old_path.split_whitespace());
            tokens.extend([verb, "to"]);
            tokens.extend(m.new_path.split_whitespace());
        }
        ChangeType::Modify | ChangeType::Unknown => {
            tokens.extend(m.new_path.split_whitespace());
        }
    }
}
