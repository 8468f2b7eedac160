//! Core of the diff lexing pipeline.
//!
//! Raw commit diffs are split into per-file [`Modification`]s, every file's
//! changed lines are lexed by an analyzer picked from its filename and
//! contents, and literals that are anomalously long for the corpus are dropped
//! before the commit's token stream is emitted.

/// Trait for choosing and running a lexical analyzer.
///
/// Implementors look at a filename (and, for ambiguous names, the text) and
/// either lex the text, report that the best match is plain text, or report
/// that nothing matches. The whitespace fallback for the last two cases lives
/// in [`LexerRegistry`], not in implementors.
pub trait LexicalAnalyzer {
    fn classify_and_lex<'a>(&self, filename: &str, text: &'a str) -> lexer::Analysis<'a>;
}

// Blanket implementation for references to analyzers
impl<T: LexicalAnalyzer + ?Sized> LexicalAnalyzer for &T {
    fn classify_and_lex<'a>(&self, filename: &str, text: &'a str) -> lexer::Analysis<'a> {
        (*self).classify_and_lex(filename, text)
    }
}

mod commit;
mod diff;
mod error;
pub mod languages;
pub mod lexer;
pub mod percentiles;
pub mod pipeline;

pub use commit::{CommitTokenizer, LiteralFilter, TokenizedCommit};
pub use diff::{filter_changed_lines, parse_diff, ChangeType, Modification};
pub use error::{Error, ParseError, PathSide, Result};
pub use languages::CodeAnalyzer;
pub use lexer::{Category, Lexeme, LexerRegistry, LiteralKind, WhitespaceAnalyzer};
pub use percentiles::{LengthHistogram, LiteralLengthLog, PercentileTable};
pub use pipeline::{
    run, DataFormat, ParseErrorPolicy, PercentileSource, PipelineConfig, PipelineResult,
};

/// Default number of rows read and processed at a time.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default quantile whose threshold bounds literal length.
pub const DEFAULT_UPPER_QUANTILE: f64 = 0.95;

/// Default separator between tokens in the delimited stream.
pub const DEFAULT_DELIMITER: &str = " ";
