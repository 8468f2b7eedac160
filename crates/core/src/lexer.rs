//! Lexeme types and the registry that picks an analyzer per modified file.

use crate::LexicalAnalyzer;

/// Coarse lexeme taxonomy shared by every analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Generic text, e.g. produced by whitespace splitting.
    Text,
    Whitespace,
    Keyword,
    Name,
    Operator,
    Punctuation,
    Comment,
    /// Input the analyzer could not classify.
    Error,
    Literal(LiteralKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    String,
    Number,
    /// Docstrings and doc comments.
    Doc,
}

impl Category {
    pub fn is_literal(self) -> bool {
        matches!(self, Category::Literal(_))
    }

    /// Literals subject to length filtering; documentation is always exempt.
    pub fn is_length_filtered(self) -> bool {
        matches!(self, Category::Literal(kind) if kind != LiteralKind::Doc)
    }
}

/// A classified slice of the lexed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lexeme<'a> {
    pub category: Category,
    pub text: &'a str,
}

impl<'a> Lexeme<'a> {
    pub fn new(category: Category, text: &'a str) -> Self {
        Self { category, text }
    }

    /// Length in characters, not bytes.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Lazy, single-use lexeme sequence.
pub type Lexemes<'a> = Box<dyn Iterator<Item = Lexeme<'a>> + 'a>;

/// Outcome of analyzer selection.
pub enum Analysis<'a> {
    /// A real language lexer matched.
    Lexed {
        language: &'static str,
        lexemes: Lexemes<'a>,
    },
    /// The best match would not tokenize anything (plain text).
    PlainText,
    /// No analyzer claims the file.
    Unsupported,
}

/// Split on whitespace, tagging every piece as generic text.
pub fn split_whitespace(text: &str) -> Lexemes<'_> {
    Box::new(
        text.split_whitespace()
            .map(|token| Lexeme::new(Category::Text, token)),
    )
}

/// Analyzer that never recognizes anything, leaving every file to the
/// whitespace fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceAnalyzer;

impl LexicalAnalyzer for WhitespaceAnalyzer {
    fn classify_and_lex<'a>(&self, _filename: &str, _text: &'a str) -> Analysis<'a> {
        Analysis::PlainText
    }
}

/// Wraps an analyzer with the whitespace fallback and its diagnostics.
#[derive(Debug, Clone, Default)]
pub struct LexerRegistry<A> {
    analyzer: A,
}

impl<A> LexerRegistry<A>
where
    A: LexicalAnalyzer,
{
    pub fn new(analyzer: A) -> Self {
        Self { analyzer }
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    /// Lex `text` as the contents of `filename`.
    ///
    /// Never fails: plain-text and unsupported files are split on whitespace
    /// and reported through a warning tagged with the commit id.
    pub fn lex<'a>(&self, commit_id: i64, filename: &str, text: &'a str) -> Lexemes<'a> {
        match self.analyzer.classify_and_lex(filename, text) {
            Analysis::Lexed { language, lexemes } => {
                tracing::debug!(id = commit_id, file = filename, language, "lexing");
                lexemes
            }
            Analysis::PlainText => {
                tracing::warn!(id = commit_id, file = filename, "plain text lexer chosen, splitting on whitespace");
                split_whitespace(text)
            }
            Analysis::Unsupported => {
                tracing::warn!(id = commit_id, file = filename, "no lexer found, splitting on whitespace");
                split_whitespace(text)
            }
        }
    }
}
