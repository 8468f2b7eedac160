//! Built-in code lexer and the language table it is configured from.
//!
//! A single `logos` lexer covers every language. Per-language differences
//! (comment syntax, doc comments, docstrings, keywords) are passed in as
//! extras and resolved in token callbacks, so the state machine is generated
//! only once.
//!
//! Languages are selected by filename pattern. When several languages claim a
//! file (`*.h` is C, C++ and Objective-C), the one whose content hints occur
//! most often in the text wins, ties going to the earlier table entry.

use std::path::Path;

use logos::{Lexer, Logos, SpannedIter};

use crate::lexer::{Analysis, Category, Lexeme, LiteralKind};
use crate::LexicalAnalyzer;

/// Comment and string conventions of a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Syntax {
    /// `// line` and `/* block */` comments.
    pub slash_comments: bool,
    /// `///`, `//!` and `/** */` are documentation.
    pub doc_comments: bool,
    /// `#` starts a comment or preprocessor line.
    pub hash_comments: bool,
    /// `--` starts a comment.
    pub dash_comments: bool,
    /// Triple-quoted strings are docstrings.
    pub docstrings: bool,
    /// `'` only opens single-character literals, leaving lifetimes alone.
    pub char_literals: bool,
}

const C_LIKE: Syntax = Syntax {
    slash_comments: true,
    doc_comments: false,
    hash_comments: true,
    dash_comments: false,
    docstrings: false,
    char_literals: false,
};

const C_LIKE_DOC: Syntax = Syntax {
    doc_comments: true,
    ..C_LIKE
};

const SCRIPT: Syntax = Syntax {
    slash_comments: false,
    doc_comments: false,
    hash_comments: true,
    dash_comments: false,
    docstrings: false,
    char_literals: false,
};

const DASH: Syntax = Syntax {
    slash_comments: false,
    doc_comments: false,
    hash_comments: false,
    dash_comments: true,
    docstrings: false,
    char_literals: false,
};

/// A language the built-in lexer knows about.
#[derive(Debug, Clone)]
pub struct Language {
    pub name: &'static str,
    /// `*.ext` suffix patterns or exact file names.
    pub filenames: &'static [&'static str],
    pub keywords: &'static [&'static str],
    /// Substrings that make this language more likely when patterns tie.
    pub hints: &'static [&'static str],
    /// `None` marks a plain-text language.
    pub syntax: Option<Syntax>,
}

impl Language {
    fn matches(&self, basename: &str) -> bool {
        self.filenames.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => basename.len() > suffix.len() && basename.ends_with(suffix),
            None => basename == *pattern,
        })
    }

    fn score(&self, text: &str) -> usize {
        self.hints.iter().filter(|hint| text.contains(*hint)).count()
    }
}

/// Analyzer backed by the built-in language table.
#[derive(Debug, Clone)]
pub struct CodeAnalyzer {
    languages: Vec<Language>,
}

impl Default for CodeAnalyzer {
    fn default() -> Self {
        Self::new(builtin_languages())
    }
}

impl CodeAnalyzer {
    pub fn new(languages: Vec<Language>) -> Self {
        Self { languages }
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    /// Best language for `filename`, using `text` to break ties.
    pub fn detect(&self, filename: &str, text: &str) -> Option<&Language> {
        let basename = Path::new(filename)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(filename);

        let mut best: Option<(&Language, usize)> = None;
        for language in self.languages.iter().filter(|l| l.matches(basename)) {
            let score = language.score(text);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((language, score));
            }
        }
        best.map(|(language, _)| language)
    }
}

impl LexicalAnalyzer for CodeAnalyzer {
    fn classify_and_lex<'a>(&self, filename: &str, text: &'a str) -> Analysis<'a> {
        match self.detect(filename, text) {
            None => Analysis::Unsupported,
            Some(Language { syntax: None, .. }) => Analysis::PlainText,
            Some(&Language {
                name,
                keywords,
                syntax: Some(syntax),
                ..
            }) => Analysis::Lexed {
                language: name,
                lexemes: Box::new(lex_code(text, syntax, keywords)),
            },
        }
    }
}

/// Lex `text` with the given conventions.
pub fn lex_code<'a>(
    text: &'a str,
    syntax: Syntax,
    keywords: &'static [&'static str],
) -> impl Iterator<Item = Lexeme<'a>> + 'a {
    CodeLexemes {
        tokens: RawToken::lexer_with_extras(text, syntax).spanned(),
        source: text,
        keywords,
    }
}

struct CodeLexemes<'a> {
    tokens: SpannedIter<'a, RawToken>,
    source: &'a str,
    keywords: &'static [&'static str],
}

impl<'a> Iterator for CodeLexemes<'a> {
    type Item = Lexeme<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (token, span) = self.tokens.next()?;
        let text = &self.source[span];
        let category = match token {
            Ok(RawToken::Whitespace) => Category::Whitespace,
            Ok(RawToken::Word) if self.keywords.contains(&text) => Category::Keyword,
            Ok(RawToken::Word) => Category::Name,
            Ok(RawToken::Number) => Category::Literal(LiteralKind::Number),
            Ok(RawToken::Operator) => Category::Operator,
            Ok(RawToken::Punctuation) => Category::Punctuation,
            Ok(RawToken::Unicode) => Category::Text,
            Ok(RawToken::Classified(category)) => category,
            Err(()) => Category::Error,
        };
        Some(Lexeme::new(category, text))
    }
}

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(extras = Syntax)]
enum RawToken {
    #[regex(r"[ \t\r\n\f]+")]
    Whitespace,

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*")]
    Word,

    #[regex(r"[0-9][0-9A-Za-z_]*(\.[0-9][0-9A-Za-z_]*)?")]
    Number,

    #[regex(r"[+\-*/%=<>!&|^~?:.@\\]")]
    Operator,

    #[regex(r"[(){}\[\];,]")]
    Punctuation,

    #[regex(r"[^\x00-\x7F]+")]
    Unicode,

    // Tokens whose category depends on the language or on what follows.
    #[token("\"", |lex| quoted(lex, '"'))]
    #[token("'", |lex| quoted(lex, '\''))]
    #[token("`", |lex| quoted(lex, '`'))]
    #[token("\"\"\"", |lex| triple_quoted(lex, "\"\"\""))]
    #[token("'''", |lex| triple_quoted(lex, "'''"))]
    #[token("//", slash_slash)]
    #[token("/*", slash_star)]
    #[token("#", hash)]
    #[token("--", dash_dash)]
    Classified(Category),
}

fn rest_of_line(lex: &mut Lexer<RawToken>) {
    let rest = lex.remainder();
    lex.bump(rest.find('\n').unwrap_or(rest.len()));
}

// Only backticks may span lines; an unterminated quote is punctuation
// (lifetimes, apostrophes in prose).
fn quoted(lex: &mut Lexer<RawToken>, quote: char) -> Category {
    let rest = lex.remainder();
    if quote == '\'' && lex.extras.char_literals {
        return match char_literal_len(rest) {
            Some(len) => {
                lex.bump(len);
                Category::Literal(LiteralKind::String)
            }
            None => Category::Punctuation,
        };
    }
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == quote {
            lex.bump(i + c.len_utf8());
            return Category::Literal(LiteralKind::String);
        } else if c == '\n' && quote != '`' {
            break;
        }
    }
    Category::Punctuation
}

// Length of `x'` or `\n'` after an opening quote.
fn char_literal_len(rest: &str) -> Option<usize> {
    let mut chars = rest.char_indices();
    let limit = match chars.next()? {
        (_, '\\') => {
            chars.next()?;
            9
        }
        (_, '\'' | '\n') => return None,
        _ => 1,
    };
    chars
        .take(limit)
        .find(|&(_, c)| c == '\'')
        .map(|(i, _)| i + 1)
}

fn triple_quoted(lex: &mut Lexer<RawToken>, delimiter: &str) -> Category {
    let rest = lex.remainder();
    let end = rest
        .find(delimiter)
        .map_or(rest.len(), |pos| pos + delimiter.len());
    lex.bump(end);
    if lex.extras.docstrings {
        Category::Literal(LiteralKind::Doc)
    } else {
        Category::Literal(LiteralKind::String)
    }
}

fn slash_slash(lex: &mut Lexer<RawToken>) -> Category {
    if !lex.extras.slash_comments {
        return Category::Operator;
    }
    let rest = lex.remainder();
    let is_doc = lex.extras.doc_comments
        && ((rest.starts_with('/') && !rest.starts_with("//")) || rest.starts_with('!'));
    rest_of_line(lex);
    if is_doc {
        Category::Literal(LiteralKind::Doc)
    } else {
        Category::Comment
    }
}

fn slash_star(lex: &mut Lexer<RawToken>) -> Category {
    if !lex.extras.slash_comments {
        return Category::Operator;
    }
    let rest = lex.remainder();
    let is_doc = lex.extras.doc_comments && rest.starts_with('*') && !rest.starts_with("*/");
    let end = rest.find("*/").map_or(rest.len(), |pos| pos + 2);
    lex.bump(end);
    if is_doc {
        Category::Literal(LiteralKind::Doc)
    } else {
        Category::Comment
    }
}

fn hash(lex: &mut Lexer<RawToken>) -> Category {
    if !lex.extras.hash_comments {
        return Category::Punctuation;
    }
    rest_of_line(lex);
    Category::Comment
}

fn dash_dash(lex: &mut Lexer<RawToken>) -> Category {
    if !lex.extras.dash_comments {
        return Category::Operator;
    }
    rest_of_line(lex);
    Category::Comment
}

/// The language table used by [`CodeAnalyzer::default`].
pub fn builtin_languages() -> Vec<Language> {
    vec![
        Language {
            name: "Rust",
            filenames: &["*.rs"],
            keywords: &[
                "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
                "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod",
                "move", "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super",
                "trait", "true", "type", "unsafe", "use", "where", "while",
            ],
            hints: &[],
            syntax: Some(Syntax {
                char_literals: true,
                ..C_LIKE_DOC
            }),
        },
        Language {
            name: "Python",
            filenames: &["*.py", "*.pyw", "*.pyi", "SConstruct", "SConscript", "*.bzl", "BUCK", "BUILD"],
            keywords: &[
                "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del",
                "elif", "else", "except", "False", "finally", "for", "from", "global", "if", "import",
                "in", "is", "lambda", "None", "nonlocal", "not", "or", "pass", "raise", "return",
                "True", "try", "while", "with", "yield",
            ],
            hints: &[],
            syntax: Some(Syntax {
                docstrings: true,
                ..SCRIPT
            }),
        },
        Language {
            name: "C",
            filenames: &["*.c", "*.h"],
            keywords: C_KEYWORDS,
            hints: &[],
            syntax: Some(C_LIKE),
        },
        Language {
            name: "C++",
            filenames: &["*.cpp", "*.cc", "*.cxx", "*.c++", "*.hpp", "*.hh", "*.hxx", "*.h", "*.ino"],
            keywords: CPP_KEYWORDS,
            hints: &["class ", "template", "namespace", "std::", "public:", "private:", "nullptr"],
            syntax: Some(C_LIKE_DOC),
        },
        Language {
            name: "Objective-C",
            filenames: &["*.m", "*.mm", "*.h"],
            keywords: C_KEYWORDS,
            hints: &["@interface", "@implementation", "@property", "#import", "@end"],
            syntax: Some(C_LIKE_DOC),
        },
        Language {
            name: "Java",
            filenames: &["*.java"],
            keywords: JVM_KEYWORDS,
            hints: &[],
            syntax: Some(C_LIKE_DOC),
        },
        Language {
            name: "Kotlin",
            filenames: &["*.kt", "*.kts"],
            keywords: &[
                "as", "break", "class", "continue", "do", "else", "false", "for", "fun", "if", "in",
                "interface", "is", "null", "object", "package", "return", "super", "this", "throw",
                "true", "try", "typealias", "val", "var", "when", "while", "import", "private",
                "public", "override", "data", "sealed",
            ],
            hints: &[],
            syntax: Some(C_LIKE_DOC),
        },
        Language {
            name: "Scala",
            filenames: &["*.scala", "*.sc"],
            keywords: &[
                "abstract", "case", "catch", "class", "def", "do", "else", "extends", "false",
                "final", "finally", "for", "if", "implicit", "import", "lazy", "match", "new",
                "null", "object", "override", "package", "private", "protected", "return", "sealed",
                "super", "this", "throw", "trait", "try", "true", "type", "val", "var", "while",
                "with", "yield",
            ],
            hints: &[],
            syntax: Some(C_LIKE_DOC),
        },
        Language {
            name: "C#",
            filenames: &["*.cs"],
            keywords: &[
                "abstract", "as", "base", "bool", "break", "case", "catch", "class", "const",
                "continue", "default", "delegate", "do", "else", "enum", "event", "false", "finally",
                "for", "foreach", "if", "in", "int", "interface", "internal", "is", "namespace",
                "new", "null", "object", "out", "override", "private", "protected", "public",
                "readonly", "ref", "return", "static", "string", "struct", "switch", "this", "throw",
                "true", "try", "using", "var", "virtual", "void", "while",
            ],
            hints: &[],
            syntax: Some(C_LIKE_DOC),
        },
        Language {
            name: "Go",
            filenames: &["*.go"],
            keywords: &[
                "break", "case", "chan", "const", "continue", "default", "defer", "else",
                "fallthrough", "for", "func", "go", "goto", "if", "import", "interface", "map",
                "package", "range", "return", "select", "struct", "switch", "type", "var", "nil",
                "true", "false",
            ],
            hints: &[],
            syntax: Some(Syntax {
                hash_comments: false,
                ..C_LIKE
            }),
        },
        Language {
            name: "JavaScript",
            filenames: &["*.js", "*.jsx", "*.mjs", "*.cjs"],
            keywords: JS_KEYWORDS,
            hints: &[],
            syntax: Some(Syntax {
                hash_comments: false,
                ..C_LIKE_DOC
            }),
        },
        Language {
            name: "TypeScript",
            filenames: &["*.ts", "*.tsx", "*.mts", "*.cts"],
            keywords: JS_KEYWORDS,
            hints: &[],
            syntax: Some(Syntax {
                hash_comments: false,
                ..C_LIKE_DOC
            }),
        },
        Language {
            name: "Swift",
            filenames: &["*.swift"],
            keywords: &[
                "as", "break", "case", "class", "continue", "default", "defer", "do", "else", "enum",
                "extension", "false", "for", "func", "guard", "if", "import", "in", "init", "let",
                "nil", "protocol", "return", "self", "static", "struct", "switch", "throw", "true",
                "try", "var", "where", "while",
            ],
            hints: &[],
            syntax: Some(C_LIKE_DOC),
        },
        Language {
            name: "PHP",
            filenames: &["*.php", "*.php3", "*.php4", "*.php5", "*.inc"],
            keywords: &[
                "abstract", "array", "as", "break", "case", "catch", "class", "const", "continue",
                "default", "do", "echo", "else", "elseif", "extends", "false", "final", "for",
                "foreach", "function", "if", "implements", "include", "interface", "namespace",
                "new", "null", "private", "protected", "public", "require", "return", "static",
                "switch", "throw", "true", "try", "use", "while",
            ],
            hints: &[],
            syntax: Some(C_LIKE_DOC),
        },
        Language {
            name: "Ruby",
            filenames: &["*.rb", "*.rake", "*.gemspec", "Rakefile", "Gemfile"],
            keywords: &[
                "alias", "and", "begin", "break", "case", "class", "def", "defined", "do", "else",
                "elsif", "end", "ensure", "false", "for", "if", "in", "module", "next", "nil", "not",
                "or", "redo", "rescue", "retry", "return", "self", "super", "then", "true", "undef",
                "unless", "until", "when", "while", "yield",
            ],
            hints: &[],
            syntax: Some(SCRIPT),
        },
        Language {
            name: "Bash",
            filenames: &["*.sh", "*.bash", "*.zsh", ".bashrc", ".zshrc", "PKGBUILD"],
            keywords: &[
                "case", "do", "done", "elif", "else", "esac", "export", "fi", "for", "function",
                "if", "in", "local", "return", "then", "until", "while",
            ],
            hints: &[],
            syntax: Some(SCRIPT),
        },
        Language {
            name: "Perl",
            filenames: &["*.pl", "*.pm"],
            keywords: &[
                "else", "elsif", "for", "foreach", "if", "last", "local", "my", "next", "our",
                "package", "return", "sub", "unless", "until", "use", "while",
            ],
            hints: &[],
            syntax: Some(SCRIPT),
        },
        Language {
            name: "R",
            filenames: &["*.r", "*.R", ".Rprofile"],
            keywords: &[
                "break", "else", "FALSE", "for", "function", "if", "in", "NA", "next", "NULL",
                "repeat", "return", "TRUE", "while",
            ],
            hints: &[],
            syntax: Some(SCRIPT),
        },
        Language {
            name: "Makefile",
            filenames: &["*.mak", "*.mk", "Makefile", "makefile", "GNUmakefile"],
            keywords: &["define", "endef", "ifeq", "ifneq", "ifdef", "ifndef", "else", "endif", "include"],
            hints: &[],
            syntax: Some(SCRIPT),
        },
        Language {
            name: "Docker",
            filenames: &["Dockerfile", "*.docker"],
            keywords: &[
                "FROM", "RUN", "CMD", "LABEL", "EXPOSE", "ENV", "ADD", "COPY", "ENTRYPOINT", "VOLUME",
                "USER", "WORKDIR", "ARG", "ONBUILD", "HEALTHCHECK", "SHELL",
            ],
            hints: &[],
            syntax: Some(SCRIPT),
        },
        Language {
            name: "YAML",
            filenames: &["*.yaml", "*.yml"],
            keywords: &["true", "false", "null"],
            hints: &[],
            syntax: Some(SCRIPT),
        },
        Language {
            name: "TOML",
            filenames: &["*.toml", "Cargo.lock", "Pipfile"],
            keywords: &["true", "false"],
            hints: &[],
            syntax: Some(SCRIPT),
        },
        Language {
            name: "INI",
            filenames: &["*.ini", "*.cfg", "*.properties", ".editorconfig", ".gitconfig"],
            keywords: &[],
            hints: &[],
            syntax: Some(SCRIPT),
        },
        Language {
            name: "JSON",
            filenames: &["*.json", "*.jsonld", "*.geojson", ".babelrc", ".eslintrc"],
            keywords: &["true", "false", "null"],
            hints: &[],
            syntax: Some(Syntax::default()),
        },
        Language {
            name: "SQL",
            filenames: &["*.sql"],
            keywords: SQL_KEYWORDS,
            hints: &[],
            syntax: Some(Syntax {
                slash_comments: true,
                ..DASH
            }),
        },
        Language {
            name: "Lua",
            filenames: &["*.lua", "*.wlua"],
            keywords: &[
                "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto",
                "if", "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until",
                "while",
            ],
            hints: &[],
            syntax: Some(DASH),
        },
        Language {
            name: "Haskell",
            filenames: &["*.hs"],
            keywords: &[
                "case", "class", "data", "default", "deriving", "do", "else", "if", "import", "in",
                "infix", "instance", "let", "module", "newtype", "of", "then", "type", "where",
            ],
            hints: &[],
            syntax: Some(DASH),
        },
        Language {
            name: "CSS",
            filenames: &["*.css", "*.scss", "*.less"],
            keywords: &["important", "media", "import"],
            hints: &[],
            syntax: Some(Syntax {
                hash_comments: false,
                ..C_LIKE
            }),
        },
        Language {
            name: "HTML",
            filenames: &["*.html", "*.htm", "*.xhtml", "*.xml", "*.xsl", "*.svg", "*.vue"],
            keywords: &[],
            hints: &[],
            syntax: Some(Syntax::default()),
        },
        Language {
            name: "Text only",
            filenames: &["*.txt"],
            keywords: &[],
            hints: &[],
            syntax: None,
        },
    ]
}

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else", "enum",
    "extern", "float", "for", "goto", "if", "inline", "int", "long", "register", "restrict",
    "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef", "union",
    "unsigned", "void", "volatile", "while",
];

const CPP_KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "case", "catch", "char", "class", "const", "constexpr", "continue",
    "default", "delete", "do", "double", "else", "enum", "explicit", "extern", "false", "float",
    "for", "friend", "if", "inline", "int", "long", "namespace", "new", "nullptr", "operator",
    "private", "protected", "public", "return", "short", "signed", "sizeof", "static", "struct",
    "switch", "template", "this", "throw", "true", "try", "typedef", "typename", "union",
    "unsigned", "using", "virtual", "void", "volatile", "while",
];

const JVM_KEYWORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "false", "final", "finally",
    "float", "for", "if", "implements", "import", "instanceof", "int", "interface", "long", "new",
    "null", "package", "private", "protected", "public", "return", "short", "static", "super",
    "switch", "synchronized", "this", "throw", "throws", "true", "try", "void", "volatile", "while",
];

const JS_KEYWORDS: &[&str] = &[
    "async", "await", "break", "case", "catch", "class", "const", "continue", "default", "delete",
    "do", "else", "export", "extends", "false", "finally", "for", "function", "if", "import", "in",
    "instanceof", "interface", "let", "new", "null", "return", "super", "switch", "this", "throw",
    "true", "try", "type", "typeof", "undefined", "var", "void", "while", "yield",
];

const SQL_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "CREATE",
    "TABLE", "DROP", "ALTER", "JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "ON", "AND", "OR", "NOT",
    "NULL", "AS", "ORDER", "BY", "GROUP", "HAVING", "LIMIT", "select", "from", "where", "insert",
    "into", "values", "update", "set", "delete", "create", "table", "drop", "alter", "join", "on",
    "and", "or", "not", "null", "as", "order", "by", "group", "having", "limit",
];
