/// Token types produced by the lexer.
use crate::span::Pos;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Integer literal, e.g. `42`, `0x1f`, `1_000`.
    Integer(i64),
    /// Float literal, e.g. `1.2`. Stored at interpreter precision.
    Float(f32),
    /// String literal contents with escapes resolved.
    String(String),
    /// Double-quoted string containing `#{...}`.
    Interpolated(Vec<StrPart>),
    /// Symbol literal, e.g. `:foo` (text without the colon).
    Symbol(String),
    /// Hash label, e.g. `foo:` in `{ foo: 1 }`.
    Label(String),

    /// Lowercase identifier, may end in `?` or `!`.
    Identifier(String),
    /// Capitalized identifier.
    Constant(String),
    /// `@name`
    IVar(String),
    /// `$name`
    GVar(String),
    /// Reserved word.
    Keyword(Keyword),

    /// Operator or punctuation, e.g. `+`, `==`, `=>`, `::`, `(`.
    Punct(&'static str),

    /// Line break that terminates a statement.
    Newline,
    /// End of input.
    Eof,
    /// An unrecognized character or malformed token.
    Error(String),
}

/// Piece of an interpolated string. Code is kept as source text and parsed
/// by the parser, starting at the recorded position.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Literal(String),
    Code(String, Pos),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Begin,
    Class,
    Def,
    Do,
    Else,
    Elsif,
    End,
    Ensure,
    False,
    If,
    Module,
    Nil,
    Rescue,
    SelfKw,
    Then,
    True,
    Unless,
    While,
    Yield,
    And,
    Or,
    Not,
    Return,
    Break,
    Next,
    Until,
}

impl Keyword {
    pub fn from_ident(s: &str) -> Option<Keyword> {
        Some(match s {
            "begin" => Keyword::Begin,
            "class" => Keyword::Class,
            "def" => Keyword::Def,
            "do" => Keyword::Do,
            "else" => Keyword::Else,
            "elsif" => Keyword::Elsif,
            "end" => Keyword::End,
            "ensure" => Keyword::Ensure,
            "false" => Keyword::False,
            "if" => Keyword::If,
            "module" => Keyword::Module,
            "nil" => Keyword::Nil,
            "rescue" => Keyword::Rescue,
            "self" => Keyword::SelfKw,
            "then" => Keyword::Then,
            "true" => Keyword::True,
            "unless" => Keyword::Unless,
            "while" => Keyword::While,
            "yield" => Keyword::Yield,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "return" => Keyword::Return,
            "break" => Keyword::Break,
            "next" => Keyword::Next,
            "until" => Keyword::Until,
            _ => return None,
        })
    }
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::SelfKw => "self",
            Keyword::Begin => "begin",
            Keyword::Class => "class",
            Keyword::Def => "def",
            Keyword::Do => "do",
            Keyword::Else => "else",
            Keyword::Elsif => "elsif",
            Keyword::End => "end",
            Keyword::Ensure => "ensure",
            Keyword::False => "false",
            Keyword::If => "if",
            Keyword::Module => "module",
            Keyword::Nil => "nil",
            Keyword::Rescue => "rescue",
            Keyword::Then => "then",
            Keyword::True => "true",
            Keyword::Unless => "unless",
            Keyword::While => "while",
            Keyword::Yield => "yield",
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
            Keyword::Return => "return",
            Keyword::Break => "break",
            Keyword::Next => "next",
            Keyword::Until => "until",
        }
    }
}

impl TokenKind {
    /// Human-readable name for error messages.
    pub fn name(&self) -> String {
        match self {
            Self::Integer(n) => format!("integer {n}"),
            Self::Float(f) => format!("float {f}"),
            Self::String(_) | Self::Interpolated(_) => "string".to_owned(),
            Self::Symbol(s) => format!("symbol :{s}"),
            Self::Label(s) => format!("label {s}:"),
            Self::Identifier(s) => format!("identifier `{s}`"),
            Self::Constant(s) => format!("constant `{s}`"),
            Self::IVar(s) => format!("instance variable `@{s}`"),
            Self::GVar(s) => format!("global variable `${s}`"),
            Self::Keyword(k) => format!("keyword `{}`", k.as_str()),
            Self::Punct(p) => format!("`{p}`"),
            Self::Newline => "end of line".to_owned(),
            Self::Eof => "end of input".to_owned(),
            Self::Error(msg) => msg.clone(),
        }
    }
}

/// A token with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
    /// Whitespace separated this token from the previous one.
    pub spaced: bool,
}

impl Token {
    pub fn new(kind: TokenKind, pos: Pos, spaced: bool) -> Self {
        Self { kind, pos, spaced }
    }

    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    pub fn is_keyword(&self, k: Keyword) -> bool {
        self.kind == TokenKind::Keyword(k)
    }
}
