/// Lexer for the Ruby subset understood by the interpreter.
///
/// The [`Lexer`] walks a source string and implements [`Iterator`] over
/// [`Token`]s, ending with a single [`TokenKind::Eof`]. Every token records
/// its starting [`Pos`] and whether whitespace preceded it; the parser needs
/// the latter to tell `foo -1` (command call) from `foo - 1` (subtraction).
///
/// # Statement terminators
///
/// Newlines and `;` both produce [`TokenKind::Newline`]. The lexer does not
/// decide which newlines are significant, the parser skips them where an
/// expression obviously continues (after a binary operator, a comma, an
/// opening bracket).
///
/// # Comments
///
/// `#` starts a comment running to the end of the line.
use crate::span::Pos;
use crate::token::{Keyword, StrPart, Token, TokenKind};

// ═══════════════════════════════════════════════════════════════════
// Punctuation
// ═══════════════════════════════════════════════════════════════════

/// Operators and delimiters, longest first so that greedy matching works.
const PUNCTS: &[&str] = &[
    "**=", "<=>", "===", "||=", "&&=", "...", "<<=", ">>=", //
    "**", "==", "!=", ">=", "<=", "&&", "||", "<<", ">>", "+=", "-=", "*=", "/=", "%=",
    "|=", "&=", "=>", "::", "..", "=~", //
    "+", "-", "*", "/", "%", "=", "<", ">", "!", "&", "|", "^", "~", ".", ",", "(", ")",
    "[", "]", "{", "}", "?", ":",
];

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

// ═══════════════════════════════════════════════════════════════════
// Lexer
// ═══════════════════════════════════════════════════════════════════

pub struct Lexer<'a> {
    source: &'a str,
    offset: usize,
    line: usize,
    column: usize,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_origin(source, Pos::origin())
    }

    /// Lexes `source` as if it started at `origin`. Used for code embedded in
    /// string interpolation so that positions point into the outer file.
    pub fn with_origin(source: &'a str, origin: Pos) -> Self {
        Self {
            source,
            offset: 0,
            line: origin.line,
            column: origin.column,
            done: false,
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.offset, self.line, self.column)
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_ahead(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    /// Skips blanks, comments and escaped newlines. Returns whether anything
    /// was skipped.
    fn skip_whitespace(&mut self) -> bool {
        let start = self.offset;
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\\') if self.peek_ahead(1) == Some('\n') => {
                    self.advance_by(2);
                }
                Some('#') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        self.offset != start
    }

    // ───────────────────────────────────────────────────────────
    //  Strings
    // ───────────────────────────────────────────────────────────

    fn escape(&mut self, value: &mut String) -> Result<(), String> {
        match self.advance() {
            Some('n') => value.push('\n'),
            Some('t') => value.push('\t'),
            Some('r') => value.push('\r'),
            Some('0') => value.push('\0'),
            Some('e') => value.push('\x1b'),
            Some('s') => value.push(' '),
            Some(c) => value.push(c),
            None => return Err("unterminated string escape".to_owned()),
        }
        Ok(())
    }

    /// Double-quoted string with escapes and `#{...}` interpolation.
    fn lex_double_quoted(&mut self) -> TokenKind {
        self.advance();
        let mut parts = Vec::new();
        let mut literal = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    if let Err(msg) = self.escape(&mut literal) {
                        return TokenKind::Error(msg);
                    }
                }
                Some('#') if self.peek_ahead(1) == Some('{') => {
                    self.advance_by(2);
                    let code_pos = self.pos();
                    let code_start = self.offset;
                    let mut depth = 0usize;
                    loop {
                        match self.peek() {
                            Some('{') => depth += 1,
                            Some('}') if depth == 0 => break,
                            Some('}') => depth -= 1,
                            None => {
                                return TokenKind::Error("unterminated interpolation".to_owned());
                            }
                            _ => {}
                        }
                        self.advance();
                    }
                    let code = self.source[code_start..self.offset].to_owned();
                    self.advance();
                    if !literal.is_empty() {
                        parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(StrPart::Code(code, code_pos));
                }
                Some(_) => {
                    if let Some(c) = self.advance() {
                        literal.push(c);
                    }
                }
                None => return TokenKind::Error("unterminated string".to_owned()),
            }
        }
        if parts.is_empty() {
            return TokenKind::String(literal);
        }
        if !literal.is_empty() {
            parts.push(StrPart::Literal(literal));
        }
        TokenKind::Interpolated(parts)
    }

    /// Single-quoted string: only `\\` and `\'` are escapes.
    fn lex_single_quoted(&mut self) -> TokenKind {
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                Some('\'') => return TokenKind::String(value),
                Some('\\') if matches!(self.peek(), Some('\\' | '\'')) => {
                    if let Some(c) = self.advance() {
                        value.push(c);
                    }
                }
                Some(c) => value.push(c),
                None => return TokenKind::Error("unterminated string".to_owned()),
            }
        }
    }

    // ───────────────────────────────────────────────────────────
    //  Numbers
    // ───────────────────────────────────────────────────────────

    fn take_digits(&mut self, radix: u32) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c == '_' && self.peek_ahead(1).is_some_and(|d| d.is_digit(radix)) {
                self.advance();
            } else if c.is_digit(radix) {
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        digits
    }

    fn lex_number(&mut self) -> TokenKind {
        if self.peek() == Some('0') {
            let radix = match self.peek_ahead(1) {
                Some('x' | 'X') => Some(16),
                Some('b' | 'B') => Some(2),
                Some('o' | 'O') => Some(8),
                Some('0'..='7' | '_') => {
                    self.advance();
                    let digits = self.take_digits(8);
                    return match i64::from_str_radix(&digits, 8) {
                        Ok(n) => TokenKind::Integer(n),
                        Err(_) => TokenKind::Error(format!("invalid octal literal 0{digits}")),
                    };
                }
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance_by(2);
                let digits = self.take_digits(radix);
                if digits.is_empty() {
                    return TokenKind::Error("numeric literal without digits".to_owned());
                }
                return match i64::from_str_radix(&digits, radix) {
                    Ok(n) => TokenKind::Integer(n),
                    Err(_) => TokenKind::Error(format!("integer literal out of range: {digits}")),
                };
            }
        }

        let mut text = self.take_digits(10);
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            text.push('.');
            text.push_str(&self.take_digits(10));
            is_float = true;
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek_ahead(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_ahead(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                text.push('e');
                self.advance();
                if sign {
                    if let Some(c) = self.advance() {
                        text.push(c);
                    }
                }
                text.push_str(&self.take_digits(10));
                is_float = true;
            }
        }
        if is_float {
            match text.parse::<f32>() {
                Ok(f) => TokenKind::Float(f),
                Err(_) => TokenKind::Error(format!("invalid float literal {text}")),
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => TokenKind::Integer(n),
                Err(_) => TokenKind::Error(format!("integer literal out of range: {text}")),
            }
        }
    }

    // ───────────────────────────────────────────────────────────
    //  Names
    // ───────────────────────────────────────────────────────────

    fn take_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_continue(c) {
                break;
            }
            name.push(c);
            self.advance();
        }
        name
    }

    /// `?` and `!` are part of a method name unless they start `!=`/`==`.
    fn take_predicate_suffix(&mut self, name: &mut String) {
        if let Some(c @ ('?' | '!')) = self.peek()
            && self.peek_ahead(1) != Some('=')
        {
            name.push(c);
            self.advance();
        }
    }

    fn is_label_colon(&self) -> bool {
        self.peek() == Some(':') && self.peek_ahead(1) != Some(':')
    }

    fn lex_name(&mut self, after_dot: bool) -> TokenKind {
        let mut name = self.take_name();
        let constant = name.chars().next().is_some_and(char::is_uppercase);
        if !constant {
            self.take_predicate_suffix(&mut name);
        }
        if self.is_label_colon() && !after_dot {
            self.advance();
            return TokenKind::Label(name);
        }
        if after_dot {
            // `foo.class`, `foo.then`: keywords are plain method names here.
            return TokenKind::Identifier(name);
        }
        if constant {
            return TokenKind::Constant(name);
        }
        match Keyword::from_ident(&name) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier(name),
        }
    }

    fn lex_symbol(&mut self) -> TokenKind {
        self.advance();
        match self.peek() {
            Some('"') => match self.lex_double_quoted() {
                TokenKind::String(s) => TokenKind::Symbol(s),
                TokenKind::Interpolated(_) => {
                    TokenKind::Error("interpolated symbols are not supported".to_owned())
                }
                other => other,
            },
            Some(c) if is_ident_start(c) => {
                let mut name = self.take_name();
                self.take_predicate_suffix(&mut name);
                if self.peek() == Some('=') && !matches!(self.peek_ahead(1), Some('=' | '>' | '~'))
                {
                    self.advance();
                    name.push('=');
                }
                TokenKind::Symbol(name)
            }
            Some('@' | '$') => {
                let mut name = String::new();
                if let Some(sigil) = self.advance() {
                    name.push(sigil);
                }
                name.push_str(&self.take_name());
                TokenKind::Symbol(name)
            }
            _ => {
                for op in ["[]=", "[]", "<=>", "==", "!=", "<=", ">=", "<<", ">>", "**"] {
                    if self.rest().starts_with(op) {
                        self.advance_by(op.len());
                        return TokenKind::Symbol(op.to_owned());
                    }
                }
                match self.peek() {
                    Some(c @ ('+' | '-' | '*' | '/' | '%' | '<' | '>' | '!' | '&' | '|' | '^')) => {
                        self.advance();
                        TokenKind::Symbol(c.to_string())
                    }
                    _ => TokenKind::Punct(":"),
                }
            }
        }
    }

    fn lex_punct(&mut self) -> TokenKind {
        for &p in PUNCTS {
            if self.rest().starts_with(p) {
                self.advance_by(p.len());
                return TokenKind::Punct(p);
            }
        }
        match self.advance() {
            Some(c) => TokenKind::Error(format!("unexpected character {c:?}")),
            None => TokenKind::Eof,
        }
    }

    // ───────────────────────────────────────────────────────────
    //  Dispatch
    // ───────────────────────────────────────────────────────────

    pub fn next_token(&mut self, previous: Option<&TokenKind>) -> Token {
        let spaced = self.skip_whitespace();
        let pos = self.pos();
        let after_dot = matches!(previous, Some(TokenKind::Punct(".")));
        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some('\n' | ';') => {
                self.advance();
                TokenKind::Newline
            }
            Some('"') => self.lex_double_quoted(),
            Some('\'') => self.lex_single_quoted(),
            Some(c) if c.is_ascii_digit() => self.lex_number(),
            Some(c) if is_ident_start(c) => self.lex_name(after_dot),
            Some('@') => {
                self.advance();
                match self.peek() {
                    Some(c) if is_ident_start(c) => TokenKind::IVar(self.take_name()),
                    _ => TokenKind::Error("`@` without a name".to_owned()),
                }
            }
            Some('$') => {
                self.advance();
                match self.peek() {
                    Some(c) if is_ident_start(c) => TokenKind::GVar(self.take_name()),
                    _ => TokenKind::Error("`$` without a name".to_owned()),
                }
            }
            Some(':')
                if self.peek_ahead(1) != Some(':')
                    && (spaced
                        || !matches!(
                            previous,
                            Some(
                                TokenKind::Identifier(_)
                                    | TokenKind::Constant(_)
                                    | TokenKind::Punct(")" | "]")
                            )
                        )) =>
            {
                self.lex_symbol()
            }
            Some(_) => self.lex_punct(),
        };
        Token::new(kind, pos, spaced)
    }

    /// Lexes the whole input. The last token is always `Eof` or `Error`.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            let token = self.next_token(tokens.last().map(|t| &t.kind));
            let stop = matches!(token.kind, TokenKind::Eof | TokenKind::Error(_));
            tokens.push(token);
            if stop {
                return tokens;
            }
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }
        let token = self.next_token(None);
        self.done = matches!(token.kind, TokenKind::Eof | TokenKind::Error(_));
        Some(token)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().into_iter().map(|t| t.kind).collect()
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Identifier(s.to_owned())
    }

    // ── Literals ──────────────────────────────────────────────

    #[test]
    fn lex_integers() {
        assert_eq!(kinds("42"), vec![TokenKind::Integer(42), TokenKind::Eof]);
        assert_eq!(kinds("1_000"), vec![TokenKind::Integer(1000), TokenKind::Eof]);
        assert_eq!(kinds("0x1f"), vec![TokenKind::Integer(31), TokenKind::Eof]);
        assert_eq!(kinds("0b101"), vec![TokenKind::Integer(5), TokenKind::Eof]);
        assert_eq!(kinds("0o17"), vec![TokenKind::Integer(15), TokenKind::Eof]);
        assert_eq!(kinds("017"), vec![TokenKind::Integer(15), TokenKind::Eof]);
    }

    #[test]
    fn lex_floats() {
        assert_eq!(kinds("1.2"), vec![TokenKind::Float(1.2), TokenKind::Eof]);
        assert_eq!(kinds("1e3"), vec![TokenKind::Float(1000.0), TokenKind::Eof]);
    }

    #[test]
    fn method_call_on_integer_is_not_a_float() {
        assert_eq!(
            kinds("1.to_s"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Punct("."),
                ident("to_s"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lex_strings() {
        assert_eq!(
            kinds(r#""a\n\"b""#),
            vec![TokenKind::String("a\n\"b".into()), TokenKind::Eof]
        );
        assert_eq!(
            kinds(r"'a\n\''"),
            vec![TokenKind::String("a\\n'".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn lex_interpolation() {
        let toks = Lexer::new(r#""a#{b + 1}c""#).tokenize();
        match &toks[0].kind {
            TokenKind::Interpolated(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], StrPart::Literal("a".into()));
                assert!(matches!(&parts[1], StrPart::Code(code, pos) if code == "b + 1" && pos.column == 5));
                assert_eq!(parts[2], StrPart::Literal("c".into()));
            }
            other => panic!("expected interpolated string, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_string_is_error() {
        assert!(matches!(kinds("\"abc").last(), Some(TokenKind::Error(_))));
    }

    // ── Names and symbols ─────────────────────────────────────

    #[test]
    fn lex_names() {
        assert_eq!(
            kinds("foo Bar @baz $qux nil? end"),
            vec![
                ident("foo"),
                TokenKind::Constant("Bar".into()),
                TokenKind::IVar("baz".into()),
                TokenKind::GVar("qux".into()),
                ident("nil?"),
                TokenKind::Keyword(Keyword::End),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keyword_after_dot_is_identifier() {
        assert_eq!(
            kinds("x.class"),
            vec![ident("x"), TokenKind::Punct("."), ident("class"), TokenKind::Eof]
        );
    }

    #[test]
    fn lex_symbols_and_labels() {
        assert_eq!(
            kinds(":foo :+ :[]= { a: 1 }"),
            vec![
                TokenKind::Symbol("foo".into()),
                TokenKind::Symbol("+".into()),
                TokenKind::Symbol("[]=".into()),
                TokenKind::Punct("{"),
                TokenKind::Label("a".into()),
                TokenKind::Integer(1),
                TokenKind::Punct("}"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn scope_operator_is_not_a_symbol() {
        assert_eq!(
            kinds("Hello::World"),
            vec![
                TokenKind::Constant("Hello".into()),
                TokenKind::Punct("::"),
                TokenKind::Constant("World".into()),
                TokenKind::Eof
            ]
        );
    }

    // ── Operators and layout ──────────────────────────────────

    #[test]
    fn lex_operators_greedily() {
        assert_eq!(
            kinds("a ||= b <=> c != d"),
            vec![
                ident("a"),
                TokenKind::Punct("||="),
                ident("b"),
                TokenKind::Punct("<=>"),
                ident("c"),
                TokenKind::Punct("!="),
                ident("d"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn newlines_semicolons_and_comments() {
        assert_eq!(
            kinds("a # comment\nb; c"),
            vec![
                ident("a"),
                TokenKind::Newline,
                ident("b"),
                TokenKind::Newline,
                ident("c"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn spacing_is_recorded() {
        let toks = Lexer::new("foo -1").tokenize();
        assert!(toks[1].spaced);
        assert!(!toks[2].spaced);
        assert_eq!(toks[2].pos.column, 6);
    }

    #[test]
    fn iterator_stops_after_eof() {
        assert_eq!(Lexer::new("a b").count(), 3);
    }
}
