use std::{collections::HashSet, rc::Rc};

use crate::{
    Sym, Symbols,
    ast::{
        AssignOp, Begin, BlockArg, BlockBody, Call, ConstPath, ConstScope, MethodDef, Node,
        NodeKind, Params, Rescue,
    },
    lexer::Lexer,
    span::Pos,
    token::{Keyword, StrPart, Token, TokenKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub pos: Pos,
}

impl ParseError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.pos)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parses a complete program.
pub fn parse_program(source: &str, symbols: &Symbols) -> ParseResult<Node> {
    Parser::new(source, symbols).parse_program()
}

/// Binding power of binary operators. All of them are left associative;
/// `**` is handled separately because it binds tighter than unary minus.
fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "<=>" | "==" | "===" | "!=" | "=~" => 4,
        "<" | "<=" | ">" | ">=" => 5,
        "|" | "^" => 6,
        "&" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

fn compound_operator(op: &str) -> Option<&'static str> {
    Some(match op {
        "+=" => "+",
        "-=" => "-",
        "*=" => "*",
        "/=" => "/",
        "%=" => "%",
        "**=" => "**",
        "|=" => "|",
        "&=" => "&",
        "<<=" => "<<",
        ">>=" => ">>",
        _ => return None,
    })
}

/// Operators that may follow `.` or `def` as a method name.
const OPERATOR_METHODS: &[&str] = &[
    "+", "-", "*", "/", "%", "**", "==", "!=", "<", ">", "<=", ">=", "<=>", "===", "<<", ">>",
    "!", "&", "|", "^", "~", "=~",
];

fn is_local_name(name: &str) -> bool {
    name.starts_with(|c: char| c == '_' || c.is_lowercase())
        && !name.ends_with(['?', '!'])
}

struct LocalFrame {
    names: HashSet<Sym>,
    /// Blocks see the locals of the frame they are nested in.
    transparent: bool,
}

pub struct Parser<'s> {
    tokens: Vec<Token>,
    index: usize,
    symbols: &'s Symbols,
    locals: Vec<LocalFrame>,
    /// Set while parsing a `while` condition or command arguments, where
    /// `do` belongs to the enclosing construct.
    no_do: bool,
}

impl<'s> Parser<'s> {
    pub fn new(source: &str, symbols: &'s Symbols) -> Self {
        Self {
            tokens: Lexer::new(source).tokenize(),
            index: 0,
            symbols,
            locals: vec![LocalFrame {
                names: HashSet::new(),
                transparent: false,
            }],
            no_do: false,
        }
    }

    pub fn parse_program(&mut self) -> ParseResult<Node> {
        let body = self.parse_statements()?;
        if self.peek().kind != TokenKind::Eof {
            return Err(self.unexpected());
        }
        Ok(body)
    }

    // ── Token helpers ─────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.index + n).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn at_punct(&self, p: &str) -> bool {
        self.peek().is_punct(p)
    }

    fn at_keyword(&self, k: Keyword) -> bool {
        self.peek().is_keyword(k)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        let found = self.at_punct(p);
        if found {
            self.advance();
        }
        found
    }

    fn eat_keyword(&mut self, k: Keyword) -> bool {
        let found = self.at_keyword(k);
        if found {
            self.advance();
        }
        found
    }

    fn expect_punct(&mut self, p: &str) -> ParseResult<Pos> {
        let token = self.advance();
        if token.is_punct(p) {
            Ok(token.pos)
        } else {
            Err(Self::unexpected_token(&token, &format!("`{p}`")))
        }
    }

    fn expect_keyword(&mut self, k: Keyword) -> ParseResult<Pos> {
        let token = self.advance();
        if token.is_keyword(k) {
            Ok(token.pos)
        } else {
            Err(Self::unexpected_token(&token, &format!("`{}`", k.as_str())))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<Sym> {
        let token = self.advance();
        match token.kind {
            TokenKind::Identifier(name) => Ok(self.intern(&name)),
            _ => Err(Self::unexpected_token(&token, "identifier")),
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::Newline {
            self.advance();
        }
    }

    fn unexpected(&self) -> ParseError {
        let token = self.peek();
        match &token.kind {
            TokenKind::Error(msg) => ParseError::new(msg.clone(), token.pos),
            kind => ParseError::new(format!("unexpected {}", kind.name()), token.pos),
        }
    }

    fn unexpected_token(token: &Token, expected: &str) -> ParseError {
        match &token.kind {
            TokenKind::Error(msg) => ParseError::new(msg.clone(), token.pos),
            kind => ParseError::new(
                format!("expected {expected}, found {}", kind.name()),
                token.pos,
            ),
        }
    }

    fn intern(&self, name: &str) -> Sym {
        self.symbols.intern(name)
    }

    fn call(&self, receiver: Option<Node>, method: &str, args: Vec<Node>, pos: Pos) -> Node {
        Node::new(
            NodeKind::Call(Box::new(Call {
                receiver,
                method: self.intern(method),
                args,
                block: None,
            })),
            pos,
        )
    }

    // ── Local variables ───────────────────────────────────────

    fn push_locals(&mut self, transparent: bool) {
        self.locals.push(LocalFrame {
            names: HashSet::new(),
            transparent,
        });
    }

    fn pop_locals(&mut self) {
        self.locals.pop();
    }

    fn declare(&mut self, name: Sym) {
        if let Some(frame) = self.locals.last_mut() {
            frame.names.insert(name);
        }
    }

    fn is_local(&self, name: Sym) -> bool {
        for frame in self.locals.iter().rev() {
            if frame.names.contains(&name) {
                return true;
            }
            if !frame.transparent {
                return false;
            }
        }
        false
    }

    // ── Statements ────────────────────────────────────────────

    fn at_statements_end(&self) -> bool {
        let token = self.peek();
        match &token.kind {
            TokenKind::Eof => true,
            TokenKind::Keyword(k) => matches!(
                k,
                Keyword::End | Keyword::Else | Keyword::Elsif | Keyword::Rescue | Keyword::Ensure
            ),
            TokenKind::Punct(p) => matches!(*p, "}" | ")"),
            _ => false,
        }
    }

    fn parse_statements(&mut self) -> ParseResult<Node> {
        let pos = self.peek().pos;
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_statements_end() {
                break;
            }
            statements.push(self.parse_statement()?);
            if self.peek().kind == TokenKind::Newline {
                continue;
            }
            if !self.at_statements_end() {
                return Err(self.unexpected());
            }
            break;
        }
        Ok(match statements.len() {
            0 => Node::nil(pos),
            1 => statements.swap_remove(0),
            _ => Node::new(NodeKind::Seq(statements), pos),
        })
    }

    fn parse_statement(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_expr_stmt()?;
        loop {
            let pos = node.pos;
            let TokenKind::Keyword(keyword) = self.peek().kind else {
                break;
            };
            node = match keyword {
                Keyword::If | Keyword::Unless => {
                    self.advance();
                    let cond = self.parse_expr_stmt()?;
                    let (then, otherwise) = if keyword == Keyword::If {
                        (node, Node::nil(pos))
                    } else {
                        (Node::nil(pos), node)
                    };
                    Node::new(
                        NodeKind::If {
                            cond: Box::new(cond),
                            then: Box::new(then),
                            otherwise: Box::new(otherwise),
                        },
                        pos,
                    )
                }
                Keyword::While | Keyword::Until => {
                    self.advance();
                    let cond = self.parse_expr_stmt()?;
                    Node::new(
                        NodeKind::While {
                            cond: Box::new(cond),
                            body: Box::new(node),
                            negate: keyword == Keyword::Until,
                        },
                        pos,
                    )
                }
                Keyword::Rescue => {
                    self.advance();
                    let fallback = self.parse_expr_stmt()?;
                    Node::new(
                        NodeKind::Begin(Box::new(Begin {
                            body: node,
                            rescues: vec![Rescue {
                                classes: Vec::new(),
                                binding: None,
                                body: fallback,
                            }],
                            otherwise: None,
                            ensure: None,
                        })),
                        pos,
                    )
                }
                _ => break,
            };
        }
        Ok(node)
    }

    /// `and` / `or` / `not`, the loosest binding operators.
    fn parse_expr_stmt(&mut self) -> ParseResult<Node> {
        let mut left = self.parse_not()?;
        loop {
            let pos = left.pos;
            if self.eat_keyword(Keyword::And) {
                self.skip_newlines();
                let right = self.parse_not()?;
                left = Node::new(NodeKind::And(Box::new(left), Box::new(right)), pos);
            } else if self.eat_keyword(Keyword::Or) {
                self.skip_newlines();
                let right = self.parse_not()?;
                left = Node::new(NodeKind::Or(Box::new(left), Box::new(right)), pos);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_not(&mut self) -> ParseResult<Node> {
        let pos = self.peek().pos;
        if self.eat_keyword(Keyword::Not) {
            let operand = self.parse_not()?;
            return Ok(Node::new(NodeKind::Not(Box::new(operand)), pos));
        }
        self.parse_expr()
    }

    // ── Expressions ───────────────────────────────────────────

    fn parse_expr(&mut self) -> ParseResult<Node> {
        let left = self.parse_ternary()?;
        let token = self.peek().clone();
        let TokenKind::Punct(op) = token.kind else {
            return Ok(left);
        };
        if op == "=" {
            self.advance();
            self.skip_newlines();
            return self.parse_assignment(left, token.pos);
        }
        let assign_op = match op {
            "||=" => AssignOp::Or,
            "&&=" => AssignOp::And,
            _ => match compound_operator(op) {
                Some(binary) => AssignOp::Binary(self.intern(binary)),
                None => return Ok(left),
            },
        };
        self.advance();
        self.skip_newlines();
        let target = self.assignable(left)?;
        let value = self.parse_expr()?;
        Ok(Node::new(
            NodeKind::OpAssign {
                target: Box::new(target),
                op: assign_op,
                value: Box::new(value),
            },
            token.pos,
        ))
    }

    /// Turns a bare method call into a local variable reference, declaring
    /// it. Other targets are returned unchanged after validation.
    fn assignable(&mut self, target: Node) -> ParseResult<Node> {
        let pos = target.pos;
        match target.kind {
            NodeKind::Call(call)
                if call.receiver.is_none()
                    && call.args.is_empty()
                    && call.block.is_none()
                    && is_local_name(&self.symbols.name(call.method)) =>
            {
                self.declare(call.method);
                Ok(Node::new(NodeKind::Local(call.method), pos))
            }
            NodeKind::Call(ref call) if call.receiver.is_some() && call.block.is_none() => {
                Ok(target)
            }
            NodeKind::Local(_) | NodeKind::IVar(_) | NodeKind::GVar(_) | NodeKind::Const(_) => {
                Ok(target)
            }
            _ => Err(ParseError::new("cannot assign to this expression", pos)),
        }
    }

    fn parse_assignment(&mut self, target: Node, pos: Pos) -> ParseResult<Node> {
        let target = self.assignable(target)?;
        let value = self.parse_expr()?;
        let kind = match target.kind {
            NodeKind::Local(name) => NodeKind::LocalSet(name, Box::new(value)),
            NodeKind::IVar(name) => NodeKind::IVarSet(name, Box::new(value)),
            NodeKind::GVar(name) => NodeKind::GVarSet(name, Box::new(value)),
            NodeKind::Const(path) => NodeKind::ConstSet(path, Box::new(value)),
            NodeKind::Call(call) => {
                let name = self.symbols.name(call.method);
                let mut args = call.args;
                let method = if &*name == "[]" {
                    "[]=".to_owned()
                } else if args.is_empty() {
                    format!("{name}=")
                } else {
                    return Err(ParseError::new("cannot assign to a call with arguments", pos));
                };
                args.push(value);
                return Ok(self.call(call.receiver, &method, args, pos));
            }
            _ => return Err(ParseError::new("cannot assign to this expression", pos)),
        };
        Ok(Node::new(kind, pos))
    }

    fn parse_ternary(&mut self) -> ParseResult<Node> {
        let cond = self.parse_binary(1)?;
        if !self.at_punct("?") {
            return Ok(cond);
        }
        let pos = cond.pos;
        self.advance();
        self.skip_newlines();
        let then = self.parse_ternary()?;
        self.skip_newlines();
        self.expect_punct(":")?;
        self.skip_newlines();
        let otherwise = self.parse_ternary()?;
        Ok(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            pos,
        ))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> ParseResult<Node> {
        let mut left = self.parse_unary()?;
        loop {
            let token = self.peek();
            let TokenKind::Punct(op) = token.kind else {
                break;
            };
            let Some(precedence) = binary_precedence(op).filter(|&p| p >= min_precedence) else {
                break;
            };
            let pos = token.pos;
            self.advance();
            self.skip_newlines();
            let right = self.parse_binary(precedence + 1)?;
            left = match op {
                "&&" => Node::new(NodeKind::And(Box::new(left), Box::new(right)), pos),
                "||" => Node::new(NodeKind::Or(Box::new(left), Box::new(right)), pos),
                _ => self.call(Some(left), op, vec![right], pos),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Node> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Punct("-") => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(match operand.kind {
                    NodeKind::Integer(n) => Node::new(NodeKind::Integer(n.wrapping_neg()), token.pos),
                    NodeKind::Float(f) => Node::new(NodeKind::Float(-f), token.pos),
                    _ => self.call(Some(operand), "-@", Vec::new(), token.pos),
                })
            }
            TokenKind::Punct("+") => {
                self.advance();
                self.parse_unary()
            }
            TokenKind::Punct("!") => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Node::new(NodeKind::Not(Box::new(operand)), token.pos))
            }
            TokenKind::Punct("~") => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(self.call(Some(operand), "~", Vec::new(), token.pos))
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> ParseResult<Node> {
        let primary = self.parse_primary()?;
        let base = self.parse_postfix(primary)?;
        if !self.at_punct("**") {
            return Ok(base);
        }
        let pos = self.advance().pos;
        self.skip_newlines();
        let exponent = self.parse_unary()?;
        Ok(self.call(Some(base), "**", vec![exponent], pos))
    }

    fn parse_postfix(&mut self, mut node: Node) -> ParseResult<Node> {
        loop {
            // Leading-dot method chains may continue on the next line.
            if self.peek().kind == TokenKind::Newline {
                let mut ahead = self.index;
                while self.tokens.get(ahead).is_some_and(|t| t.kind == TokenKind::Newline) {
                    ahead += 1;
                }
                if self.tokens.get(ahead).is_some_and(|t| t.is_punct(".")) {
                    self.index = ahead;
                } else {
                    break;
                }
            }
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Punct(".") => {
                    self.advance();
                    self.skip_newlines();
                    let name_token = self.peek().clone();
                    let name = match &name_token.kind {
                        TokenKind::Identifier(name) | TokenKind::Constant(name) => {
                            self.advance();
                            name.clone()
                        }
                        TokenKind::Punct("(") => "call".to_owned(),
                        TokenKind::Punct(op) if OPERATOR_METHODS.contains(op) => {
                            self.advance();
                            (*op).to_owned()
                        }
                        _ => return Err(Self::unexpected_token(&name_token, "method name")),
                    };
                    let method = self.intern(&name);
                    node = self.parse_call_rest(Some(node), method, name_token.pos)?;
                }
                TokenKind::Punct("::") => {
                    self.advance();
                    let name_token = self.advance();
                    match name_token.kind {
                        TokenKind::Constant(name)
                            if !(self.at_punct("(") && !self.peek().spaced) =>
                        {
                            node = Node::new(
                                NodeKind::Const(ConstPath {
                                    scope: ConstScope::Under(Box::new(node)),
                                    name: self.intern(&name),
                                }),
                                name_token.pos,
                            );
                        }
                        TokenKind::Constant(name) | TokenKind::Identifier(name) => {
                            let method = self.intern(&name);
                            node = self.parse_call_rest(Some(node), method, name_token.pos)?;
                        }
                        _ => return Err(Self::unexpected_token(&name_token, "constant")),
                    }
                }
                TokenKind::Punct("[") if !token.spaced => {
                    self.advance();
                    let (args, block) = self.parse_arguments(Some("]"))?;
                    if block.is_some() {
                        return Err(ParseError::new("block argument in index", token.pos));
                    }
                    node = self.call(Some(node), "[]", args, token.pos);
                }
                _ => break,
            }
        }
        Ok(node)
    }

    // ── Calls ─────────────────────────────────────────────────

    /// Whether the current token starts the first argument of a call
    /// written without parentheses, e.g. `puts 1` or `foo -1`.
    fn can_start_command_arg(&self) -> bool {
        let token = self.peek();
        if !token.spaced {
            return false;
        }
        let next_spaced = self.peek_at(1).spaced;
        match &token.kind {
            TokenKind::Integer(_)
            | TokenKind::Float(_)
            | TokenKind::String(_)
            | TokenKind::Interpolated(_)
            | TokenKind::Symbol(_)
            | TokenKind::Label(_)
            | TokenKind::Identifier(_)
            | TokenKind::Constant(_)
            | TokenKind::IVar(_)
            | TokenKind::GVar(_) => true,
            TokenKind::Keyword(k) => matches!(
                k,
                Keyword::Nil | Keyword::True | Keyword::False | Keyword::SelfKw | Keyword::Not
            ),
            TokenKind::Punct(p) => match *p {
                "[" | "(" | "::" => true,
                "-" | "*" | "&" | "!" => !next_spaced,
                _ => false,
            },
            _ => false,
        }
    }

    fn starts_value(&self) -> bool {
        let token = self.peek();
        match &token.kind {
            TokenKind::Keyword(k) => matches!(
                k,
                Keyword::Nil
                    | Keyword::True
                    | Keyword::False
                    | Keyword::SelfKw
                    | Keyword::Not
                    | Keyword::Begin
                    | Keyword::Yield
            ),
            TokenKind::Punct(p) => matches!(*p, "(" | "[" | "-" | "!" | "::"),
            TokenKind::Newline | TokenKind::Eof | TokenKind::Error(_) => false,
            _ => true,
        }
    }

    fn parse_call_rest(&mut self, receiver: Option<Node>, method: Sym, pos: Pos) -> ParseResult<Node> {
        let token = self.peek();
        let (args, mut block) = if token.is_punct("(") && !token.spaced {
            self.advance();
            self.parse_arguments(Some(")"))?
        } else if self.can_start_command_arg() {
            self.parse_command_arguments()?
        } else {
            (Vec::new(), None)
        };
        if block.is_none() {
            block = self.parse_block()?.map(BlockArg::Literal);
        }
        Ok(Node::new(
            NodeKind::Call(Box::new(Call {
                receiver,
                method,
                args,
                block,
            })),
            pos,
        ))
    }

    fn parse_command_arguments(&mut self) -> ParseResult<(Vec<Node>, Option<BlockArg>)> {
        let saved = std::mem::replace(&mut self.no_do, true);
        let result = self.parse_arguments(None);
        self.no_do = saved;
        result
    }

    /// Argument list up to `close`, or to the end of the line for command
    /// calls. `key: value` and `key => value` pairs are collected into a
    /// trailing hash argument.
    fn parse_arguments(
        &mut self,
        close: Option<&'static str>,
    ) -> ParseResult<(Vec<Node>, Option<BlockArg>)> {
        let saved = self.no_do;
        if close.is_some() {
            self.no_do = false;
        }
        let mut args = Vec::new();
        let mut pairs = Vec::new();
        let mut hash_pos = None;
        let mut block = None;
        loop {
            if let Some(close) = close {
                self.skip_newlines();
                if self.at_punct(close) {
                    break;
                }
            }
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Punct("*") => {
                    self.advance();
                    let value = self.parse_ternary()?;
                    args.push(Node::new(NodeKind::Splat(Box::new(value)), token.pos));
                }
                TokenKind::Punct("&") => {
                    self.advance();
                    let value = self.parse_ternary()?;
                    block = Some(BlockArg::Pass(Box::new(value)));
                }
                TokenKind::Label(name) => {
                    self.advance();
                    self.skip_newlines();
                    let value = self.parse_expr()?;
                    hash_pos.get_or_insert(token.pos);
                    let key = Node::new(NodeKind::Symbol(self.intern(&name)), token.pos);
                    pairs.push((key, value));
                }
                _ => {
                    let value = self.parse_expr()?;
                    if self.eat_punct("=>") {
                        self.skip_newlines();
                        let mapped = self.parse_expr()?;
                        hash_pos.get_or_insert(token.pos);
                        pairs.push((value, mapped));
                    } else {
                        args.push(value);
                    }
                }
            }
            if close.is_some() {
                self.skip_newlines();
            }
            if !self.eat_punct(",") {
                break;
            }
            self.skip_newlines();
        }
        self.no_do = saved;
        if let Some(close) = close {
            self.expect_punct(close)?;
        }
        if let Some(pos) = hash_pos {
            args.push(Node::new(NodeKind::Hash(pairs), pos));
        }
        Ok((args, block))
    }

    fn parse_block(&mut self) -> ParseResult<Option<Rc<BlockBody>>> {
        let close = if self.at_punct("{") {
            None
        } else if !self.no_do && self.at_keyword(Keyword::Do) {
            Some(Keyword::End)
        } else {
            return Ok(None);
        };
        self.advance();
        self.push_locals(true);
        let saved = std::mem::replace(&mut self.no_do, false);
        let result = self.parse_block_inner(close);
        self.no_do = saved;
        self.pop_locals();
        result.map(Some)
    }

    fn parse_block_inner(&mut self, close: Option<Keyword>) -> ParseResult<Rc<BlockBody>> {
        self.skip_newlines();
        let params = if self.eat_punct("||") {
            Params::default()
        } else if self.eat_punct("|") {
            let params = self.parse_params(true)?;
            self.expect_punct("|")?;
            params
        } else {
            Params::default()
        };
        let body = self.parse_statements()?;
        match close {
            None => self.expect_punct("}")?,
            Some(keyword) => self.expect_keyword(keyword)?,
        };
        Ok(Rc::new(BlockBody { params, body }))
    }

    /// Parameter list of a method (`in_block == false`) or a block. Each
    /// name is declared in the current local frame.
    fn parse_params(&mut self, in_block: bool) -> ParseResult<Params> {
        let mut params = Params::default();
        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::Identifier(name) => {
                    let sym = self.intern(&name);
                    self.declare(sym);
                    if self.eat_punct("=") {
                        // `|` closes block parameters, so defaults stop short of it.
                        let default = if in_block {
                            self.parse_binary(7)?
                        } else {
                            self.parse_ternary()?
                        };
                        params.optional.push((sym, default));
                    } else if !params.optional.is_empty() || params.rest.is_some() {
                        return Err(ParseError::new(
                            "required parameter after optional parameters",
                            token.pos,
                        ));
                    } else {
                        params.required.push(sym);
                    }
                }
                TokenKind::Punct("*") => {
                    let sym = self.expect_identifier()?;
                    self.declare(sym);
                    params.rest = Some(sym);
                }
                TokenKind::Punct("&") => {
                    let sym = self.expect_identifier()?;
                    self.declare(sym);
                    params.block = Some(sym);
                }
                _ => return Err(Self::unexpected_token(&token, "parameter")),
            }
            if !self.eat_punct(",") {
                return Ok(params);
            }
        }
    }

    // ── Primaries ─────────────────────────────────────────────

    fn parse_primary(&mut self) -> ParseResult<Node> {
        let token = self.advance();
        let pos = token.pos;
        let kind = match token.kind {
            TokenKind::Integer(n) => NodeKind::Integer(n),
            TokenKind::Float(f) => NodeKind::Float(f),
            TokenKind::String(s) => NodeKind::String(s),
            TokenKind::Interpolated(parts) => return self.parse_interpolation(parts, pos),
            TokenKind::Symbol(s) => NodeKind::Symbol(self.intern(&s)),
            TokenKind::Identifier(name) => {
                let sym = self.intern(&name);
                let next = self.peek();
                if self.is_local(sym) && !(next.is_punct("(") && !next.spaced) {
                    NodeKind::Local(sym)
                } else {
                    return self.parse_call_rest(None, sym, pos);
                }
            }
            TokenKind::Constant(name) => {
                let sym = self.intern(&name);
                if self.at_punct("(") && !self.peek().spaced {
                    return self.parse_call_rest(None, sym, pos);
                }
                NodeKind::Const(ConstPath {
                    scope: ConstScope::Lexical,
                    name: sym,
                })
            }
            TokenKind::IVar(name) => NodeKind::IVar(self.intern(&name)),
            TokenKind::GVar(name) => NodeKind::GVar(self.intern(&name)),
            TokenKind::Keyword(keyword) => return self.parse_keyword(keyword, pos),
            TokenKind::Punct("(") => {
                let saved = std::mem::replace(&mut self.no_do, false);
                let body = self.parse_statements();
                self.no_do = saved;
                let body = body?;
                self.expect_punct(")")?;
                return Ok(body);
            }
            TokenKind::Punct("[") => {
                let (items, block) = self.parse_arguments(Some("]"))?;
                if block.is_some() {
                    return Err(ParseError::new("block argument in array literal", pos));
                }
                NodeKind::Array(items)
            }
            TokenKind::Punct("{") => NodeKind::Hash(self.parse_hash_entries()?),
            TokenKind::Punct("::") => {
                let name_token = self.advance();
                match name_token.kind {
                    TokenKind::Constant(name) => NodeKind::Const(ConstPath {
                        scope: ConstScope::Top,
                        name: self.intern(&name),
                    }),
                    _ => return Err(Self::unexpected_token(&name_token, "constant")),
                }
            }
            _ => return Err(Self::unexpected_token(&token, "expression")),
        };
        Ok(Node::new(kind, pos))
    }

    fn parse_hash_entries(&mut self) -> ParseResult<Vec<(Node, Node)>> {
        let saved = std::mem::replace(&mut self.no_do, false);
        let mut pairs = Vec::new();
        let result = loop {
            self.skip_newlines();
            if self.eat_punct("}") {
                break Ok(pairs);
            }
            let token = self.peek().clone();
            let key = match token.kind {
                TokenKind::Label(name) => {
                    self.advance();
                    Node::new(NodeKind::Symbol(self.intern(&name)), token.pos)
                }
                _ => {
                    let key = match self.parse_expr() {
                        Ok(key) => key,
                        Err(e) => break Err(e),
                    };
                    if let Err(e) = self.expect_punct("=>") {
                        break Err(e);
                    }
                    key
                }
            };
            self.skip_newlines();
            match self.parse_expr() {
                Ok(value) => pairs.push((key, value)),
                Err(e) => break Err(e),
            }
            self.skip_newlines();
            if !self.eat_punct(",") {
                self.skip_newlines();
                break self.expect_punct("}").map(|_| pairs);
            }
        };
        self.no_do = saved;
        result
    }

    fn parse_interpolation(&mut self, parts: Vec<StrPart>, pos: Pos) -> ParseResult<Node> {
        let mut nodes = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StrPart::Literal(text) => nodes.push(Node::new(NodeKind::String(text), pos)),
                StrPart::Code(code, at) => {
                    let tokens = Lexer::with_origin(&code, at).tokenize();
                    let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
                    let saved_index = std::mem::replace(&mut self.index, 0);
                    let saved_no_do = std::mem::replace(&mut self.no_do, false);
                    let result = self.parse_program();
                    self.tokens = saved_tokens;
                    self.index = saved_index;
                    self.no_do = saved_no_do;
                    nodes.push(result?);
                }
            }
        }
        Ok(Node::new(NodeKind::Interpolated(nodes), pos))
    }

    fn parse_keyword(&mut self, keyword: Keyword, pos: Pos) -> ParseResult<Node> {
        let kind = match keyword {
            Keyword::Nil => NodeKind::Nil,
            Keyword::True => NodeKind::True,
            Keyword::False => NodeKind::False,
            Keyword::SelfKw => NodeKind::SelfRef,
            Keyword::Not => {
                let operand = self.parse_expr()?;
                NodeKind::Not(Box::new(operand))
            }
            Keyword::If | Keyword::Unless => {
                let node = self.parse_if_rest(keyword == Keyword::Unless, pos)?;
                self.expect_keyword(Keyword::End)?;
                return Ok(node);
            }
            Keyword::While | Keyword::Until => {
                let saved = std::mem::replace(&mut self.no_do, true);
                let cond = self.parse_expr_stmt();
                self.no_do = saved;
                let cond = cond?;
                self.skip_newlines();
                self.eat_keyword(Keyword::Do);
                let body = self.parse_statements()?;
                self.expect_keyword(Keyword::End)?;
                NodeKind::While {
                    cond: Box::new(cond),
                    body: Box::new(body),
                    negate: keyword == Keyword::Until,
                }
            }
            Keyword::Begin => {
                let body = self.parse_statements()?;
                let node = self.parse_rescue_clauses(body, pos)?;
                self.expect_keyword(Keyword::End)?;
                return Ok(node);
            }
            Keyword::Def => return self.parse_def(pos),
            Keyword::Class => return self.parse_class(pos),
            Keyword::Module => {
                let path = self.parse_const_path()?;
                self.push_locals(false);
                let body = self.parse_statements();
                self.pop_locals();
                let body = body?;
                self.expect_keyword(Keyword::End)?;
                NodeKind::ModuleDef {
                    path,
                    body: Box::new(body),
                }
            }
            Keyword::Yield => {
                let token = self.peek();
                let (args, block) = if token.is_punct("(") && !token.spaced {
                    self.advance();
                    self.parse_arguments(Some(")"))?
                } else if self.can_start_command_arg() {
                    self.parse_command_arguments()?
                } else {
                    (Vec::new(), None)
                };
                if block.is_some() {
                    return Err(ParseError::new("block given to yield", pos));
                }
                NodeKind::Yield(args)
            }
            Keyword::Return | Keyword::Break | Keyword::Next => {
                let value = if self.starts_value() {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                match keyword {
                    Keyword::Return => NodeKind::Return(value),
                    Keyword::Break => NodeKind::Break(value),
                    _ => NodeKind::Next(value),
                }
            }
            _ => {
                return Err(ParseError::new(
                    format!("unexpected keyword `{}`", keyword.as_str()),
                    pos,
                ));
            }
        };
        Ok(Node::new(kind, pos))
    }

    fn skip_then(&mut self) {
        self.skip_newlines();
        self.eat_keyword(Keyword::Then);
        self.skip_newlines();
    }

    /// Condition, branches and `elsif` chain of an `if`. Leaves `end` for
    /// the caller.
    fn parse_if_rest(&mut self, negate: bool, pos: Pos) -> ParseResult<Node> {
        let cond = self.parse_expr_stmt()?;
        self.skip_then();
        let body = self.parse_statements()?;
        let else_pos = self.peek().pos;
        let alternative = if self.eat_keyword(Keyword::Elsif) {
            self.parse_if_rest(false, else_pos)?
        } else if self.eat_keyword(Keyword::Else) {
            self.parse_statements()?
        } else {
            Node::nil(else_pos)
        };
        let (then, otherwise) = if negate {
            (alternative, body)
        } else {
            (body, alternative)
        };
        Ok(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            pos,
        ))
    }

    fn parse_rescue_clauses(&mut self, body: Node, pos: Pos) -> ParseResult<Node> {
        let mut rescues = Vec::new();
        while self.eat_keyword(Keyword::Rescue) {
            let mut classes = Vec::new();
            let mut binding = None;
            if !matches!(self.peek().kind, TokenKind::Newline | TokenKind::Keyword(Keyword::Then))
                && !self.at_punct("=>")
            {
                loop {
                    classes.push(self.parse_ternary()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                    self.skip_newlines();
                }
            }
            if self.eat_punct("=>") {
                let name = self.expect_identifier()?;
                self.declare(name);
                binding = Some(name);
            }
            self.skip_then();
            let body = self.parse_statements()?;
            rescues.push(Rescue {
                classes,
                binding,
                body,
            });
        }
        let otherwise = if self.eat_keyword(Keyword::Else) {
            Some(self.parse_statements()?)
        } else {
            None
        };
        let ensure = if self.eat_keyword(Keyword::Ensure) {
            Some(self.parse_statements()?)
        } else {
            None
        };
        if rescues.is_empty() && otherwise.is_none() && ensure.is_none() {
            return Ok(body);
        }
        Ok(Node::new(
            NodeKind::Begin(Box::new(Begin {
                body,
                rescues,
                otherwise,
                ensure,
            })),
            pos,
        ))
    }

    fn parse_method_name(&mut self) -> ParseResult<String> {
        let token = self.advance();
        let mut name = match token.kind {
            TokenKind::Identifier(name) | TokenKind::Constant(name) => name,
            TokenKind::Keyword(k) => k.as_str().to_owned(),
            TokenKind::Punct("[") => {
                self.expect_punct("]")?;
                "[]".to_owned()
            }
            TokenKind::Punct(op) if OPERATOR_METHODS.contains(&op) => op.to_owned(),
            _ => return Err(Self::unexpected_token(&token, "method name")),
        };
        // Setter, e.g. `def name=(value)` or `def []=(k, v)`.
        if self.at_punct("=") && !self.peek().spaced && !name.ends_with(['?', '!']) {
            let after = self.peek_at(1);
            if after.is_punct("(") || matches!(after.kind, TokenKind::Identifier(_)) {
                self.advance();
                name.push('=');
            }
        }
        Ok(name)
    }

    fn parse_def(&mut self, pos: Pos) -> ParseResult<Node> {
        let first = self.peek().clone();
        let singleton = match first.kind {
            TokenKind::Keyword(Keyword::SelfKw) if self.peek_at(1).is_punct(".") => {
                self.advance();
                self.advance();
                Some(Box::new(Node::new(NodeKind::SelfRef, first.pos)))
            }
            TokenKind::Constant(ref name) if self.peek_at(1).is_punct(".") => {
                let path = ConstPath {
                    scope: ConstScope::Lexical,
                    name: self.intern(name),
                };
                self.advance();
                self.advance();
                Some(Box::new(Node::new(NodeKind::Const(path), first.pos)))
            }
            _ => None,
        };
        let name = self.parse_method_name()?;

        self.push_locals(false);
        let result = self.parse_def_rest(pos);
        self.pop_locals();
        let (params, body) = result?;

        let def = Rc::new(MethodDef {
            name: self.intern(&name),
            params,
            body,
        });
        Ok(Node::new(NodeKind::Def { singleton, def }, pos))
    }

    fn parse_def_rest(&mut self, pos: Pos) -> ParseResult<(Params, Node)> {
        let params = if self.peek().is_punct("(") {
            self.advance();
            self.skip_newlines();
            if self.eat_punct(")") {
                Params::default()
            } else {
                let params = self.parse_params(false)?;
                self.skip_newlines();
                self.expect_punct(")")?;
                params
            }
        } else if matches!(self.peek().kind, TokenKind::Newline) {
            Params::default()
        } else {
            self.parse_params(false)?
        };
        let body = self.parse_statements()?;
        let body = self.parse_rescue_clauses(body, pos)?;
        self.expect_keyword(Keyword::End)?;
        Ok((params, body))
    }

    fn parse_const_path(&mut self) -> ParseResult<ConstPath> {
        let scope = if self.eat_punct("::") {
            ConstScope::Top
        } else {
            ConstScope::Lexical
        };
        let token = self.advance();
        let TokenKind::Constant(name) = token.kind else {
            return Err(Self::unexpected_token(&token, "constant name"));
        };
        let mut path = ConstPath {
            scope,
            name: self.intern(&name),
        };
        while self.at_punct("::") {
            self.advance();
            let token = self.advance();
            let TokenKind::Constant(name) = token.kind else {
                return Err(Self::unexpected_token(&token, "constant name"));
            };
            path = ConstPath {
                scope: ConstScope::Under(Box::new(Node::new(NodeKind::Const(path), token.pos))),
                name: self.intern(&name),
            };
        }
        Ok(path)
    }

    fn parse_class(&mut self, pos: Pos) -> ParseResult<Node> {
        if self.at_punct("<<") {
            return Err(ParseError::new(
                "singleton class definitions are not supported",
                pos,
            ));
        }
        let path = self.parse_const_path()?;
        let superclass = if self.eat_punct("<") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.push_locals(false);
        let body = self.parse_statements();
        self.pop_locals();
        let body = body?;
        self.expect_keyword(Keyword::End)?;
        Ok(Node::new(
            NodeKind::ClassDef {
                path,
                superclass,
                body: Box::new(body),
            },
            pos,
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Node, Symbols) {
        let symbols = Symbols::new();
        let node = parse_program(src, &symbols).unwrap_or_else(|e| panic!("{src}: {e}"));
        (node, symbols)
    }

    fn call_name(node: &Node, symbols: &Symbols) -> String {
        match &node.kind {
            NodeKind::Call(call) => symbols.name(call.method).to_string(),
            other => panic!("expected call, got {other:?}"),
        }
    }

    fn as_call(node: &Node) -> &Call {
        match &node.kind {
            NodeKind::Call(call) => call,
            other => panic!("expected call, got {other:?}"),
        }
    }

    // ── Expressions ───────────────────────────────────────────

    #[test]
    fn precedence() {
        let (node, symbols) = parse("1 + 2 * 3");
        let call = as_call(&node);
        assert_eq!(call_name(&node, &symbols), "+");
        assert_eq!(call.receiver.as_ref().map(|r| &r.kind), Some(&NodeKind::Integer(1)));
        assert_eq!(call_name(&call.args[0], &symbols), "*");
    }

    #[test]
    fn negative_literals_fold() {
        let (node, _) = parse("-7");
        assert_eq!(node.kind, NodeKind::Integer(-7));
    }

    #[test]
    fn assignment_declares_local() {
        let (node, symbols) = parse("a = 1\na + 1");
        let NodeKind::Seq(statements) = &node.kind else {
            panic!("expected sequence");
        };
        assert!(matches!(statements[0].kind, NodeKind::LocalSet(..)));
        let call = as_call(&statements[1]);
        let a = symbols.intern("a");
        assert_eq!(call.receiver.as_ref().map(|r| &r.kind), Some(&NodeKind::Local(a)));
    }

    #[test]
    fn command_call_versus_subtraction() {
        let (node, symbols) = parse("foo -1");
        assert_eq!(call_name(&node, &symbols), "foo");
        assert_eq!(as_call(&node).args[0].kind, NodeKind::Integer(-1));

        let (node, symbols) = parse("foo - 1");
        assert_eq!(call_name(&node, &symbols), "-");
    }

    #[test]
    fn attribute_and_index_assignment() {
        let (node, symbols) = parse("obj.name = 1");
        assert_eq!(call_name(&node, &symbols), "name=");
        let (node, symbols) = parse("h[:a] = 2");
        assert_eq!(call_name(&node, &symbols), "[]=");
        assert_eq!(as_call(&node).args.len(), 2);
    }

    #[test]
    fn labels_become_trailing_hash() {
        let (node, _) = parse("foo(1, key: 2)");
        let call = as_call(&node);
        assert_eq!(call.args.len(), 2);
        assert!(matches!(&call.args[1].kind, NodeKind::Hash(pairs) if pairs.len() == 1));
    }

    // ── Blocks ────────────────────────────────────────────────

    #[test]
    fn brace_block_binds_to_call() {
        let (node, symbols) = parse("Hello.foo { |a, b| a + b }");
        let call = as_call(&node);
        assert_eq!(call_name(&node, &symbols), "foo");
        let Some(BlockArg::Literal(block)) = &call.block else {
            panic!("expected block");
        };
        assert_eq!(block.params.required.len(), 2);
        assert!(matches!(as_call(&block.body).receiver.as_ref().map(|r| &r.kind), Some(NodeKind::Local(_))));
    }

    #[test]
    fn empty_parens_then_block() {
        let (node, _) = parse("Hello.test() { }");
        let call = as_call(&node);
        assert!(call.args.is_empty());
        assert!(call.block.is_some());
    }

    #[test]
    fn do_block_binds_to_command() {
        let (node, symbols) = parse("foo bar do\n 1\nend");
        let call = as_call(&node);
        assert_eq!(call_name(&node, &symbols), "foo");
        assert!(call.block.is_some());
        assert!(as_call(&call.args[0]).block.is_none());
    }

    // ── Definitions and control flow ──────────────────────────

    #[test]
    fn def_with_all_parameter_kinds() {
        let (node, symbols) = parse("def m(a, b = 2, *rest, &blk)\n a\nend");
        let NodeKind::Def { singleton, def } = &node.kind else {
            panic!("expected def");
        };
        assert!(singleton.is_none());
        assert_eq!(&*symbols.name(def.name), "m");
        assert_eq!(def.params.required.len(), 1);
        assert_eq!(def.params.optional.len(), 1);
        assert!(def.params.rest.is_some());
        assert!(def.params.block.is_some());
    }

    #[test]
    fn setter_and_singleton_defs() {
        let (node, symbols) = parse("def self.value=(v)\nend");
        let NodeKind::Def { singleton, def } = &node.kind else {
            panic!("expected def");
        };
        assert!(singleton.is_some());
        assert_eq!(&*symbols.name(def.name), "value=");
    }

    #[test]
    fn class_with_nested_path() {
        let (node, _) = parse("class A::B < C\nend");
        let NodeKind::ClassDef { path, superclass, .. } = &node.kind else {
            panic!("expected class");
        };
        assert!(matches!(path.scope, ConstScope::Under(_)));
        assert!(superclass.is_some());
    }

    #[test]
    fn begin_rescue_ensure() {
        let (node, _) = parse(
            "begin\n raise 'x'\nrescue ArgumentError, TypeError => e\n e\nelse\n 1\nensure\n 2\nend",
        );
        let NodeKind::Begin(begin) = &node.kind else {
            panic!("expected begin");
        };
        assert_eq!(begin.rescues.len(), 1);
        assert_eq!(begin.rescues[0].classes.len(), 2);
        assert!(begin.rescues[0].binding.is_some());
        assert!(begin.otherwise.is_some());
        assert!(begin.ensure.is_some());
    }

    #[test]
    fn modifiers() {
        let (node, _) = parse("x = 1 if $flag");
        assert!(matches!(node.kind, NodeKind::If { .. }));
        let (node, _) = parse("i += 1 while i < 3");
        assert!(matches!(node.kind, NodeKind::While { .. }));
    }

    #[test]
    fn while_do_is_not_a_block() {
        let (node, _) = parse("while foo do\n bar\nend");
        let NodeKind::While { cond, .. } = &node.kind else {
            panic!("expected while");
        };
        assert!(as_call(cond).block.is_none());
    }

    #[test]
    fn interpolation_sees_locals() {
        let (node, symbols) = parse("name = 'x'\n\"hi #{name}!\"");
        let NodeKind::Seq(statements) = &node.kind else {
            panic!("expected sequence");
        };
        let NodeKind::Interpolated(parts) = &statements[1].kind else {
            panic!("expected interpolation");
        };
        assert_eq!(parts[1].kind, NodeKind::Local(symbols.intern("name")));
    }

    // ── Errors ────────────────────────────────────────────────

    #[test]
    fn errors_carry_positions() {
        let symbols = Symbols::new();
        let err = parse_program("def foo\n  1 +\n", &symbols).unwrap_err();
        assert_eq!(err.pos.line, 3);
        let err = parse_program("[1, 2", &symbols).unwrap_err();
        assert!(err.message.contains("`]`"), "{err}");
        let err = parse_program("\"open", &symbols).unwrap_err();
        assert_eq!(err.message, "unterminated string");
    }
}
