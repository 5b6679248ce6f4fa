//! Tokenizer for operator definitions.
//!
//! Operator symbols are runs of arithmetic or mathematical-symbol code
//! points with no separator between them, so a run is split against the
//! current lexicon: kept whole when the lexicon knows it, otherwise cut
//! into the longest known prefixes. Whatever cannot be matched becomes one
//! unknown symbol, which the transformer later rejects.

use crate::error::{Error, Result};
use crate::number::CmpOp;
use crate::operator::Shape;
use crate::registry::Registry;
use std::collections::HashMap;

pub const NAN_LITERAL: &str = "NaN";

pub fn is_symbol_char(c: char) -> bool {
    matches!(c, '+' | '-' | '*' | '/' | '%')
        || ('\u{2200}'..='\u{22FF}').contains(&c)
        || ('\u{2A00}'..='\u{2BFF}').contains(&c)
        || ('\u{2190}'..='\u{21FF}').contains(&c)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Index into [`Lexed::symbols`].
    Sym(u32),
    Int(i64),
    Var(char),
    NaN,
    If,
    Else,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Comma,
    Semi,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Assign,
}

impl Token {
    pub fn sym(&self) -> Option<u32> {
        match self {
            Token::Sym(i) => Some(*i),
            _ => None,
        }
    }

    pub fn int(&self) -> Option<i64> {
        match self {
            Token::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn var(&self) -> Option<char> {
        match self {
            Token::Var(v) => Some(*v),
            _ => None,
        }
    }

    pub fn cmp(&self) -> Option<CmpOp> {
        match self {
            Token::Cmp(op) => Some(*op),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    /// Set for the candidate currently being defined.
    pub temporary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roles {
    pub prefix: Option<Entry>,
    pub postfix: Option<Entry>,
    pub binary: Option<Entry>,
}

impl Roles {
    pub fn get(&self, shape: Shape) -> Option<&Entry> {
        match shape {
            Shape::Prefix => self.prefix.as_ref(),
            Shape::Postfix => self.postfix.as_ref(),
            Shape::Binary => self.binary.as_ref(),
        }
    }

    fn slot(&mut self, shape: Shape) -> &mut Option<Entry> {
        match shape {
            Shape::Prefix => &mut self.prefix,
            Shape::Postfix => &mut self.postfix,
            Shape::Binary => &mut self.binary,
        }
    }
}

/// Symbol table of every non-base operator, keyed by symbol text.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    roles: HashMap<String, Roles>,
    longest: usize,
}

impl Lexicon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_registry(registry: &Registry) -> Self {
        let mut lexicon = Self::new();
        for op in registry.iter().filter(|op| !op.is_base()) {
            lexicon.insert(&op.symbol, op.shape(), &op.id, false);
        }
        lexicon
    }

    pub fn with_candidate(mut self, symbol: &str, shape: Shape, id: &str) -> Self {
        self.insert(symbol, shape, id, true);
        self
    }

    fn insert(&mut self, symbol: &str, shape: Shape, id: &str, temporary: bool) {
        self.longest = self.longest.max(symbol.chars().count());
        *self.roles.entry(symbol.to_string()).or_default().slot(shape) = Some(Entry {
            id: id.to_string(),
            temporary,
        });
    }

    pub fn roles(&self, symbol: &str) -> Option<&Roles> {
        self.roles.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.roles.contains_key(symbol)
    }

    /// Unknown symbols are admitted in every position so that they reach
    /// the transformer and fail there with a precise message.
    pub fn admits(&self, symbol: &str, shape: Shape) -> bool {
        self.roles(symbol).map_or(true, |r| r.get(shape).is_some())
    }

    fn split_run(&self, run: &[char]) -> Vec<String> {
        let whole: String = run.iter().collect();
        if self.contains(&whole) {
            return vec![whole];
        }
        let mut pieces = Vec::new();
        let mut start = 0;
        while start < run.len() {
            let limit = self.longest.min(run.len() - start);
            let found = (1..=limit).rev().find_map(|len| {
                let piece: String = run[start..start + len].iter().collect();
                self.contains(&piece).then_some((piece, len))
            });
            match found {
                Some((piece, len)) => {
                    pieces.push(piece);
                    start += len;
                }
                None => {
                    pieces.push(run[start..].iter().collect());
                    break;
                }
            }
        }
        pieces
    }

    pub fn tokenize(&self, text: &str) -> Result<Lexed> {
        let chars: Vec<char> = text.chars().collect();
        let mut lexed = Lexed::default();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let start = i;
            if c.is_whitespace() {
                i += 1;
                continue;
            }
            if c.is_ascii_alphabetic() {
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "if" => Token::If,
                    "else" => Token::Else,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    NAN_LITERAL => Token::NaN,
                    _ if word.len() == 1 => Token::Var(c),
                    _ => {
                        return Err(Error::DefinitionSyntax(format!(
                            "unexpected word `{}` at offset {}",
                            word, start
                        )))
                    }
                };
                lexed.push(token, start);
                continue;
            }
            if c.is_ascii_digit() {
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                let n = digits.parse::<i64>().map_err(|_| {
                    Error::DefinitionSyntax(format!("integer `{}` at offset {} is too large", digits, start))
                })?;
                lexed.push(Token::Int(n), start);
                continue;
            }
            if is_symbol_char(c) {
                while i < chars.len() && is_symbol_char(chars[i]) {
                    i += 1;
                }
                for piece in self.split_run(&chars[start..i]) {
                    let index = lexed.intern(piece);
                    lexed.push(Token::Sym(index), start);
                }
                continue;
            }
            let next = chars.get(i + 1).copied();
            let (token, width) = match (c, next) {
                ('=', Some('=')) => (Token::Cmp(CmpOp::Eq), 2),
                ('!', Some('=')) => (Token::Cmp(CmpOp::Ne), 2),
                ('<', Some('=')) => (Token::Cmp(CmpOp::Le), 2),
                ('>', Some('=')) => (Token::Cmp(CmpOp::Ge), 2),
                ('<', _) => (Token::Cmp(CmpOp::Lt), 1),
                ('>', _) => (Token::Cmp(CmpOp::Gt), 1),
                ('=', _) => (Token::Assign, 1),
                (',', _) => (Token::Comma, 1),
                (';', _) => (Token::Semi, 1),
                ('{', _) => (Token::LBrace, 1),
                ('}', _) => (Token::RBrace, 1),
                ('(', _) => (Token::LParen, 1),
                (')', _) => (Token::RParen, 1),
                _ => {
                    return Err(Error::DefinitionSyntax(format!(
                        "unexpected character `{}` at offset {}",
                        c, start
                    )))
                }
            };
            lexed.push(token, start);
            i += width;
        }
        Ok(lexed)
    }
}

/// Token stream of one definition plus the symbols it mentions.
#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    /// Character offset of each token in the source text.
    pub offsets: Vec<usize>,
    pub symbols: Vec<String>,
}

impl Lexed {
    fn push(&mut self, token: Token, offset: usize) {
        self.tokens.push(token);
        self.offsets.push(offset);
    }

    fn intern(&mut self, symbol: String) -> u32 {
        match self.symbols.iter().position(|s| *s == symbol) {
            Some(i) => i as u32,
            None => {
                self.symbols.push(symbol);
                (self.symbols.len() - 1) as u32
            }
        }
    }

    pub fn symbol(&self, token: Token) -> Option<&str> {
        token.sym().and_then(|i| self.symbols.get(i as usize)).map(String::as_str)
    }

    /// Character offset for a token index, or the end of input.
    pub fn offset(&self, index: usize) -> Option<usize> {
        self.offsets.get(index).copied()
    }
}
