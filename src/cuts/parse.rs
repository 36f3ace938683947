//! Tokenizer and recursive-descent parser for the cut mini-grammar:
//!
//! ```text
//! cut     := ident cmp value
//!          | ident ("in" | "notin" | "not" "in") list
//!          | ident "%" int cmp int
//! list    := ("(" | "[") value ("," value)* ","? (")" | "]")
//! value   := number | "nan" | "inf" | "-inf" | "true" | "false"
//!          | quoted-string | named-constant
//! ```

use super::cut::{Cut, Operand, Operator};
use super::value::Value;
use crate::error::{Error, Result};

/// Characters that form operator symbols. `-` and `+` are not among them so
/// that signed literals and exponents stay inside one word.
const SYMBOL_CHARS: &str = "=!<>%~&|^*/";
const DELIMITERS: &str = "()[],\"'";

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Sym(String),
    Open(char),
    Close(char),
    Comma,
}

impl Token {
    fn describe(token: Option<&Token>) -> String {
        match token {
            None => "end of expression".to_string(),
            Some(Token::Word(w)) | Some(Token::Sym(w)) => format!("token '{w}'"),
            Some(Token::Str(s)) => format!("string {s:?}"),
            Some(Token::Open(c)) | Some(Token::Close(c)) => format!("token '{c}'"),
            Some(Token::Comma) => "token ','".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' | '[' => {
                chars.next();
                tokens.push(Token::Open(c));
            }
            ')' | ']' => {
                chars.next();
                tokens.push(Token::Close(c));
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '"' | '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                s.push(escaped);
                            }
                        }
                        Some(ch) if ch == c => break,
                        Some(ch) => s.push(ch),
                        None => {
                            return Err(Error::parse(format!("unterminated string {s:?}"), input))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if SYMBOL_CHARS.contains(c) => {
                let mut sym = String::new();
                while let Some(&ch) = chars.peek() {
                    if !SYMBOL_CHARS.contains(ch) {
                        break;
                    }
                    sym.push(ch);
                    chars.next();
                }
                tokens.push(Token::Sym(sym));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || SYMBOL_CHARS.contains(ch) || DELIMITERS.contains(ch) {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Result<Self> {
        Ok(Parser {
            text,
            tokens: tokenize(text)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, token: Option<&Token>) -> Error {
        Error::parse(Token::describe(token), self.text)
    }

    fn variable(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Word(w))
                if w.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') =>
            {
                Ok(w)
            }
            other => Err(self.unexpected(other.as_ref())),
        }
    }

    fn operator(&mut self) -> Result<Operator> {
        match self.next() {
            Some(Token::Sym(sym)) if sym == "%" => {
                let modulus = match self.next() {
                    Some(Token::Word(w)) => w,
                    other => return Err(self.unexpected(other.as_ref())),
                };
                let cmp = match self.next() {
                    Some(Token::Sym(s)) => s,
                    other => return Err(self.unexpected(other.as_ref())),
                };
                format!("%{modulus}{cmp}").parse()
            }
            Some(Token::Sym(sym)) => sym.parse(),
            Some(Token::Word(w)) if w == "in" || w == "notin" => w.parse(),
            Some(Token::Word(w)) if w == "not" => match self.next() {
                Some(Token::Word(w)) if w == "in" => Ok(Operator::NotIn),
                other => Err(self.unexpected(other.as_ref())),
            },
            Some(Token::Word(w)) if Value::parse_literal(&w).is_none() => {
                Err(Error::UnsupportedOperator {
                    operator: w,
                    context: String::new(),
                })
            }
            other => Err(self.unexpected(other.as_ref())),
        }
    }

    fn value(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Word(w)) => {
                Value::parse_literal(&w).ok_or_else(|| self.unexpected(Some(&Token::Word(w))))
            }
            other => Err(self.unexpected(other.as_ref())),
        }
    }

    fn list(&mut self) -> Result<Vec<Value>> {
        let close = match self.next() {
            Some(Token::Open('(')) => ')',
            Some(Token::Open('[')) => ']',
            other => return Err(self.unexpected(other.as_ref())),
        };
        let mut values = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Close(c)) if *c == close => {
                    self.next();
                    return Ok(values);
                }
                _ => values.push(self.value()?),
            }
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::Close(c)) if c == close => return Ok(values),
                other => return Err(self.unexpected(other.as_ref())),
            }
        }
    }

    fn operand(&mut self) -> Result<Operand> {
        match self.peek() {
            Some(Token::Open(_)) => Ok(Operand::List(self.list()?)),
            _ => Ok(Operand::Scalar(self.value()?)),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            token => Err(self.unexpected(token)),
        }
    }
}

pub(crate) fn parse_cut(text: &str) -> Result<Cut> {
    let mut parser = Parser::new(text)?;
    let variable = parser.variable()?;
    let operator = parser.operator()?;
    let operand = parser.operand()?;
    parser.finish()?;
    Cut::from_parts(variable, operator, operand)
}

/// Parse a bare operand such as `"5"`, `"nan"` or `"(4, 5)"`.
pub(crate) fn parse_operand(text: &str) -> Result<Operand> {
    let mut parser = Parser::new(text)?;
    let operand = parser.operand()?;
    parser.finish()?;
    Ok(operand)
}
