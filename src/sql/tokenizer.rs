//! SQL tokenizer for LockstepDB
//!
//! Hand-written character cursor that splits a statement string into tokens.
//! Keywords are not distinguished here; the parser decides which identifiers
//! act as keywords.

use crate::error::{Error, Result};

/// A lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifier or keyword
    Ident(String),
    /// Numeric literal (integer or float), kept as written
    Number(String),
    /// Quoted string literal, quotes stripped and escapes resolved
    StringLit(String),
    /// Comparison operator: = > < >= <= <>
    Op(String),
    /// Single punctuation character: , ; * ( )
    Symbol(char),
}

impl Token {
    /// True if this token is the given keyword (case-insensitive)
    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(kw))
    }
}

/// Tokenize a statement string
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            tokens.push(Token::Ident(chars[start..pos].iter().collect()));
            continue;
        }

        if c.is_ascii_digit()
            || (c == '-' && pos + 1 < chars.len() && chars[pos + 1].is_ascii_digit())
        {
            let start = pos;
            pos += 1; // sign or first digit
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            if text.matches('.').count() > 1 {
                return Err(Error::ParseRejected(format!(
                    "invalid number '{}' at position {}",
                    text, start
                )));
            }
            tokens.push(Token::Number(text));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            pos += 1;
            let mut text = String::new();
            loop {
                if pos >= chars.len() {
                    return Err(Error::ParseRejected(
                        "unterminated string literal".to_string(),
                    ));
                }
                if chars[pos] == quote {
                    // Doubled quote is an escape
                    if pos + 1 < chars.len() && chars[pos + 1] == quote {
                        text.push(quote);
                        pos += 2;
                        continue;
                    }
                    pos += 1;
                    break;
                }
                text.push(chars[pos]);
                pos += 1;
            }
            tokens.push(Token::StringLit(text));
            continue;
        }

        if matches!(c, '=' | '>' | '<' | '!') {
            let start = pos;
            while pos < chars.len() && matches!(chars[pos], '=' | '>' | '<' | '!') {
                pos += 1;
            }
            tokens.push(Token::Op(chars[start..pos].iter().collect()));
            continue;
        }

        if matches!(c, ',' | ';' | '*' | '(' | ')') {
            tokens.push(Token::Symbol(c));
            pos += 1;
            continue;
        }

        return Err(Error::ParseRejected(format!(
            "unexpected character '{}' at position {}",
            c, pos
        )));
    }

    Ok(tokens)
}
