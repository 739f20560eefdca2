//! Quote- and parenthesis-aware splitter shared by the select, filter and order grammars.
//!
//! The lexer only finds token boundaries. Parenthesised groups are kept verbatim
//! (including the parentheses) and re-tokenized by the parser that owns them.
//!
//! ```text
//! tokenize("id,author(id,name),\"a,b\"", ',')
//!   => ["id", "author(id,name)", "\"a,b\""]
//! ```

use crate::error::SyntaxError;

/// A lexical unit with its byte offset in the original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub offset: usize,
}

/// Shape of a token, decided from its first and last characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Entirely enclosed in matching single or double quotes.
    Quoted,
    /// Contains a parenthesised group.
    Group,
    /// Identifier or operator fragment.
    Bare,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        if unquote(&self.text).is_some() {
            TokenKind::Quoted
        } else if self.text.contains('(') {
            TokenKind::Group
        } else {
            TokenKind::Bare
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Split `input` on `separator` at parenthesis depth 0 and outside quotes.
///
/// Whitespace-only input yields no tokens. Every separator ends a token, so
/// leading, doubled or trailing separators fail with [`SyntaxError::EmptyToken`].
pub fn tokenize(input: &str, separator: char) -> Result<Vec<Token>, SyntaxError> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut tokens = Vec::new();
    let mut quote: Option<(char, usize)> = None;
    let mut escaped = false;
    let mut parens: Vec<usize> = Vec::new();
    let mut start = 0;

    for (pos, ch) in input.char_indices() {
        if let Some((q, _)) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }

        match ch {
            '"' | '\'' => quote = Some((ch, pos)),
            '(' => parens.push(pos),
            ')' => {
                if parens.pop().is_none() {
                    return Err(SyntaxError::UnbalancedParens { position: pos });
                }
            }
            c if c == separator && parens.is_empty() => {
                tokens.push(make_token(input, start, pos)?);
                start = pos + c.len_utf8();
            }
            _ => {}
        }
    }

    if let Some((q, position)) = quote {
        return Err(SyntaxError::UnbalancedQuotes { quote: q, position });
    }
    if let Some(&position) = parens.last() {
        return Err(SyntaxError::UnbalancedParens { position });
    }

    tokens.push(make_token(input, start, input.len())?);
    Ok(tokens)
}

fn make_token(input: &str, start: usize, end: usize) -> Result<Token, SyntaxError> {
    let raw = &input[start..end];
    let text = raw.trim();
    if text.is_empty() {
        return Err(SyntaxError::EmptyToken { position: start });
    }
    let leading = raw.len() - raw.trim_start().len();
    Ok(Token {
        text: text.to_string(),
        offset: start + leading,
    })
}

/// Strip matching outer quotes and resolve backslash escapes.
///
/// Returns `None` when `text` is not a single quoted section.
pub fn unquote(text: &str) -> Option<String> {
    let mut chars = text.chars();
    let first = chars.next()?;
    if first != '"' && first != '\'' {
        return None;
    }

    let mut out = String::with_capacity(text.len());
    let mut escaped = false;
    let mut closed = false;
    for ch in chars {
        if closed {
            // Content after the closing quote.
            return None;
        }
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == first {
            closed = true;
        } else {
            out.push(ch);
        }
    }

    closed.then_some(out)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
