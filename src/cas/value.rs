//! Evaluated CAS values and their literal syntax.
//!
//! The core never interprets symbolic expressions, but it does need to read a
//! handful of shapes back out of evaluated results and stored state: booleans
//! (`SCENE_NEXT`), strings (scene names, feedback), numbers (score, penalty),
//! and lists (`SCENE_PATH`, PRT tuples). Everything else is carried as an
//! opaque [`CasValue::Expr`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CasError, CasResult};

/// A value returned by the CAS evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CasValue {
    Bool(bool),
    Number(f64),
    String(String),
    /// Any expression the core does not need to look inside.
    Expr(String),
    List(Vec<CasValue>),
}

impl CasValue {
    /// Build a CAS string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Build a list of CAS strings.
    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    /// Whether this is the literal `false`.
    pub fn is_false(&self) -> bool {
        matches!(self, Self::Bool(false))
    }

    /// Numeric view. Integers and floats both arrive as [`CasValue::Number`].
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The contents of a CAS string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[CasValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// A list of CAS strings as owned Rust strings.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        self.as_list()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Render as CAS input syntax. Equivalent to `to_string()`.
    pub fn to_cas(&self) -> String {
        self.to_string()
    }

    /// Parse a CAS literal as produced by [`CasValue::to_cas`].
    ///
    /// Anything that is not a boolean, number, string, or list is kept verbatim
    /// as an expression.
    pub fn parse(input: &str) -> CasResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(parse_error(input, "empty value"));
        }
        parse_value(trimmed).map_err(|message| parse_error(input, message))
    }
}

impl fmt::Display for CasValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.is_nan() => write!(f, "und"),
            Self::Number(n) if n.is_infinite() => {
                write!(f, "{}", if *n > 0.0 { "inf" } else { "minf" })
            }
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{}", quote(s)),
            Self::Expr(e) => write!(f, "{e}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Quote a Rust string as a CAS string literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn parse_error(input: &str, message: impl Into<String>) -> CasError {
    CasError::Parse {
        input: input.to_string(),
        message: message.into(),
    }
}

fn parse_value(s: &str) -> Result<CasValue, String> {
    match s {
        "true" => return Ok(CasValue::Bool(true)),
        "false" => return Ok(CasValue::Bool(false)),
        _ => {}
    }

    if s.starts_with('[') {
        let close = matching_close(s, 0)?;
        if close == s.len() - 1 {
            let inner = &s[1..close];
            if inner.trim().is_empty() {
                return Ok(CasValue::List(Vec::new()));
            }
            let items = split_top_level(inner, ',')?
                .into_iter()
                .map(|item| {
                    let item = item.trim();
                    if item.is_empty() {
                        Err("empty list element".to_string())
                    } else {
                        parse_value(item)
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(CasValue::List(items));
        }
    }

    if s.starts_with('"') {
        let (text, end) = read_string(s, 0)?;
        if end == s.len() {
            return Ok(CasValue::String(text));
        }
    }

    if looks_numeric(s) {
        if let Ok(n) = s.parse::<f64>() {
            return Ok(CasValue::Number(n));
        }
    }

    check_balanced(s)?;
    Ok(CasValue::Expr(s.to_string()))
}

/// Rust's float parser also accepts `inf` and `NaN`; CAS numbers start with a digit.
fn looks_numeric(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    let body = body.strip_prefix('.').unwrap_or(body);
    body.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Read a string literal starting at `start`; returns the unescaped text and
/// the byte index just past the closing quote.
fn read_string(s: &str, start: usize) -> Result<(String, usize), String> {
    let mut out = String::new();
    let mut chars = s[start + 1..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => return Err("dangling escape in string".into()),
            },
            '"' => return Ok((out, start + 1 + i + 1)),
            _ => out.push(c),
        }
    }
    Err("unterminated string".into())
}

/// Index of the bracket closing the one at `open`, skipping string contents.
fn matching_close(s: &str, open: usize) -> Result<usize, String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices().skip_while(|(i, _)| *i < open) {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '(' | '{' => stack.push(c),
            ']' | ')' | '}' => {
                let expected = match stack.pop() {
                    Some('[') => ']',
                    Some('(') => ')',
                    Some('{') => '}',
                    _ => return Err(format!("unexpected `{c}`")),
                };
                if c != expected {
                    return Err(format!("expected `{expected}`, found `{c}`"));
                }
                if stack.is_empty() {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err("unbalanced brackets".into())
}

/// Split on `sep` where it is not nested inside brackets or strings.
pub(crate) fn split_top_level(s: &str, sep: char) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("unexpected `{c}`"));
                }
            }
            _ if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if in_string {
        return Err("unterminated string".into());
    }
    if depth != 0 {
        return Err("unbalanced brackets".into());
    }
    parts.push(&s[start..]);
    Ok(parts)
}

pub(crate) fn check_balanced(s: &str) -> Result<(), String> {
    split_top_level(s, '\u{0}').map(|_| ())
}
