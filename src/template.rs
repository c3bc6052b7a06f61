//! Packaging script templates.
//!
//! Templates are plain text with `$NAME` or `${NAME}` placeholders and `$$`
//! for a literal dollar sign. Every placeholder must have a value.
//!
//! Values destined for the generated `setup.py` are rendered as Python
//! literals with [`python_literal`], so strings arrive quoted and lists stay
//! lists.

use crate::error::{BuildError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Placeholder name → replacement text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a raw replacement text
    pub fn insert(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.values.insert(key.into(), text.into());
    }

    /// Set a value rendered as a Python literal
    pub fn insert_literal(&mut self, key: impl Into<String>, value: &Value) {
        self.values.insert(key.into(), python_literal(value));
    }

    /// Overlay `other`; its entries win
    pub fn merge(&mut self, other: Substitutions) {
        self.values.extend(other.values);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One lexical piece of a template
#[derive(Debug, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Dollar,
    Placeholder(&'a str),
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_ident_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn parse(template: &str) -> Result<Vec<Piece<'_>>> {
    let mut pieces = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        if pos > 0 {
            pieces.push(Piece::Text(&rest[..pos]));
        }
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            pieces.push(Piece::Dollar);
            rest = tail;
        } else if let Some(braced) = after.strip_prefix('{') {
            let end = braced.find('}').ok_or_else(|| {
                BuildError::template(format!("Unclosed placeholder near {:?}", snippet(rest)))
            })?;
            let name = &braced[..end];
            if !name.starts_with(is_ident_start) || !name.chars().all(is_ident_char) {
                return Err(BuildError::template(format!(
                    "Invalid placeholder name {:?}",
                    name
                )));
            }
            pieces.push(Piece::Placeholder(name));
            rest = &braced[end + 1..];
        } else if after.starts_with(is_ident_start) {
            let end = after
                .find(|c: char| !is_ident_char(c))
                .unwrap_or(after.len());
            pieces.push(Piece::Placeholder(&after[..end]));
            rest = &after[end..];
        } else {
            return Err(BuildError::template(format!(
                "Stray '$' near {:?} (write $$ for a literal dollar)",
                snippet(rest)
            )));
        }
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(pieces)
}

fn snippet(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(20)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}

/// Replace every placeholder in `template`.
pub fn substitute(template: &str, subs: &Substitutions) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    for piece in parse(template)? {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Dollar => out.push('$'),
            Piece::Placeholder(name) => {
                let value = subs.get(name).ok_or_else(|| {
                    BuildError::template(format!("No value for placeholder ${}", name))
                })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

/// Render a JSON value as the equivalent Python literal
pub fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => python_str(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", python_str(k), python_literal(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn python_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
