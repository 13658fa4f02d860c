//! Query term grammar
//!
//! `[<multiplier>:]<payload>` where the payload is an http(s) URL, a local
//! file reference or a free-text phrase, tried in that order.

use crate::error::{PixseekError, Result};
use regex::Regex;
use std::path::PathBuf;

/// What a term's payload refers to
#[derive(Debug, Clone, PartialEq)]
pub enum TermKind {
    Text(String),
    File(PathBuf),
    Url(String),
}

/// A parsed query term
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTerm {
    pub multiplier: f32,
    pub kind: TermKind,
}

/// Compiled term patterns
pub struct TermParser {
    multiplier: Regex,
    windows_path: Regex,
}

impl TermParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                PixseekError::InvalidInput(format!("Invalid query pattern '{}': {}", pattern, e))
            })
        };

        Ok(Self {
            multiplier: compile(r"(?s)^(\d+(?:\.\d*)?|\.\d+):(.+)$")?,
            windows_path: compile(r"(?i)^[a-z]:\\")?,
        })
    }

    /// Split an optional `<number>:` prefix; malformed prefixes stay in the phrase
    pub fn split_multiplier<'q>(&self, raw: &'q str) -> (f32, &'q str) {
        let Some(caps) = self.multiplier.captures(raw) else {
            return (1.0, raw);
        };
        let (Some(number), Some(payload)) = (caps.get(1), caps.get(2)) else {
            return (1.0, raw);
        };

        match parse_number(number.as_str()) {
            Some(multiplier) => (multiplier, payload.as_str()),
            None => (1.0, raw),
        }
    }

    /// Classify a payload
    pub fn classify(&self, payload: &str) -> TermKind {
        if payload.starts_with("https://") || payload.starts_with("http://") {
            TermKind::Url(payload.to_string())
        } else if let Some(path) = payload.strip_prefix("file://") {
            TermKind::File(PathBuf::from(path))
        } else if payload.starts_with('/')
            || payload.starts_with("./")
            || self.windows_path.is_match(payload)
        {
            TermKind::File(PathBuf::from(payload))
        } else {
            TermKind::Text(payload.to_string())
        }
    }

    pub fn parse(&self, raw: &str) -> QueryTerm {
        let (multiplier, payload) = self.split_multiplier(raw);
        QueryTerm {
            multiplier,
            kind: self.classify(payload),
        }
    }

    pub fn parse_all<S: AsRef<str>>(&self, raw: &[S]) -> Vec<QueryTerm> {
        raw.iter().map(|r| self.parse(r.as_ref())).collect()
    }
}

fn parse_number(number: &str) -> Option<f32> {
    let mut owned = number.to_string();
    if owned.starts_with('.') {
        owned.insert(0, '0');
    }
    if owned.ends_with('.') {
        owned.push('0');
    }
    owned.parse::<f32>().ok().filter(|m| m.is_finite())
}
