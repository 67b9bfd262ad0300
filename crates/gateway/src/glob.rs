//! Anchored glob patterns for tool-name matching.
//!
//! Two wildcards only: `*` matches any run of characters (including the
//! empty run) and `?` matches exactly one character. Everything else is
//! literal. Matches are whole-string.

use crate::error::{GatewayError, Result};
use regex::Regex;

#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut source = String::with_capacity(pattern.len() + 2);
        source.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
            }
        }
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| GatewayError::Config(format!("invalid glob pattern '{pattern}': {e}")))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// Compile a list of patterns, failing on the first invalid one.
pub fn compile_all(patterns: &[String]) -> Result<Vec<GlobPattern>> {
    patterns.iter().map(|p| GlobPattern::compile(p)).collect()
}
