//! Instance-type wildcard patterns.
//!
//! `*` stands for any run of characters, including none. Every other
//! character is literal, matching is case-insensitive and covers the whole
//! instance type.

use regex::Regex;

use crate::error::{PoolError, PoolResult};

/// A compiled list of instance-type patterns. Matches if any pattern does.
#[derive(Debug, Clone)]
pub struct TypeMatcher {
    patterns: Vec<Regex>,
}

impl TypeMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> PoolResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| compile(p.as_ref()))
            .collect::<PoolResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// An empty pattern list matches nothing.
    pub fn matches(&self, instance_type: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(instance_type))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn compile(pattern: &str) -> PoolResult<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?is)^{body}$")).map_err(|source| PoolError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
