//! First-match-wins routing of tool names to backend names.

use crate::config::RoutingRule;
use crate::error::Result;
use crate::glob::GlobPattern;

struct CompiledRule {
    pattern: GlobPattern,
    server: String,
}

/// Ordered routing table; patterns are compiled once at construction.
pub struct Router {
    rules: Vec<CompiledRule>,
}

impl Router {
    pub fn new(rules: &[RoutingRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    pattern: GlobPattern::compile(&rule.pattern)?,
                    server: rule.server.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Backend name of the first rule whose pattern matches the whole tool
    /// name, or `None`. O(rules) per lookup.
    pub fn resolve(&self, tool_name: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(tool_name))
            .map(|rule| rule.server.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
