//! Merging per-backend tool lists into one index.

use crate::backend::ToolInfo;
use std::collections::HashSet;

/// Deduplicate tools across backends: iterate backends in the given order
/// and keep the first occurrence of each tool name. Callers sequence the
/// input by backend declaration order, which makes the winner deterministic.
pub fn aggregate_tools(per_backend: Vec<(String, Vec<ToolInfo>)>) -> Vec<ToolInfo> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();

    for (backend, tools) in per_backend {
        for tool in tools {
            if seen.insert(tool.name.clone()) {
                merged.push(tool);
            } else {
                tracing::debug!(
                    tool = %tool.name,
                    backend = %backend,
                    "duplicate tool name shadowed by an earlier backend"
                );
            }
        }
    }

    merged
}
