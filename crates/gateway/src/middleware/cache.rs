//! Result caching keyed by a canonical encoding of `(tool, args)`.

use super::{GatewayMiddleware, MiddlewareContext, Next};
use crate::cache::{CacheStore, DEFAULT_CACHE_MAX_SIZE, MemoryCacheStore};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use rmcp::model::CallToolResult;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct CacheOptions {
    pub ttl_secs: u64,
    /// Capacity of the default in-memory store; ignored when `store` is
    /// supplied (custom stores manage their own bounds).
    pub max_size: Option<usize>,
    pub store: Option<Arc<dyn CacheStore>>,
}

impl CacheOptions {
    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            max_size: None,
            store: None,
        }
    }
}

pub struct CacheMiddleware {
    ttl_secs: u64,
    store: Arc<dyn CacheStore>,
}

impl CacheMiddleware {
    pub fn new(options: CacheOptions) -> Self {
        let store = options.store.unwrap_or_else(|| {
            Arc::new(MemoryCacheStore::new(
                options.max_size.unwrap_or(DEFAULT_CACHE_MAX_SIZE),
            ))
        });
        Self {
            ttl_secs: options.ttl_secs,
            store,
        }
    }
}

#[async_trait]
impl GatewayMiddleware for CacheMiddleware {
    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<CallToolResult> {
        let key = canonical_cache_key(&ctx.tool_name, &ctx.arguments);

        if let Some(cached) = self.store.get(&key).await?
            && let Ok(result) = serde_json::from_value::<CallToolResult>(cached)
        {
            tracing::debug!(tool = %ctx.tool_name, "cache hit");
            return Ok(result);
        }

        let result = next.run(ctx).await?;

        // Error results are never cached.
        if result.is_error != Some(true) {
            let value = serde_json::to_value(&result)
                .map_err(|e| GatewayError::CacheStore(format!("encode result: {e}")))?;
            self.store.set(&key, value, self.ttl_secs).await?;
        }
        Ok(result)
    }
}

/// Stable canonical string for `(tool, args)`.
///
/// Object keys are sorted ascending by code point at every level, array
/// order is preserved, scalars keep their JSON encoding. Key-permuted but
/// otherwise equal argument objects therefore produce byte-equal keys.
pub fn canonical_cache_key(tool: &str, args: &Value) -> String {
    let envelope = serde_json::json!({"args": args, "tool": tool});
    let mut out = String::new();
    write_canonical(&mut out, &envelope);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(out, &map[*key]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_permuted_arguments_produce_equal_keys() {
        let a = canonical_cache_key("t", &json!({"x": 1, "y": 2}));
        let b = canonical_cache_key("t", &json!({"y": 2, "x": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn nested_objects_are_canonicalized_too() {
        let a = canonical_cache_key("t", &json!({"o": {"b": [1, 2], "a": true}}));
        let b = canonical_cache_key("t", &json!({"o": {"a": true, "b": [1, 2]}}));
        assert_eq!(a, b);
    }

    #[test]
    fn array_order_is_significant() {
        let a = canonical_cache_key("t", &json!({"xs": [1, 2]}));
        let b = canonical_cache_key("t", &json!({"xs": [2, 1]}));
        assert_ne!(a, b);
    }

    #[test]
    fn tool_name_is_part_of_the_key() {
        let a = canonical_cache_key("t1", &json!({}));
        let b = canonical_cache_key("t2", &json!({}));
        assert_ne!(a, b);
    }

    #[test]
    fn string_values_stay_json_escaped() {
        let key = canonical_cache_key("t", &json!({"s": "a\"b"}));
        assert!(key.contains(r#""a\"b""#));
    }
}
