//! Gateway configuration: parsing, validation, defaults.
//!
//! The config file is YAML or JSON with the same shape. Backend
//! declaration order is preserved (it decides tie-breaking when tool names
//! collide across backends).

use crate::error::{GatewayError, Result};
use crate::glob::GlobPattern;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_GATEWAY_NAME: &str = "mcp-proxy";
pub const DEFAULT_GATEWAY_VERSION: &str = "1.0.0";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// How one upstream MCP backend is reached. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Streamable HTTP endpoint.
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    /// Child process speaking MCP over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
}

/// One routing rule; lower list index wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub pattern: String,
    pub server: String,
}

/// Declarative middleware entries. Transform and custom middleware carry
/// code and are installed programmatically instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MiddlewareConfig {
    Filter {
        #[serde(default)]
        allow: Option<Vec<String>>,
        #[serde(default)]
        deny: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    Cache {
        /// Entry lifetime in seconds.
        ttl: u64,
        #[serde(default)]
        max_size: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Name advertised to MCP clients.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Listener bind address (`ip:port`).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upstream backends by unique name, in declaration order.
    pub servers: IndexMap<String, BackendConfig>,
    /// Evaluated in list order; first match wins.
    #[serde(default)]
    pub routing: Vec<RoutingRule>,
    #[serde(default)]
    pub middleware: Vec<MiddlewareConfig>,
    /// When present, tool calls through the gateway are recorded.
    #[serde(default)]
    pub analytics: Option<conflux_analytics::AnalyticsConfig>,
}

fn default_name() -> String {
    DEFAULT_GATEWAY_NAME.to_string()
}

fn default_version() -> String {
    DEFAULT_GATEWAY_VERSION.to_string()
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl GatewayConfig {
    /// Load from a YAML or JSON file (by extension; YAML parses JSON too).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&raw)
                .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))?
        } else {
            serde_yaml::from_str(&raw)
                .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(raw).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gateway cannot serve: routing rules that
    /// point at undeclared backends and glob patterns that do not compile.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.routing {
            if !self.servers.contains_key(&rule.server) {
                return Err(GatewayError::Config(format!(
                    "routing rule '{}' references unknown backend '{}'",
                    rule.pattern, rule.server
                )));
            }
            GlobPattern::compile(&rule.pattern)?;
        }

        for middleware in &self.middleware {
            match middleware {
                MiddlewareConfig::Filter { allow, deny } => {
                    for pattern in allow.iter().flatten().chain(deny.iter().flatten()) {
                        GlobPattern::compile(pattern)?;
                    }
                }
                MiddlewareConfig::Cache { max_size, .. } => {
                    if *max_size == Some(0) {
                        return Err(GatewayError::Config(
                            "cache maxSize must be at least 1".to_string(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
