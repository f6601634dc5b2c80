//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON wire
//! format. Each type implements [`Default`] with production default values.
//! Types marked with `#[serde(default)]` allow partial JSON — missing fields
//! get their default value during deserialization.

use std::collections::BTreeMap;

use bitebase_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

/// Root settings type for the BiteBase backend.
///
/// Loaded from `~/.bitebase/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// # JSON Format
///
/// All field names are camelCase. Example:
///
/// ```json
/// {
///   "version": "0.1.0",
///   "server": { "httpPort": 3001 },
///   "mcp": {
///     "servers": {
///       "scraper": {
///         "transport": { "type": "stdio", "command": "npx", "args": ["-y", "firecrawl-mcp"] },
///         "capabilities": ["web-scraping"]
///       }
///     }
///   }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Server network settings.
    pub server: ServerSettings,
    /// MCP connection manager settings.
    pub mcp: McpSettings,
    /// Analysis pipeline settings.
    pub pipeline: PipelineSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "bitebase".to_string(),
            server: ServerSettings::default(),
            mcp: McpSettings::default(),
            pipeline: PipelineSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Correct invalid values in place rather than rejecting the file.
    ///
    /// Called automatically during loading. Users get corrected behavior
    /// plus a warning instead of a confusing startup error.
    pub fn validate(&mut self) {
        for stage in &mut self.pipeline.stages {
            if stage.weight == 0 {
                tracing::warn!(agent = %stage.agent, "stage weight 0 normalized to 1");
                stage.weight = 1;
            }
        }
        if self.mcp.call_timeout_secs == 0 {
            tracing::warn!("callTimeoutSecs 0 normalized to 1");
            self.mcp.call_timeout_secs = 1;
        }
        if self.mcp.health_check_interval_secs == 0 {
            tracing::warn!("healthCheckIntervalSecs 0 normalized to 1");
            self.mcp.health_check_interval_secs = 1;
        }
    }
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// HTTP + WebSocket listen port.
    pub http_port: u16,
    /// Bind address.
    pub bind_addr: String,
    /// Per-connection outbound event channel capacity.
    pub event_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 3001,
            bind_addr: "127.0.0.1".to_string(),
            event_buffer: 256,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default tracing filter directive (overridden by `RUST_LOG`).
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// MCP connection manager settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpSettings {
    /// Configured tool servers, keyed by server id.
    pub servers: BTreeMap<String, McpServerDef>,
    /// Seconds between health-check pings.
    pub health_check_interval_secs: u64,
    /// Per-request timeout for tool calls, seconds.
    pub call_timeout_secs: u64,
    /// Reconnect backoff policy (5 attempts, exponential).
    pub reconnect: RetryConfig,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            health_check_interval_secs: 30,
            call_timeout_secs: 30,
            reconnect: RetryConfig::default(),
        }
    }
}

/// One configured MCP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerDef {
    /// How to reach the server.
    pub transport: TransportDef,
    /// Capability strings used for fallback routing.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Disabled servers are registered but never connected.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Transport definition for an MCP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransportDef {
    /// Child process speaking newline-delimited JSON-RPC over stdio.
    #[serde(rename_all = "camelCase")]
    Stdio {
        /// Executable to spawn.
        command: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Extra environment variables.
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Working directory for the child.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Remote server speaking streamable HTTP with SSE responses.
    #[serde(rename_all = "camelCase")]
    Sse {
        /// Endpoint base URL.
        url: String,
        /// Extra request headers (auth tokens).
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

/// Analysis pipeline settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Stages in execution order.
    pub stages: Vec<StageDef>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stages: vec![
                StageDef {
                    agent: "market-discovery".to_string(),
                    capability: "web-scraping".to_string(),
                    tool: "search_market".to_string(),
                    weight: 1,
                },
                StageDef {
                    agent: "competitor-analysis".to_string(),
                    capability: "data-analysis".to_string(),
                    tool: "compare_competitors".to_string(),
                    weight: 1,
                },
                StageDef {
                    agent: "financial-modeling".to_string(),
                    capability: "financial-datasets".to_string(),
                    tool: "project_financials".to_string(),
                    weight: 1,
                },
                StageDef {
                    agent: "report-synthesis".to_string(),
                    capability: "charting".to_string(),
                    tool: "render_report".to_string(),
                    weight: 1,
                },
            ],
        }
    }
}

/// One pipeline stage: a named agent bound to a capability and tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDef {
    /// Display name used in events and reports.
    pub agent: String,
    /// Capability routing key for the MCP manager.
    pub capability: String,
    /// Tool name invoked on the selected server.
    pub tool: String,
    /// Relative contribution to overall progress.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"server": {"httpPort": 8080}}"#).unwrap();
        assert_eq!(settings.server.http_port, 8080);
        assert_eq!(settings.server.bind_addr, "127.0.0.1");
        assert_eq!(settings.mcp.health_check_interval_secs, 30);
    }

    #[test]
    fn stdio_transport_parses() {
        let def: McpServerDef = serde_json::from_str(
            r#"{
                "transport": {"type": "stdio", "command": "npx", "args": ["-y", "firecrawl-mcp"]},
                "capabilities": ["web-scraping", "search"]
            }"#,
        )
        .unwrap();
        assert!(def.enabled);
        assert_eq!(def.capabilities.len(), 2);
        match def.transport {
            TransportDef::Stdio { command, args, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args, vec!["-y", "firecrawl-mcp"]);
            }
            TransportDef::Sse { .. } => panic!("expected stdio"),
        }
    }

    #[test]
    fn sse_transport_parses() {
        let def: McpServerDef = serde_json::from_str(
            r#"{
                "transport": {"type": "sse", "url": "https://mcp.example.com", "headers": {"authorization": "Bearer x"}},
                "enabled": false
            }"#,
        )
        .unwrap();
        assert!(!def.enabled);
        assert!(def.capabilities.is_empty());
        match def.transport {
            TransportDef::Sse { url, headers } => {
                assert_eq!(url, "https://mcp.example.com");
                assert_eq!(headers.get("authorization").unwrap(), "Bearer x");
            }
            TransportDef::Stdio { .. } => panic!("expected sse"),
        }
    }

    #[test]
    fn default_pipeline_has_four_ordered_stages() {
        let pipeline = PipelineSettings::default();
        let agents: Vec<&str> = pipeline.stages.iter().map(|s| s.agent.as_str()).collect();
        assert_eq!(
            agents,
            vec![
                "market-discovery",
                "competitor-analysis",
                "financial-modeling",
                "report-synthesis"
            ]
        );
    }

    #[test]
    fn validate_normalizes_zero_weight() {
        let mut settings = Settings::default();
        settings.pipeline.stages[0].weight = 0;
        settings.mcp.call_timeout_secs = 0;
        settings.validate();
        assert_eq!(settings.pipeline.stages[0].weight, 1);
        assert_eq!(settings.mcp.call_timeout_secs, 1);
    }

    #[test]
    fn stage_weight_defaults_to_one() {
        let stage: StageDef = serde_json::from_str(
            r#"{"agent": "a", "capability": "c", "tool": "t"}"#,
        )
        .unwrap();
        assert_eq!(stage.weight, 1);
    }

    #[test]
    fn settings_round_trip() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.server.http_port, settings.server.http_port);
        assert_eq!(back.pipeline.stages.len(), settings.pipeline.stages.len());
    }
}
