use serde::{Deserialize, Serialize};

use crate::approval::ApprovalPolicy;

/// Top-level, layered configuration: defaults → TOML file → environment
/// variable overrides (applied in that order by the gateway's config loader).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub approval: ApprovalPolicy,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: d_port(), host: d_host() }
    }
}

/// Context Manager thresholds (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum context window size, in estimated tokens.
    #[serde(default = "d_max_context")]
    pub max_context: u32,
    /// Target post-compaction size as a fraction of `max_context`.
    #[serde(default = "d_compact_fraction")]
    pub compact_fraction: f64,
    /// Trailing messages never touched by compaction.
    #[serde(default = "d_untouched_tail")]
    pub untouched_tail: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context: d_max_context(),
            compact_fraction: d_compact_fraction(),
            untouched_tail: d_untouched_tail(),
        }
    }
}

impl ContextConfig {
    /// The token estimate above which `compact()` is no longer a no-op.
    pub fn compact_threshold(&self) -> f64 {
        self.max_context as f64 * self.compact_fraction
    }
}

/// Turn Engine bounds (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self { max_iterations: d_max_iterations() }
    }
}

/// Persistence Engine tuning (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "d_sync_interval")]
    pub sync_interval_secs: u64,
    /// Object-store bucket/container URL (e.g. `s3://bucket`, `file:///data`).
    #[serde(default = "d_object_store_url")]
    pub object_store_url: String,
    /// Maximum backoff between retries after consecutive sync failures.
    #[serde(default = "d_max_backoff")]
    pub max_backoff_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: d_sync_interval(),
            object_store_url: d_object_store_url(),
            max_backoff_secs: d_max_backoff(),
        }
    }
}

/// Auth / Token Store configuration (§4.7). Secrets are resolved from
/// environment variables at startup; these fields hold the resolved values
/// (or `None` to fall back to an in-process-generated, non-persistent key).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub token_encryption_key: Option<String>,
    #[serde(default = "d_token_lifetime_hours")]
    pub token_lifetime_hours: i64,
}

impl AuthConfig {
    pub fn token_lifetime_hours_or_default(&self) -> i64 {
        if self.token_lifetime_hours == 0 {
            d_token_lifetime_hours()
        } else {
            self.token_lifetime_hours
        }
    }
}

/// LLM provider configuration (§6 LLM provider contract). A role names a
/// routing policy (e.g. "planner", "summarizer"); each role resolves to a
/// `"provider_id/model_name"` primary plus an ordered fallback list tried on
/// timeout or provider error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub roles: std::collections::HashMap<String, RoleConfig>,
    #[serde(default = "d_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            roles: std::collections::HashMap::new(),
            default_timeout_ms: d_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: String,
    /// Name of the environment variable holding the API key. Unused by the
    /// in-memory test backend.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// `"provider_id/model_name"`.
    pub model: String,
    #[serde(default)]
    pub require_tools: bool,
    #[serde(default)]
    pub require_json: bool,
    #[serde(default)]
    pub require_streaming: bool,
    #[serde(default)]
    pub fallbacks: Vec<FallbackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub model: String,
    #[serde(default)]
    pub require_tools: bool,
    #[serde(default)]
    pub require_json: bool,
}

/// External tool protocol (MCP) server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// MCP servers are always spawned as a child process speaking JSON-RPC over
/// stdin/stdout (§4.2) — there is no other supported transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

/// Tool Router configuration (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Workspace root that `read_file`/`write_file` are constrained to.
    #[serde(default = "d_workspace_root")]
    pub workspace_root: String,
    /// External tool names never registered, regardless of what the
    /// external protocol client advertises.
    #[serde(default)]
    pub disallowed_external_tool_names: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { workspace_root: d_workspace_root(), disallowed_external_tool_names: Vec::new() }
    }
}

// ── Default value helpers (serde) ──────────────────────────────────

fn d_port() -> u16 {
    8787
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_max_context() -> u32 {
    128_000
}
fn d_compact_fraction() -> f64 {
    0.1
}
fn d_untouched_tail() -> usize {
    10
}
fn d_max_iterations() -> u32 {
    10
}
fn d_sync_interval() -> u64 {
    30
}
fn d_object_store_url() -> String {
    "file:///data".into()
}
fn d_max_backoff() -> u64 {
    300
}
fn d_token_lifetime_hours() -> i64 {
    8
}
fn d_timeout_ms() -> u64 {
    20_000
}
fn d_workspace_root() -> String {
    ".".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.turn.max_iterations, 10);
        assert!(!config.approval.yolo);
    }

    #[test]
    fn compact_threshold_scales_with_fraction() {
        let context = ContextConfig {
            max_context: 1000,
            compact_fraction: 0.1,
            untouched_tail: 5,
        };
        assert_eq!(context.compact_threshold(), 100.0);
    }

    #[test]
    fn token_lifetime_falls_back_when_zero() {
        let auth = AuthConfig { token_lifetime_hours: 0, ..Default::default() };
        assert_eq!(auth.token_lifetime_hours_or_default(), 8);
    }

    #[test]
    fn config_deserializes_from_partial_toml() {
        let toml_str = r#"
            [server]
            port = 9000
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.context.max_context, 128_000);
    }
}
