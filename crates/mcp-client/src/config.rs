//! MCP configuration types — re-exported from `ak-domain`.
//!
//! The canonical definitions live in `ak_domain::config` so that the
//! gateway config deserializer can include them without depending on
//! the full MCP client crate.

pub use ak_domain::config::{McpConfig, McpServerConfig};
