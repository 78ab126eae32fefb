//! Shared types for the agent orchestration kernel: the message/event/
//! operation wire model, persisted-session records, configuration, and the
//! pure approval policy. Every other crate in the workspace depends on this
//! one; it depends on nothing else in the workspace.

pub mod approval;
pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod operation;
pub mod session;
pub mod stream;

pub use approval::ApprovalPolicy;
pub use config::{
    Config, FallbackConfig, McpConfig, McpServerConfig, ProviderConfig, ProviderKind, RoleConfig,
    ToolsConfig,
};
pub use error::{Error, Result};
pub use event::{Event, EventType, ToolCallState};
pub use message::{Message, Role, ToolCall, ToolDefinition};
pub use operation::{ApprovalDecision, Operation};
pub use session::{PendingApproval, PersistedSession, SessionIndexEntry, SessionStatus, UserContext};
pub use stream::{BoxStream, StreamEvent, ToolCallAccumulator, Usage};
