//! The Tool Router (§4.2): built-in tools plus an optional external tool
//! protocol client, unified behind one registry and one dispatch point.

pub mod builtin;
pub mod path;
pub mod router;

pub use builtin::{TodoItem, TodoStatus, TodoStore};
pub use router::{BuiltinTool, ToolContext, ToolRouter};
