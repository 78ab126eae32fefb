use serde::{Deserialize, Serialize};

/// A single tool_call's approval decision, as supplied by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub tool_call_id: String,
    pub approved: bool,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub edited_script: Option<String>,
}

/// An operator command, tagged by `op_type` with a `data` payload (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op_type", content = "data", rename_all = "snake_case")]
pub enum Operation {
    UserInput { text: String },
    ExecApproval { approvals: Vec<ApprovalDecision> },
    Interrupt,
    Undo,
    Compact,
    Shutdown,
}
