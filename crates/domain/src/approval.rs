use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Data-driven, I/O-free approval policy (§4.3.1).
///
/// A tool_call needs approval when: the YOLO flag is off, AND either its
/// tool name is in `always_require`, or it matches one of `operation_rules`
/// (an "operation" argument value that's always dangerous regardless of
/// tool), or it trips a configured numeric threshold (e.g. a compute job
/// requesting more replicas/GPUs than `max_safe_*` allows).
///
/// Argument-malformed calls are never classified here — the turn engine
/// short-circuits those to an error before consulting the policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Disables the approval gate entirely when true.
    #[serde(default)]
    pub yolo: bool,
    /// Tool names that always require approval, independent of arguments.
    #[serde(default)]
    pub always_require: HashSet<String>,
    /// `{tool, operation-argument-value}` pairs that always require approval
    /// (e.g. `("repo", "delete")`, `("pr", "merge")`).
    #[serde(default)]
    pub operation_rules: Vec<OperationRule>,
    /// Numeric argument thresholds above which a call requires approval
    /// (e.g. compute-job submissions requesting many replicas).
    #[serde(default)]
    pub thresholds: Vec<ThresholdRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRule {
    pub tool_name: String,
    /// The value of the arguments' `"operation"` field that triggers this
    /// rule. Matching is exact and case-sensitive.
    pub operation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub tool_name: String,
    /// Name of the numeric argument field to check.
    pub field: String,
    /// Values strictly greater than this require approval.
    pub max_safe: f64,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            yolo: false,
            always_require: default_always_require(),
            operation_rules: default_operation_rules(),
            thresholds: default_thresholds(),
        }
    }
}

fn default_always_require() -> HashSet<String> {
    ["delete_repo", "merge_pull_request", "force_push"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_operation_rules() -> Vec<OperationRule> {
    vec![
        OperationRule { tool_name: "repo_file".into(), operation: "delete".into() },
        OperationRule { tool_name: "repo_file".into(), operation: "overwrite".into() },
        OperationRule { tool_name: "write_file".into(), operation: "overwrite".into() },
    ]
}

fn default_thresholds() -> Vec<ThresholdRule> {
    vec![ThresholdRule {
        tool_name: "submit_job".into(),
        field: "gpu_count".into(),
        max_safe: 1.0,
    }]
}

impl ApprovalPolicy {
    /// Classify a single tool_call. `arguments` is the already-parsed JSON
    /// object; callers must have handled the malformed-JSON case upstream.
    pub fn needs_approval(&self, tool_name: &str, arguments: &Value) -> bool {
        if self.yolo {
            return false;
        }

        if self.always_require.contains(tool_name) {
            return true;
        }

        for rule in &self.operation_rules {
            if rule.tool_name == tool_name {
                if let Some(op) = arguments.get("operation").and_then(Value::as_str) {
                    if op == rule.operation {
                        return true;
                    }
                }
            }
        }

        for rule in &self.thresholds {
            if rule.tool_name == tool_name {
                if let Some(value) = arguments.get(&rule.field).and_then(Value::as_f64) {
                    if value > rule.max_safe {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Partition a batch of `(tool_call, parsed_arguments)` pairs into
    /// (auto, needs_approval), preserving relative order in each bucket.
    pub fn partition<'a, T>(&self, calls: &'a [T], tool_name: impl Fn(&T) -> &str, args: impl Fn(&T) -> &Value) -> (Vec<&'a T>, Vec<&'a T>) {
        let mut auto = Vec::new();
        let mut gated = Vec::new();
        for call in calls {
            if self.needs_approval(tool_name(call), args(call)) {
                gated.push(call);
            } else {
                auto.push(call);
            }
        }
        (auto, gated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn yolo_disables_all_approval() {
        let mut policy = ApprovalPolicy::default();
        policy.yolo = true;
        assert!(!policy.needs_approval("delete_repo", &json!({})));
    }

    #[test]
    fn always_require_tool_name_matches_regardless_of_args() {
        let policy = ApprovalPolicy::default();
        assert!(policy.needs_approval("merge_pull_request", &json!({"pr": 5})));
    }

    #[test]
    fn operation_rule_matches_on_argument_value() {
        let policy = ApprovalPolicy::default();
        assert!(policy.needs_approval("write_file", &json!({"operation": "overwrite", "path": "a.txt"})));
        assert!(!policy.needs_approval("write_file", &json!({"operation": "create", "path": "a.txt"})));
    }

    #[test]
    fn threshold_rule_compares_numeric_field() {
        let policy = ApprovalPolicy::default();
        assert!(policy.needs_approval("submit_job", &json!({"gpu_count": 4})));
        assert!(!policy.needs_approval("submit_job", &json!({"gpu_count": 1})));
        assert!(!policy.needs_approval("submit_job", &json!({})));
    }

    #[test]
    fn unrelated_tool_is_auto() {
        let policy = ApprovalPolicy::default();
        assert!(!policy.needs_approval("get_datetime", &json!({})));
    }

    #[test]
    fn partition_preserves_order_in_each_bucket() {
        let policy = ApprovalPolicy::default();
        let calls = vec![
            ("get_datetime".to_string(), json!({})),
            ("delete_repo".to_string(), json!({})),
            ("read_file".to_string(), json!({})),
        ];
        let (auto, gated) = policy.partition(&calls, |c| c.0.as_str(), |c| &c.1);
        assert_eq!(auto.len(), 2);
        assert_eq!(gated.len(), 1);
        assert_eq!(gated[0].0, "delete_repo");
    }
}
