// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! PermissionGate: decides whether a stage may call a given tool (§4.4).
//!
//! A policy is a map from pattern to [`Decision`]. Lookup precedence is
//! exact qualified name, then the longest matching `prefix.*` glob, then
//! the policy's configured default — never the reverse, so a narrower rule
//! always wins over a broader one. A glob's prefix boundary is a literal
//! `/` or `_` in the qualified name, not the glob pattern's own `.`
//! separator — `"mcp.*"` matches `"mcp/search"` and `"mcp_search"` but not
//! `"mcptools"`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SkillGraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    AskUser,
}

/// A single tool-access policy: explicit rules plus a fallback.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    rules: HashMap<String, Decision>,
    default: Decision,
    /// When set, only tools matching this allow-list may run at all,
    /// regardless of `rules`/`default` — used for read-only execution
    /// modes (§4.4 "read-only allow-list").
    read_only_allow_list: Option<Vec<String>>,
}

impl PermissionPolicy {
    pub fn new(default: Decision) -> Self {
        Self {
            rules: HashMap::new(),
            default,
            read_only_allow_list: None,
        }
    }

    pub fn with_rule(mut self, pattern: impl Into<String>, decision: Decision) -> Self {
        self.rules.insert(pattern.into(), decision);
        self
    }

    pub fn with_read_only_allow_list(mut self, allowed: Vec<String>) -> Self {
        self.read_only_allow_list = Some(allowed);
        self
    }

    /// Resolve the decision for a qualified tool name (`server/tool`),
    /// without enforcing it — see [`PermissionGate::enforce`] for the
    /// error-raising wrapper.
    pub fn decide(&self, qualified_name: &str) -> Decision {
        if let Some(allow_list) = &self.read_only_allow_list {
            if !allow_list.iter().any(|p| Self::matches(p, qualified_name)) {
                return Decision::Deny;
            }
        }

        if let Some(decision) = self.rules.get(qualified_name) {
            return *decision;
        }

        let mut best: Option<(&str, &Decision)> = None;
        for (pattern, decision) in &self.rules {
            if Self::matches(pattern, qualified_name) && pattern.ends_with(".*") {
                match best {
                    Some((current, _)) if current.len() >= pattern.len() => {}
                    _ => best = Some((pattern.as_str(), decision)),
                }
            }
        }
        if let Some((_, decision)) = best {
            return *decision;
        }

        self.default
    }

    /// A `prefix.*` glob matches `qualified_name` when `qualified_name`
    /// starts with `prefix` followed by a `/` or `_` boundary (§4.4,
    /// testable property 7) — a bare prefix collision like `"mcptools"`
    /// against `"mcp.*"` does not match.
    fn matches(pattern: &str, qualified_name: &str) -> bool {
        match pattern.strip_suffix(".*") {
            Some(prefix) => {
                qualified_name.starts_with(prefix)
                    && qualified_name[prefix.len()..]
                        .chars()
                        .next()
                        .is_some_and(|c| c == '/' || c == '_')
            }
            None => pattern == qualified_name,
        }
    }
}

/// User callback invoked for tools at the `confirm` permission level
/// (§4.4 `onPermissionRequired`) and for the pipeline-level approval
/// threshold (§4.5 `onApprovalRequired`, scenario S4).
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn on_permission_required(&self, tool: &str, args: &Value) -> bool;

    /// Called when a pipeline's estimated total cost exceeds the
    /// caller's approval threshold, before any stage runs. `false`
    /// declines the whole run without charging anything.
    async fn on_approval_required(&self, estimate_usd: f64) -> bool;
}

/// Default callback for contexts with no interactive surface: every
/// `confirm`-level tool, and every above-threshold pipeline, is declined.
pub struct DenyAllApprovals;

#[async_trait]
impl ApprovalCallback for DenyAllApprovals {
    async fn on_permission_required(&self, _tool: &str, _args: &Value) -> bool {
        false
    }

    async fn on_approval_required(&self, _estimate_usd: f64) -> bool {
        false
    }
}

pub struct PermissionGate;

impl PermissionGate {
    /// Resolve and enforce the policy decision for a tool call. `Deny`
    /// becomes an immediate `PermissionDenied` failure; `confirm` (i.e.
    /// `AskUser`) calls `approval.on_permission_required` and denies if it
    /// returns `false` (§4.4 enforcement wrapper).
    pub async fn enforce(
        policy: &PermissionPolicy,
        qualified_name: &str,
        args: &Value,
        approval: &dyn ApprovalCallback,
    ) -> Result<(), SkillGraphError> {
        match policy.decide(qualified_name) {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(SkillGraphError::PermissionDenied {
                tool: qualified_name.to_string(),
                reason: "denied by policy".into(),
            }),
            Decision::AskUser => {
                if approval.on_permission_required(qualified_name, args).await {
                    Ok(())
                } else {
                    Err(SkillGraphError::PermissionDenied {
                        tool: qualified_name.to_string(),
                        reason: "user declined".into(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_rule_wins_over_glob() {
        let policy = PermissionPolicy::new(Decision::Deny)
            .with_rule("fs.*", Decision::Allow)
            .with_rule("fs/delete", Decision::Deny);
        assert_eq!(policy.decide("fs/delete"), Decision::Deny);
        assert_eq!(policy.decide("fs/read"), Decision::Allow);
    }

    #[test]
    fn glob_wins_over_default() {
        let policy = PermissionPolicy::new(Decision::Deny).with_rule("search.*", Decision::Allow);
        assert_eq!(policy.decide("search/web"), Decision::Allow);
        assert_eq!(policy.decide("other/tool"), Decision::Deny);
    }

    #[test]
    fn longest_glob_prefix_wins() {
        let policy = PermissionPolicy::new(Decision::Deny)
            .with_rule("fs.*", Decision::Allow)
            .with_rule("fs/write.*", Decision::Deny);
        assert_eq!(policy.decide("fs/write/append"), Decision::Deny);
        assert_eq!(policy.decide("fs/read"), Decision::Allow);
    }

    #[test]
    fn read_only_allow_list_overrides_everything() {
        let policy = PermissionPolicy::new(Decision::Allow)
            .with_rule("fs/write", Decision::Allow)
            .with_read_only_allow_list(vec!["fs/read".into()]);
        assert_eq!(policy.decide("fs/write"), Decision::Deny);
        assert_eq!(policy.decide("fs/read"), Decision::Allow);
    }

    #[tokio::test]
    async fn enforce_turns_deny_into_error() {
        let policy = PermissionPolicy::new(Decision::Deny);
        let err = PermissionGate::enforce(&policy, "fs/delete", &Value::Null, &DenyAllApprovals)
            .await
            .unwrap_err();
        assert!(matches!(err, SkillGraphError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn enforce_calls_approval_callback_for_confirm_level() {
        struct AlwaysApprove;
        #[async_trait]
        impl ApprovalCallback for AlwaysApprove {
            async fn on_permission_required(&self, _tool: &str, _args: &Value) -> bool {
                true
            }

            async fn on_approval_required(&self, _estimate_usd: f64) -> bool {
                true
            }
        }

        let policy = PermissionPolicy::new(Decision::AskUser);
        assert!(PermissionGate::enforce(&policy, "fs/write", &Value::Null, &AlwaysApprove).await.is_ok());
        assert!(PermissionGate::enforce(&policy, "fs/write", &Value::Null, &DenyAllApprovals).await.is_err());
    }

    #[test]
    fn glob_does_not_match_unrelated_prefix_collision() {
        let policy = PermissionPolicy::new(Decision::Deny).with_rule("fs.*", Decision::Allow);
        assert_eq!(policy.decide("fsx/read"), Decision::Deny);
    }

    /// Testable property 7: exact match beats glob; glob requires a `/`
    /// or `_` boundary, so a bare prefix collision falls through to
    /// default.
    #[test]
    fn permission_precedence_matches_spec_example() {
        let policy = PermissionPolicy::new(Decision::Allow)
            .with_rule("mcp.*", Decision::Deny)
            .with_rule("mcp/get_quote", Decision::Allow);
        assert_eq!(policy.decide("mcp/get_quote"), Decision::Allow);
        assert_eq!(policy.decide("mcp/search"), Decision::Deny);
        assert_eq!(policy.decide("mcptools"), Decision::Allow);
    }

    #[test]
    fn underscore_boundary_also_matches_glob() {
        let policy = PermissionPolicy::new(Decision::Allow).with_rule("mcp.*", Decision::Deny);
        assert_eq!(policy.decide("mcp_search"), Decision::Deny);
    }

    #[tokio::test]
    async fn deny_all_approvals_declines_the_approval_threshold_too() {
        assert!(!DenyAllApprovals.on_approval_required(1_000.0).await);
    }
}
