// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Error types for skillgraph
//!
//! One flat error enum covers the whole crate, the same way conflow's
//! `ConflowError` does: every stage of loading, scheduling, tool dispatch,
//! and budget enforcement surfaces through `SkillGraphError` so callers
//! never need to match on multiple error types to find out what happened.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for skillgraph operations
pub type SkillGraphResult<T> = Result<T, SkillGraphError>;

/// Main error type for skillgraph
#[derive(Error, Debug, Diagnostic)]
pub enum SkillGraphError {
    // ─────────────────────────────────────────────────────────────────
    // Skill load / validation errors (§4.1, §7 "Load errors")
    // ─────────────────────────────────────────────────────────────────
    #[error("failed to load skill '{name}': {reason}")]
    #[diagnostic(code(skillgraph::skill_load))]
    SkillLoadError { name: String, reason: String },

    #[error("skill '{skill}' is invalid: {path}: {reason}")]
    #[diagnostic(code(skillgraph::skill_validation))]
    SkillValidationError {
        skill: String,
        path: String,
        reason: String,
    },

    #[error("cycle detected involving stage '{participant}'")]
    #[diagnostic(
        code(skillgraph::skill_cycle),
        help("review the `input_from` / `sub_pipeline` edges that form the cycle")
    )]
    SkillCycleError { participant: String },

    #[error("stage '{stage}' not found in skill '{skill}'")]
    #[diagnostic(code(skillgraph::stage_not_found))]
    StageNotFound { skill: String, stage: String },

    #[error("input '{name}' is required but was not provided")]
    #[diagnostic(code(skillgraph::missing_input))]
    MissingRequiredInput { name: String },

    // ─────────────────────────────────────────────────────────────────
    // Tool errors (§4.2, §4.3)
    // ─────────────────────────────────────────────────────────────────
    #[error("tool '{tool}' is unavailable: {reason}")]
    #[diagnostic(code(skillgraph::tool_unavailable))]
    ToolUnavailable { tool: String, reason: String },

    #[error("tool '{tool}' call failed: {reason}")]
    #[diagnostic(code(skillgraph::tool_call_failed))]
    ToolCallFailed { tool: String, reason: String },

    #[error("tool '{tool}' parameters invalid: {reason}")]
    #[diagnostic(code(skillgraph::tool_params_invalid))]
    ToolParamsInvalid { tool: String, reason: String },

    #[error("tool server '{server}' connection failed: {reason}")]
    #[diagnostic(code(skillgraph::tool_server_connect))]
    ToolServerConnectFailed { server: String, reason: String },

    #[error("no tool server registered for qualified name '{qualified}'")]
    #[diagnostic(code(skillgraph::tool_server_not_found))]
    ToolServerNotFound { qualified: String },

    // ─────────────────────────────────────────────────────────────────
    // Permission errors (§4.4, §7)
    // ─────────────────────────────────────────────────────────────────
    #[error("tool '{tool}' denied by policy: {reason}")]
    #[diagnostic(code(skillgraph::permission_denied))]
    PermissionDenied { tool: String, reason: String },

    // ─────────────────────────────────────────────────────────────────
    // Budget errors (§4.5, §7 "Budget error")
    // ─────────────────────────────────────────────────────────────────
    #[error("budget exceeded: spent+committed {spent_plus_committed:.4} > limit {limit:.4}")]
    #[diagnostic(
        code(skillgraph::budget_exceeded),
        help("raise maxBudgetUsd or reduce pipeline scope")
    )]
    BudgetExceededError {
        spent_plus_committed: f64,
        limit: f64,
    },

    #[error("estimated cost ${estimate:.4} exceeds remaining session budget. Session spent: ${spent:.4} of ${budget:.2}")]
    #[diagnostic(code(skillgraph::session_budget_exceeded))]
    SessionBudgetExceeded {
        estimate: f64,
        spent: f64,
        budget: f64,
    },

    // ─────────────────────────────────────────────────────────────────
    // Cancellation (§5, §7)
    // ─────────────────────────────────────────────────────────────────
    #[error("aborted")]
    #[diagnostic(code(skillgraph::aborted))]
    AbortError,

    // ─────────────────────────────────────────────────────────────────
    // Sub-pipeline errors (§4.7 runSubPipeline)
    // ─────────────────────────────────────────────────────────────────
    #[error("sub-pipeline nesting exceeded max depth {max_depth}")]
    #[diagnostic(
        code(skillgraph::sub_pipeline_depth),
        help("flatten the sub-pipeline chain or raise MAX_SUB_PIPELINE_DEPTH")
    )]
    SubPipelineDepthExceeded { max_depth: usize },

    #[error("sub-pipeline stage '{stage}' has no loadSkill resolver configured")]
    #[diagnostic(code(skillgraph::sub_pipeline_no_loader))]
    SubPipelineLoaderMissing { stage: String },

    // ─────────────────────────────────────────────────────────────────
    // Stage execution errors (§4.6, §7 "Per-stage model error")
    // ─────────────────────────────────────────────────────────────────
    #[error("stage '{stage}' failed: {reason}")]
    #[diagnostic(code(skillgraph::stage_failed))]
    StageFailed { stage: String, reason: String },

    // ─────────────────────────────────────────────────────────────────
    // File / IO / parse errors
    // ─────────────────────────────────────────────────────────────────
    #[error("file not found: {path}")]
    #[diagnostic(code(skillgraph::file_not_found))]
    FileNotFound { path: PathBuf },

    #[error("failed to read file '{path}': {error}")]
    #[diagnostic(code(skillgraph::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(skillgraph::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(skillgraph::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(skillgraph::json_error))]
    Json { message: String },
}

impl From<std::io::Error> for SkillGraphError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for SkillGraphError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for SkillGraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json {
            message: e.to_string(),
        }
    }
}

impl SkillGraphError {
    /// True for errors that must abort the remaining pipeline levels (§4.6,
    /// §7): budget exhaustion and cancellation are always fatal, everything
    /// else is classified fatal only by the caller's context (e.g. an
    /// aborted signal wrapping a different underlying error).
    pub fn is_inherently_fatal(&self) -> bool {
        matches!(
            self,
            Self::BudgetExceededError { .. }
                | Self::AbortError
                | Self::SubPipelineDepthExceeded { .. }
        )
    }
}
