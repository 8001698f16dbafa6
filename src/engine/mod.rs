// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! The execution engine: shared run state ([`context`]), the lifecycle
//! event bus ([`events`]), the per-stage model/tool loop ([`task_agent`]),
//! and the DAG-walking orchestrator ([`pipeline_engine`]).

pub mod context;
pub mod events;
pub mod pipeline_engine;
pub mod task_agent;

pub use context::{
    AbortController, HookManager, ModelCaller, ModelRequest, ModelResponse, NoopHookManager,
    PipelineContext, StopReason, ToolCallRequest, ToolResolver, MAX_SUB_PIPELINE_DEPTH,
};
pub use events::{bridge_to_parent, EventEmitter, PipelineEvent};
pub use pipeline_engine::{GatedOutcome, PipelineEngine, PipelineReport, SkillResolverFn};
pub use task_agent::TaskAgent;
