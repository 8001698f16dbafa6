// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Shared state threaded through a pipeline run and its sub-pipelines
//! (§3 "PipelineContext", §4.6, §4.7).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::budget::CostTracker;
use crate::concurrency::ConcurrencyGate;
use crate::engine::events::EventEmitter;
use crate::errors::SkillGraphError;
use crate::skill::Stage;
use crate::tools::{ApprovalCallback, DenyAllApprovals, PermissionPolicy, ToolCallResult, ToolDescriptor};

/// Default bound on sub-pipeline recursion depth (§4.7, §5).
pub const MAX_SUB_PIPELINE_DEPTH: usize = 5;

/// One model invocation request built from a stage's resolved prompt.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tools: Vec<ToolDescriptor>,
}

/// A tool invocation the model asked for mid-completion.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub qualified_name: String,
    pub arguments: Value,
}

/// Why a model call stopped producing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub cost_usd: f64,
    pub stop_reason: StopReason,
}

/// Abstraction over the concrete LLM SDK a caller supplies — this crate
/// never talks to a provider directly (§1 Non-goals).
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(&self, request: ModelRequest) -> Result<ModelResponse, SkillGraphError>;

    /// Estimate the cost of a not-yet-made call, for budget reservation
    /// ahead of dispatch.
    fn estimate_cost(&self, request: &ModelRequest) -> f64;

    /// Stream a response, invoking `on_chunk` with each incremental piece
    /// of text as it arrives (§4.6 streaming path, used when a stage
    /// declares no tools). The default implementation has no incremental
    /// stream to offer, so it makes one ordinary call and reports the
    /// whole response as a single chunk; a caller whose SDK streams
    /// natively should override this.
    async fn call_streaming(
        &self,
        request: ModelRequest,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<ModelResponse, SkillGraphError> {
        let response = self.call(request).await?;
        on_chunk(&response.text);
        Ok(response)
    }
}

/// Abstraction over tool dispatch a `TaskAgent` calls into — wraps the
/// permission gate and `ToolAdapter` call contract behind one surface so
/// `TaskAgent` doesn't need its own copies of both.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(&self, qualified_name: &str) -> Result<ToolDescriptor, SkillGraphError>;
    async fn call(&self, qualified_name: &str, arguments: Value) -> Result<ToolCallResult, SkillGraphError>;
}

/// Lifecycle hooks a caller can observe or veto from (§4.6).
#[async_trait]
pub trait HookManager: Send + Sync {
    async fn before_stage(&self, _stage: &Stage, _context: &PipelineContext) -> Result<(), SkillGraphError> {
        Ok(())
    }

    async fn after_stage(&self, _stage: &Stage, _output: &Value) -> Result<(), SkillGraphError> {
        Ok(())
    }
}

/// A hook manager that does nothing, for callers with no hooks to install.
pub struct NoopHookManager;

#[async_trait]
impl HookManager for NoopHookManager {}

/// Combined cancellation signal: this crate's own internal abort (set when
/// a fatal error occurs) OR'd with whatever external signal the caller
/// passed in (§4.6, §5 cancellation).
#[derive(Clone, Default)]
pub struct AbortController {
    internal: Arc<AtomicBool>,
    external: Option<Arc<AtomicBool>>,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_external(external: Arc<AtomicBool>) -> Self {
        Self { internal: Arc::new(AtomicBool::new(false)), external: Some(external) }
    }

    pub fn abort(&self) {
        self.internal.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.internal.load(Ordering::SeqCst)
            || self.external.as_ref().is_some_and(|e| e.load(Ordering::SeqCst))
    }
}

/// Everything a running pipeline and its sub-pipelines share: inputs,
/// accumulated stage outputs, the cost ledger, the concurrency gate,
/// permission policy, event bus, and opaque caller-supplied configuration.
pub struct PipelineContext {
    pub inputs: HashMap<String, Value>,
    pub stage_outputs: HashMap<String, Value>,
    pub cost_tracker: CostTracker,
    pub concurrency: ConcurrencyGate,
    pub permission_policy: PermissionPolicy,
    /// Callback invoked for `confirm`-level tools (§4.4
    /// `onPermissionRequired`); defaults to declining everything.
    pub approval_callback: Arc<dyn ApprovalCallback>,
    pub events: Arc<EventEmitter>,
    pub abort: AbortController,
    /// Opaque, caller-supplied configuration blobs this crate never
    /// interprets itself (§ C "Configuration"): provider credentials/
    /// endpoints, agent presets, and per-tool config.
    pub providers: Value,
    pub agent_config: Value,
    pub tools_config: HashMap<String, Value>,
    pub sub_pipeline_depth: usize,
    pub max_sub_pipeline_depth: usize,
    /// Reports produced by verify stages (§4.8), keyed by stage name.
    pub verification_reports: HashMap<String, crate::verification::VerificationReport>,
}

impl PipelineContext {
    pub fn new(inputs: HashMap<String, Value>, max_budget_usd: f64) -> Self {
        Self {
            inputs,
            stage_outputs: HashMap::new(),
            cost_tracker: CostTracker::new(max_budget_usd),
            concurrency: ConcurrencyGate::new(4),
            permission_policy: PermissionPolicy::new(crate::tools::Decision::Deny),
            approval_callback: Arc::new(DenyAllApprovals),
            events: Arc::new(EventEmitter::new()),
            abort: AbortController::new(),
            providers: Value::Null,
            agent_config: Value::Null,
            tools_config: HashMap::new(),
            sub_pipeline_depth: 0,
            max_sub_pipeline_depth: MAX_SUB_PIPELINE_DEPTH,
            verification_reports: HashMap::new(),
        }
    }

    /// A flat name -> value view combining skill inputs and stage outputs,
    /// for prompt substitution (§4.1).
    pub fn substitution_context(&self) -> HashMap<String, Value> {
        let mut merged = self.inputs.clone();
        merged.extend(self.stage_outputs.clone());
        merged
    }

    /// Build the child context a sub-pipeline stage runs with: same cost
    /// tracker, concurrency gate, permission policy, and abort controller
    /// (so the parent can still cancel it), but its own input/output map
    /// and one more level of recursion depth.
    pub fn child_for_sub_pipeline(
        &self,
        inputs: HashMap<String, Value>,
    ) -> Result<Self, SkillGraphError> {
        if self.sub_pipeline_depth + 1 > self.max_sub_pipeline_depth {
            return Err(SkillGraphError::SubPipelineDepthExceeded {
                max_depth: self.max_sub_pipeline_depth,
            });
        }
        Ok(Self {
            inputs,
            stage_outputs: HashMap::new(),
            cost_tracker: self.cost_tracker.clone(),
            concurrency: self.concurrency.clone(),
            permission_policy: self.permission_policy.clone(),
            approval_callback: self.approval_callback.clone(),
            events: Arc::new(EventEmitter::new()),
            abort: self.abort.clone(),
            providers: self.providers.clone(),
            agent_config: self.agent_config.clone(),
            tools_config: self.tools_config.clone(),
            sub_pipeline_depth: self.sub_pipeline_depth + 1,
            max_sub_pipeline_depth: self.max_sub_pipeline_depth,
            verification_reports: HashMap::new(),
        })
    }
}
