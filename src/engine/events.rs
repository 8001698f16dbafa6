// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Typed lifecycle events and a synchronous pub-sub emitter (§3, §5).
//!
//! Listeners are invoked in publish order, on the publishing task — there
//! is no buffering or async dispatch, so a listener that blocks blocks the
//! pipeline. A sub-pipeline's events bubble to its parent with the outer
//! stage name prefixed onto the inner stage name (`outer/inner`), via
//! [`bridge_to_parent`].

use std::sync::{Arc, Mutex};

/// One lifecycle event a running pipeline reports.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    PipelineStart { skill: String },
    PipelineComplete { skill: String, success: bool },
    PipelineError { skill: String, reason: String },
    StageStart { stage: String },
    StageComplete { stage: String, duration_ms: u64 },
    StageError { stage: String, reason: String, fatal: bool },
    StageSkipped { stage: String, reason: String },
    StageStream { stage: String, chunk: String },
    StageToolStart { stage: String, tool: String, call_id: String },
    StageToolEnd {
        stage: String,
        tool: String,
        call_id: String,
        success: bool,
        duration_ms: u64,
        error: Option<String>,
    },
    BudgetWarning { remaining_usd: f64 },
    Aborted { reason: String },
    VerificationComplete { stage: String, claim_count: usize },
    /// A declared tool couldn't be resolved before the pipeline ran
    /// (§4.7 step 1). Fatal for required tools — the engine emits this
    /// for every missing name before throwing — non-fatal for optional
    /// ones.
    ToolUnavailable { tool: String, reason: String, fatal: bool },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PipelineStart { .. } => "pipeline:start",
            Self::PipelineComplete { .. } => "pipeline:complete",
            Self::PipelineError { .. } => "pipeline:error",
            Self::StageStart { .. } => "stage:start",
            Self::StageComplete { .. } => "stage:complete",
            Self::StageError { .. } => "stage:error",
            Self::StageSkipped { .. } => "stage:skip",
            Self::StageStream { .. } => "stage:stream",
            Self::StageToolStart { .. } => "stage:tool-start",
            Self::StageToolEnd { .. } => "stage:tool-end",
            Self::BudgetWarning { .. } => "budget:warning",
            Self::Aborted { .. } => "abort",
            Self::VerificationComplete { .. } => "verification:complete",
            Self::ToolUnavailable { .. } => "tool:unavailable",
        }
    }

    /// Rewrite this event's stage name(s) with `prefix/` prepended, for
    /// bubbling a sub-pipeline's events up through its parent.
    fn with_prefixed_stage(self, prefix: &str) -> Self {
        let p = |stage: String| format!("{prefix}/{stage}");
        match self {
            Self::StageStart { stage } => Self::StageStart { stage: p(stage) },
            Self::StageComplete { stage, duration_ms } => Self::StageComplete { stage: p(stage), duration_ms },
            Self::StageError { stage, reason, fatal } => Self::StageError { stage: p(stage), reason, fatal },
            Self::StageSkipped { stage, reason } => Self::StageSkipped { stage: p(stage), reason },
            Self::StageStream { stage, chunk } => Self::StageStream { stage: p(stage), chunk },
            Self::StageToolStart { stage, tool, call_id } => {
                Self::StageToolStart { stage: p(stage), tool, call_id }
            }
            Self::StageToolEnd { stage, tool, call_id, success, duration_ms, error } => Self::StageToolEnd {
                stage: p(stage),
                tool,
                call_id,
                success,
                duration_ms,
                error,
            },
            Self::VerificationComplete { stage, claim_count } => Self::VerificationComplete { stage: p(stage), claim_count },
            other => other,
        }
    }
}

type Listener = Box<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Registry of event listeners, dispatched synchronously in subscription
/// order.
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<Vec<Listener>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .expect("event emitter mutex poisoned")
            .push(Box::new(listener));
    }

    pub fn publish(&self, event: PipelineEvent) {
        for listener in self.listeners.lock().expect("event emitter mutex poisoned").iter() {
            listener(&event);
        }
    }
}

/// Subscribe `child` to republish every event it sees onto `parent`, with
/// stage names prefixed by `outer_stage` (§4.7 `runSubPipeline`).
pub fn bridge_to_parent(child: &EventEmitter, parent: Arc<EventEmitter>, outer_stage: String) {
    child.subscribe(move |event| {
        parent.publish(event.clone().with_prefixed_stage(&outer_stage));
    });
}
