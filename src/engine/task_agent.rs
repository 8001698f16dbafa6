// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! TaskAgent: drives one stage's model/tool-loop dispatch (§4.6).
//!
//! Builds the stage's prompt, calls the model, and — if the model asks for
//! tools — dispatches each through the stage's [`ToolResolver`] and loops
//! back with the results appended to the transcript, bounded by
//! `max_tool_steps` so a misbehaving model can't loop forever.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::context::{
    ModelCaller, ModelRequest, PipelineContext, StopReason, ToolResolver,
};
use crate::engine::events::PipelineEvent;
use crate::errors::SkillGraphError;
use crate::skill::{substitute_variables, Stage};
use crate::tools::{Decision, PermissionGate};

pub const DEFAULT_MAX_TOOL_STEPS: usize = 10;

pub struct TaskAgent<'a> {
    model: &'a dyn ModelCaller,
    tools: &'a dyn ToolResolver,
    max_tool_steps: usize,
}

impl<'a> TaskAgent<'a> {
    pub fn new(model: &'a dyn ModelCaller, tools: &'a dyn ToolResolver) -> Self {
        Self { model, tools, max_tool_steps: DEFAULT_MAX_TOOL_STEPS }
    }

    pub fn with_max_tool_steps(mut self, max_tool_steps: usize) -> Self {
        self.max_tool_steps = max_tool_steps;
        self
    }

    /// Run a single model-invocation stage to completion, returning its
    /// final text output as a JSON string value.
    pub async fn run_stage(
        &self,
        stage: &Stage,
        context: &PipelineContext,
    ) -> Result<Value, SkillGraphError> {
        let prompt_template = stage
            .prompt
            .as_deref()
            .ok_or_else(|| SkillGraphError::StageFailed {
                stage: stage.name.clone(),
                reason: "model stage has no prompt".into(),
            })?;

        let transcript = substitute_variables(prompt_template, &context.substitution_context())?;
        let tool_descriptors = self.resolve_stage_tools(stage, context).await?;

        let request = ModelRequest {
            prompt: transcript.clone(),
            model: stage.model.clone(),
            max_tokens: stage.max_tokens,
            temperature: stage.temperature,
            tools: tool_descriptors,
        };

        let estimate = self.model.estimate_cost(&request);
        let reservation = context.cost_tracker.reserve(estimate)?;

        if request.tools.is_empty() {
            return self.run_streaming(stage, context, request, reservation).await;
        }

        self.run_tool_loop(stage, context, request, transcript, reservation).await
    }

    /// Stream a response with no tool-loop, emitting `stage:stream` per
    /// chunk (§4.6 — used when a stage declares no tools).
    async fn run_streaming(
        &self,
        stage: &Stage,
        context: &PipelineContext,
        request: ModelRequest,
        reservation: Uuid,
    ) -> Result<Value, SkillGraphError> {
        let stage_name = stage.name.clone();
        let events = context.events.clone();
        let mut on_chunk = move |chunk: &str| {
            events.publish(PipelineEvent::StageStream {
                stage: stage_name.clone(),
                chunk: chunk.to_string(),
            });
        };

        let response = match self.model.call_streaming(request, &mut on_chunk).await {
            Ok(response) => response,
            Err(e) => {
                context.cost_tracker.refund(reservation);
                return Err(self.classify(stage, e));
            }
        };

        context.cost_tracker.commit(reservation, response.cost_usd)?;
        Ok(Value::String(response.text))
    }

    async fn run_tool_loop(
        &self,
        stage: &Stage,
        context: &PipelineContext,
        mut request: ModelRequest,
        mut transcript: String,
        reservation: Uuid,
    ) -> Result<Value, SkillGraphError> {
        let mut total_cost = 0.0;

        for step in 0..=self.max_tool_steps {
            if context.abort.is_aborted() {
                context.cost_tracker.refund(reservation);
                return Err(SkillGraphError::AbortError);
            }

            request.prompt = transcript.clone();
            let response = match self.model.call(request.clone()).await {
                Ok(response) => response,
                Err(e) => {
                    context.cost_tracker.refund(reservation);
                    return Err(self.classify(stage, e));
                }
            };
            total_cost += response.cost_usd;

            if response.stop_reason == StopReason::ToolUse && step < self.max_tool_steps {
                for call in &response.tool_calls {
                    let call_id = Uuid::new_v4().to_string();
                    debug!(%call_id, tool = %call.qualified_name, stage = %stage.name, "dispatching tool call");
                    context.events.publish(PipelineEvent::StageToolStart {
                        stage: stage.name.clone(),
                        tool: call.qualified_name.clone(),
                        call_id: call_id.clone(),
                    });
                    let started = Instant::now();

                    let permission = PermissionGate::enforce(
                        &context.permission_policy,
                        &call.qualified_name,
                        &call.arguments,
                        context.approval_callback.as_ref(),
                    )
                    .await;

                    let call_outcome = match permission {
                        Ok(()) => self.tools.call(&call.qualified_name, call.arguments.clone()).await,
                        Err(e) => Err(e),
                    };
                    let duration_ms = started.elapsed().as_millis() as u64;

                    match call_outcome {
                        Ok(result) => {
                            context.events.publish(PipelineEvent::StageToolEnd {
                                stage: stage.name.clone(),
                                tool: call.qualified_name.clone(),
                                call_id: call_id.clone(),
                                success: !result.is_error,
                                duration_ms,
                                error: result.is_error.then(|| result.text.clone()),
                            });
                            transcript.push_str(&format!(
                                "\n\n[tool {} -> {}] {}",
                                call.qualified_name, call.id, result.text
                            ));
                        }
                        Err(e) => {
                            context.events.publish(PipelineEvent::StageToolEnd {
                                stage: stage.name.clone(),
                                tool: call.qualified_name.clone(),
                                call_id: call_id.clone(),
                                success: false,
                                duration_ms,
                                error: Some(e.to_string()),
                            });
                            transcript.push_str(&format!(
                                "\n\n[tool {} -> {} error] {}",
                                call.qualified_name, call.id, e
                            ));
                        }
                    }
                }
                continue;
            }

            context.cost_tracker.commit(reservation, total_cost)?;
            return Ok(Value::String(response.text));
        }

        context.cost_tracker.commit(reservation, total_cost)?;
        Err(SkillGraphError::StageFailed {
            stage: stage.name.clone(),
            reason: format!("exceeded max tool steps ({})", self.max_tool_steps),
        })
    }

    async fn resolve_stage_tools(
        &self,
        stage: &Stage,
        context: &PipelineContext,
    ) -> Result<Vec<crate::tools::ToolDescriptor>, SkillGraphError> {
        let mut descriptors = Vec::with_capacity(stage.tools.len());
        for name in &stage.tools {
            let descriptor = self.tools.resolve(name).await?;
            let qualified = descriptor.qualified_name();
            if context.permission_policy.decide(&qualified) == Decision::Deny {
                warn!(tool = %qualified, stage = %stage.name, "tool denied by policy, excluded from stage's tool list");
                continue;
            }
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }

    /// Fatal errors (budget/abort/depth) propagate unchanged so the engine
    /// can recognize them without downcasting; everything else becomes a
    /// `StageFailed` carrying the stage name.
    fn classify(&self, stage: &Stage, error: SkillGraphError) -> SkillGraphError {
        if error.is_inherently_fatal() {
            return error;
        }
        SkillGraphError::StageFailed {
            stage: stage.name.clone(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::ModelResponse;
    use crate::engine::context::ToolCallRequest;
    use crate::tools::{ParamSchema, ToolCallResult, ToolDescriptor};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct StubModel {
        calls: AtomicUsize,
        responses: Mutex<Vec<ModelResponse>>,
    }

    #[async_trait]
    impl ModelCaller for StubModel {
        async fn call(&self, _request: ModelRequest) -> Result<ModelResponse, SkillGraphError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.lock().unwrap().remove(0))
        }

        fn estimate_cost(&self, _request: &ModelRequest) -> f64 {
            0.01
        }
    }

    struct StubTools;

    #[async_trait]
    impl ToolResolver for StubTools {
        async fn resolve(&self, qualified_name: &str) -> Result<ToolDescriptor, SkillGraphError> {
            Ok(ToolDescriptor {
                server: "s".into(),
                name: qualified_name.into(),
                description: "d".into(),
                params: ParamSchema::Unknown,
                injected_params: HashMap::new(),
                scheme: "stdio".into(),
            })
        }

        async fn call(&self, qualified_name: &str, _arguments: Value) -> Result<ToolCallResult, SkillGraphError> {
            Ok(ToolCallResult {
                text: format!("result from {qualified_name}"),
                structured: None,
                is_error: false,
                source: qualified_name.into(),
                called_at: Utc::now(),
            })
        }
    }

    fn stage() -> Stage {
        Stage {
            name: "gather".into(),
            prompt: Some("do the thing".into()),
            model: None,
            max_tokens: None,
            temperature: None,
            output_format: None,
            tools: vec!["search".into()],
            input_from: vec![],
            agent_type: crate::skill::AgentType::Default,
            sub_pipeline: None,
            sub_inputs: HashMap::new(),
        }
    }

    fn context() -> PipelineContext {
        let mut ctx = PipelineContext::new(HashMap::new(), 10.0);
        ctx.permission_policy = crate::tools::PermissionPolicy::new(Decision::Allow);
        ctx
    }

    fn stage_without_tools() -> Stage {
        Stage { tools: vec![], ..stage() }
    }

    #[tokio::test]
    async fn completes_without_tool_use() {
        let model = StubModel {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(vec![ModelResponse {
                text: "done".into(),
                tool_calls: vec![],
                cost_usd: 0.02,
                stop_reason: StopReason::EndTurn,
            }]),
        };
        let tools = StubTools;
        let agent = TaskAgent::new(&model, &tools);
        let mut ctx = context();
        let result = agent.run_stage(&stage(), &mut ctx).await.unwrap();
        assert_eq!(result, Value::String("done".into()));
        assert_eq!(ctx.cost_tracker.spent(), 0.02);
    }

    #[tokio::test]
    async fn loops_through_a_tool_call_before_finishing() {
        let model = StubModel {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(vec![
                ModelResponse {
                    text: String::new(),
                    tool_calls: vec![ToolCallRequest {
                        id: "call_1".into(),
                        qualified_name: "search".into(),
                        arguments: serde_json::json!({}),
                    }],
                    cost_usd: 0.01,
                    stop_reason: StopReason::ToolUse,
                },
                ModelResponse {
                    text: "final answer".into(),
                    tool_calls: vec![],
                    cost_usd: 0.01,
                    stop_reason: StopReason::EndTurn,
                },
            ]),
        };
        let tools = StubTools;
        let agent = TaskAgent::new(&model, &tools);
        let mut ctx = context();
        let result = agent.run_stage(&stage(), &mut ctx).await.unwrap();
        assert_eq!(result, Value::String("final answer".into()));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exceeding_max_tool_steps_fails_the_stage() {
        let infinite_tool_use = ModelResponse {
            text: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_1".into(),
                qualified_name: "search".into(),
                arguments: serde_json::json!({}),
            }],
            cost_usd: 0.0,
            stop_reason: StopReason::ToolUse,
        };
        let model = StubModel {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(std::iter::repeat(infinite_tool_use).take(5).collect()),
        };
        let tools = StubTools;
        let agent = TaskAgent::new(&model, &tools).with_max_tool_steps(2);
        let mut ctx = context();
        let err = agent.run_stage(&stage(), &mut ctx).await.unwrap_err();
        assert!(matches!(err, SkillGraphError::StageFailed { .. }));
    }

    #[tokio::test]
    async fn budget_exhaustion_refunds_reservation() {
        let model = StubModel {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(vec![]),
        };
        let tools = StubTools;
        let agent = TaskAgent::new(&model, &tools);
        let mut ctx = context();
        ctx.cost_tracker = crate::budget::CostTracker::new(0.0);
        let err = agent.run_stage(&stage(), &mut ctx).await.unwrap_err();
        assert!(matches!(err, SkillGraphError::BudgetExceededError { .. }));
        assert!(err.is_inherently_fatal());
        assert_eq!(ctx.cost_tracker.remaining(), 0.0);
    }

    struct NoTools;

    #[async_trait]
    impl ToolResolver for NoTools {
        async fn resolve(&self, qualified_name: &str) -> Result<ToolDescriptor, SkillGraphError> {
            Err(SkillGraphError::ToolUnavailable { tool: qualified_name.into(), reason: "not declared".into() })
        }

        async fn call(&self, _qualified_name: &str, _arguments: Value) -> Result<ToolCallResult, SkillGraphError> {
            panic!("no tools declared, call should never happen")
        }
    }

    #[tokio::test]
    async fn toolless_stage_streams_instead_of_looping() {
        let model = StubModel {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(vec![ModelResponse {
                text: "streamed answer".into(),
                tool_calls: vec![],
                cost_usd: 0.015,
                stop_reason: StopReason::EndTurn,
            }]),
        };
        let tools = NoTools;
        let agent = TaskAgent::new(&model, &tools);
        let mut ctx = context();

        let chunks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();
        ctx.events.subscribe(move |event| {
            if let PipelineEvent::StageStream { chunk, .. } = event {
                sink.lock().unwrap().push(chunk.clone());
            }
        });

        let result = agent.run_stage(&stage_without_tools(), &mut ctx).await.unwrap();
        assert_eq!(result, Value::String("streamed answer".into()));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*chunks.lock().unwrap(), vec!["streamed answer".to_string()]);
        assert_eq!(ctx.cost_tracker.spent(), 0.015);
    }

    #[tokio::test]
    async fn tool_call_emits_start_and_end_events() {
        let model = StubModel {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(vec![
                ModelResponse {
                    text: String::new(),
                    tool_calls: vec![ToolCallRequest {
                        id: "call_1".into(),
                        qualified_name: "search".into(),
                        arguments: serde_json::json!({}),
                    }],
                    cost_usd: 0.0,
                    stop_reason: StopReason::ToolUse,
                },
                ModelResponse {
                    text: "done".into(),
                    tool_calls: vec![],
                    cost_usd: 0.0,
                    stop_reason: StopReason::EndTurn,
                },
            ]),
        };
        let tools = StubTools;
        let agent = TaskAgent::new(&model, &tools);
        let mut ctx = context();

        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        ctx.events.subscribe(move |event| match event {
            PipelineEvent::StageToolStart { .. } => sink.lock().unwrap().push("start"),
            PipelineEvent::StageToolEnd { success, .. } => {
                sink.lock().unwrap().push(if *success { "end-ok" } else { "end-err" })
            }
            _ => {}
        });

        agent.run_stage(&stage(), &mut ctx).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["start", "end-ok"]);
    }
}
