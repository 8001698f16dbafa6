// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! PipelineEngine: walks a skill's execution levels, dispatching each
//! level's stages concurrently under the shared concurrency gate, merging
//! their outputs, and recursing into sub-pipelines (§4.6, §4.7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{error, info};

use crate::engine::context::{HookManager, ModelCaller, ModelRequest, PipelineContext, ToolResolver};
use crate::engine::events::{bridge_to_parent, PipelineEvent};
use crate::engine::task_agent::TaskAgent;
use crate::errors::SkillGraphError;
use crate::skill::{Skill, StageGraph};
use crate::tools::ApprovalCallback;

/// Resolves a `sub_pipeline` stage's skill name to the skill itself, so the
/// engine can recurse into it without owning a skill registry (mirrors
/// [`crate::skill::loader::LoadSkillFn`], but `Send + Sync` so it can cross
/// a `tokio::spawn` boundary).
pub type SkillResolverFn = dyn Fn(&str) -> Result<Skill, SkillGraphError> + Send + Sync;

/// Final report of a completed (or partially completed) pipeline run
/// (§4.6 "completion report").
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub skill: String,
    pub success: bool,
    pub stage_outputs: HashMap<String, Value>,
    pub primary_output: Option<Value>,
    pub failed_stages: Vec<(String, String)>,
    pub skipped_stages: Vec<String>,
    pub total_spent_usd: f64,
    pub verification_reports: HashMap<String, crate::verification::VerificationReport>,
}

/// Outcome of [`PipelineEngine::run_with_approval_threshold`] (§4.5 S4): a
/// decline never starts the engine, charges nothing, and emits no
/// `stage:*`/`pipeline:*` events.
#[derive(Debug, Clone)]
pub enum GatedOutcome {
    Completed(PipelineReport),
    Declined { reason: String },
}

#[derive(Clone)]
pub struct PipelineEngine {
    model: Arc<dyn ModelCaller>,
    tools: Arc<dyn ToolResolver>,
    hooks: Arc<dyn HookManager>,
    skill_resolver: Option<Arc<SkillResolverFn>>,
}

impl PipelineEngine {
    pub fn new(model: Arc<dyn ModelCaller>, tools: Arc<dyn ToolResolver>, hooks: Arc<dyn HookManager>) -> Self {
        Self { model, tools, hooks, skill_resolver: None }
    }

    /// Install the callback used to resolve `sub_pipeline` stages to their
    /// skill. Without one, a sub-pipeline stage fails with
    /// [`SkillGraphError::SubPipelineLoaderMissing`] (§4.7).
    pub fn with_skill_resolver(mut self, resolver: Arc<SkillResolverFn>) -> Self {
        self.skill_resolver = Some(resolver);
        self
    }

    /// Sum each model stage's cost estimate over its raw (unsubstituted)
    /// prompt template, for the approval-threshold precheck. Sub-pipeline
    /// stages aren't expanded — their own `run` call is gated separately
    /// if the caller chooses to.
    fn estimate_pipeline_cost(&self, skill: &Skill) -> f64 {
        skill
            .stages
            .iter()
            .filter(|stage| !stage.is_sub_pipeline())
            .map(|stage| {
                let request = ModelRequest {
                    prompt: stage.prompt.clone().unwrap_or_default(),
                    model: stage.model.clone(),
                    max_tokens: stage.max_tokens,
                    temperature: stage.temperature,
                    tools: vec![],
                };
                self.model.estimate_cost(&request)
            })
            .sum()
    }

    /// Run a skill, but first estimate its total cost and ask `approval`
    /// to clear it if the estimate exceeds `threshold_usd` (§4.5 "approval
    /// threshold", scenario S4). A decline short-circuits before
    /// `pipeline:start` is published and nothing is charged.
    pub async fn run_with_approval_threshold(
        &self,
        skill: &Skill,
        context: PipelineContext,
        threshold_usd: f64,
        approval: &dyn ApprovalCallback,
    ) -> Result<GatedOutcome, SkillGraphError> {
        let estimate = self.estimate_pipeline_cost(skill);
        if estimate > threshold_usd && !approval.on_approval_required(estimate).await {
            return Ok(GatedOutcome::Declined { reason: "User declined".into() });
        }
        self.run(skill, context).await.map(GatedOutcome::Completed)
    }

    /// Run a skill to completion. Individual stage failures are recorded
    /// and their dependents skipped (§4.6 partial-failure semantics); only
    /// budget exhaustion, abort, and sub-pipeline depth overflow abort the
    /// whole run immediately.
    pub async fn run(
        &self,
        skill: &Skill,
        mut context: PipelineContext,
    ) -> Result<PipelineReport, SkillGraphError> {
        let mut missing_required = Vec::new();
        for tool in &skill.tools_required {
            if let Err(e) = self.tools.resolve(tool).await {
                context.events.publish(PipelineEvent::ToolUnavailable {
                    tool: tool.clone(),
                    reason: e.to_string(),
                    fatal: true,
                });
                missing_required.push((tool.clone(), e.to_string()));
            }
        }
        for tool in &skill.tools_optional {
            if let Err(e) = self.tools.resolve(tool).await {
                context.events.publish(PipelineEvent::ToolUnavailable {
                    tool: tool.clone(),
                    reason: e.to_string(),
                    fatal: false,
                });
            }
        }
        if let Some((tool, reason)) = missing_required.into_iter().next() {
            context.events.publish(PipelineEvent::PipelineError {
                skill: skill.name.clone(),
                reason: format!("required tool {tool} unavailable: {reason}"),
            });
            return Err(SkillGraphError::ToolUnavailable { tool, reason });
        }

        context.events.publish(PipelineEvent::PipelineStart { skill: skill.name.clone() });

        let dag = StageGraph::build(skill)?;
        let levels = dag.execution_levels()?;

        let mut failed: HashMap<String, String> = HashMap::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut fatal: Option<SkillGraphError> = None;

        'levels: for level in &levels {
            if context.abort.is_aborted() {
                fatal = Some(SkillGraphError::AbortError);
                break 'levels;
            }

            let mut runnable = Vec::new();
            for stage_name in level {
                let preds = dag.predecessors_of(stage_name);
                let blocked = preds.iter().any(|p| failed.contains_key(p) || skipped.contains(p));
                if blocked {
                    skipped.push(stage_name.clone());
                    context.events.publish(PipelineEvent::StageSkipped {
                        stage: stage_name.clone(),
                        reason: "an upstream dependency failed or was skipped".into(),
                    });
                } else {
                    runnable.push(stage_name.clone());
                }
            }

            let mut handles = Vec::new();
            for stage_name in runnable {
                let stage = skill.get_stage(&stage_name).expect("stage in DAG must exist in skill").clone();
                let permit_gate = context.concurrency.clone();
                let snapshot = self.stage_snapshot(&context, &stage_name);
                let engine = self.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = match permit_gate.acquire().await {
                        Ok(p) => p,
                        Err(e) => return (stage_name, stage, Err(e)),
                    };
                    let start = Instant::now();
                    let result = engine.dispatch_stage(&stage, &snapshot).await;
                    info!(stage = %stage_name, elapsed_ms = start.elapsed().as_millis() as u64, ok = result.is_ok(), "stage finished");
                    (stage_name, stage, result)
                }));
            }

            for handle in handles {
                let (stage_name, stage, result) = handle.await.map_err(|e| SkillGraphError::StageFailed {
                    stage: "unknown".into(),
                    reason: format!("stage task panicked: {e}"),
                })?;

                match result {
                    Ok(output) => {
                        context.events.publish(PipelineEvent::StageComplete { stage: stage_name.clone(), duration_ms: 0 });
                        context.stage_outputs.insert(stage_name.clone(), output.clone());

                        if stage.agent_type == crate::skill::AgentType::Verify {
                            self.run_stage_verification(&stage, &output, &mut context).await;
                        }
                    }
                    Err(e) => {
                        let is_fatal = e.is_inherently_fatal();
                        context.events.publish(PipelineEvent::StageError {
                            stage: stage_name.clone(),
                            reason: e.to_string(),
                            fatal: is_fatal,
                        });
                        error!(stage = %stage_name, error = %e, fatal = is_fatal, "stage failed");
                        failed.insert(stage_name, e.to_string());
                        if is_fatal {
                            fatal = Some(e);
                            context.abort.abort();
                        }
                    }
                }
            }

            if fatal.is_some() {
                break 'levels;
            }
        }

        let success = fatal.is_none() && failed.is_empty();
        let primary_output = context.stage_outputs.get(&skill.output.primary).cloned();
        context.events.publish(PipelineEvent::PipelineComplete { skill: skill.name.clone(), success });

        if let Some(e) = fatal {
            context.events.publish(PipelineEvent::PipelineError {
                skill: skill.name.clone(),
                reason: e.to_string(),
            });
            return Err(e);
        }

        Ok(PipelineReport {
            skill: skill.name.clone(),
            success,
            stage_outputs: context.stage_outputs,
            primary_output,
            failed_stages: failed.into_iter().collect(),
            skipped_stages: skipped,
            total_spent_usd: context.cost_tracker.spent(),
            verification_reports: context.verification_reports,
        })
    }

    /// Run the verification subsystem for one completed verify stage and
    /// record its report, if any, on the context (§4.8). Swallows all
    /// failures internally; never affects the stage's own success.
    async fn run_stage_verification(&self, stage: &crate::skill::Stage, output: &Value, context: &mut PipelineContext) {
        let analysis_text = stage
            .input_from
            .iter()
            .filter_map(|dep| context.stage_outputs.get(dep))
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join("\n\n");
        let analysis_text = if analysis_text.is_empty() { value_to_text(output) } else { analysis_text };

        let mut prior_outputs = context.stage_outputs.clone();
        prior_outputs.remove(&stage.name);

        if let Some(report) =
            crate::verification::run_verification(self.model.as_ref(), &stage.name, &analysis_text, &prior_outputs).await
        {
            context.events.publish(PipelineEvent::VerificationComplete {
                stage: stage.name.clone(),
                claim_count: report.claims.len(),
            });
            context.verification_reports.insert(stage.name.clone(), report);
        }
    }

    /// Run a sub-pipeline stage: resolve its skill, build a child context,
    /// recurse, and bubble its events to the parent with the outer stage
    /// name prefixed (§4.7 `runSubPipeline`).
    pub async fn run_sub_pipeline(
        &self,
        outer_stage_name: &str,
        sub_skill: &Skill,
        parent_context: &PipelineContext,
        sub_inputs: HashMap<String, Value>,
    ) -> Result<PipelineReport, SkillGraphError> {
        let mut child_context = parent_context.child_for_sub_pipeline(sub_inputs)?;
        bridge_to_parent(&child_context.events, parent_context.events.clone(), outer_stage_name.to_string());

        self.run(sub_skill, child_context).await
    }

    async fn dispatch_stage(
        &self,
        stage: &crate::skill::Stage,
        context: &PipelineContext,
    ) -> Result<Value, SkillGraphError> {
        self.hooks.before_stage(stage, context).await?;
        context.events.publish(PipelineEvent::StageStart { stage: stage.name.clone() });

        let output = if stage.is_sub_pipeline() {
            let sub_name = stage.sub_pipeline.as_deref().expect("is_sub_pipeline implies sub_pipeline is set");
            let resolver = self
                .skill_resolver
                .as_ref()
                .ok_or_else(|| SkillGraphError::SubPipelineLoaderMissing { stage: stage.name.clone() })?;
            let sub_skill = resolver(sub_name)?;

            let substitution_context = context.substitution_context();
            let mut sub_inputs = HashMap::new();
            for (key, template) in &stage.sub_inputs {
                let rendered = crate::skill::substitute_variables(template, &substitution_context)?;
                sub_inputs.insert(key.clone(), Value::String(rendered));
            }

            let report = self.run_sub_pipeline(&stage.name, &sub_skill, context, sub_inputs).await?;
            report
                .primary_output
                .unwrap_or(Value::Null)
        } else {
            let agent = TaskAgent::new(self.model.as_ref(), self.tools.as_ref());
            agent.run_stage(stage, context).await?
        };

        self.hooks.after_stage(stage, &output).await?;
        Ok(output)
    }

    /// A read-only snapshot of `context` safe to move into a spawned task:
    /// shared handles (cost tracker, concurrency gate, event bus, abort
    /// controller) are cheap clones; `stage_outputs`/`inputs` are cloned as
    /// of level-start, matching the teacher's per-level barrier (a stage
    /// only ever sees outputs from levels strictly before it).
    fn stage_snapshot(&self, context: &PipelineContext, _stage_name: &str) -> PipelineContext {
        PipelineContext {
            inputs: context.inputs.clone(),
            stage_outputs: context.stage_outputs.clone(),
            cost_tracker: context.cost_tracker.clone(),
            concurrency: context.concurrency.clone(),
            permission_policy: context.permission_policy.clone(),
            approval_callback: context.approval_callback.clone(),
            events: context.events.clone(),
            abort: context.abort.clone(),
            providers: context.providers.clone(),
            agent_config: context.agent_config.clone(),
            tools_config: context.tools_config.clone(),
            sub_pipeline_depth: context.sub_pipeline_depth,
            max_sub_pipeline_depth: context.max_sub_pipeline_depth,
            verification_reports: HashMap::new(),
        }
    }
}

/// Same stringification rule used for prompt substitution (§4.1): strings
/// pass through verbatim, everything else renders via its JSON form.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::{ModelRequest, ModelResponse, StopReason};
    use crate::engine::context::NoopHookManager;
    use crate::tools::{ParamSchema, ToolCallResult, ToolDescriptor};
    use async_trait::async_trait;
    use chrono::Utc;

    struct EchoModel;

    #[async_trait]
    impl ModelCaller for EchoModel {
        async fn call(&self, request: ModelRequest) -> Result<ModelResponse, SkillGraphError> {
            Ok(ModelResponse {
                text: format!("echo: {}", request.prompt),
                tool_calls: vec![],
                cost_usd: 0.001,
                stop_reason: StopReason::EndTurn,
            })
        }

        fn estimate_cost(&self, _request: &ModelRequest) -> f64 {
            0.001
        }
    }

    struct NoTools;

    #[async_trait]
    impl ToolResolver for NoTools {
        async fn resolve(&self, qualified_name: &str) -> Result<ToolDescriptor, SkillGraphError> {
            Err(SkillGraphError::ToolUnavailable { tool: qualified_name.into(), reason: "no tools configured".into() })
        }

        async fn call(&self, qualified_name: &str, _arguments: Value) -> Result<ToolCallResult, SkillGraphError> {
            Ok(ToolCallResult {
                text: String::new(),
                structured: None,
                is_error: false,
                source: qualified_name.into(),
                called_at: Utc::now(),
            })
        }
    }

    fn two_stage_skill() -> Skill {
        Skill::from_yaml(
            r#"
name: "demo"
description: "d"
inputs:
  - name: ticker
    type: string
stages:
  - name: gather
    prompt: "Gather {ticker}"
  - name: analyze
    prompt: "Analyze {gather}"
    input_from: [gather]
output:
  primary: analyze
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn runs_levels_in_order_and_produces_primary_output() {
        let engine = PipelineEngine::new(Arc::new(EchoModel), Arc::new(NoTools), Arc::new(NoopHookManager));

        let mut context = PipelineContext::new(
            HashMap::from([("ticker".to_string(), Value::String("NVDA".into()))]),
            10.0,
        );
        context.permission_policy = crate::tools::PermissionPolicy::new(crate::tools::Decision::Allow);

        let report = engine.run(&two_stage_skill(), context).await.unwrap();
        assert!(report.success);
        assert_eq!(
            report.primary_output,
            Some(Value::String("echo: Analyze echo: Gather NVDA".into()))
        );
    }

    #[tokio::test]
    async fn stage_failure_skips_dependents_but_completes_partially() {
        struct FailingModel;
        #[async_trait]
        impl ModelCaller for FailingModel {
            async fn call(&self, request: ModelRequest) -> Result<ModelResponse, SkillGraphError> {
                if request.prompt.contains("Gather") {
                    return Err(SkillGraphError::StageFailed { stage: "gather".into(), reason: "boom".into() });
                }
                Ok(ModelResponse { text: "ok".into(), tool_calls: vec![], cost_usd: 0.0, stop_reason: StopReason::EndTurn })
            }
            fn estimate_cost(&self, _request: &ModelRequest) -> f64 {
                0.0
            }
        }

        let engine = PipelineEngine::new(Arc::new(FailingModel), Arc::new(NoTools), Arc::new(NoopHookManager));
        let mut context = PipelineContext::new(
            HashMap::from([("ticker".to_string(), Value::String("NVDA".into()))]),
            10.0,
        );
        context.permission_policy = crate::tools::PermissionPolicy::new(crate::tools::Decision::Allow);

        let report = engine.run(&two_stage_skill(), context).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.skipped_stages, vec!["analyze".to_string()]);
        assert_eq!(report.failed_stages.len(), 1);
    }

    #[tokio::test]
    async fn missing_required_tool_aborts_before_any_stage_runs() {
        let engine = PipelineEngine::new(Arc::new(EchoModel), Arc::new(NoTools), Arc::new(NoopHookManager));

        let mut skill = two_stage_skill();
        skill.tools_required.push("search".into());
        let context = PipelineContext::new(HashMap::new(), 10.0);

        let err = engine.run(&skill, context).await.unwrap_err();
        assert!(matches!(err, SkillGraphError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn missing_optional_tool_emits_non_fatal_event_and_still_runs() {
        let engine = PipelineEngine::new(Arc::new(EchoModel), Arc::new(NoTools), Arc::new(NoopHookManager));

        let mut skill = two_stage_skill();
        skill.tools_optional.push("maybe_search".into());
        let mut context = PipelineContext::new(
            HashMap::from([("ticker".to_string(), Value::String("NVDA".into()))]),
            10.0,
        );

        let events: Arc<std::sync::Mutex<Vec<PipelineEvent>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        context.events.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let report = engine.run(&skill, context).await.unwrap();
        assert!(report.success);

        let recorded = events.lock().unwrap();
        let unavailable = recorded.iter().find_map(|e| match e {
            PipelineEvent::ToolUnavailable { tool, fatal, .. } => Some((tool.clone(), *fatal)),
            _ => None,
        });
        assert_eq!(unavailable, Some(("maybe_search".to_string(), false)));
    }

    #[tokio::test]
    async fn missing_required_tool_emits_fatal_unavailable_and_pipeline_error() {
        let engine = PipelineEngine::new(Arc::new(EchoModel), Arc::new(NoTools), Arc::new(NoopHookManager));

        let mut skill = two_stage_skill();
        skill.tools_required.push("search".into());
        let context = PipelineContext::new(HashMap::new(), 10.0);

        let events: Arc<std::sync::Mutex<Vec<PipelineEvent>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        context.events.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let err = engine.run(&skill, context).await.unwrap_err();
        assert!(matches!(err, SkillGraphError::ToolUnavailable { .. }));

        let recorded = events.lock().unwrap();
        assert!(recorded.iter().any(|e| matches!(e, PipelineEvent::ToolUnavailable { fatal: true, .. })));
        assert!(recorded.iter().any(|e| matches!(e, PipelineEvent::PipelineError { .. })));
    }

    struct ExpensiveModel;

    #[async_trait]
    impl ModelCaller for ExpensiveModel {
        async fn call(&self, _request: ModelRequest) -> Result<ModelResponse, SkillGraphError> {
            Ok(ModelResponse { text: "ok".into(), tool_calls: vec![], cost_usd: 5.0, stop_reason: StopReason::EndTurn })
        }
        fn estimate_cost(&self, _request: &ModelRequest) -> f64 {
            5.0
        }
    }

    #[tokio::test]
    async fn declined_approval_threshold_never_starts_the_pipeline() {
        let engine = PipelineEngine::new(Arc::new(ExpensiveModel), Arc::new(NoTools), Arc::new(NoopHookManager));
        let mut context = PipelineContext::new(
            HashMap::from([("ticker".to_string(), Value::String("NVDA".into()))]),
            10.0,
        );
        context.permission_policy = crate::tools::PermissionPolicy::new(crate::tools::Decision::Allow);

        let events: Arc<std::sync::Mutex<Vec<PipelineEvent>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        context.events.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let outcome = engine
            .run_with_approval_threshold(&two_stage_skill(), context, 1.0, &crate::tools::DenyAllApprovals)
            .await
            .unwrap();

        assert!(matches!(outcome, GatedOutcome::Declined { reason } if reason == "User declined"));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn approved_threshold_runs_the_pipeline_normally() {
        struct AlwaysApprove;
        #[async_trait]
        impl ApprovalCallback for AlwaysApprove {
            async fn on_permission_required(&self, _tool: &str, _args: &serde_json::Value) -> bool {
                true
            }
            async fn on_approval_required(&self, _estimate_usd: f64) -> bool {
                true
            }
        }

        let engine = PipelineEngine::new(Arc::new(ExpensiveModel), Arc::new(NoTools), Arc::new(NoopHookManager));
        let mut context = PipelineContext::new(
            HashMap::from([("ticker".to_string(), Value::String("NVDA".into()))]),
            100.0,
        );
        context.permission_policy = crate::tools::PermissionPolicy::new(crate::tools::Decision::Allow);

        let outcome = engine
            .run_with_approval_threshold(&two_stage_skill(), context, 1.0, &AlwaysApprove)
            .await
            .unwrap();

        assert!(matches!(outcome, GatedOutcome::Completed(report) if report.success));
    }
}
