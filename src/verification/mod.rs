// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! VerificationSubsystem (§4.8): invoked by the engine only on stages
//! whose `agent_type` is `verify`. Extracts claims from the verify stage's
//! dependency outputs with one model call, links them deterministically
//! against every prior stage output, and assembles a report. Any failure
//! anywhere in this module is swallowed by [`run_verification`] — the
//! pipeline always continues, just without a report for that stage.

pub mod claims;
pub mod linker;
pub mod report;

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::engine::context::ModelCaller;
pub use claims::{extract_claims, Claim};
pub use linker::{link_claim, link_claims, LinkStatus, LinkedClaim, SourceReference};
pub use report::{build_report, Footnote, SummaryCounts, VerificationReport};

/// Render a stage-output map of `Value`s into the string map the linker
/// operates over, the same stringification rule prompt substitution uses
/// (§4.1 `substituteVariables`) so "what the model saw" and "what gets
/// searched for evidence" stay consistent.
fn stringify_outputs(stage_outputs: &HashMap<String, Value>) -> HashMap<String, String> {
    stage_outputs
        .iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), s)
        })
        .collect()
}

/// Run the full verification pipeline for one verify stage: extract,
/// link, report. Returns `None` (rather than propagating) on any failure,
/// per §4.8 step 4 — a verify stage that can't be verified never fails
/// the pipeline itself.
pub async fn run_verification(
    model: &dyn ModelCaller,
    stage_name: &str,
    analysis_text: &str,
    prior_stage_outputs: &HashMap<String, Value>,
) -> Option<VerificationReport> {
    let stringified = stringify_outputs(prior_stage_outputs);

    let claims = match extract_claims(model, analysis_text).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(stage = %stage_name, error = %e, "claim extraction failed, skipping verification report");
            return None;
        }
    };

    Some(build_report(analysis_text, claims, &stringified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::{ModelRequest, ModelResponse, StopReason};
    use crate::errors::SkillGraphError;
    use async_trait::async_trait;

    struct FailingModel;

    #[async_trait]
    impl ModelCaller for FailingModel {
        async fn call(&self, _request: ModelRequest) -> Result<ModelResponse, SkillGraphError> {
            Err(SkillGraphError::ToolCallFailed { tool: "model".into(), reason: "down".into() })
        }
        fn estimate_cost(&self, _request: &ModelRequest) -> f64 {
            0.0
        }
    }

    struct EchoClaimsModel;

    #[async_trait]
    impl ModelCaller for EchoClaimsModel {
        async fn call(&self, _request: ModelRequest) -> Result<ModelResponse, SkillGraphError> {
            Ok(ModelResponse {
                text: r#"[{"id":"c1","text":"revenue grew","category":"financial"}]"#.into(),
                tool_calls: vec![],
                cost_usd: 0.0,
                stop_reason: StopReason::EndTurn,
            })
        }
        fn estimate_cost(&self, _request: &ModelRequest) -> f64 {
            0.0
        }
    }

    #[tokio::test]
    async fn model_failure_is_swallowed_as_none() {
        let report = run_verification(&FailingModel, "verify", "revenue grew", &HashMap::new()).await;
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn successful_extraction_produces_a_report() {
        let mut outputs = HashMap::new();
        outputs.insert("gather".to_string(), Value::String("revenue grew 10%".into()));
        let report = run_verification(&EchoClaimsModel, "verify", "revenue grew", &outputs).await;
        assert!(report.is_some());
        assert_eq!(report.unwrap().claims.len(), 1);
    }
}
