// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Claim extraction: the only model-calling step of verification (§4.8
//! step 1). Everything downstream of this is deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::context::{ModelCaller, ModelRequest, StopReason};
use crate::errors::SkillGraphError;

/// One factual assertion pulled out of an analysis text, awaiting linking
/// against the prior stage outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub id: String,
    pub text: String,
    pub category: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub unit: Option<String>,
}

const EXTRACTION_PROMPT_PREFIX: &str = "Extract the distinct factual claims in the following analysis. \
Return a JSON array of objects with fields {id, text, category, value?, unit?}. \
Analysis:\n\n";

/// Ask the model to list the claims in `analysis_text`. Best-effort: a
/// response that isn't a JSON array of claim-shaped objects yields an
/// empty list rather than failing, since the caller (the engine) swallows
/// verification failures anyway (§4.8 step 4) and we'd rather degrade
/// gracefully than throw from inside that swallow.
pub async fn extract_claims(
    model: &dyn ModelCaller,
    analysis_text: &str,
) -> Result<Vec<Claim>, SkillGraphError> {
    if analysis_text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let request = ModelRequest {
        prompt: format!("{EXTRACTION_PROMPT_PREFIX}{analysis_text}"),
        model: None,
        max_tokens: None,
        temperature: Some(0.0),
        tools: Vec::new(),
    };

    let response = model.call(request).await?;
    if response.stop_reason == StopReason::MaxTokens {
        return Ok(Vec::new());
    }

    Ok(parse_claims(&response.text))
}

/// Parse a model response's text into claims, tolerating surrounding prose
/// around a single JSON array (models routinely wrap JSON in a code fence
/// or a sentence) by scanning for the first `[` ... last `]` span.
fn parse_claims(text: &str) -> Vec<Claim> {
    let Some(start) = text.find('[') else { return Vec::new() };
    let Some(end) = text.rfind(']') else { return Vec::new() };
    if end < start {
        return Vec::new();
    }
    serde_json::from_str::<Vec<Claim>>(&text[start..=end]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubModel {
        text: String,
    }

    #[async_trait]
    impl ModelCaller for StubModel {
        async fn call(&self, _request: ModelRequest) -> Result<crate::engine::context::ModelResponse, SkillGraphError> {
            Ok(crate::engine::context::ModelResponse {
                text: self.text.clone(),
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
    async fn extracts_well_formed_claims() {
        let model = StubModel {
            text: r#"Here are the claims:
[{"id":"c1","text":"Revenue grew 12%","category":"financial","value":12,"unit":"%"}]
Hope that helps."#
                .into(),
        };
        let claims = extract_claims(&model, "some analysis").await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].id, "c1");
        assert_eq!(claims[0].unit.as_deref(), Some("%"));
    }

    #[tokio::test]
    async fn malformed_response_yields_no_claims() {
        let model = StubModel { text: "I cannot find any claims.".into() };
        let claims = extract_claims(&model, "some analysis").await.unwrap();
        assert!(claims.is_empty());
    }

    #[tokio::test]
    async fn empty_analysis_text_skips_the_model_call() {
        let model = StubModel { text: "[]".into() };
        let claims = extract_claims(&model, "   ").await.unwrap();
        assert!(claims.is_empty());
    }
}
