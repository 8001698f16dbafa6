// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Deterministic source linking (§4.8 step 2): for each extracted claim,
//! search the prior stage outputs for supporting evidence. No model call;
//! best-effort substring/token overlap, never a hard failure.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::verification::claims::Claim;

/// Whether a claim's text found supporting evidence in the prior outputs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Verified,
    Disputed,
    Unverified,
    Error,
}

/// A pointer back to the stage whose output contributed evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceReference {
    pub stage: String,
    pub excerpt: String,
}

/// A claim after linking, carrying its verdict and evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedClaim {
    pub claim: Claim,
    pub status: LinkStatus,
    pub confidence: f32,
    pub sources: Vec<SourceReference>,
}

const MIN_TOKEN_LEN: usize = 4;
const EXCERPT_RADIUS: usize = 60;

/// Link one claim against the map of prior stage outputs (stringified).
/// Deterministic and side-effect free: tokenizes the claim text into
/// words of at least [`MIN_TOKEN_LEN`] characters, then for every stage
/// output counts how many distinct tokens appear (case-insensitively).
/// A stage whose text contains the claim's numeric value (if any) alongside
/// matching tokens is treated as stronger evidence than token overlap
/// alone, since that's the shape a disputed-vs-verified distinction hinges
/// on in practice: same topic but a different number is disputed, the same
/// topic with no number at all is merely unverified-leaning.
pub fn link_claim(claim: &Claim, stage_outputs: &HashMap<String, String>) -> LinkedClaim {
    let tokens = significant_tokens(&claim.text);
    if tokens.is_empty() {
        return LinkedClaim {
            claim: claim.clone(),
            status: LinkStatus::Unverified,
            confidence: 0.0,
            sources: Vec::new(),
        };
    }

    let claim_number = claim_numeric_value(claim);
    let mut sources = Vec::new();
    let mut best_overlap_ratio = 0.0_f32;
    let mut any_numeric_conflict = false;

    for (stage, text) in stage_outputs {
        let lower = text.to_lowercase();
        let matched = tokens.iter().filter(|t| lower.contains(t.as_str())).count();
        if matched == 0 {
            continue;
        }
        let ratio = matched as f32 / tokens.len() as f32;
        if ratio > best_overlap_ratio {
            best_overlap_ratio = ratio;
        }

        if let Some(claimed) = claim_number {
            if text_has_conflicting_number(text, claimed) {
                any_numeric_conflict = true;
            }
        }

        sources.push(SourceReference {
            stage: stage.clone(),
            excerpt: excerpt_around(text, &tokens),
        });
    }

    sources.sort_by(|a, b| a.stage.cmp(&b.stage));

    let status = if sources.is_empty() {
        LinkStatus::Unverified
    } else if any_numeric_conflict {
        LinkStatus::Disputed
    } else if best_overlap_ratio >= 0.5 {
        LinkStatus::Verified
    } else {
        LinkStatus::Unverified
    };

    let confidence = match status {
        LinkStatus::Verified => best_overlap_ratio.min(1.0),
        LinkStatus::Disputed => 0.3,
        LinkStatus::Unverified => best_overlap_ratio * 0.5,
        LinkStatus::Error => 0.0,
    };

    LinkedClaim { claim: claim.clone(), status, confidence, sources }
}

/// Link every claim against the same stage-output map.
pub fn link_claims(claims: &[Claim], stage_outputs: &HashMap<String, String>) -> Vec<LinkedClaim> {
    claims.iter().map(|c| link_claim(c, stage_outputs)).collect()
}

fn significant_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .collect()
}

fn claim_numeric_value(claim: &Claim) -> Option<f64> {
    match &claim.value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// True if `text` contains a number that looks like it's talking about the
/// same quantity but disagrees with `claimed` by more than a cent/percent
/// of rounding slack.
fn text_has_conflicting_number(text: &str, claimed: f64) -> bool {
    for word in text.split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')') {
        let cleaned: String = word.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect();
        if cleaned.is_empty() {
            continue;
        }
        if let Ok(found) = cleaned.parse::<f64>() {
            if (found - claimed).abs() > 1e-6 && (found - claimed).abs() / claimed.abs().max(1.0) > 0.01 {
                return true;
            }
        }
    }
    false
}

fn excerpt_around(text: &str, tokens: &[String]) -> String {
    let lower = text.to_lowercase();
    let pos = tokens.iter().find_map(|t| lower.find(t.as_str()));
    match pos {
        Some(idx) => {
            let start = idx.saturating_sub(EXCERPT_RADIUS);
            let end = (idx + EXCERPT_RADIUS).min(text.len());
            let start = floor_char_boundary(text, start);
            let end = ceil_char_boundary(text, end);
            text[start..end].trim().to_string()
        }
        None => text.chars().take(EXCERPT_RADIUS).collect(),
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(text: &str, value: Option<Value>) -> Claim {
        Claim { id: "c1".into(), text: text.into(), category: "financial".into(), value, unit: None }
    }

    #[test]
    fn finds_matching_evidence_and_marks_verified() {
        let mut outputs = HashMap::new();
        outputs.insert("gather".to_string(), "Quarterly revenue grew to 450 million dollars".to_string());
        let linked = link_claim(&claim("Revenue grew to 450 million", Some(Value::from(450))), &outputs);
        assert_eq!(linked.status, LinkStatus::Verified);
        assert!(linked.confidence > 0.0);
        assert_eq!(linked.sources.len(), 1);
    }

    #[test]
    fn conflicting_number_marks_disputed() {
        let mut outputs = HashMap::new();
        outputs.insert("gather".to_string(), "Quarterly revenue grew to 300 million dollars".to_string());
        let linked = link_claim(&claim("Revenue grew to 450 million", Some(Value::from(450))), &outputs);
        assert_eq!(linked.status, LinkStatus::Disputed);
    }

    #[test]
    fn no_overlap_marks_unverified() {
        let outputs = HashMap::new();
        let linked = link_claim(&claim("Revenue grew to 450 million", None), &outputs);
        assert_eq!(linked.status, LinkStatus::Unverified);
        assert!(linked.sources.is_empty());
    }

    #[test]
    fn empty_claim_text_is_unverified_with_no_sources() {
        let mut outputs = HashMap::new();
        outputs.insert("gather".to_string(), "a b c".to_string());
        let linked = link_claim(&claim("", None), &outputs);
        assert_eq!(linked.status, LinkStatus::Unverified);
        assert_eq!(linked.confidence, 0.0);
    }
}
