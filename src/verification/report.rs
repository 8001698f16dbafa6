// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! VerificationReport assembly (§4.8 step 3): claims, summary counts,
//! overall confidence, and the analysis text annotated with footnote
//! markers pointing back at each claim's sources.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::verification::linker::{link_claims, LinkStatus, LinkedClaim};
use crate::verification::claims::Claim;

/// Count of claims in each [`LinkStatus`] bucket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryCounts {
    pub verified: usize,
    pub disputed: usize,
    pub unverified: usize,
    pub error: usize,
}

/// One footnote in the annotated text, numbered in claim order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Footnote {
    pub index: usize,
    pub claim_id: String,
    pub status: LinkStatus,
    pub sources: Vec<String>,
}

/// The complete output of the verification subsystem for one verify stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationReport {
    pub claims: Vec<LinkedClaim>,
    pub summary: SummaryCounts,
    pub overall_confidence: f32,
    pub analysis_text: String,
    pub annotated_text: String,
    pub footnotes: Vec<Footnote>,
}

/// Build a report from already-extracted claims and the map of prior
/// stage outputs, by linking each claim and aggregating the result.
pub fn build_report(analysis_text: &str, claims: Vec<Claim>, stage_outputs: &HashMap<String, String>) -> VerificationReport {
    let linked = link_claims(&claims, stage_outputs);

    let mut summary = SummaryCounts::default();
    for c in &linked {
        match c.status {
            LinkStatus::Verified => summary.verified += 1,
            LinkStatus::Disputed => summary.disputed += 1,
            LinkStatus::Unverified => summary.unverified += 1,
            LinkStatus::Error => summary.error += 1,
        }
    }

    let overall_confidence = if linked.is_empty() {
        0.0
    } else {
        linked.iter().map(|c| c.confidence).sum::<f32>() / linked.len() as f32
    };

    let footnotes: Vec<Footnote> = linked
        .iter()
        .enumerate()
        .map(|(i, c)| Footnote {
            index: i + 1,
            claim_id: c.claim.id.clone(),
            status: c.status,
            sources: c.sources.iter().map(|s| s.stage.clone()).collect(),
        })
        .collect();

    let annotated_text = annotate(analysis_text, &linked);

    VerificationReport {
        claims: linked,
        summary,
        overall_confidence,
        analysis_text: analysis_text.to_string(),
        annotated_text,
        footnotes,
    }
}

/// Append a `[n]` marker after the first occurrence of each claim's text in
/// the analysis, falling back to appending an unanchored marker at the end
/// when the exact claim text can't be found verbatim (models routinely
/// paraphrase the original sentence when extracting a claim from it).
fn annotate(analysis_text: &str, linked: &[LinkedClaim]) -> String {
    let mut result = analysis_text.to_string();
    let mut trailing = String::new();

    for (i, c) in linked.iter().enumerate() {
        let marker = format!(" [{}]", i + 1);
        if let Some(pos) = result.find(c.claim.text.as_str()) {
            let insert_at = pos + c.claim.text.len();
            result.insert_str(insert_at, &marker);
        } else {
            let _ = write!(trailing, "\n{}{}", c.claim.text, marker);
        }
    }

    if !trailing.is_empty() {
        result.push_str(&trailing);
    }
    result
}
