// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Graph command - visualize a skill's stage DAG

use miette::Result;
use std::path::PathBuf;

use super::GraphFormat;
use crate::skill::{Skill, StageGraph};

/// Run the graph command
pub async fn run(skill_path: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    if !skill_path.exists() {
        return Err(miette::miette!("Skill file not found: {}", skill_path.display()));
    }

    let skill = Skill::from_file(&skill_path).map_err(|e| miette::miette!("Failed to load skill: {}", e))?;

    let dag = StageGraph::build(&skill).map_err(|e| miette::miette!("Failed to build DAG: {}", e))?;

    let output = match format {
        GraphFormat::Text => dag.to_text().map_err(|e| miette::miette!("{}", e))?,
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
