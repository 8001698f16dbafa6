// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Validate command - parse and DAG-validate a skill file

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::skill::{Skill, SkillValidator};

/// Run the validate command
pub async fn run(skill_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating skill...".bold());
    println!();

    if !skill_path.exists() {
        return Err(miette::miette!("Skill file not found: {}", skill_path.display()));
    }

    let skill = match Skill::from_file(&skill_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("  {} Failed to parse skill", "✗".red());
            eprintln!();
            return Err(miette::miette!("Parse error: {}", e));
        }
    };

    println!("  {} Skill file is valid YAML", "✓".green());

    let validation = SkillValidator::validate(&skill)
        .map_err(|e| miette::miette!("Validation error: {}", e))?;

    let mut has_issues = false;

    if !validation.errors.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Skill summary".bold());
        println!("  Name: {}", skill.name);
        println!("  Stages: {}", skill.stages.len());
        for stage in &skill.stages {
            let deps = if stage.input_from.is_empty() {
                String::new()
            } else {
                format!(" [depends: {}]", stage.input_from.join(", "))
            };
            let kind = if stage.is_sub_pipeline() { "sub_pipeline" } else { "model" };
            println!("    - {} ({}){}", stage.name, kind, deps.dimmed());
        }
    }

    println!();

    if has_issues {
        if validation.is_valid() {
            println!("{}", "Skill is valid but has warnings.".yellow().bold());
            Ok(())
        } else {
            Err(miette::miette!("Skill validation failed"))
        }
    } else {
        println!("{}", "Skill is valid!".green().bold());
        Ok(())
    }
}
