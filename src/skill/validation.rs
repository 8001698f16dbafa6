// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Skill validation
//!
//! Validates a skill document before it enters the DAG builder: duplicate
//! stage names, dangling `input_from`/`sub_inputs`/`output.primary`
//! references, and per-stage shape checks (§4.1).

use std::collections::HashSet;

use crate::errors::SkillGraphError;
use crate::skill::dag::StageGraph;
use crate::skill::substitution::referenced_names;
use crate::skill::{Skill, Stage};

pub struct SkillValidator;

impl SkillValidator {
    /// Validate a skill, collecting every error rather than failing fast so
    /// the CLI `validate` command can report the full set at once.
    pub fn validate(skill: &Skill) -> Result<ValidationResult, SkillGraphError> {
        let mut result = ValidationResult::new();

        if skill.stages.is_empty() {
            result.add_error("skill has no stages defined");
        }

        let mut seen_names = HashSet::new();
        for stage in &skill.stages {
            if !seen_names.insert(&stage.name) {
                result.add_error(&format!("duplicate stage name: '{}'", stage.name));
            }
        }

        match StageGraph::build(skill) {
            Ok(_) => {}
            Err(SkillGraphError::SkillCycleError { participant }) => {
                result.add_error(&format!("cycle detected involving stage '{participant}'"));
            }
            Err(SkillGraphError::SkillValidationError { reason, .. }) => {
                result.add_error(&reason);
            }
            Err(e) => result.add_error(&e.to_string()),
        }

        for stage in &skill.stages {
            Self::validate_stage(stage, skill, &mut result);
        }

        let known_inputs: HashSet<&str> = skill.input_names().into_iter().collect();
        let known_stages: HashSet<&str> = skill.stage_names().into_iter().collect();
        if !known_stages.contains(skill.output.primary.as_str()) {
            result.add_error(&format!(
                "output.primary references unknown stage '{}'",
                skill.output.primary
            ));
        }

        for stage in &skill.stages {
            if let Err(e) = stage.validate_shape() {
                result.add_error(&e.to_string());
            }

            if let Some(prompt) = &stage.prompt {
                for name in referenced_names(prompt) {
                    if !known_inputs.contains(name.as_str())
                        && !known_stages.contains(name.as_str())
                    {
                        result.add_error(&format!(
                            "stage '{}': prompt references undeclared name '{}'",
                            stage.name, name
                        ));
                    }
                }
            }

            for value in stage.sub_inputs.values() {
                for name in referenced_names(value) {
                    if !known_inputs.contains(name.as_str())
                        && !known_stages.contains(name.as_str())
                    {
                        result.add_error(&format!(
                            "stage '{}': sub_inputs references undeclared name '{}'",
                            stage.name, name
                        ));
                    }
                }
            }
        }

        Ok(result)
    }

    fn validate_stage(stage: &Stage, skill: &Skill, result: &mut ValidationResult) {
        for dep in &stage.input_from {
            if skill.get_stage(dep).is_none() {
                result.add_error(&format!(
                    "stage '{}': input_from references unknown stage '{}'",
                    stage.name, dep
                ));
            }
        }

        if stage.is_sub_pipeline() && stage.sub_pipeline.as_deref() == Some("") {
            result.add_error(&format!(
                "stage '{}': sub_pipeline name is empty",
                stage.name
            ));
        }
    }
}

/// Collected errors and warnings from validating a skill.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
