// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Skill loading: parse a skill document, validate it end-to-end, and scan
//! a directory of skill files (§4.1).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::SkillGraphError;
use crate::skill::validation::SkillValidator;
use crate::skill::Skill;

/// Callback a caller supplies to resolve a sub-pipeline stage's `sub_pipeline`
/// name to the referenced skill, so cross-skill cycles can be detected
/// without this crate owning a skill registry itself.
pub type LoadSkillFn<'a> = dyn Fn(&str) -> Result<Skill, SkillGraphError> + 'a;

pub struct SkillLoader;

impl SkillLoader {
    /// Parse and fully validate a skill from a YAML string.
    pub fn load_from_yaml(yaml: &str) -> Result<Skill, SkillGraphError> {
        let skill = Skill::from_yaml(yaml)?;
        Self::validate(&skill)?;
        Ok(skill)
    }

    /// Parse and fully validate a skill from a file on disk.
    pub fn load_from_file(path: &Path) -> Result<Skill, SkillGraphError> {
        if !path.exists() {
            return Err(SkillGraphError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let skill = Skill::from_file(path)?;
        Self::validate(&skill)?;
        Ok(skill)
    }

    fn validate(skill: &Skill) -> Result<(), SkillGraphError> {
        let result = SkillValidator::validate(skill)?;
        if !result.is_valid() {
            return Err(SkillGraphError::SkillLoadError {
                name: skill.name.clone(),
                reason: result.errors.join("; "),
            });
        }
        Ok(())
    }

    /// Walk a skill's sub-pipeline stages, resolving each referenced skill
    /// through `load_skill`, and fail if following those references ever
    /// revisits a skill already on the current chain (§4.1, §4.7 — a
    /// cross-skill cycle is the same failure as an intra-skill DAG cycle).
    pub fn validate_sub_pipeline_refs(
        skill: &Skill,
        load_skill: &LoadSkillFn<'_>,
    ) -> Result<(), SkillGraphError> {
        let mut chain = vec![skill.name.clone()];
        Self::walk_sub_pipelines(skill, load_skill, &mut chain)
    }

    fn walk_sub_pipelines(
        skill: &Skill,
        load_skill: &LoadSkillFn<'_>,
        chain: &mut Vec<String>,
    ) -> Result<(), SkillGraphError> {
        for stage in &skill.stages {
            let Some(sub_name) = &stage.sub_pipeline else {
                continue;
            };

            if chain.iter().any(|n| n == sub_name) {
                return Err(SkillGraphError::SkillCycleError {
                    participant: sub_name.clone(),
                });
            }

            let sub_skill = load_skill(sub_name).map_err(|e| SkillGraphError::SkillLoadError {
                name: sub_name.clone(),
                reason: e.to_string(),
            })?;

            chain.push(sub_name.clone());
            Self::walk_sub_pipelines(&sub_skill, load_skill, chain)?;
            chain.pop();
        }
        Ok(())
    }

    /// Recursively collect every `.yaml`/`.yml` file under `dir`.
    pub fn scan_skill_files(dir: &Path) -> Result<Vec<PathBuf>, SkillGraphError> {
        let mut found = Vec::new();
        Self::scan_into(dir, &mut found)?;
        found.sort();
        Ok(found)
    }

    fn scan_into(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), SkillGraphError> {
        let entries = std::fs::read_dir(dir)?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::scan_into(&path, found)?;
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            ) {
                found.push(path);
            }
        }
        Ok(())
    }

    /// Lightweight catalog of every skill under `dir`, for listing/discovery
    /// tooling. Files that fail to parse or validate are logged and skipped
    /// rather than failing the whole scan.
    pub fn scan_skill_summaries(dir: &Path) -> Result<Vec<SkillSummary>, SkillGraphError> {
        let mut summaries = Vec::new();
        let mut seen_names: HashSet<String> = HashSet::new();

        for path in Self::scan_skill_files(dir)? {
            match Self::load_from_file(&path) {
                Ok(skill) => {
                    if !seen_names.insert(skill.name.clone()) {
                        warn!(skill = %skill.name, path = %path.display(), "duplicate skill name in scan");
                    }
                    summaries.push(SkillSummary {
                        name: skill.name,
                        description: skill.description,
                        path,
                        stage_count: skill.stages.len(),
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid skill file during scan");
                }
            }
        }
        Ok(summaries)
    }
}

/// One entry from a directory scan of skill files.
#[derive(Debug, Clone)]
pub struct SkillSummary {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
    pub stage_count: usize,
}
