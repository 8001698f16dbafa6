// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Skill definition structures
//!
//! Defines the schema for skill YAML documents (§3, §6 of the spec).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::SkillGraphError;

/// A named, versioned declarative specification of an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Skill {
    pub name: String,
    pub description: String,

    #[serde(default)]
    pub inputs: Vec<SkillInput>,

    pub stages: Vec<Stage>,

    pub output: SkillOutput,

    #[serde(default)]
    pub tools_required: Vec<String>,

    #[serde(default)]
    pub tools_optional: Vec<String>,

    #[serde(default)]
    pub tools_config: HashMap<String, serde_json::Value>,
}

impl Skill {
    /// Parse a skill from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, SkillGraphError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Load a skill from a file on disk.
    pub fn from_file(path: &std::path::Path) -> Result<Self, SkillGraphError> {
        let content = std::fs::read_to_string(path).map_err(|e| SkillGraphError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    pub fn get_stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Declared input names, for variable-substitution lookups.
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|i| i.name.as_str()).collect()
    }
}

/// One typed, named input parameter of a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillInput {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: InputType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<serde_json::Value>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Declared type of a skill input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    String,
    #[serde(rename = "string[]")]
    StringArray,
    Number,
    Boolean,
}

/// One node in a skill's DAG: either a model invocation or a nested
/// sub-pipeline (§3 "Stage").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    pub name: String,

    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub output_format: Option<OutputFormat>,

    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(default)]
    pub input_from: Vec<String>,

    #[serde(default)]
    pub agent_type: AgentType,

    #[serde(default)]
    pub sub_pipeline: Option<String>,

    #[serde(default)]
    pub sub_inputs: HashMap<String, String>,
}

impl Stage {
    /// True when this stage is a sub-pipeline reference rather than a
    /// model-invocation stage (§3 "Stage", polymorphic variant).
    pub fn is_sub_pipeline(&self) -> bool {
        self.sub_pipeline.is_some()
    }

    /// Validate the stage carries the fields its variant requires.
    pub fn validate_shape(&self) -> Result<(), SkillGraphError> {
        if self.is_sub_pipeline() {
            if self.prompt.is_some() || !self.tools.is_empty() {
                return Err(SkillGraphError::SkillValidationError {
                    skill: String::new(),
                    path: format!("stages.{}", self.name),
                    reason: "sub_pipeline stages cannot declare prompt/tools".into(),
                });
            }
        } else if self.prompt.is_none() {
            return Err(SkillGraphError::SkillValidationError {
                skill: String::new(),
                path: format!("stages.{}", self.name),
                reason: "model stages require a prompt".into(),
            });
        }
        Ok(())
    }
}

/// Preset of model/decoding/tool-loop defaults selected by a stage (§3
/// "AgentType").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Research,
    Explore,
    Verify,
    #[default]
    Default,
}

/// Output rendering format requested for a stage or skill.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Markdown,
    Text,
    Docx,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Markdown => write!(f, "markdown"),
            Self::Text => write!(f, "text"),
            Self::Docx => write!(f, "docx"),
        }
    }
}

/// The skill's declared primary output stage and rendering options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillOutput {
    pub primary: String,

    #[serde(default)]
    pub format: Option<OutputFormat>,

    #[serde(default)]
    pub filename_template: Option<String>,

    #[serde(default)]
    pub save_intermediate: bool,
}
