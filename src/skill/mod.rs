// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Skill loading and scheduling primitives (§3, §4.1).
//!
//! A skill is a declarative YAML document describing a DAG of stages. This
//! module owns parsing, validation, DAG construction/ordering, and prompt
//! variable substitution; it does not execute anything — that is
//! [`crate::engine`]'s job.

pub mod dag;
pub mod definition;
pub mod loader;
pub mod substitution;
pub mod validation;

pub use dag::StageGraph;
pub use definition::{AgentType, InputType, OutputFormat, Skill, SkillInput, SkillOutput, Stage};
pub use loader::{LoadSkillFn, SkillLoader, SkillSummary};
pub use substitution::{referenced_names, substitute_variables};
pub use validation::{SkillValidator, ValidationResult};
