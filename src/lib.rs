// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! # skillgraph
//!
//! A DAG execution engine that runs declarative, YAML-described "skills"
//! as a bounded-concurrency graph of LLM+tool task agents, with shared
//! budget accounting, partial-failure semantics, sub-pipeline nesting,
//! cancellation, and lifecycle event emission.
//!
//! This crate owns the scheduler core and its directly coupled
//! subsystems — the skill loader, the MCP-style tool adapter, the
//! permission gate, the cost tracker, and claim verification. It consumes
//! an opaque [`engine::ModelCaller`] and [`engine::ToolResolver`] supplied
//! by the caller; it never talks to a concrete LLM provider or tool
//! transport's wire protocol beyond the two bundled transports in
//! [`tools::client_manager`].
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use skillgraph::engine::{NoopHookManager, PipelineContext, PipelineEngine};
//! use skillgraph::skill::Skill;
//!
//! # async fn example(model: Arc<dyn skillgraph::engine::ModelCaller>, tools: Arc<dyn skillgraph::engine::ToolResolver>) -> Result<(), skillgraph::errors::SkillGraphError> {
//! let skill = Skill::from_file("skill.yaml".as_ref())?;
//! let engine = PipelineEngine::new(model, tools, Arc::new(NoopHookManager));
//! let context = PipelineContext::new(Default::default(), 10.0);
//! let report = engine.run(&skill, context).await?;
//! # let _ = report;
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod cli;
pub mod concurrency;
pub mod engine;
pub mod errors;
pub mod skill;
pub mod tools;
pub mod verification;

pub use budget::CostTracker;
pub use concurrency::ConcurrencyGate;
pub use engine::{PipelineContext, PipelineEngine, PipelineReport};
pub use errors::{SkillGraphError, SkillGraphResult};
pub use skill::{Skill, SkillLoader, Stage};
pub use verification::VerificationReport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
