// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! CLI command definitions and handlers
//!
//! `skillgraph` ships a thin binary: driving an actual pipeline needs a
//! concrete LLM SDK to supply a `ModelCaller`, which this crate
//! deliberately does not provide, so the CLI only exposes the two
//! operations that need nothing but the skill loader — validating a skill
//! file and visualizing its stage DAG.

pub mod graph;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// DAG scheduler for multi-stage LLM skill pipelines
#[derive(Parser, Debug)]
#[clap(
    name = "skillgraph",
    version,
    about = "Validate and visualize skill pipeline DAGs",
    long_about = None,
    after_help = "Examples:\n\
        skillgraph validate skill.yaml     Validate a skill file\n\
        skillgraph graph skill.yaml        Show a skill's stage DAG\n\n\
        See 'skillgraph <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a skill file
    Validate {
        /// Skill file to validate
        skill: PathBuf,
    },

    /// Show a skill's stage DAG
    Graph {
        /// Skill file
        skill: PathBuf,

        /// Output format
        #[clap(short, long, default_value = "text", value_parser = ["text", "dot", "mermaid"])]
        format: GraphFormat,
    },
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}
