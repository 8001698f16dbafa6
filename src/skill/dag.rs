// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! DAG construction, cycle detection, topological order and execution
//! levels for a skill's stages (§4.1 SkillLoader).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::errors::SkillGraphError;
use crate::skill::Skill;

/// Builder for a skill's stage-dependency DAG.
///
/// Nodes are stage names; edges come from `input_from` only — a
/// sub-pipeline stage's edges are its own `input_from`, never its
/// sub-skill's internals (§3 "Stage" invariants).
pub struct StageGraph {
    order: Vec<String>,
    adjacency: HashMap<String, Vec<String>>,
    predecessors: HashMap<String, Vec<String>>,
}

impl StageGraph {
    /// Build and validate the DAG for a skill. Fails if an edge references
    /// an unknown stage or if the graph contains a cycle.
    pub fn build(skill: &Skill) -> Result<Self, SkillGraphError> {
        let order: Vec<String> = skill.stages.iter().map(|s| s.name.clone()).collect();
        let known: HashSet<&str> = order.iter().map(String::as_str).collect();

        let mut adjacency: HashMap<String, Vec<String>> =
            order.iter().map(|n| (n.clone(), Vec::new())).collect();
        let mut predecessors: HashMap<String, Vec<String>> =
            order.iter().map(|n| (n.clone(), Vec::new())).collect();

        for stage in &skill.stages {
            for dep in &stage.input_from {
                if !known.contains(dep.as_str()) {
                    return Err(SkillGraphError::SkillValidationError {
                        skill: skill.name.clone(),
                        path: format!("stages.{}.input_from", stage.name),
                        reason: format!("references unknown stage '{dep}'"),
                    });
                }
                adjacency.get_mut(dep).unwrap().push(stage.name.clone());
                predecessors
                    .get_mut(&stage.name)
                    .unwrap()
                    .push(dep.clone());
            }
        }

        let graph = Self {
            order,
            adjacency,
            predecessors,
        };
        graph.validate_acyclic()?;
        Ok(graph)
    }

    /// Three-color DFS cycle detection (§4.1 `validateDAG`). White = unvisited,
    /// gray = on the current recursion stack, black = fully processed. A
    /// back-edge to a gray node is a cycle.
    fn validate_acyclic(&self) -> Result<(), SkillGraphError> {
        let mut color: HashMap<&str, Color3> = self
            .order
            .iter()
            .map(|n| (n.as_str(), Color3::White))
            .collect();

        for start in &self.order {
            if color[start.as_str()] != Color3::White {
                continue;
            }
            self.dfs_visit(start, &mut color)?;
        }
        Ok(())
    }

    fn dfs_visit<'a>(
        &'a self,
        node: &'a str,
        color: &mut HashMap<&'a str, Color3>,
    ) -> Result<(), SkillGraphError> {
        color.insert(node, Color3::Gray);
        for next in &self.adjacency[node] {
            match color.get(next.as_str()) {
                Some(Color3::Gray) => {
                    return Err(SkillGraphError::SkillCycleError {
                        participant: next.clone(),
                    })
                }
                Some(Color3::Black) => continue,
                _ => self.dfs_visit(next, color)?,
            }
        }
        color.insert(node, Color3::Black);
        Ok(())
    }

    /// Kahn's algorithm topological sort, ties broken by authoring order
    /// (§4.1 `topologicalSort`).
    pub fn topological_order(&self) -> Result<Vec<String>, SkillGraphError> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|n| (n.as_str(), self.predecessors[n].len()))
            .collect();

        // Ready queue ordered by authoring position, not insertion order.
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut ready: Vec<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree[n] == 0)
            .collect();
        ready.sort_by_key(|n| position[n]);

        let mut result = Vec::with_capacity(self.order.len());
        let mut queue: VecDeque<&str> = ready.into();

        while let Some(node) = queue.pop_front() {
            result.push(node.to_string());
            let mut newly_ready = Vec::new();
            for succ in &self.adjacency[node] {
                let entry = in_degree.get_mut(succ.as_str()).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    newly_ready.push(succ.as_str());
                }
            }
            newly_ready.sort_by_key(|n| position[n]);
            // Merge newly-ready nodes into the queue keeping authoring order
            // as the global tie-break, not just within this batch.
            let mut merged: Vec<&str> = queue.iter().copied().chain(newly_ready).collect();
            merged.sort_by_key(|n| position[n]);
            queue = merged.into();
        }

        if result.len() != self.order.len() {
            let stuck = self
                .order
                .iter()
                .find(|n| !result.contains(n))
                .cloned()
                .unwrap_or_default();
            return Err(SkillGraphError::SkillCycleError { participant: stuck });
        }

        Ok(result)
    }

    /// Partition stages into minimal execution levels: level L contains
    /// exactly the stages whose predecessors all lie in levels < L, with
    /// authoring order preserved within a level (§3 "ExecutionLevel", §4.1
    /// `computeExecutionLevels`).
    pub fn execution_levels(&self) -> Result<Vec<Vec<String>>, SkillGraphError> {
        let topo = self.topological_order()?;
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut level_of: HashMap<&str, usize> = HashMap::new();
        for node in &topo {
            let level = self.predecessors[node]
                .iter()
                .map(|p| level_of[p.as_str()] + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(node.as_str(), level);
        }

        let max_level = level_of.values().copied().max().unwrap_or(0);
        let mut levels: Vec<Vec<String>> = vec![Vec::new(); max_level + 1];
        for node in &topo {
            levels[level_of[node.as_str()]].push(node.clone());
        }
        for level in &mut levels {
            level.sort_by_key(|n| position[n.as_str()]);
        }

        Ok(levels)
    }

    pub fn predecessors_of(&self, stage: &str) -> &[String] {
        self.predecessors
            .get(stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Render the execution levels as plain text, one line per stage,
    /// grouped under a `Level N:` heading, for the `graph` CLI command's
    /// default text output.
    pub fn to_text(&self) -> Result<String, SkillGraphError> {
        let levels = self.execution_levels()?;
        let mut out = String::new();
        for (i, level) in levels.iter().enumerate() {
            out.push_str(&format!("Level {i}:\n"));
            for stage in level {
                let preds = self.predecessors_of(stage);
                if preds.is_empty() {
                    out.push_str(&format!("  - {stage}\n"));
                } else {
                    out.push_str(&format!("  - {stage} (depends on: {})\n", preds.join(", ")));
                }
            }
        }
        Ok(out)
    }

    /// Render the DAG as a Mermaid diagram, for the `graph` CLI command.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        for name in &self.order {
            out.push_str(&format!("    {name}[{name}]\n"));
        }
        for (from, tos) in &self.adjacency {
            for to in tos {
                out.push_str(&format!("    {from} --> {to}\n"));
            }
        }
        out
    }

    /// Render the DAG as a DOT diagram.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph skill {\n    rankdir=TB;\n");
        for (from, tos) in &self.adjacency {
            for to in tos {
                out.push_str(&format!("    \"{from}\" -> \"{to}\";\n"));
            }
        }
        out.push_str("}\n");
        out
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color3 {
    White,
    Gray,
    Black,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::{AgentType, OutputFormat as Fmt, SkillOutput, Stage};
    use std::collections::HashMap as Map;

    fn skill_with(stages: Vec<(&str, Vec<&str>)>) -> Skill {
        Skill {
            name: "test".into(),
            description: "d".into(),
            inputs: vec![],
            stages: stages
                .into_iter()
                .map(|(name, deps)| Stage {
                    name: name.into(),
                    prompt: Some("x".into()),
                    model: None,
                    max_tokens: None,
                    temperature: None,
                    output_format: None,
                    tools: vec![],
                    input_from: deps.into_iter().map(String::from).collect(),
                    agent_type: AgentType::Default,
                    sub_pipeline: None,
                    sub_inputs: Map::new(),
                })
                .collect(),
            output: SkillOutput {
                primary: "x".into(),
                format: Some(Fmt::Text),
                filename_template: None,
                save_intermediate: false,
            },
            tools_required: vec![],
            tools_optional: vec![],
            tools_config: Map::new(),
        }
    }

    #[test]
    fn linear_topo_order() {
        let skill = skill_with(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);
        let dag = StageGraph::build(&skill).unwrap();
        assert_eq!(dag.topological_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn authoring_order_tiebreak() {
        let skill = skill_with(vec![("z", vec![]), ("a", vec![]), ("m", vec![])]);
        let dag = StageGraph::build(&skill).unwrap();
        let levels = dag.execution_levels().unwrap();
        assert_eq!(levels, vec![vec!["z", "a", "m"]]);
    }

    #[test]
    fn diamond_levels() {
        let skill = skill_with(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b", "c"]),
        ]);
        let dag = StageGraph::build(&skill).unwrap();
        let levels = dag.execution_levels().unwrap();
        assert_eq!(levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn self_cycle_detected() {
        let skill = skill_with(vec![("a", vec!["a"])]);
        let err = StageGraph::build(&skill).unwrap_err();
        assert!(matches!(err, SkillGraphError::SkillCycleError { .. }));
    }

    #[test]
    fn two_cycle_detected() {
        let skill = skill_with(vec![("a", vec!["b"]), ("b", vec!["a"])]);
        let err = StageGraph::build(&skill).unwrap_err();
        assert!(matches!(err, SkillGraphError::SkillCycleError { .. }));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let skill = skill_with(vec![("a", vec!["ghost"])]);
        let err = StageGraph::build(&skill).unwrap_err();
        assert!(matches!(err, SkillGraphError::SkillValidationError { .. }));
    }

    #[test]
    fn level_correctness_property() {
        let skill = skill_with(vec![
            ("gather", vec![]),
            ("enrich", vec!["gather"]),
            ("analyze", vec!["gather", "enrich"]),
        ]);
        let dag = StageGraph::build(&skill).unwrap();
        let levels = dag.execution_levels().unwrap();
        let level_of = |name: &str| levels.iter().position(|l| l.contains(&name.to_string())).unwrap();
        for (i, level) in levels.iter().enumerate() {
            for stage in level {
                for dep in dag.predecessors_of(stage) {
                    assert!(level_of(dep) < i);
                }
            }
        }
    }
}
