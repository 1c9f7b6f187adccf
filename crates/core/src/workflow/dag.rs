//! DAG construction from declared step targets.

use crate::error::EngineError;
use crate::target::Target;
use crate::types::{Step, StepId, WorkflowSpec};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Dependency graph over steps: edges run producer -> consumer, derived
/// from matching output targets against input/depends targets and from
/// explicit step references. Built once per run, never mutated.
#[derive(Debug)]
pub struct WorkflowDag {
    graph: DiGraph<Step, ()>,
    step_indices: HashMap<StepId, NodeIndex>,
}

impl WorkflowDag {
    /// Build the DAG or fail before any execution: a cycle is reported
    /// with its full ordered path, and an input/depends target with no
    /// producer is an error unless it is a file that already exists under
    /// `workdir`.
    pub fn build(workflow: &WorkflowSpec, workdir: &Path) -> Result<Self, EngineError> {
        let mut graph = DiGraph::new();
        let mut step_indices = HashMap::new();

        for step in &workflow.steps {
            if step_indices.contains_key(&step.id) {
                return Err(EngineError::DuplicateStep(step.id.to_string()));
            }
            let node = graph.add_node(step.clone());
            step_indices.insert(step.id.clone(), node);
        }

        let mut edges: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
        for (position, step) in workflow.steps.iter().enumerate() {
            let consumer = step_indices[&step.id];
            for target in consumed_targets(step) {
                let producer = match target {
                    Target::StepRef { step: reference } => {
                        Some(*step_indices.get(reference).ok_or_else(|| {
                            EngineError::UnknownStep {
                                step: step.id.to_string(),
                                reference: reference.to_string(),
                            }
                        })?)
                    }
                    Target::File { .. } | Target::Var { .. } => {
                        // Latest prior step declaring this target as an
                        // output wins.
                        let found = workflow.steps[..position]
                            .iter()
                            .rev()
                            .find(|candidate| candidate.outputs.contains(target))
                            .map(|candidate| step_indices[&candidate.id]);
                        if found.is_none() && !externally_satisfied(target, workdir) {
                            return Err(EngineError::UnresolvedTarget {
                                step: step.id.to_string(),
                                target: target.to_string(),
                            });
                        }
                        found
                    }
                };

                if let Some(producer) = producer {
                    if edges.insert((producer, consumer)) {
                        graph.add_edge(producer, consumer, ());
                    }
                }
            }
        }

        let dag = Self {
            graph,
            step_indices,
        };
        dag.check_acyclic(workflow)?;
        Ok(dag)
    }

    /// Depth-first cycle check with an explicit recursion stack so the
    /// offending cycle can be named in declaration order.
    fn check_acyclic(&self, workflow: &WorkflowSpec) -> Result<(), EngineError> {
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = Vec::new();
        let mut on_stack: HashSet<NodeIndex> = HashSet::new();

        for step in &workflow.steps {
            let start = self.step_indices[&step.id];
            if !visited.contains(&start) {
                self.visit(start, &mut visited, &mut stack, &mut on_stack)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        stack: &mut Vec<NodeIndex>,
        on_stack: &mut HashSet<NodeIndex>,
    ) -> Result<(), EngineError> {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
            if on_stack.contains(&next) {
                let from = stack.iter().position(|n| *n == next).unwrap_or(0);
                let mut path: Vec<String> = stack[from..]
                    .iter()
                    .map(|n| self.graph[*n].id.to_string())
                    .collect();
                path.push(self.graph[next].id.to_string());
                return Err(EngineError::Cycle { path });
            }
            if !visited.contains(&next) {
                self.visit(next, visited, stack, on_stack)?;
            }
        }

        stack.pop();
        on_stack.remove(&node);
        Ok(())
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.step_indices.get(id).map(|n| &self.graph[*n])
    }

    /// Producer steps of `id`, in declaration order.
    pub fn dependencies(&self, id: &StepId) -> Vec<StepId> {
        let Some(node) = self.step_indices.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<&Step> = self
            .graph
            .neighbors_directed(*node, Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect();
        deps.sort_by_key(|s| s.index);
        deps.into_iter().map(|s| s.id.clone()).collect()
    }

    /// Consumer steps of `id`, in declaration order.
    pub fn dependents(&self, id: &StepId) -> Vec<StepId> {
        let Some(node) = self.step_indices.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<&Step> = self
            .graph
            .neighbors_directed(*node, Direction::Outgoing)
            .map(|n| &self.graph[n])
            .collect();
        deps.sort_by_key(|s| s.index);
        deps.into_iter().map(|s| s.id.clone()).collect()
    }

    /// Steps with no producers (can start immediately), in declaration
    /// order.
    pub fn entry_steps(&self) -> Vec<StepId> {
        let mut entries: Vec<&Step> = self
            .graph
            .node_indices()
            .filter(|n| {
                self.graph
                    .neighbors_directed(*n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| &self.graph[n])
            .collect();
        entries.sort_by_key(|s| s.index);
        entries.into_iter().map(|s| s.id.clone()).collect()
    }
}

/// Input and depends targets of a step, deduplicated. A target declared
/// both ways counts once, as an input (data flow subsumes ordering).
pub fn consumed_targets(step: &Step) -> Vec<&Target> {
    let mut seen: HashSet<&Target> = HashSet::new();
    step.inputs
        .iter()
        .chain(step.depends.iter())
        .filter(|t| seen.insert(*t))
        .collect()
}

fn externally_satisfied(target: &Target, workdir: &Path) -> bool {
    match target.resolved_path(workdir) {
        Some(path) => path.exists(),
        None => false,
    }
}
