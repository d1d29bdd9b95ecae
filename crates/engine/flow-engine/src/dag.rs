/*!
# DAG Planner

Turns a workflow graph into an execution plan: an ordered sequence of
layers where every edge crosses from an earlier layer to a later one.
Nodes within a layer have no edges between them and may run concurrently.
*/

use flow_core::{FlowError, Result, Workflow};
use std::collections::{HashMap, HashSet, VecDeque};

/// Layered topological order over a workflow's nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Layers in dispatch order; ids within a layer are sorted ascending
    pub layers: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// No nodes at all
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Total planned nodes
    pub fn node_count(&self) -> usize {
        self.layers.iter().map(|l| l.len()).sum()
    }

    /// Index of the layer containing a node
    pub fn layer_of(&self, node_id: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|id| id == node_id))
    }
}

/// Build the execution plan for a workflow.
///
/// Kahn's layered topological sort: layer 0 holds every node with
/// in-degree zero; removing a layer's outgoing edges yields the next.
/// Nodes whose in-degree never reaches zero sit on a cycle and are
/// reported in `CycleDetected`.
///
/// Pure: the same workflow always yields the same plan.
pub fn plan(workflow: &Workflow) -> Result<ExecutionPlan> {
    workflow.validate()?;

    if workflow.nodes.is_empty() {
        return Ok(ExecutionPlan { layers: Vec::new() });
    }

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &workflow.nodes {
        in_degree.insert(node.id.as_str(), 0);
        adjacency.insert(node.id.as_str(), Vec::new());
    }
    for edge in &workflow.edges {
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    current.sort_unstable();

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut placed = 0usize;

    while !current.is_empty() {
        placed += current.len();
        let mut next: Vec<&str> = Vec::new();
        for &node_id in &current {
            for &successor in &adjacency[node_id] {
                let degree = in_degree.get_mut(successor).expect("known node");
                *degree -= 1;
                if *degree == 0 {
                    next.push(successor);
                }
            }
        }
        next.sort_unstable();
        layers.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    if placed != workflow.nodes.len() {
        let placed_ids: HashSet<&str> = layers
            .iter()
            .flatten()
            .map(|s| s.as_str())
            .collect();
        let mut offenders: Vec<String> = workflow
            .nodes
            .iter()
            .filter(|n| !placed_ids.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        offenders.sort_unstable();
        return Err(FlowError::CycleDetected { nodes: offenders });
    }

    Ok(ExecutionPlan { layers })
}

/// Transitive successors of a node, used to propagate skips.
pub fn descendants(workflow: &Workflow, node_id: &str) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(node_id);

    while let Some(current) = queue.pop_front() {
        for successor in workflow.successors(current) {
            if seen.insert(successor.to_string()) {
                queue.push_back(successor);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::{NodeDefinition, WorkflowBuilder};

    fn node(id: &str) -> NodeDefinition {
        NodeDefinition::task(id, "plugin", "method")
    }

    #[test]
    fn test_linear_chain_layers() {
        let wf = WorkflowBuilder::new("wf", "linear")
            .node(node("a"))
            .node(node("b"))
            .node(node("c"))
            .edge("a", "b")
            .edge("b", "c")
            .build()
            .unwrap();

        let plan = plan(&wf).unwrap();
        assert_eq!(plan.layers, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_diamond_layers() {
        let wf = WorkflowBuilder::new("wf", "diamond")
            .node(node("a"))
            .node(node("d"))
            .node(node("c"))
            .node(node("b"))
            .edge("a", "b")
            .edge("a", "c")
            .edge("b", "d")
            .edge("c", "d")
            .build()
            .unwrap();

        let p = plan(&wf).unwrap();
        assert_eq!(p.layers.len(), 3);
        assert_eq!(p.layers[0], vec!["a"]);
        // deterministic ascending order within the layer
        assert_eq!(p.layers[1], vec!["b", "c"]);
        assert_eq!(p.layers[2], vec!["d"]);
    }

    #[test]
    fn test_every_edge_crosses_forward() {
        let wf = WorkflowBuilder::new("wf", "fan")
            .node(node("start"))
            .node(node("x"))
            .node(node("y"))
            .node(node("merge"))
            .node(node("end"))
            .edge("start", "x")
            .edge("start", "y")
            .edge("x", "merge")
            .edge("y", "merge")
            .edge("merge", "end")
            .build()
            .unwrap();

        let p = plan(&wf).unwrap();
        for edge in &wf.edges {
            let from = p.layer_of(&edge.from).unwrap();
            let to = p.layer_of(&edge.to).unwrap();
            assert!(from < to, "edge {} -> {} does not cross forward", edge.from, edge.to);
        }
    }

    #[test]
    fn test_cycle_reports_offending_nodes() {
        let wf = WorkflowBuilder::new("wf", "cycle")
            .node(node("entry"))
            .node(node("a"))
            .node(node("b"))
            .node(node("c"))
            .edge("entry", "a")
            .edge("a", "b")
            .edge("b", "c")
            .edge("c", "a")
            .build()
            .unwrap();

        match plan(&wf) {
            Err(FlowError::CycleDetected { nodes }) => {
                assert_eq!(nodes, vec!["a", "b", "c"]);
            }
            other => panic!("expected CycleDetected, got {:?}", other.map(|p| p.layers)),
        }
    }

    #[test]
    fn test_empty_workflow_plans_empty() {
        let wf = WorkflowBuilder::new("wf", "empty").build().unwrap();
        let p = plan(&wf).unwrap();
        assert!(p.is_empty());
        assert_eq!(p.node_count(), 0);
    }

    #[test]
    fn test_plan_is_pure() {
        let wf = WorkflowBuilder::new("wf", "pure")
            .node(node("b"))
            .node(node("a"))
            .node(node("c"))
            .edge("a", "c")
            .edge("b", "c")
            .build()
            .unwrap();

        assert_eq!(plan(&wf).unwrap(), plan(&wf).unwrap());
    }

    #[test]
    fn test_descendants() {
        let wf = WorkflowBuilder::new("wf", "desc")
            .node(node("a"))
            .node(node("b"))
            .node(node("c"))
            .node(node("d"))
            .edge("a", "b")
            .edge("b", "c")
            .edge("b", "d")
            .build()
            .unwrap();

        let down = descendants(&wf, "b");
        assert_eq!(down.len(), 2);
        assert!(down.contains("c") && down.contains("d"));
        assert!(descendants(&wf, "d").is_empty());
    }
}
