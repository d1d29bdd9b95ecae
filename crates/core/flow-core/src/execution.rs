/*!
# Execution Records

One mutable record per run. The executor's task hierarchy is the only
writer; queries receive deep-copy snapshots, never the live record.
*/

use crate::workflow::Workflow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Completed, failed, and cancelled executions never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Per-node status within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeStatus::Pending | NodeStatus::Running)
    }
}

/// The per-node record within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    /// Node id
    pub node_id: String,

    /// Status
    pub status: NodeStatus,

    /// Start time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// End time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Inputs actually handed to the node
    #[serde(default)]
    pub inputs: HashMap<String, Value>,

    /// Outputs returned by the node
    #[serde(default)]
    pub outputs: HashMap<String, Value>,

    /// Retries performed
    pub retry_count: u32,

    /// Error message for failed nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Append-only log lines
    #[serde(default)]
    pub logs: Vec<String>,
}

impl NodeResult {
    /// Fresh pending record
    pub fn pending(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            started_at: None,
            ended_at: None,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            retry_count: 0,
            error: None,
            logs: Vec::new(),
        }
    }

    /// Transition to running and stamp the start time
    pub fn mark_running(&mut self) {
        self.status = NodeStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Terminal success with outputs
    pub fn complete(&mut self, outputs: HashMap<String, Value>) {
        self.status = NodeStatus::Completed;
        self.outputs = outputs;
        self.ended_at = Some(Utc::now());
    }

    /// Terminal failure
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = NodeStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }

    /// Terminal skip (an upstream dependency failed)
    pub fn skip(&mut self) {
        self.status = NodeStatus::Skipped;
        self.ended_at = Some(Utc::now());
    }

    /// Terminal cancel
    pub fn cancel(&mut self) {
        self.status = NodeStatus::Cancelled;
        self.ended_at = Some(Utc::now());
    }

    /// Append a log line
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }
}

/// A single run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Execution id
    pub id: String,

    /// Workflow this run belongs to
    pub workflow_id: String,

    /// Workflow display name
    pub workflow_name: String,

    /// Status
    pub status: ExecutionStatus,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// When the run started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Caller-supplied inputs
    #[serde(default)]
    pub inputs: HashMap<String, Value>,

    /// Outputs accumulated as nodes complete, keyed by output name
    #[serde(default)]
    pub context: HashMap<String, Value>,

    /// Per-node results
    pub node_results: HashMap<String, NodeResult>,

    /// Node ids in completion order (latest completer last)
    #[serde(default)]
    pub completion_order: Vec<String>,

    /// Node counters
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,

    /// Terminal nodes over total nodes
    pub progress: f64,

    /// Error for failed executions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    /// Create a pending execution for a workflow
    pub fn new(workflow: &Workflow, inputs: HashMap<String, Value>) -> Self {
        let node_results = workflow
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeResult::pending(&n.id)))
            .collect();

        Self {
            id: format!("exec-{}", Uuid::new_v4()),
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            inputs,
            context: HashMap::new(),
            node_results,
            completion_order: Vec::new(),
            total_nodes: workflow.nodes.len(),
            completed_nodes: 0,
            failed_nodes: 0,
            progress: 0.0,
            error: None,
        }
    }

    /// Transition to running
    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Transition to a terminal status and stamp the end time
    pub fn mark_terminal(&mut self, status: ExecutionStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.error = error;
        self.ended_at = Some(Utc::now());
        self.update_progress();
    }

    /// Borrow a node result
    pub fn node_result(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.get(node_id)
    }

    /// Mutably borrow a node result
    pub fn node_result_mut(&mut self, node_id: &str) -> Option<&mut NodeResult> {
        self.node_results.get_mut(node_id)
    }

    /// Record a completed node's outputs into the shared context.
    ///
    /// Output names collide last-writer-wins; `completion_order` remembers
    /// who that was so input resolution can break ties the same way.
    pub fn record_completion(&mut self, node_id: &str, outputs: &HashMap<String, Value>) {
        for (name, value) in outputs {
            self.context.insert(name.clone(), value.clone());
        }
        self.completion_order.push(node_id.to_string());
        self.update_progress();
    }

    /// Recompute counters and the progress ratio
    pub fn update_progress(&mut self) {
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut terminal = 0usize;
        for result in self.node_results.values() {
            if result.status.is_terminal() {
                terminal += 1;
            }
            match result.status {
                NodeStatus::Completed => completed += 1,
                NodeStatus::Failed => failed += 1,
                _ => {}
            }
        }
        self.completed_nodes = completed;
        self.failed_nodes = failed;
        self.progress = if self.total_nodes == 0 {
            1.0
        } else {
            terminal as f64 / self.total_nodes as f64
        };
    }

    /// All nodes reached a terminal status
    pub fn all_nodes_settled(&self) -> bool {
        self.node_results.values().all(|r| r.status.is_terminal())
    }

    /// Total run duration, when terminal
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{NodeDefinition, WorkflowBuilder};
    use serde_json::json;

    fn workflow() -> Workflow {
        WorkflowBuilder::new("wf", "test")
            .node(NodeDefinition::start("start"))
            .node(NodeDefinition::task("work", "p", "m"))
            .node(NodeDefinition::end("end"))
            .edge("start", "work")
            .edge("work", "end")
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_execution_is_pending() {
        let exec = Execution::new(&workflow(), HashMap::new());
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.total_nodes, 3);
        assert_eq!(exec.node_results.len(), 3);
        assert!(exec.id.starts_with("exec-"));
        assert!(exec
            .node_results
            .values()
            .all(|r| r.status == NodeStatus::Pending));
    }

    #[test]
    fn test_progress_tracks_terminal_nodes() {
        let mut exec = Execution::new(&workflow(), HashMap::new());
        exec.node_result_mut("start").unwrap().mark_running();
        exec.node_result_mut("start")
            .unwrap()
            .complete(HashMap::new());
        exec.update_progress();
        assert!((exec.progress - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(exec.completed_nodes, 1);

        exec.node_result_mut("work").unwrap().fail("boom");
        exec.node_result_mut("end").unwrap().skip();
        exec.update_progress();
        assert!((exec.progress - 1.0).abs() < 1e-9);
        assert_eq!(exec.failed_nodes, 1);
        assert!(exec.all_nodes_settled());
    }

    #[test]
    fn test_record_completion_updates_context() {
        let mut exec = Execution::new(&workflow(), HashMap::new());
        let mut outputs = HashMap::new();
        outputs.insert("result".to_string(), json!("HELLO"));
        exec.record_completion("work", &outputs);

        assert_eq!(exec.context["result"], json!("HELLO"));
        assert_eq!(exec.completion_order, vec!["work"]);
    }

    #[test]
    fn test_terminal_stamps_end_time() {
        let mut exec = Execution::new(&workflow(), HashMap::new());
        exec.mark_running();
        exec.mark_terminal(ExecutionStatus::Completed, None);
        assert!(exec.ended_at.is_some());
        assert!(exec.status.is_terminal());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(NodeStatus::Skipped.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
    }
}
