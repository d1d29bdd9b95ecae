/*!
# Workflow Definition

Workflows are immutable once validated: an ordered list of nodes, a set of
directed edges, and a workflow-level config. The graph itself must be a DAG;
cycle detection happens in the planner, the structural rules here.
*/

use crate::error::{FlowError, Result};
use crate::schema::{FieldSpec, OutputField};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Node type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry marker, no plugin behind it
    Start,
    /// Exit marker
    End,
    /// Plugin-backed unit of work
    Task,
    /// Evaluates a condition expression over its inputs
    Condition,
    /// Fans out to parallel branches
    ParallelFanout,
    /// Joins parallel branches, namespacing their outputs
    Merge,
}

/// What happens to the execution when a node ends up failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the execution; in-flight peers finish, no further layers
    #[serde(alias = "stop_all")]
    Stop,
    /// Mark downstream dependents skipped, other branches proceed
    Skip,
    /// Downstream proceeds and reads null for the failed node's outputs
    Ignore,
    /// Node-level retries; falls back to stop after exhaustion
    Retry,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Stop
    }
}

/// Per-node retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first failure; 0 never retries
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    pub delay_ms: u64,

    /// Double the delay on every attempt
    #[serde(default)]
    pub exponential: bool,

    /// Ceiling for the exponential delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetryConfig {
    /// Fixed-delay retry
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
            exponential: false,
            max_delay_ms: default_max_delay_ms(),
        }
    }

    /// Exponential backoff capped at `max_delay_ms`
    pub fn exponential(max_attempts: u32, delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
            exponential: true,
            max_delay_ms,
        }
    }

    /// Backoff before retry attempt number `attempt` (0-based)
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if self.exponential {
            let factor = 2u64.saturating_pow(attempt);
            self.delay_ms.saturating_mul(factor).min(self.max_delay_ms)
        } else {
            self.delay_ms
        }
    }
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Identifier, unique within the workflow
    pub id: String,

    /// Display name
    pub name: String,

    /// Node type
    pub kind: NodeKind,

    /// Plugin backing a task node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,

    /// Method invoked on the plugin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Declared input schema
    #[serde(default)]
    pub inputs: Vec<FieldSpec>,

    /// Declared output schema
    #[serde(default)]
    pub outputs: Vec<OutputField>,

    /// Static config folded into inputs at execution time
    #[serde(default)]
    pub config: HashMap<String, Value>,

    /// Retry policy; the workflow default applies when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    /// Per-node timeout in seconds; the executor default applies when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Failure of a critical node fails the whole execution
    #[serde(default)]
    pub critical: bool,
}

impl NodeDefinition {
    /// Create a node of the given kind
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            plugin_id: None,
            method: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            config: HashMap::new(),
            retry: None,
            timeout_secs: None,
            critical: false,
        }
    }

    /// Start node
    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Start)
    }

    /// End node
    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::End)
    }

    /// Task node backed by a plugin method
    pub fn task(
        id: impl Into<String>,
        plugin_id: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        let mut node = Self::new(id, NodeKind::Task);
        node.plugin_id = Some(plugin_id.into());
        node.method = Some(method.into());
        node
    }

    /// Condition node evaluating a `condition` config expression
    pub fn condition(id: impl Into<String>, expression: impl Into<String>) -> Self {
        let mut node = Self::new(id, NodeKind::Condition);
        node.config
            .insert("condition".to_string(), Value::String(expression.into()));
        node
    }

    /// Fan-out node
    pub fn fanout(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::ParallelFanout)
    }

    /// Merge node
    pub fn merge(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Merge)
    }

    /// Set display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Declare an input field
    pub fn input(mut self, field: FieldSpec) -> Self {
        self.inputs.push(field);
        self
    }

    /// Declare an output field
    pub fn output(mut self, field: OutputField) -> Self {
        self.outputs.push(field);
        self
    }

    /// Add a config entry
    pub fn config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the per-node timeout
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Mark critical
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Identifier, unique within the workflow
    pub id: String,

    /// Source node id
    pub from: String,

    /// Target node id
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{}->{}", from, to),
            from,
            to,
        }
    }
}

/// Workflow-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Total execution timeout in seconds
    pub timeout_secs: u64,

    /// Default retry policy for nodes without their own
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_retry: Option<RetryConfig>,

    /// Maximum node workers in flight within an execution
    pub parallel_limit: usize,

    /// Policy applied when a node's final state is failed
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Environment handed to plugin workers
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Workflow variables, resolvable as node inputs
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            default_retry: None,
            parallel_limit: 5,
            failure_policy: FailurePolicy::Stop,
            env: HashMap::new(),
            variables: HashMap::new(),
        }
    }
}

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow id
    pub id: String,

    /// Display name
    pub name: String,

    /// Version string
    pub version: String,

    /// Nodes, in declaration order
    pub nodes: Vec<NodeDefinition>,

    /// Directed edges
    pub edges: Vec<Edge>,

    /// Configuration
    pub config: WorkflowConfig,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of direct predecessors, in edge declaration order
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Ids of direct successors, in edge declaration order
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Structural validation. Cycle detection is the planner's job.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(FlowError::workflow_invalid("workflow id is empty"));
        }
        if self.name.is_empty() {
            return Err(FlowError::workflow_invalid("workflow name is empty"));
        }

        let mut node_ids: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(FlowError::workflow_invalid("node id is empty"));
            }
            if !node_ids.insert(node.id.as_str()) {
                return Err(FlowError::workflow_invalid(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            if node.kind == NodeKind::Task && (node.plugin_id.is_none() || node.method.is_none()) {
                return Err(FlowError::workflow_invalid(format!(
                    "task node '{}' is missing plugin_id or method",
                    node.id
                )));
            }
        }

        let mut edge_ids: HashSet<&str> = HashSet::new();
        let mut pairs: HashSet<(&str, &str)> = HashSet::new();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id.as_str()) {
                return Err(FlowError::workflow_invalid(format!(
                    "duplicate edge id '{}'",
                    edge.id
                )));
            }
            if edge.from == edge.to {
                return Err(FlowError::workflow_invalid(format!(
                    "self-loop on node '{}'",
                    edge.from
                )));
            }
            if !node_ids.contains(edge.from.as_str()) {
                return Err(FlowError::workflow_invalid(format!(
                    "edge '{}' references unknown node '{}'",
                    edge.id, edge.from
                )));
            }
            if !node_ids.contains(edge.to.as_str()) {
                return Err(FlowError::workflow_invalid(format!(
                    "edge '{}' references unknown node '{}'",
                    edge.id, edge.to
                )));
            }
            if !pairs.insert((edge.from.as_str(), edge.to.as_str())) {
                return Err(FlowError::workflow_invalid(format!(
                    "parallel edge between '{}' and '{}'",
                    edge.from, edge.to
                )));
            }
        }

        Ok(())
    }
}

/// Builder for creating workflows
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    /// Create a builder for a workflow with the given id and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workflow: Workflow {
                id: id.into(),
                name: name.into(),
                version: "1.0.0".to_string(),
                nodes: Vec::new(),
                edges: Vec::new(),
                config: WorkflowConfig::default(),
                created_at: Utc::now(),
            },
        }
    }

    /// Set version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.workflow.version = version.into();
        self
    }

    /// Set total timeout
    pub fn timeout(mut self, secs: u64) -> Self {
        self.workflow.config.timeout_secs = secs;
        self
    }

    /// Set the parallel limit
    pub fn parallel_limit(mut self, limit: usize) -> Self {
        self.workflow.config.parallel_limit = limit;
        self
    }

    /// Set the failure policy
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.workflow.config.failure_policy = policy;
        self
    }

    /// Set the default retry policy
    pub fn default_retry(mut self, retry: RetryConfig) -> Self {
        self.workflow.config.default_retry = Some(retry);
        self
    }

    /// Declare a workflow variable
    pub fn variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.workflow.config.variables.insert(key.into(), value);
        self
    }

    /// Add an environment entry for plugin workers
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.workflow.config.env.insert(key.into(), value.into());
        self
    }

    /// Add a node
    pub fn node(mut self, node: NodeDefinition) -> Self {
        self.workflow.nodes.push(node);
        self
    }

    /// Add an edge from one node to another
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.workflow.edges.push(Edge::new(from, to));
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<Workflow> {
        self.workflow.validate()?;
        Ok(self.workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> WorkflowBuilder {
        WorkflowBuilder::new("wf-1", "linear")
            .node(NodeDefinition::start("start"))
            .node(NodeDefinition::task("work", "textutil", "to_upper"))
            .node(NodeDefinition::end("end"))
            .edge("start", "work")
            .edge("work", "end")
    }

    #[test]
    fn test_builder_produces_valid_workflow() {
        let wf = linear().build().unwrap();
        assert_eq!(wf.nodes.len(), 3);
        assert_eq!(wf.edges.len(), 2);
        assert_eq!(wf.predecessors("work"), vec!["start"]);
        assert_eq!(wf.successors("work"), vec!["end"]);
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let result = WorkflowBuilder::new("wf", "dup")
            .node(NodeDefinition::start("a"))
            .node(NodeDefinition::end("a"))
            .build();
        assert!(matches!(result, Err(FlowError::WorkflowInvalid(_))));
    }

    #[test]
    fn test_self_loop_rejected() {
        let result = WorkflowBuilder::new("wf", "loop")
            .node(NodeDefinition::start("a"))
            .edge("a", "a")
            .build();
        assert!(matches!(result, Err(FlowError::WorkflowInvalid(_))));
    }

    #[test]
    fn test_parallel_edges_rejected() {
        let result = WorkflowBuilder::new("wf", "par")
            .node(NodeDefinition::start("a"))
            .node(NodeDefinition::end("b"))
            .edge("a", "b")
            .edge("a", "b")
            .build();
        assert!(matches!(result, Err(FlowError::WorkflowInvalid(_))));
    }

    #[test]
    fn test_edge_to_missing_node_rejected() {
        let result = WorkflowBuilder::new("wf", "ghost")
            .node(NodeDefinition::start("a"))
            .edge("a", "ghost")
            .build();
        assert!(matches!(result, Err(FlowError::WorkflowInvalid(_))));
    }

    #[test]
    fn test_task_without_plugin_rejected() {
        let mut node = NodeDefinition::new("t", NodeKind::Task);
        node.plugin_id = None;
        let result = WorkflowBuilder::new("wf", "bare").node(node).build();
        assert!(matches!(result, Err(FlowError::WorkflowInvalid(_))));
    }

    #[test]
    fn test_stop_all_alias_parses() {
        let policy: FailurePolicy = serde_json::from_str("\"stop_all\"").unwrap();
        assert_eq!(policy, FailurePolicy::Stop);
        // canonical form round-trips as "stop"
        assert_eq!(serde_json::to_string(&policy).unwrap(), "\"stop\"");
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let retry = RetryConfig::exponential(5, 50, 200);
        assert_eq!(retry.backoff_ms(0), 50);
        assert_eq!(retry.backoff_ms(1), 100);
        assert_eq!(retry.backoff_ms(2), 200);
        assert_eq!(retry.backoff_ms(3), 200);

        let fixed = RetryConfig::fixed(3, 75);
        assert_eq!(fixed.backoff_ms(4), 75);
    }
}
