/*!
# Lifecycle Events

Events emitted by the executor as an execution progresses. The in-process
form is a tagged struct; `to_wire` produces the envelope subscribers see:
`{type, event_id, timestamp, data: {...}}` with an RFC3339 timestamp.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEventKind {
    ExecutionStart,
    ExecutionEnd,
    NodeStart,
    NodeProgress,
    NodeComplete,
    NodeError,
    NodeRetry,
}

impl FlowEventKind {
    /// Wire name of the discriminant
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowEventKind::ExecutionStart => "execution_start",
            FlowEventKind::ExecutionEnd => "execution_end",
            FlowEventKind::NodeStart => "node_start",
            FlowEventKind::NodeProgress => "node_progress",
            FlowEventKind::NodeComplete => "node_complete",
            FlowEventKind::NodeError => "node_error",
            FlowEventKind::NodeRetry => "node_retry",
        }
    }
}

/// A single lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Event id
    pub id: Uuid,

    /// Discriminant
    pub kind: FlowEventKind,

    /// Execution the event belongs to
    pub execution_id: String,

    /// Workflow behind the execution
    pub workflow_id: String,

    /// Node, for node-scoped events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Emission time
    pub timestamp: DateTime<Utc>,

    /// Type-specific payload (duration, error, progress, outputs, attempt)
    #[serde(default)]
    pub payload: Value,
}

impl FlowEvent {
    /// Create an event scoped to an execution
    pub fn new(
        kind: FlowEventKind,
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            node_id: None,
            timestamp: Utc::now(),
            payload: Value::Null,
        }
    }

    /// Scope to a node
    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Attach the type-specific payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Wire envelope: `{type, event_id, timestamp, data: {...}}`
    pub fn to_wire(&self) -> Value {
        let mut data = serde_json::Map::new();
        data.insert(
            "execution_id".to_string(),
            Value::String(self.execution_id.clone()),
        );
        data.insert(
            "workflow_id".to_string(),
            Value::String(self.workflow_id.clone()),
        );
        if let Some(ref node_id) = self.node_id {
            data.insert("node_id".to_string(), Value::String(node_id.clone()));
        }
        if let Value::Object(ref extra) = self.payload {
            for (k, v) in extra {
                data.insert(k.clone(), v.clone());
            }
        }

        serde_json::json!({
            "type": self.kind.as_str(),
            "event_id": self.id.to_string(),
            "timestamp": self.timestamp.to_rfc3339(),
            "data": Value::Object(data),
        })
    }
}
