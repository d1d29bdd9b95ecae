//! Error types for the workflow execution core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for flow operations
#[derive(Debug, Error)]
pub enum FlowError {
    /// Workflow failed structural validation
    #[error("Invalid workflow: {0}")]
    WorkflowInvalid(String),

    /// The workflow graph contains a cycle
    #[error("Workflow contains a cycle involving nodes: {nodes:?}")]
    CycleDetected {
        /// Nodes that never reached in-degree zero
        nodes: Vec<String>,
    },

    /// A node input failed schema validation
    #[error("Schema violation on field '{field}': {message}")]
    SchemaViolation {
        /// Declared input field name
        field: String,
        /// What went wrong
        message: String,
    },

    /// The executor is at its concurrent-execution limit
    #[error("Too many concurrent executions")]
    BackPressure,

    /// The plugin host's port pool is exhausted
    #[error("No port available for plugin '{0}'")]
    NoPortAvailable(String),

    /// A plugin worker did not become healthy before the start deadline
    #[error("Plugin '{0}' did not become healthy before the start deadline")]
    PluginStartTimeout(String),

    /// No running worker for the plugin
    #[error("Plugin '{0}' is not available")]
    PluginUnavailable(String),

    /// A plugin call exceeded the per-call deadline
    #[error("Plugin '{plugin_id}' timed out on method '{method}'")]
    PluginTimeout {
        /// Plugin identifier
        plugin_id: String,
        /// Method that timed out
        method: String,
    },

    /// The plugin worker answered with a failure envelope
    #[error("Plugin '{plugin_id}' returned an error: {message}")]
    PluginReturnedError {
        /// Plugin identifier
        plugin_id: String,
        /// Error text from the worker
        message: String,
    },

    /// A node exceeded its per-node timeout
    #[error("Node '{0}' timed out")]
    NodeTimeout(String),

    /// The execution exceeded the workflow timeout
    #[error("Execution timed out")]
    ExecutionTimeout,

    /// The execution was cancelled
    #[error("Execution was cancelled")]
    Cancelled,

    /// Control operation requires a running execution
    #[error("Execution is not running")]
    NotRunning,

    /// Control operation requires a paused execution
    #[error("Execution is not paused")]
    NotPaused,

    /// The execution already reached a terminal status
    #[error("Execution already reached a terminal status")]
    AlreadyTerminal,

    /// No workflow registered under the id
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// No execution known under the id
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// The workflow still has live executions
    #[error("Workflow '{0}' has live executions")]
    WorkflowInUse(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level error talking to a plugin worker
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Convenient Result type using FlowError
pub type Result<T> = std::result::Result<T, FlowError>;

impl FlowError {
    /// Create a workflow validation error
    pub fn workflow_invalid(msg: impl Into<String>) -> Self {
        FlowError::WorkflowInvalid(msg.into())
    }

    /// Create a schema violation error
    pub fn schema_violation(field: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::SchemaViolation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP transport error
    pub fn http(msg: impl Into<String>) -> Self {
        FlowError::Http(msg.into())
    }

    /// Stable error code exposed at the API boundary
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::WorkflowInvalid(_) => "WORKFLOW_INVALID",
            FlowError::CycleDetected { .. } => "CYCLE_DETECTED",
            FlowError::SchemaViolation { .. } => "SCHEMA_VIOLATION",
            FlowError::BackPressure => "BACK_PRESSURE",
            FlowError::NoPortAvailable(_) => "NO_PORT_AVAILABLE",
            FlowError::PluginStartTimeout(_) => "PLUGIN_START_TIMEOUT",
            FlowError::PluginUnavailable(_) => "PLUGIN_UNAVAILABLE",
            FlowError::PluginTimeout { .. } => "PLUGIN_TIMEOUT",
            FlowError::PluginReturnedError { .. } => "PLUGIN_RETURNED_ERROR",
            FlowError::NodeTimeout(_) => "NODE_TIMEOUT",
            FlowError::ExecutionTimeout => "EXECUTION_TIMEOUT",
            FlowError::Cancelled => "CANCELLED",
            FlowError::NotRunning => "NOT_RUNNING",
            FlowError::NotPaused => "NOT_PAUSED",
            FlowError::AlreadyTerminal => "ALREADY_TERMINAL",
            FlowError::WorkflowNotFound(_) => "WORKFLOW_NOT_FOUND",
            FlowError::ExecutionNotFound(_) => "EXECUTION_NOT_FOUND",
            FlowError::WorkflowInUse(_) => "WORKFLOW_IN_USE",
            FlowError::Serialization(_) => "SERIALIZATION_ERROR",
            FlowError::Io(_) => "IO_ERROR",
            FlowError::Http(_) => "HTTP_ERROR",
        }
    }

    /// True for errors raised within a node worker that retry may resolve
    pub fn is_node_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::PluginUnavailable(_)
                | FlowError::PluginTimeout { .. }
                | FlowError::PluginReturnedError { .. }
                | FlowError::NodeTimeout(_)
                | FlowError::Http(_)
        )
    }

    /// Envelope form for the API boundary
    pub fn envelope(&self) -> ErrorEnvelope {
        let details = match self {
            FlowError::CycleDetected { nodes } => Some(serde_json::json!({ "nodes": nodes })),
            FlowError::SchemaViolation { field, .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            FlowError::PluginTimeout { plugin_id, method } => {
                Some(serde_json::json!({ "plugin_id": plugin_id, "method": method }))
            }
            FlowError::PluginReturnedError { plugin_id, .. } => {
                Some(serde_json::json!({ "plugin_id": plugin_id }))
            }
            _ => None,
        };

        ErrorEnvelope {
            code: self.code().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

/// Wire-level error representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Stable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(FlowError::BackPressure.code(), "BACK_PRESSURE");
        assert_eq!(
            FlowError::WorkflowNotFound("wf".into()).code(),
            "WORKFLOW_NOT_FOUND"
        );
        assert_eq!(
            FlowError::schema_violation("x", "missing").code(),
            "SCHEMA_VIOLATION"
        );
    }

    #[test]
    fn test_envelope_carries_details() {
        let err = FlowError::CycleDetected {
            nodes: vec!["a".into(), "b".into()],
        };
        let env = err.envelope();
        assert_eq!(env.code, "CYCLE_DETECTED");
        assert_eq!(env.details.unwrap()["nodes"][0], "a");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FlowError::PluginUnavailable("p".into()).is_node_retryable());
        assert!(!FlowError::Cancelled.is_node_retryable());
        assert!(!FlowError::BackPressure.is_node_retryable());
    }
}
