/*!
# XiaoZhi Flow Core

Shared model for the workflow execution core:

- **Workflow definitions**: nodes, edges, schemas, and workflow config
- **Execution records**: per-run state with per-node results
- **Lifecycle events**: event types and the fan-out broadcaster
- **Plugin seam**: the invoker trait the executor calls plugins through
- **Errors**: the `FlowError` taxonomy and API error envelope

## Example

```rust,ignore
use flow_core::{NodeDefinition, WorkflowBuilder};

let workflow = WorkflowBuilder::new("wf-upper", "Uppercase")
    .node(NodeDefinition::start("start"))
    .node(NodeDefinition::task("upper", "textutil", "to_upper"))
    .node(NodeDefinition::end("end"))
    .edge("start", "upper")
    .edge("upper", "end")
    .build()?;
```
*/

pub mod broadcast;
pub mod error;
pub mod event;
pub mod execution;
pub mod logging;
pub mod plugin;
pub mod schema;
pub mod workflow;

pub use broadcast::{EventBroadcaster, Subscription, SubscriptionFilter};
pub use error::{ErrorEnvelope, FlowError, Result};
pub use event::{FlowEvent, FlowEventKind};
pub use execution::{Execution, ExecutionStatus, NodeResult, NodeStatus};
pub use logging::init_logging;
pub use plugin::{FnInvoker, PluginInvoker};
pub use schema::{FieldSpec, FieldType, OutputField, ValidationRule};
pub use workflow::{
    Edge, FailurePolicy, NodeDefinition, NodeKind, RetryConfig, Workflow, WorkflowBuilder,
    WorkflowConfig,
};
