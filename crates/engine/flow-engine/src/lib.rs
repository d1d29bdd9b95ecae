/*!
# XiaoZhi Flow Engine

The workflow execution core:

- **DAG planner**: layered topological order with cycle detection
- **Data flow engine**: input resolution, schema validation, parallel
  output merging, `${path}` substitution
- **Workflow executor**: layered concurrent dispatch, per-node timeout
  and retry, failure policies, cancel/pause/resume, lifecycle events
- **Execution registry**: in-memory records with snapshot queries and a
  retention sweeper

## Example

```rust,ignore
use std::sync::Arc;
use flow_core::{FnInvoker, NodeDefinition, WorkflowBuilder};
use flow_engine::WorkflowExecutor;

let invoker = Arc::new(FnInvoker::new(|_plugin, _method, payload| async move {
    Ok(payload)
}));
let executor = WorkflowExecutor::new(invoker);

executor.register_workflow(
    WorkflowBuilder::new("wf-echo", "Echo")
        .node(NodeDefinition::start("start"))
        .node(NodeDefinition::task("echo", "echo-plugin", "echo"))
        .node(NodeDefinition::end("end"))
        .edge("start", "echo")
        .edge("echo", "end")
        .build()?,
)?;

let execution = executor.execute("wf-echo", Default::default()).await?;
```
*/

pub mod dag;
pub mod dataflow;
pub mod executor;
pub mod registry;

pub use dag::{descendants, plan, ExecutionPlan};
pub use dataflow::{resolve_inputs, ResolveContext};
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use registry::{ExecutionControl, ExecutionHandle, ExecutionRegistry, WorkflowStore};
