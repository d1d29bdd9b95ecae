/*!
# Workflow Executor

Drives executions: walks the plan layer by layer, dispatches ready nodes
concurrently up to the workflow's parallel limit, enforces per-node
timeout and retry, applies the failure policy, emits lifecycle events,
and maintains the execution record.

All events for one execution funnel through a single sink task, so
subscribers observe them in emission order.
*/

use crate::dag::{self, ExecutionPlan};
use crate::dataflow::{self, ResolveContext};
use crate::registry::{ExecutionControl, ExecutionRegistry, WorkflowStore};
use flow_core::{
    EventBroadcaster, Execution, ExecutionStatus, FailurePolicy, FlowError, FlowEvent,
    FlowEventKind, NodeDefinition, NodeKind, NodeStatus, PluginInvoker, Result, RetryConfig,
    Subscription, SubscriptionFilter, Workflow,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Submissions beyond this fail with `BackPressure`
    pub max_concurrent_executions: usize,

    /// Timeout for nodes that don't set their own, in seconds
    pub default_node_timeout_secs: u64,

    /// Timeout for workflows whose config leaves it at zero, in seconds
    pub default_workflow_timeout_secs: u64,

    /// How long terminal records stay queryable, in seconds
    pub retention_secs: u64,

    /// Eviction sweep interval, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            default_node_timeout_secs: 300,
            default_workflow_timeout_secs: 3600,
            retention_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl ExecutorConfig {
    /// Defaults overridden by `FLOW_EXECUTOR_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("FLOW_EXECUTOR_MAX_CONCURRENT_EXECUTIONS") {
            config.max_concurrent_executions = v;
        }
        if let Some(v) = env_parse("FLOW_EXECUTOR_DEFAULT_NODE_TIMEOUT_SECS") {
            config.default_node_timeout_secs = v;
        }
        if let Some(v) = env_parse("FLOW_EXECUTOR_DEFAULT_WORKFLOW_TIMEOUT_SECS") {
            config.default_workflow_timeout_secs = v;
        }
        if let Some(v) = env_parse("FLOW_EXECUTOR_RETENTION_SECS") {
            config.retention_secs = v;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// The workflow executor and its public control surface
pub struct WorkflowExecutor {
    config: ExecutorConfig,
    workflows: Arc<WorkflowStore>,
    registry: Arc<ExecutionRegistry>,
    invoker: Arc<dyn PluginInvoker>,
    broadcaster: Arc<EventBroadcaster>,
    in_flight: Arc<AtomicUsize>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl WorkflowExecutor {
    /// Executor with default configuration
    pub fn new(invoker: Arc<dyn PluginInvoker>) -> Self {
        Self::with_config(ExecutorConfig::default(), invoker)
    }

    /// Executor with a specific configuration
    pub fn with_config(config: ExecutorConfig, invoker: Arc<dyn PluginInvoker>) -> Self {
        let registry = Arc::new(ExecutionRegistry::new(Duration::from_secs(
            config.retention_secs,
        )));
        let sweeper = registry.spawn_sweeper(Duration::from_secs(config.sweep_interval_secs));
        Self {
            config,
            workflows: Arc::new(WorkflowStore::new()),
            registry,
            invoker,
            broadcaster: Arc::new(EventBroadcaster::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            sweeper,
        }
    }

    /// Validate and register a workflow definition
    pub fn register_workflow(&self, workflow: Workflow) -> Result<()> {
        self.workflows.insert(workflow)
    }

    /// Remove a workflow definition; refused while executions reference it
    pub async fn remove_workflow(&self, workflow_id: &str) -> Result<()> {
        if self.registry.live_count(workflow_id).await > 0 {
            return Err(FlowError::WorkflowInUse(workflow_id.to_string()));
        }
        self.workflows.remove(workflow_id)
    }

    /// Registered workflow definitions
    pub fn workflows(&self) -> Vec<Arc<Workflow>> {
        self.workflows.list()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.broadcaster.subscribe(filter)
    }

    /// The broadcaster the executor emits through
    pub fn broadcaster(&self) -> Arc<EventBroadcaster> {
        self.broadcaster.clone()
    }

    /// The execution registry
    pub fn registry(&self) -> Arc<ExecutionRegistry> {
        self.registry.clone()
    }

    /// Submit an execution of a workflow.
    ///
    /// Planning happens eagerly, so validation failures (`CycleDetected`,
    /// `WorkflowInvalid`) surface here and never create an execution
    /// record. Returns the initial snapshot; the run proceeds on its own
    /// driver task.
    pub async fn execute(
        &self,
        workflow_id: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<Execution> {
        let workflow = self.workflows.get(workflow_id)?;
        let plan = dag::plan(&workflow)?;

        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n < self.config.max_concurrent_executions {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .map_err(|_| FlowError::BackPressure)?;

        let execution = Execution::new(&workflow, inputs);
        let snapshot = execution.clone();
        let handle = self.registry.insert(execution);

        let driver = ExecutionDriver {
            workflow,
            plan,
            record: handle.record,
            control: handle.control,
            invoker: self.invoker.clone(),
            broadcaster: self.broadcaster.clone(),
            default_node_timeout: Duration::from_secs(self.config.default_node_timeout_secs),
            default_workflow_timeout: Duration::from_secs(
                self.config.default_workflow_timeout_secs,
            ),
            in_flight: self.in_flight.clone(),
        };
        tokio::spawn(driver.run());

        Ok(snapshot)
    }

    /// Snapshot of an execution
    pub async fn get(&self, execution_id: &str) -> Result<Execution> {
        self.registry.snapshot(execution_id).await
    }

    /// Request cancellation
    pub async fn cancel(&self, execution_id: &str) -> Result<()> {
        self.registry.cancel(execution_id).await
    }

    /// Request a pause between layers
    pub async fn pause(&self, execution_id: &str) -> Result<()> {
        self.registry.pause(execution_id).await
    }

    /// Resume a paused execution
    pub async fn resume(&self, execution_id: &str) -> Result<()> {
        self.registry.resume(execution_id).await
    }

    /// Snapshots, newest first
    pub async fn list(&self, workflow_id: Option<&str>) -> Vec<Execution> {
        self.registry.list(workflow_id).await
    }

    /// Most recent terminal executions
    pub async fn history(&self, limit: usize) -> Vec<Execution> {
        self.registry.history(limit).await
    }

    /// Executions currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Drop for WorkflowExecutor {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Per-execution serialized event sink; a single drain task forwards to
/// the broadcaster so per-execution order is preserved.
#[derive(Clone)]
struct EventSink {
    tx: mpsc::UnboundedSender<FlowEvent>,
}

impl EventSink {
    fn emit(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }
}

/// How a pass over the layers ended
enum LayerOutcome {
    /// Every layer dispatched; absorbed failures may exist
    Finished,
    /// A stop-policy or critical failure aborted dispatch
    Aborted {
        node_id: String,
        error: String,
        code: String,
    },
    /// Cancellation was requested
    Cancelled,
    /// The workflow timeout elapsed
    TimedOut,
}

struct ExecutionDriver {
    workflow: Arc<Workflow>,
    plan: ExecutionPlan,
    record: Arc<RwLock<Execution>>,
    control: ExecutionControl,
    invoker: Arc<dyn PluginInvoker>,
    broadcaster: Arc<EventBroadcaster>,
    default_node_timeout: Duration,
    default_workflow_timeout: Duration,
    in_flight: Arc<AtomicUsize>,
}

impl ExecutionDriver {
    async fn run(self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<FlowEvent>();
        let sink = EventSink { tx };
        let broadcaster = self.broadcaster.clone();
        let drain = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                broadcaster.emit(event);
            }
        });

        let execution_id = {
            let mut record = self.record.write().await;
            record.mark_running();
            record.id.clone()
        };

        info!(
            execution_id = %execution_id,
            workflow_id = %self.workflow.id,
            nodes = self.workflow.nodes.len(),
            "execution started"
        );
        sink.emit(
            FlowEvent::new(FlowEventKind::ExecutionStart, &execution_id, &self.workflow.id)
                .with_payload(json!({ "workflow_name": self.workflow.name })),
        );

        let timeout = self.workflow_timeout();
        let outcome = match tokio::time::timeout(timeout, self.run_layers(&execution_id, &sink))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(execution_id = %execution_id, "workflow timeout elapsed, cancelling in-flight nodes");
                self.control.token().cancel();
                LayerOutcome::TimedOut
            }
        };

        self.finalize(&execution_id, outcome, &sink).await;

        drop(sink);
        let _ = drain.await;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn workflow_timeout(&self) -> Duration {
        if self.workflow.config.timeout_secs == 0 {
            self.default_workflow_timeout
        } else {
            Duration::from_secs(self.workflow.config.timeout_secs)
        }
    }

    async fn run_layers(&self, execution_id: &str, sink: &EventSink) -> LayerOutcome {
        let parallel_limit = self.workflow.config.parallel_limit.max(1);
        let semaphore = Arc::new(Semaphore::new(parallel_limit));
        let policy = self.workflow.config.failure_policy;
        let variables = Arc::new(self.workflow.config.variables.clone());

        for layer in &self.plan.layers {
            if self.control.token().is_cancelled() {
                break;
            }

            if self.control.is_paused() {
                debug!(execution_id = %execution_id, "execution paused between layers");
                self.record.write().await.status = ExecutionStatus::Paused;
                self.control.parked().await;
                if self.control.token().is_cancelled() {
                    break;
                }
                self.record.write().await.status = ExecutionStatus::Running;
                debug!(execution_id = %execution_id, "execution resumed");
            }

            let mut join_set: JoinSet<WorkerOutcome> = JoinSet::new();
            for node_id in layer {
                let already_terminal = {
                    let record = self.record.read().await;
                    record
                        .node_result(node_id)
                        .map(|r| r.status.is_terminal())
                        .unwrap_or(true)
                };
                if already_terminal {
                    continue;
                }
                let Some(node) = self.workflow.node(node_id) else {
                    continue;
                };

                let worker = NodeWorker {
                    node: node.clone(),
                    predecessors: self
                        .workflow
                        .predecessors(node_id)
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    execution_id: execution_id.to_string(),
                    workflow_id: self.workflow.id.clone(),
                    variables: variables.clone(),
                    record: self.record.clone(),
                    control: self.control.clone(),
                    invoker: self.invoker.clone(),
                    sink: sink.clone(),
                    timeout: node
                        .timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or(self.default_node_timeout),
                    retry: node
                        .retry
                        .clone()
                        .or_else(|| self.workflow.config.default_retry.clone()),
                    semaphore: semaphore.clone(),
                };
                join_set.spawn(worker.run());
            }

            // Layer barrier: in-flight peers always finish, even when a
            // failure aborts further dispatch.
            let mut abort: Option<(String, String, String)> = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(outcome) => {
                        if outcome.status == NodeStatus::Failed {
                            self.handle_failure(&outcome, policy, &mut abort).await;
                        }
                    }
                    Err(join_err) => {
                        error!(execution_id = %execution_id, %join_err, "node worker panicked");
                        abort.get_or_insert((
                            String::new(),
                            format!("node worker panicked: {}", join_err),
                            "EXECUTION_FAILED".to_string(),
                        ));
                    }
                }
            }

            if let Some((node_id, error, code)) = abort {
                return LayerOutcome::Aborted {
                    node_id,
                    error,
                    code,
                };
            }
        }

        if self.control.cancel_requested() {
            LayerOutcome::Cancelled
        } else if self.control.token().is_cancelled() {
            LayerOutcome::TimedOut
        } else {
            LayerOutcome::Finished
        }
    }

    /// Apply the failure policy to a failed node.
    ///
    /// A critical node's failure always aborts, whatever the policy.
    /// Policy `retry` exhausts at the worker level and falls back to stop.
    async fn handle_failure(
        &self,
        outcome: &WorkerOutcome,
        policy: FailurePolicy,
        abort: &mut Option<(String, String, String)>,
    ) {
        let stops = outcome.critical
            || matches!(policy, FailurePolicy::Stop | FailurePolicy::Retry);

        if stops {
            abort.get_or_insert((
                outcome.node_id.clone(),
                format!(
                    "node '{}' failed: {}",
                    outcome.node_id,
                    outcome.error.as_deref().unwrap_or("unknown error")
                ),
                outcome.code.clone().unwrap_or_else(|| "NODE_FAILED".to_string()),
            ));
            return;
        }

        match policy {
            FailurePolicy::Skip => {
                let downstream = dag::descendants(&self.workflow, &outcome.node_id);
                let mut record = self.record.write().await;
                for node_id in &downstream {
                    if let Some(result) = record.node_result_mut(node_id) {
                        if !result.status.is_terminal() {
                            result.skip();
                        }
                    }
                }
                record.update_progress();
                debug!(
                    node_id = %outcome.node_id,
                    skipped = downstream.len(),
                    "skipped downstream of failed node"
                );
            }
            FailurePolicy::Ignore => {
                // downstream reads null for the failed node's declared outputs
                if let Some(node) = self.workflow.node(&outcome.node_id) {
                    let nulls: HashMap<String, Value> = node
                        .outputs
                        .iter()
                        .map(|o| (o.name.clone(), Value::Null))
                        .collect();
                    if !nulls.is_empty() {
                        let mut record = self.record.write().await;
                        if let Some(result) = record.node_result_mut(&outcome.node_id) {
                            result.outputs = nulls.clone();
                        }
                        record.record_completion(&outcome.node_id, &nulls);
                    }
                }
            }
            FailurePolicy::Stop | FailurePolicy::Retry => unreachable!("handled above"),
        }
    }

    async fn finalize(&self, execution_id: &str, outcome: LayerOutcome, sink: &EventSink) {
        let (status, error, code, failed_node) = match outcome {
            LayerOutcome::Finished => (ExecutionStatus::Completed, None, None, None),
            LayerOutcome::Aborted {
                node_id,
                error,
                code,
            } => (
                ExecutionStatus::Failed,
                Some(error),
                Some(code),
                Some(node_id),
            ),
            LayerOutcome::Cancelled => (
                ExecutionStatus::Cancelled,
                None,
                Some(FlowError::Cancelled.code().to_string()),
                None,
            ),
            LayerOutcome::TimedOut => (
                ExecutionStatus::Failed,
                Some(FlowError::ExecutionTimeout.to_string()),
                Some(FlowError::ExecutionTimeout.code().to_string()),
                None,
            ),
        };

        let duration_ms = {
            let mut record = self.record.write().await;
            for result in record.node_results.values_mut() {
                if !result.status.is_terminal() {
                    result.cancel();
                }
            }
            record.mark_terminal(status, error.clone());
            record.duration_ms().unwrap_or(0)
        };

        let mut payload = serde_json::Map::new();
        payload.insert(
            "status".to_string(),
            serde_json::to_value(status).unwrap_or(Value::Null),
        );
        payload.insert("duration_ms".to_string(), json!(duration_ms));
        if let Some(ref error) = error {
            payload.insert("error".to_string(), json!(error));
        }
        if let Some(code) = code {
            payload.insert("code".to_string(), json!(code));
        }
        if let Some(node_id) = failed_node {
            payload.insert("node_id".to_string(), json!(node_id));
        }

        info!(
            execution_id = %execution_id,
            status = ?status,
            duration_ms,
            "execution finished"
        );
        sink.emit(
            FlowEvent::new(FlowEventKind::ExecutionEnd, execution_id, &self.workflow.id)
                .with_payload(Value::Object(payload)),
        );
    }
}

/// Terminal report a node worker hands back to the driver
struct WorkerOutcome {
    node_id: String,
    status: NodeStatus,
    error: Option<String>,
    code: Option<String>,
    critical: bool,
}

struct NodeWorker {
    node: NodeDefinition,
    predecessors: Vec<String>,
    execution_id: String,
    workflow_id: String,
    variables: Arc<HashMap<String, Value>>,
    record: Arc<RwLock<Execution>>,
    control: ExecutionControl,
    invoker: Arc<dyn PluginInvoker>,
    sink: EventSink,
    timeout: Duration,
    retry: Option<RetryConfig>,
    semaphore: Arc<Semaphore>,
}

impl NodeWorker {
    async fn run(self) -> WorkerOutcome {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed");

        if self.control.token().is_cancelled() {
            return self.cancelled().await;
        }

        {
            let mut record = self.record.write().await;
            if let Some(result) = record.node_result_mut(&self.node.id) {
                result.mark_running();
            }
        }
        self.sink.emit(
            FlowEvent::new(FlowEventKind::NodeStart, &self.execution_id, &self.workflow_id)
                .with_node(&self.node.id),
        );
        let started = Instant::now();

        let ctx = {
            let record = self.record.read().await;
            ResolveContext {
                execution_inputs: record.inputs.clone(),
                variables: (*self.variables).clone(),
                node_outputs: record
                    .node_results
                    .iter()
                    .map(|(id, r)| (id.clone(), r.outputs.clone()))
                    .collect(),
                completion_order: record.completion_order.clone(),
            }
        };

        let resolved = match dataflow::resolve_inputs(&self.node, &self.predecessors, &ctx) {
            Ok(map) => map,
            Err(err) => return self.fail(err, 0).await,
        };

        {
            let mut record = self.record.write().await;
            if let Some(result) = record.node_result_mut(&self.node.id) {
                result.inputs = resolved.clone();
            }
        }

        match self.node.kind {
            NodeKind::Task => self.run_task(started, resolved).await,
            NodeKind::Condition => {
                let expression = resolved
                    .get("condition")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let verdict = evaluate_condition(expression);
                let outputs = HashMap::from([("result".to_string(), Value::Bool(verdict))]);
                self.complete(started, outputs).await
            }
            // start/end/fan-out/merge pass their resolved inputs through
            _ => self.complete(started, resolved).await,
        }
    }

    async fn run_task(&self, started: Instant, resolved: HashMap<String, Value>) -> WorkerOutcome {
        let plugin_id = self.node.plugin_id.clone().unwrap_or_default();
        let method = self.node.method.clone().unwrap_or_default();
        let payload = Value::Object(resolved.into_iter().collect());
        let max_retries = self.retry.as_ref().map(|r| r.max_attempts).unwrap_or(0);
        let mut attempt: u32 = 0;

        loop {
            let call = self
                .invoker
                .invoke(&plugin_id, &method, payload.clone(), self.control.token());
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(FlowError::NodeTimeout(self.node.id.clone())),
            };

            match result {
                Ok(value) => {
                    return self.complete(started, project_outputs(value)).await;
                }
                Err(FlowError::Cancelled) => {
                    return self.cancelled().await;
                }
                Err(err) if attempt < max_retries && err.is_node_retryable() => {
                    let retry = self.retry.as_ref().expect("retry config present");
                    let delay = Duration::from_millis(retry.backoff_ms(attempt));
                    attempt += 1;
                    {
                        let mut record = self.record.write().await;
                        if let Some(result) = record.node_result_mut(&self.node.id) {
                            result.retry_count = attempt;
                            result.log(format!("retry {} after error: {}", attempt, err));
                        }
                    }
                    warn!(
                        node_id = %self.node.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying node after failure"
                    );
                    self.sink.emit(
                        FlowEvent::new(
                            FlowEventKind::NodeRetry,
                            &self.execution_id,
                            &self.workflow_id,
                        )
                        .with_node(&self.node.id)
                        .with_payload(json!({
                            "attempt": attempt,
                            "delay_ms": delay.as_millis() as u64,
                            "error": err.to_string(),
                        })),
                    );

                    // backoff must interrupt on cancel
                    tokio::select! {
                        _ = self.control.token().cancelled() => return self.cancelled().await,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    return self.fail(err, attempt).await;
                }
            }
        }
    }

    async fn complete(&self, started: Instant, outputs: HashMap<String, Value>) -> WorkerOutcome {
        {
            let mut record = self.record.write().await;
            if let Some(result) = record.node_result_mut(&self.node.id) {
                result.complete(outputs.clone());
            }
            record.record_completion(&self.node.id, &outputs);
        }
        debug!(node_id = %self.node.id, "node completed");
        self.sink.emit(
            FlowEvent::new(
                FlowEventKind::NodeComplete,
                &self.execution_id,
                &self.workflow_id,
            )
            .with_node(&self.node.id)
            .with_payload(json!({
                "duration_ms": started.elapsed().as_millis() as u64,
                "outputs": outputs,
            })),
        );
        WorkerOutcome {
            node_id: self.node.id.clone(),
            status: NodeStatus::Completed,
            error: None,
            code: None,
            critical: self.node.critical,
        }
    }

    async fn fail(&self, err: FlowError, retry_count: u32) -> WorkerOutcome {
        let code = err.code().to_string();
        {
            let mut record = self.record.write().await;
            if let Some(result) = record.node_result_mut(&self.node.id) {
                result.retry_count = retry_count;
                result.fail(err.to_string());
            }
            record.update_progress();
        }
        error!(node_id = %self.node.id, %err, code = %code, "node failed");
        self.sink.emit(
            FlowEvent::new(
                FlowEventKind::NodeError,
                &self.execution_id,
                &self.workflow_id,
            )
            .with_node(&self.node.id)
            .with_payload(json!({
                "error": err.to_string(),
                "code": code,
                "retry_count": retry_count,
            })),
        );
        WorkerOutcome {
            node_id: self.node.id.clone(),
            status: NodeStatus::Failed,
            error: Some(err.to_string()),
            code: Some(code),
            critical: self.node.critical,
        }
    }

    async fn cancelled(&self) -> WorkerOutcome {
        {
            let mut record = self.record.write().await;
            if let Some(result) = record.node_result_mut(&self.node.id) {
                result.cancel();
            }
            record.update_progress();
        }
        debug!(node_id = %self.node.id, "node cancelled");
        WorkerOutcome {
            node_id: self.node.id.clone(),
            status: NodeStatus::Cancelled,
            error: None,
            code: None,
            critical: self.node.critical,
        }
    }
}

/// Project a plugin's return value into the node's output map. Objects
/// map field-per-field; anything else lands under `result`.
fn project_outputs(value: Value) -> HashMap<String, Value> {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => HashMap::new(),
        other => HashMap::from([("result".to_string(), other)]),
    }
}

/// Evaluate a condition expression of the form `left <op> right` with
/// `==`, `!=`, `>=`, `<=`, `>`, `<`. Operands compare numerically when
/// both parse as numbers, as trimmed strings otherwise. Without an
/// operator the expression is truthy unless empty/"false"/"0"/"no".
fn evaluate_condition(expression: &str) -> bool {
    const OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];

    for op in OPERATORS {
        if let Some((left, right)) = expression.split_once(op) {
            let left = left.trim().trim_matches('"').trim_matches('\'');
            let right = right.trim().trim_matches('"').trim_matches('\'');

            if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
                return match op {
                    "==" => l == r,
                    "!=" => l != r,
                    ">=" => l >= r,
                    "<=" => l <= r,
                    ">" => l > r,
                    "<" => l < r,
                    _ => false,
                };
            }
            return match op {
                "==" => left == right,
                "!=" => left != right,
                _ => false,
            };
        }
    }

    let lower = expression.trim().to_lowercase();
    !(lower.is_empty() || lower == "false" || lower == "0" || lower == "no")
}
