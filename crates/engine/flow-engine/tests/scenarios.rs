//! End-to-end executor scenarios driven through mock plugin invokers.

use flow_core::{
    FailurePolicy, FieldSpec, FieldType, FlowError, FlowEvent, FlowEventKind, FnInvoker,
    NodeDefinition, NodeStatus, RetryConfig, Subscription, SubscriptionFilter, Workflow,
    WorkflowBuilder,
};
use flow_engine::{ExecutorConfig, WorkflowExecutor};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn inputs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn wait_terminal(executor: &WorkflowExecutor, execution_id: &str) -> flow_core::Execution {
    for _ in 0..500 {
        let snapshot = executor.get(execution_id).await.unwrap();
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution never reached a terminal status");
}

async fn collect_until_end(subscription: &Subscription) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("timed out waiting for events")
            .expect("broadcaster closed");
        let kind = event.kind;
        events.push(event);
        if kind == FlowEventKind::ExecutionEnd {
            return events;
        }
    }
}

/// `textutil.to_upper` plus a few utility methods the scenarios share.
fn scenario_invoker() -> Arc<FnInvoker> {
    Arc::new(FnInvoker::new(|_plugin, method, payload| async move {
        match method.as_str() {
            "to_upper" => {
                let input = payload
                    .get("input")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(json!({ "result": input.to_uppercase() }))
            }
            "tag_after_sleep" => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!({ "result": payload.get("tag").cloned().unwrap_or(Value::Null) }))
            }
            "quick" => Ok(json!({ "result": "ok" })),
            "always_fail" => Err(FlowError::PluginReturnedError {
                plugin_id: "testplugin".to_string(),
                message: "intentional failure".to_string(),
            }),
            other => panic!("unexpected method {other}"),
        }
    }))
}

// --- Scenario 1: linear chain -------------------------------------------

#[tokio::test]
async fn linear_chain_completes_with_ordered_events() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-linear", "Linear")
                .node(NodeDefinition::start("start"))
                .node(
                    NodeDefinition::task("task", "textutil", "to_upper")
                        .input(FieldSpec::new("input", FieldType::String).required()),
                )
                .node(NodeDefinition::end("end"))
                .edge("start", "task")
                .edge("task", "end")
                .build()
                .unwrap(),
        )
        .unwrap();

    let subscription = executor.subscribe(SubscriptionFilter::All);
    let execution = executor
        .execute("wf-linear", inputs(&[("input", json!("hello"))]))
        .await
        .unwrap();

    let done = wait_terminal(&executor, &execution.id).await;
    assert_eq!(done.status, flow_core::ExecutionStatus::Completed);
    assert_eq!(
        done.node_result("task").unwrap().outputs["result"],
        json!("HELLO")
    );

    let events = collect_until_end(&subscription).await;
    let observed: Vec<(FlowEventKind, Option<String>)> = events
        .iter()
        .map(|e| (e.kind, e.node_id.clone()))
        .collect();
    assert_eq!(
        observed,
        vec![
            (FlowEventKind::ExecutionStart, None),
            (FlowEventKind::NodeStart, Some("start".to_string())),
            (FlowEventKind::NodeComplete, Some("start".to_string())),
            (FlowEventKind::NodeStart, Some("task".to_string())),
            (FlowEventKind::NodeComplete, Some("task".to_string())),
            (FlowEventKind::NodeStart, Some("end".to_string())),
            (FlowEventKind::NodeComplete, Some("end".to_string())),
            (FlowEventKind::ExecutionEnd, None),
        ]
    );

    // invariant: for every edge u -> v, end(u) <= start(v)
    let task_start = done.node_result("task").unwrap().started_at.unwrap();
    let start_end = done.node_result("start").unwrap().ended_at.unwrap();
    assert!(start_end <= task_start);
}

// --- Scenario 2: fan-out / merge ----------------------------------------

fn fanout_workflow() -> Workflow {
    let branch = |id: &str| {
        NodeDefinition::task(id, "testplugin", "tag_after_sleep")
            .config_value("tag", json!(id.to_uppercase()))
    };
    WorkflowBuilder::new("wf-fan", "FanOut")
        .parallel_limit(3)
        .node(NodeDefinition::start("start"))
        .node(NodeDefinition::fanout("fan"))
        .node(branch("a"))
        .node(branch("b"))
        .node(branch("c"))
        .node(NodeDefinition::merge("merge"))
        .node(NodeDefinition::end("end"))
        .edge("start", "fan")
        .edge("fan", "a")
        .edge("fan", "b")
        .edge("fan", "c")
        .edge("a", "merge")
        .edge("b", "merge")
        .edge("c", "merge")
        .edge("merge", "end")
        .build()
        .unwrap()
}

#[tokio::test]
async fn fanout_branches_run_concurrently_and_merge_namespaces() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor.register_workflow(fanout_workflow()).unwrap();

    let started = Instant::now();
    let execution = executor.execute("wf-fan", HashMap::new()).await.unwrap();
    let done = wait_terminal(&executor, &execution.id).await;
    let elapsed = started.elapsed();

    assert_eq!(done.status, flow_core::ExecutionStatus::Completed);
    // three 100ms branches in parallel; sequential would take >= 300ms
    assert!(
        elapsed < Duration::from_millis(280),
        "branch layer was not parallel: {elapsed:?}"
    );

    let merge_inputs = &done.node_result("merge").unwrap().inputs;
    assert_eq!(merge_inputs["a.result"], json!("A"));
    assert_eq!(merge_inputs["b.result"], json!("B"));
    assert_eq!(merge_inputs["c.result"], json!("C"));
}

#[tokio::test]
async fn cancel_mid_fanout_stops_before_merge() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor.register_workflow(fanout_workflow()).unwrap();

    let execution = executor.execute("wf-fan", HashMap::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    executor.cancel(&execution.id).await.unwrap();

    let done = wait_terminal(&executor, &execution.id).await;
    assert_eq!(done.status, flow_core::ExecutionStatus::Cancelled);

    for id in ["a", "b", "c"] {
        let status = done.node_result(id).unwrap().status;
        assert!(
            matches!(status, NodeStatus::Completed | NodeStatus::Cancelled),
            "branch {id} ended as {status:?}"
        );
    }

    // merge never ran
    let merge = done.node_result("merge").unwrap();
    assert_eq!(merge.status, NodeStatus::Cancelled);
    assert!(merge.started_at.is_none());
}

// --- Scenario 3: critical failure under stop ----------------------------

#[tokio::test]
async fn critical_failure_under_stop_fails_execution() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-critical", "Critical")
                .failure_policy(FailurePolicy::Stop)
                .node(NodeDefinition::start("start"))
                .node(NodeDefinition::task("a1", "testplugin", "quick"))
                .node(
                    NodeDefinition::task("a2", "testplugin", "always_fail").critical(),
                )
                .node(NodeDefinition::task("a3", "testplugin", "quick"))
                .node(NodeDefinition::task("b1", "testplugin", "quick"))
                .node(NodeDefinition::task("b2", "testplugin", "quick"))
                .node(NodeDefinition::task("b3", "testplugin", "quick"))
                .edge("start", "a1")
                .edge("start", "b1")
                .edge("a1", "a2")
                .edge("a2", "a3")
                .edge("b1", "b2")
                .edge("b2", "b3")
                .build()
                .unwrap(),
        )
        .unwrap();

    let subscription = executor.subscribe(SubscriptionFilter::All);
    let execution = executor
        .execute("wf-critical", HashMap::new())
        .await
        .unwrap();
    let done = wait_terminal(&executor, &execution.id).await;

    assert_eq!(done.status, flow_core::ExecutionStatus::Failed);
    assert_eq!(done.node_result("a2").unwrap().status, NodeStatus::Failed);
    // downstream of the abort point never dispatched
    assert_eq!(done.node_result("a3").unwrap().status, NodeStatus::Cancelled);
    for id in ["b1", "b2", "b3"] {
        let status = done.node_result(id).unwrap().status;
        assert!(
            matches!(status, NodeStatus::Completed | NodeStatus::Cancelled),
            "peer branch node {id} ended as {status:?}"
        );
    }

    let events = collect_until_end(&subscription).await;
    let end = events.last().unwrap();
    assert_eq!(end.kind, FlowEventKind::ExecutionEnd);
    assert_eq!(end.payload["node_id"], json!("a2"));
    assert_eq!(end.payload["code"], json!("PLUGIN_RETURNED_ERROR"));
}

// --- Scenario 4: retry with backoff -------------------------------------

#[tokio::test]
async fn retry_with_exponential_backoff() {
    let calls = Arc::new(AtomicU32::new(0));
    let invoker = {
        let calls = calls.clone();
        Arc::new(FnInvoker::new(move |_plugin, _method, _payload| {
            let calls = calls.clone();
            async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(FlowError::PluginReturnedError {
                        plugin_id: "flaky".to_string(),
                        message: format!("failure {attempt}"),
                    })
                } else {
                    Ok(json!({ "result": "ok" }))
                }
            }
        }))
    };

    let executor = WorkflowExecutor::new(invoker);
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-retry", "Retry")
                .node(
                    NodeDefinition::task("flaky", "flaky", "work")
                        .retry(RetryConfig::exponential(3, 50, 200)),
                )
                .build()
                .unwrap(),
        )
        .unwrap();

    let subscription = executor.subscribe(SubscriptionFilter::All);
    let started = Instant::now();
    let execution = executor.execute("wf-retry", HashMap::new()).await.unwrap();
    let done = wait_terminal(&executor, &execution.id).await;
    let elapsed = started.elapsed();

    assert_eq!(done.status, flow_core::ExecutionStatus::Completed);
    let flaky = done.node_result("flaky").unwrap();
    assert_eq!(flaky.status, NodeStatus::Completed);
    assert_eq!(flaky.retry_count, 2);
    // backoffs of 50ms then 100ms must have elapsed
    assert!(elapsed >= Duration::from_millis(150), "elapsed {elapsed:?}");

    let events = collect_until_end(&subscription).await;
    let retries: Vec<&FlowEvent> = events
        .iter()
        .filter(|e| e.kind == FlowEventKind::NodeRetry)
        .collect();
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0].payload["attempt"], json!(1));
    assert_eq!(retries[0].payload["delay_ms"], json!(50));
    assert_eq!(retries[1].payload["attempt"], json!(2));
    assert_eq!(retries[1].payload["delay_ms"], json!(100));
}

#[tokio::test]
async fn retry_zero_attempts_never_retries() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-noretry", "NoRetry")
                .failure_policy(FailurePolicy::Skip)
                .node(
                    NodeDefinition::task("doomed", "testplugin", "always_fail")
                        .retry(RetryConfig::fixed(0, 10)),
                )
                .build()
                .unwrap(),
        )
        .unwrap();

    let subscription = executor.subscribe(SubscriptionFilter::All);
    let execution = executor
        .execute("wf-noretry", HashMap::new())
        .await
        .unwrap();
    let done = wait_terminal(&executor, &execution.id).await;

    assert_eq!(done.node_result("doomed").unwrap().retry_count, 0);
    let events = collect_until_end(&subscription).await;
    assert!(events.iter().all(|e| e.kind != FlowEventKind::NodeRetry));
}

// --- Scenario 5: cycle rejection ----------------------------------------

#[tokio::test]
async fn cycle_is_rejected_without_creating_an_execution() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-cycle", "Cycle")
                .node(NodeDefinition::task("a", "testplugin", "quick"))
                .node(NodeDefinition::task("b", "testplugin", "quick"))
                .node(NodeDefinition::task("c", "testplugin", "quick"))
                .edge("a", "b")
                .edge("b", "c")
                .edge("c", "a")
                .build()
                .unwrap(),
        )
        .unwrap();

    let result = executor.execute("wf-cycle", HashMap::new()).await;
    assert!(matches!(result, Err(FlowError::CycleDetected { .. })));
    assert!(executor.list(None).await.is_empty());
    assert_eq!(executor.in_flight(), 0);
}

// --- Scenario 6: schema violation under skip ----------------------------

#[tokio::test]
async fn schema_violation_skips_downstream_under_skip_policy() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-schema", "Schema")
                .failure_policy(FailurePolicy::Skip)
                .node(
                    NodeDefinition::task("typed", "testplugin", "quick")
                        .input(FieldSpec::new("x", FieldType::Number).required()),
                )
                .node(NodeDefinition::task("after", "testplugin", "quick"))
                .edge("typed", "after")
                .build()
                .unwrap(),
        )
        .unwrap();

    let subscription = executor.subscribe(SubscriptionFilter::All);
    let execution = executor
        .execute("wf-schema", inputs(&[("x", json!("hello"))]))
        .await
        .unwrap();
    let done = wait_terminal(&executor, &execution.id).await;

    assert_eq!(done.status, flow_core::ExecutionStatus::Completed);
    assert_eq!(done.node_result("typed").unwrap().status, NodeStatus::Failed);
    assert_eq!(done.node_result("after").unwrap().status, NodeStatus::Skipped);
    assert_eq!(done.failed_nodes, 1);

    let events = collect_until_end(&subscription).await;
    let node_error = events
        .iter()
        .find(|e| e.kind == FlowEventKind::NodeError)
        .unwrap();
    assert_eq!(node_error.payload["code"], json!("SCHEMA_VIOLATION"));
}

// --- Boundary behaviors --------------------------------------------------

#[tokio::test]
async fn empty_workflow_completes_immediately() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor
        .register_workflow(WorkflowBuilder::new("wf-empty", "Empty").build().unwrap())
        .unwrap();

    let execution = executor.execute("wf-empty", HashMap::new()).await.unwrap();
    let done = wait_terminal(&executor, &execution.id).await;
    assert_eq!(done.status, flow_core::ExecutionStatus::Completed);
    assert_eq!(done.total_nodes, 0);
    assert_eq!(done.progress, 1.0);
}

#[tokio::test]
async fn parallel_limit_one_is_sequential() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    let branch = |id: &str| {
        NodeDefinition::task(id, "testplugin", "tag_after_sleep").config_value("tag", json!(id))
    };
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-seq", "Sequential")
                .parallel_limit(1)
                .node(branch("a"))
                .node(branch("b"))
                .node(branch("c"))
                .build()
                .unwrap(),
        )
        .unwrap();

    let started = Instant::now();
    let execution = executor.execute("wf-seq", HashMap::new()).await.unwrap();
    wait_terminal(&executor, &execution.id).await;
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn back_pressure_rejects_submissions_over_the_limit() {
    let executor = WorkflowExecutor::with_config(
        ExecutorConfig {
            max_concurrent_executions: 1,
            ..Default::default()
        },
        scenario_invoker(),
    );
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-slow", "Slow")
                .node(
                    NodeDefinition::task("slow", "testplugin", "tag_after_sleep")
                        .config_value("tag", json!("x")),
                )
                .build()
                .unwrap(),
        )
        .unwrap();

    let first = executor.execute("wf-slow", HashMap::new()).await.unwrap();
    let second = executor.execute("wf-slow", HashMap::new()).await;
    assert!(matches!(second, Err(FlowError::BackPressure)));

    wait_terminal(&executor, &first.id).await;

    // the slot is released just after the record turns terminal
    let mut third = executor.execute("wf-slow", HashMap::new()).await;
    for _ in 0..50 {
        if third.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        third = executor.execute("wf-slow", HashMap::new()).await;
    }
    wait_terminal(&executor, &third.unwrap().id).await;
}

#[tokio::test]
async fn pause_parks_between_layers_and_resume_continues() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-pause", "Pause")
                .node(
                    NodeDefinition::task("slow", "testplugin", "tag_after_sleep")
                        .config_value("tag", json!("x")),
                )
                .node(NodeDefinition::task("after", "testplugin", "quick"))
                .edge("slow", "after")
                .build()
                .unwrap(),
        )
        .unwrap();

    let execution = executor.execute("wf-pause", HashMap::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    executor.pause(&execution.id).await.unwrap();

    // the in-flight node finishes naturally; the next layer never starts
    tokio::time::sleep(Duration::from_millis(200)).await;
    let paused = executor.get(&execution.id).await.unwrap();
    assert_eq!(paused.status, flow_core::ExecutionStatus::Paused);
    assert_eq!(paused.node_result("slow").unwrap().status, NodeStatus::Completed);
    assert_eq!(paused.node_result("after").unwrap().status, NodeStatus::Pending);

    executor.resume(&execution.id).await.unwrap();
    let done = wait_terminal(&executor, &execution.id).await;
    assert_eq!(done.status, flow_core::ExecutionStatus::Completed);
    assert_eq!(done.node_result("after").unwrap().status, NodeStatus::Completed);
}

#[tokio::test]
async fn workflow_removal_refused_while_executions_live() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-live", "Live")
                .node(
                    NodeDefinition::task("slow", "testplugin", "tag_after_sleep")
                        .config_value("tag", json!("x")),
                )
                .build()
                .unwrap(),
        )
        .unwrap();

    let execution = executor.execute("wf-live", HashMap::new()).await.unwrap();
    assert!(matches!(
        executor.remove_workflow("wf-live").await,
        Err(FlowError::WorkflowInUse(_))
    ));

    wait_terminal(&executor, &execution.id).await;
    executor.remove_workflow("wf-live").await.unwrap();
    assert!(matches!(
        executor.execute("wf-live", HashMap::new()).await,
        Err(FlowError::WorkflowNotFound(_))
    ));
}

#[tokio::test]
async fn terminal_snapshots_never_change() {
    let executor = WorkflowExecutor::new(scenario_invoker());
    executor
        .register_workflow(
            WorkflowBuilder::new("wf-frozen", "Frozen")
                .node(NodeDefinition::task("only", "testplugin", "quick"))
                .build()
                .unwrap(),
        )
        .unwrap();

    let execution = executor.execute("wf-frozen", HashMap::new()).await.unwrap();
    let first = wait_terminal(&executor, &execution.id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = executor.get(&execution.id).await.unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.ended_at, second.ended_at);
    assert_eq!(first.completed_nodes, second.completed_nodes);

    let history = executor.history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, execution.id);
}
