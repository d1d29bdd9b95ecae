/*!
# Execution Registry

In-memory home of live and recently-finished execution records. One lock
guards membership; each record sits behind its own lock so queries and
the owning executor don't contend. Queries get deep-copy snapshots — the
live record never leaves the registry.

A background sweeper evicts records that have been terminal longer than
the retention window.
*/

use flow_core::{Execution, ExecutionStatus, FlowError, Result, Workflow};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registered workflow definitions
pub struct WorkflowStore {
    workflows: StdRwLock<HashMap<String, Arc<Workflow>>>,
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self {
            workflows: StdRwLock::new(HashMap::new()),
        }
    }

    /// Validate and register a workflow
    pub fn insert(&self, workflow: Workflow) -> Result<()> {
        workflow.validate()?;
        self.workflows
            .write()
            .expect("workflow store poisoned")
            .insert(workflow.id.clone(), Arc::new(workflow));
        Ok(())
    }

    /// Look up a workflow
    pub fn get(&self, workflow_id: &str) -> Result<Arc<Workflow>> {
        self.workflows
            .read()
            .expect("workflow store poisoned")
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| FlowError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Remove a workflow definition. The executor guards this with its
    /// live-execution check.
    pub(crate) fn remove(&self, workflow_id: &str) -> Result<()> {
        self.workflows
            .write()
            .expect("workflow store poisoned")
            .remove(workflow_id)
            .map(|_| ())
            .ok_or_else(|| FlowError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// All registered workflows
    pub fn list(&self) -> Vec<Arc<Workflow>> {
        self.workflows
            .read()
            .expect("workflow store poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl Default for WorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

struct ControlInner {
    cancel: CancellationToken,
    cancel_requested: AtomicBool,
    paused: AtomicBool,
    resumed: Notify,
}

/// Control surface for one execution: cancel and pause flags the driver
/// observes between layers and inside every wait.
#[derive(Clone)]
pub struct ExecutionControl {
    inner: Arc<ControlInner>,
}

impl ExecutionControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                cancel: CancellationToken::new(),
                cancel_requested: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                resumed: Notify::new(),
            }),
        }
    }

    /// Token plugin calls and backoff waits select on
    pub fn token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.inner.cancel_requested.store(true, Ordering::Release);
        self.inner.cancel.cancel();
        // wake a paused driver so it can observe the cancel
        self.inner.resumed.notify_waiters();
    }

    /// The caller asked for cancellation (as opposed to a timeout
    /// cancelling the token internally)
    pub fn cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }

    /// Request a pause; the driver parks between layers
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    /// Clear the pause flag and wake the driver
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
        self.inner.resumed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Park until resumed or cancelled. Returns immediately when neither
    /// flag is set.
    pub async fn parked(&self) {
        loop {
            if !self.is_paused() || self.inner.cancel.is_cancelled() {
                return;
            }
            // register as a waiter before re-checking, so a resume
            // between the check and the await cannot be missed
            let mut notified = std::pin::pin!(self.inner.resumed.notified());
            notified.as_mut().enable();
            if !self.is_paused() || self.inner.cancel.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ExecutionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A live execution: the shared record plus its control surface
#[derive(Clone)]
pub struct ExecutionHandle {
    pub record: Arc<RwLock<Execution>>,
    pub control: ExecutionControl,
}

/// In-memory map of execution id to execution record
pub struct ExecutionRegistry {
    executions: StdRwLock<HashMap<String, ExecutionHandle>>,
    retention: Duration,
}

impl ExecutionRegistry {
    /// Registry with the given retention window for terminal records
    pub fn new(retention: Duration) -> Self {
        Self {
            executions: StdRwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Register a fresh execution and hand back its handle
    pub fn insert(&self, execution: Execution) -> ExecutionHandle {
        let id = execution.id.clone();
        let handle = ExecutionHandle {
            record: Arc::new(RwLock::new(execution)),
            control: ExecutionControl::new(),
        };
        self.executions
            .write()
            .expect("execution registry poisoned")
            .insert(id, handle.clone());
        handle
    }

    /// Look up a live handle
    pub fn handle(&self, execution_id: &str) -> Result<ExecutionHandle> {
        self.executions
            .read()
            .expect("execution registry poisoned")
            .get(execution_id)
            .cloned()
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))
    }

    fn handles(&self) -> Vec<ExecutionHandle> {
        self.executions
            .read()
            .expect("execution registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Deep-copy snapshot of one execution
    pub async fn snapshot(&self, execution_id: &str) -> Result<Execution> {
        let handle = self.handle(execution_id)?;
        let record = handle.record.read().await;
        Ok(record.clone())
    }

    /// Snapshots, newest first, optionally restricted to one workflow
    pub async fn list(&self, workflow_id: Option<&str>) -> Vec<Execution> {
        let mut snapshots = Vec::new();
        for handle in self.handles() {
            let record = handle.record.read().await;
            if workflow_id.is_none_or(|wf| record.workflow_id == wf) {
                snapshots.push(record.clone());
            }
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// The most recent terminal executions, newest first
    pub async fn history(&self, limit: usize) -> Vec<Execution> {
        let mut snapshots: Vec<Execution> = Vec::new();
        for handle in self.handles() {
            let record = handle.record.read().await;
            if record.status.is_terminal() {
                snapshots.push(record.clone());
            }
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots.truncate(limit);
        snapshots
    }

    /// Request cancellation of a live execution
    pub async fn cancel(&self, execution_id: &str) -> Result<()> {
        let handle = self.handle(execution_id)?;
        {
            let record = handle.record.read().await;
            if record.status.is_terminal() {
                return Err(FlowError::AlreadyTerminal);
            }
        }
        handle.control.cancel();
        Ok(())
    }

    /// Request a pause; the driver parks between layers
    pub async fn pause(&self, execution_id: &str) -> Result<()> {
        let handle = self.handle(execution_id)?;
        {
            let record = handle.record.read().await;
            if record.status != ExecutionStatus::Running {
                return Err(FlowError::NotRunning);
            }
        }
        handle.control.pause();
        Ok(())
    }

    /// Resume a paused execution
    pub async fn resume(&self, execution_id: &str) -> Result<()> {
        let handle = self.handle(execution_id)?;
        if !handle.control.is_paused() {
            return Err(FlowError::NotPaused);
        }
        handle.control.resume();
        Ok(())
    }

    /// Live (non-terminal) executions referencing a workflow
    pub async fn live_count(&self, workflow_id: &str) -> usize {
        let mut count = 0;
        for handle in self.handles() {
            let record = handle.record.read().await;
            if record.workflow_id == workflow_id && !record.status.is_terminal() {
                count += 1;
            }
        }
        count
    }

    /// Evict records that have been terminal longer than the retention
    /// window. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());

        let mut expired: Vec<String> = Vec::new();
        for handle in self.handles() {
            let record = handle.record.read().await;
            if record.status.is_terminal() {
                if let Some(ended_at) = record.ended_at {
                    if ended_at < cutoff {
                        expired.push(record.id.clone());
                    }
                }
            }
        }

        if !expired.is_empty() {
            let mut executions = self
                .executions
                .write()
                .expect("execution registry poisoned");
            for id in &expired {
                executions.remove(id);
            }
            debug!(evicted = expired.len(), "swept expired execution records");
        }
        expired.len()
    }

    /// Spawn the background eviction sweeper
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.executions
            .read()
            .expect("execution registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
