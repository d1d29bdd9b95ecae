/*!
# Plugin Manager

Owns the lifecycle of out-of-process plugin workers: port allocation,
process launch, health-probed startup, per-call statistics, and graceful
teardown. Calls are a single HTTP round trip; the manager never retries —
retry is the executor's concern.
*/

use crate::ports::{PortPool, DEFAULT_PORT_RANGE};
use crate::protocol::{
    HealthResponse, InvokeRequest, InvokeResponse, HEALTH_PATH, INVOKE_PATH, SHUTDOWN_PATH,
};
use crate::stats::{PluginStats, RollingStats, DEFAULT_STATS_WINDOW};
use async_trait::async_trait;
use flow_core::{FlowError, PluginInvoker, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How to launch a plugin worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Plugin id
    pub id: String,

    /// Executable to run
    pub command: String,

    /// Arguments before the injected `--port <n>`
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the worker
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the worker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl PluginSpec {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Lifecycle state of a plugin worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Worker exited unexpectedly; not restarted automatically
    Crashed,
}

/// Out-of-band health probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Manager configuration
#[derive(Debug, Clone)]
pub struct PluginManagerConfig {
    /// Deadline for a worker to report healthy after launch, in seconds
    pub start_timeout_secs: u64,

    /// Grace period before a stopping worker is killed, in seconds
    pub stop_grace_secs: u64,

    /// Per-call deadline, in seconds
    pub call_timeout_secs: u64,

    /// Interval between health probes while starting or stopping
    pub health_poll_interval_ms: u64,

    /// Ports handed to workers
    pub port_range: RangeInclusive<u16>,

    /// Rolling-average window for call latencies
    pub stats_window: usize,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self {
            start_timeout_secs: 30,
            stop_grace_secs: 5,
            call_timeout_secs: 30,
            health_poll_interval_ms: 200,
            port_range: DEFAULT_PORT_RANGE,
            stats_window: DEFAULT_STATS_WINDOW,
        }
    }
}

impl PluginManagerConfig {
    /// Defaults overridden by `FLOW_PLUGIN_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("FLOW_PLUGIN_START_TIMEOUT_SECS") {
            config.start_timeout_secs = v;
        }
        if let Some(v) = env_parse("FLOW_PLUGIN_STOP_GRACE_SECS") {
            config.stop_grace_secs = v;
        }
        if let Some(v) = env_parse("FLOW_PLUGIN_CALL_TIMEOUT_SECS") {
            config.call_timeout_secs = v;
        }
        if let Some(v) = env_parse("FLOW_PLUGIN_HEALTH_POLL_INTERVAL_MS") {
            config.health_poll_interval_ms = v;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

struct PluginEntry {
    spec: PluginSpec,
    state: PluginState,
    port: Option<u16>,
    process: Option<Child>,
    stats: RollingStats,
}

/// Manages plugin worker processes and routes calls to them
pub struct PluginManager {
    config: PluginManagerConfig,
    client: Client,
    ports: PortPool,
    plugins: RwLock<HashMap<String, Arc<Mutex<PluginEntry>>>>,
}

impl PluginManager {
    /// Manager with default configuration
    pub fn new() -> Self {
        Self::with_config(PluginManagerConfig::default())
    }

    /// Manager with a specific configuration
    pub fn with_config(config: PluginManagerConfig) -> Self {
        Self {
            ports: PortPool::with_range(config.port_range.clone()),
            config,
            client: Client::new(),
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Register a plugin spec. Re-registering an existing id keeps the
    /// running worker and only replaces the stored spec when stopped.
    pub async fn register(&self, spec: PluginSpec) {
        let mut plugins = self.plugins.write().await;
        match plugins.get(&spec.id) {
            Some(existing) => {
                let mut entry = existing.lock().await;
                if entry.state == PluginState::Stopped {
                    entry.spec = spec;
                }
            }
            None => {
                let id = spec.id.clone();
                plugins.insert(
                    id,
                    Arc::new(Mutex::new(PluginEntry {
                        spec,
                        state: PluginState::Stopped,
                        port: None,
                        process: None,
                        stats: RollingStats::new(self.config.stats_window),
                    })),
                );
            }
        }
    }

    /// Ids of registered plugins
    pub async fn plugin_ids(&self) -> Vec<String> {
        self.plugins.read().await.keys().cloned().collect()
    }

    async fn entry(&self, plugin_id: &str) -> Result<Arc<Mutex<PluginEntry>>> {
        self.plugins
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| FlowError::PluginUnavailable(plugin_id.to_string()))
    }

    /// Launch a worker and wait for its health probe to report ready.
    pub async fn start(&self, plugin_id: &str) -> Result<()> {
        let entry = self.entry(plugin_id).await?;

        let port = {
            let mut e = entry.lock().await;
            match e.state {
                PluginState::Running | PluginState::Starting => return Ok(()),
                PluginState::Stopping => {
                    return Err(FlowError::PluginUnavailable(plugin_id.to_string()))
                }
                PluginState::Stopped | PluginState::Crashed => {}
            }

            let port = self
                .ports
                .acquire()
                .ok_or_else(|| FlowError::NoPortAvailable(plugin_id.to_string()))?;

            let mut cmd = Command::new(&e.spec.command);
            cmd.args(&e.spec.args);
            cmd.args(["--port", &port.to_string()]);
            for (key, value) in &e.spec.env {
                cmd.env(key, value);
            }
            if let Some(ref dir) = e.spec.working_dir {
                cmd.current_dir(dir);
            }
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());

            match cmd.spawn() {
                Ok(child) => {
                    info!(plugin_id, port, pid = child.id(), "starting plugin worker");
                    e.process = Some(child);
                    e.port = Some(port);
                    e.state = PluginState::Starting;
                    port
                }
                Err(err) => {
                    self.ports.release(port);
                    e.state = PluginState::Stopped;
                    return Err(FlowError::Io(err));
                }
            }
        };

        self.wait_for_ready(plugin_id, &entry, port).await
    }

    async fn wait_for_ready(
        &self,
        plugin_id: &str,
        entry: &Arc<Mutex<PluginEntry>>,
        port: u16,
    ) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(self.config.start_timeout_secs);

        loop {
            // Worker died before becoming healthy
            {
                let mut e = entry.lock().await;
                if let Some(child) = e.process.as_mut() {
                    if let Ok(Some(status)) = child.try_wait() {
                        let mut stderr_output = String::new();
                        if let Some(stderr) = child.stderr.as_mut() {
                            let _ = stderr.read_to_string(&mut stderr_output);
                        }
                        error!(
                            plugin_id,
                            %status,
                            stderr = %stderr_output,
                            "plugin worker exited during startup"
                        );
                        e.process = None;
                        e.state = PluginState::Stopped;
                        if let Some(p) = e.port.take() {
                            self.ports.release(p);
                        }
                        return Err(FlowError::PluginStartTimeout(plugin_id.to_string()));
                    }
                }
            }

            if self.probe(port).await {
                entry.lock().await.state = PluginState::Running;
                info!(plugin_id, port, "plugin worker ready");
                return Ok(());
            }

            if Instant::now() >= deadline {
                let mut e = entry.lock().await;
                if let Some(mut child) = e.process.take() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                if let Some(p) = e.port.take() {
                    self.ports.release(p);
                }
                e.state = PluginState::Stopped;
                return Err(FlowError::PluginStartTimeout(plugin_id.to_string()));
            }

            tokio::time::sleep(Duration::from_millis(self.config.health_poll_interval_ms)).await;
        }
    }

    async fn probe(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}{}", port, HEALTH_PATH);
        let probe = async {
            let resp = self.client.get(&url).send().await.ok()?;
            let body: HealthResponse = resp.json().await.ok()?;
            Some(body.is_healthy())
        };
        matches!(
            tokio::time::timeout(Duration::from_secs(2), probe).await,
            Ok(Some(true))
        )
    }

    /// Request graceful shutdown, then kill after the grace period.
    pub async fn stop(&self, plugin_id: &str) -> Result<()> {
        let entry = self.entry(plugin_id).await?;

        let endpoint = {
            let mut e = entry.lock().await;
            if e.process.is_none() {
                if let Some(p) = e.port.take() {
                    self.ports.release(p);
                }
                e.state = PluginState::Stopped;
                return Ok(());
            }
            e.state = PluginState::Stopping;
            e.port.map(|p| format!("http://127.0.0.1:{}", p))
        };

        if let Some(endpoint) = endpoint {
            let url = format!("{}{}", endpoint, SHUTDOWN_PATH);
            let _ = tokio::time::timeout(Duration::from_secs(1), self.client.post(&url).send())
                .await;
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.stop_grace_secs);
        loop {
            {
                let mut e = entry.lock().await;
                let exited = match e.process.as_mut() {
                    None => true,
                    Some(child) => matches!(child.try_wait(), Ok(Some(_))),
                };
                if exited {
                    e.process = None;
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(plugin_id, "grace period elapsed, killing plugin worker");
                    if let Some(mut child) = e.process.take() {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(self.config.health_poll_interval_ms)).await;
        }

        let mut e = entry.lock().await;
        if let Some(p) = e.port.take() {
            self.ports.release(p);
        }
        e.state = PluginState::Stopped;
        info!(plugin_id, "plugin worker stopped");
        Ok(())
    }

    /// Stop every registered plugin
    pub async fn stop_all(&self) {
        for id in self.plugin_ids().await {
            if let Err(err) = self.stop(&id).await {
                warn!(plugin_id = %id, %err, "failed to stop plugin");
            }
        }
    }

    /// Single request/response round trip to the worker.
    ///
    /// Fails with `PluginUnavailable` when no running worker exists,
    /// `PluginTimeout` past the per-call deadline, and
    /// `PluginReturnedError` on a failure envelope. Never retries.
    pub async fn call(
        &self,
        plugin_id: &str,
        method: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let entry = self.entry(plugin_id).await?;

        let endpoint = {
            let e = entry.lock().await;
            if e.state != PluginState::Running {
                return Err(FlowError::PluginUnavailable(plugin_id.to_string()));
            }
            match e.port {
                Some(p) => format!("http://127.0.0.1:{}{}", p, INVOKE_PATH),
                None => return Err(FlowError::PluginUnavailable(plugin_id.to_string())),
            }
        };

        let request = InvokeRequest {
            method: method.to_string(),
            payload,
        };

        debug!(plugin_id, method, "invoking plugin method");
        let started = Instant::now();

        let outcome: Result<Value> = tokio::select! {
            _ = cancel.cancelled() => Err(FlowError::Cancelled),
            result = tokio::time::timeout(
                Duration::from_secs(self.config.call_timeout_secs),
                self.round_trip(&endpoint, &request),
            ) => match result {
                Err(_) => Err(FlowError::PluginTimeout {
                    plugin_id: plugin_id.to_string(),
                    method: method.to_string(),
                }),
                Ok(Err(e)) => Err(e),
                Ok(Ok(body)) => {
                    if body.success {
                        Ok(body.data.unwrap_or(Value::Null))
                    } else {
                        Err(FlowError::PluginReturnedError {
                            plugin_id: plugin_id.to_string(),
                            message: body.error.unwrap_or_else(|| "unspecified error".to_string()),
                        })
                    }
                }
            },
        };

        let latency_ms = started.elapsed().as_millis() as u64;

        // A cancelled call never reached the worker's answer; it does not
        // count against the plugin's stats.
        if !matches!(outcome, Err(FlowError::Cancelled)) {
            let mut e = entry.lock().await;
            e.stats.record(outcome.is_ok(), latency_ms);

            // Transport failure may mean the worker died underneath us.
            if matches!(outcome, Err(FlowError::Http(_))) {
                if let Some(child) = e.process.as_mut() {
                    if let Ok(Some(status)) = child.try_wait() {
                        warn!(plugin_id, %status, "plugin worker crashed");
                        e.process = None;
                        e.state = PluginState::Crashed;
                        if let Some(p) = e.port.take() {
                            self.ports.release(p);
                        }
                    }
                }
            }
        }

        outcome
    }

    async fn round_trip(&self, url: &str, request: &InvokeRequest) -> Result<InvokeResponse> {
        let resp = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| FlowError::http(e.to_string()))?;
        resp.json::<InvokeResponse>()
            .await
            .map_err(|e| FlowError::http(e.to_string()))
    }

    /// Out-of-band health probe
    pub async fn health(&self, plugin_id: &str) -> PluginHealth {
        let Ok(entry) = self.entry(plugin_id).await else {
            return PluginHealth::Unknown;
        };
        let (state, port) = {
            let e = entry.lock().await;
            (e.state, e.port)
        };
        match (state, port) {
            (PluginState::Running, Some(port)) => {
                if self.probe(port).await {
                    PluginHealth::Healthy
                } else {
                    PluginHealth::Unhealthy
                }
            }
            (PluginState::Crashed, _) => PluginHealth::Unhealthy,
            _ => PluginHealth::Unknown,
        }
    }

    /// Call statistics snapshot
    pub async fn stats(&self, plugin_id: &str) -> Result<PluginStats> {
        let entry = self.entry(plugin_id).await?;
        let e = entry.lock().await;
        Ok(e.stats.snapshot())
    }

    /// Current lifecycle state
    pub async fn state(&self, plugin_id: &str) -> Result<PluginState> {
        let entry = self.entry(plugin_id).await?;
        let e = entry.lock().await;
        Ok(e.state)
    }

    /// Ports currently handed out to workers
    pub fn ports_in_use(&self) -> usize {
        self.ports.in_use()
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginInvoker for PluginManager {
    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.call(plugin_id, method, payload, cancel).await
    }
}
