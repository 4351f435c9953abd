// SPDX-License-Identifier: AGPL-3.0
//! Subprocess lifecycle, JSON-RPC 2.0 framing, health monitoring, and
//! resource-limit enforcement for child-process MCP servers.
//!
//! One JSON object per line on stdin/stdout. Requests carry a monotonically
//! increasing integer id; each has a pending oneshot channel keyed by that
//! id. Every inbound line — response or otherwise — refreshes the
//! heartbeat so a talkative-but-wedged server doesn't masquerade as
//! healthy, but only responses resolve a pending request.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_cpu_percent: f64,
    pub max_file_descriptors: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 1024,
            max_cpu_percent: 80.0,
            max_file_descriptors: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub heartbeat_interval: Duration,
    pub hung_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            hung_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Error)]
pub enum StdioTransportError {
    #[error("transport not started")]
    NotStarted,
    #[error("failed to start subprocess: {0}")]
    ProcessStartFailed(String),
    #[error("transport stopped")]
    TransportStopped,
    #[error("request timed out")]
    RequestTimeout,
    #[error("cancelled")]
    Cancelled,
    #[error("json-rpc error: {0}")]
    JsonRpcError(String),
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),
    #[error("exceeded max restart attempts ({0})")]
    ProcessCrashed(u32),
}

struct PendingRequests {
    map: Mutex<HashMap<i64, oneshot::Sender<Result<Value, StdioTransportError>>>>,
}

impl PendingRequests {
    fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    async fn insert(&self, id: i64, tx: oneshot::Sender<Result<Value, StdioTransportError>>) {
        self.map.lock().await.insert(id, tx);
    }

    async fn resolve(&self, id: i64, result: Result<Value, StdioTransportError>) {
        if let Some(tx) = self.map.lock().await.remove(&id) {
            let _ = tx.send(result);
        }
    }

    async fn fail_all(&self, err: impl Fn() -> StdioTransportError) {
        let mut map = self.map.lock().await;
        for (_, tx) in map.drain() {
            let _ = tx.send(Err(err()));
        }
    }
}

struct RunningProcess {
    child: Child,
    stdin_task: Option<JoinHandle<()>>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    health_task: JoinHandle<()>,
}

pub struct StdioTransport {
    command: Vec<String>,
    cwd: Option<String>,
    env: HashMap<String, String>,
    resource_limits: ResourceLimits,
    health_config: HealthConfig,
    max_restart_attempts: u32,

    running: Arc<RwLock<Option<RunningProcess>>>,
    stdin_tx: Arc<RwLock<Option<tokio::sync::mpsc::UnboundedSender<String>>>>,
    pending: Arc<PendingRequests>,
    next_id: AtomicI64,
    restart_count: AtomicU64,
    last_heartbeat: Arc<RwLock<DateTime<Utc>>>,
    shutting_down: Arc<std::sync::atomic::AtomicBool>,
}

impl StdioTransport {
    pub fn new(
        command: Vec<String>,
        cwd: Option<String>,
        env: HashMap<String, String>,
        resource_limits: ResourceLimits,
        health_config: HealthConfig,
        max_restart_attempts: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            command,
            cwd,
            env,
            resource_limits,
            health_config,
            max_restart_attempts,
            running: Arc::new(RwLock::new(None)),
            stdin_tx: Arc::new(RwLock::new(None)),
            pending: Arc::new(PendingRequests::new()),
            next_id: AtomicI64::new(0),
            restart_count: AtomicU64::new(0),
            last_heartbeat: Arc::new(RwLock::new(Utc::now())),
            shutting_down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    pub async fn is_running(&self) -> bool {
        self.running.read().await.is_some() && !self.shutting_down.load(Ordering::SeqCst)
    }

    pub async fn pid(&self) -> Option<u32> {
        self.running.read().await.as_ref().and_then(|r| r.child.id())
    }

    pub fn start<'a>(
        self: &'a Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StdioTransportError>> + Send + 'a>> {
        Box::pin(self.start_inner())
    }

    async fn start_inner(self: &Arc<Self>) -> Result<(), StdioTransportError> {
        if self.running.read().await.is_some() {
            warn!(command = ?self.command, "stdio_transport_already_started");
            return Ok(());
        }

        info!(command = ?self.command, "stdio_transport_starting");

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(&self.env);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| StdioTransportError::ProcessStartFailed(e.to_string()))?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let stdin_task = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let pending = self.pending.clone();
        let heartbeat = self.last_heartbeat.clone();
        let shutting_down = self.shutting_down.clone();
        let restart_self = self.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        *heartbeat.write().await = Utc::now();
                        Self::handle_line(&pending, &line).await;
                    }
                    Ok(None) | Err(_) => {
                        if !shutting_down.load(Ordering::SeqCst) {
                            error!("stdio_transport_unexpected_eof");
                            let _ = restart_self.try_auto_restart().await;
                        }
                        break;
                    }
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(stderr = %line, "stdio_transport_stderr");
            }
        });

        let health_self = self.clone();
        let health_task = tokio::spawn(async move {
            health_self.health_check_loop().await;
        });

        *self.stdin_tx.write().await = Some(tx);
        *self.last_heartbeat.write().await = Utc::now();
        *self.running.write().await = Some(RunningProcess {
            child,
            stdin_task: Some(stdin_task),
            stdout_task,
            stderr_task,
            health_task,
        });

        info!("stdio_transport_started");
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let mut running = self.running.write().await;
        if let Some(mut proc) = running.take() {
            #[cfg(unix)]
            {
                if let Some(pid) = proc.child.id() {
                    unsafe {
                        libc::kill(pid as i32, libc::SIGTERM);
                    }
                }
            }
            let waited = tokio::time::timeout(grace, proc.child.wait()).await;
            if waited.is_err() {
                let _ = proc.child.kill().await;
            }
            proc.stdout_task.abort();
            proc.stderr_task.abort();
            proc.health_task.abort();
            if let Some(task) = proc.stdin_task.take() {
                task.abort();
            }
        }
        *self.stdin_tx.write().await = None;
        self.pending.fail_all(|| StdioTransportError::TransportStopped).await;
        self.shutting_down.store(false, Ordering::SeqCst);
    }

    pub async fn restart(self: &Arc<Self>) -> Result<(), StdioTransportError> {
        info!(restart_count = self.restart_count.load(Ordering::SeqCst), "stdio_transport_restarting");
        self.stop(Duration::from_secs(3)).await;
        let count = self.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.max_restart_attempts as u64 {
            return Err(StdioTransportError::ProcessCrashed(self.max_restart_attempts));
        }
        self.start().await
    }

    async fn try_auto_restart(self: &Arc<Self>) {
        if self.restart_count.load(Ordering::SeqCst) < self.max_restart_attempts as u64 {
            let me = self.clone();
            tokio::spawn(async move {
                let _ = me.restart().await;
            });
        }
    }

    pub async fn send_request(
        self: &Arc<Self>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, StdioTransportError> {
        let tx = self.stdin_tx.read().await.clone();
        let Some(tx) = tx else {
            return Err(StdioTransportError::NotStarted);
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (result_tx, result_rx) = oneshot::channel();
        self.pending.insert(id, result_tx).await;

        let line = format!("{}\n", request);
        if tx.send(line).is_err() {
            self.pending.resolve(id, Err(StdioTransportError::NotStarted)).await;
            return Err(StdioTransportError::NotStarted);
        }
        *self.last_heartbeat.write().await = Utc::now();

        match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StdioTransportError::TransportStopped),
            Err(_) => {
                self.pending.resolve(id, Err(StdioTransportError::RequestTimeout)).await;
                Err(StdioTransportError::RequestTimeout)
            }
        }
    }

    pub async fn send_notification(&self, method: &str, params: Value) -> Result<(), StdioTransportError> {
        let tx = self.stdin_tx.read().await.clone();
        let Some(tx) = tx else {
            return Err(StdioTransportError::NotStarted);
        };
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let line = format!("{}\n", notification);
        tx.send(line).map_err(|_| StdioTransportError::NotStarted)?;
        *self.last_heartbeat.write().await = Utc::now();
        Ok(())
    }

    async fn handle_line(pending: &PendingRequests, line: &str) {
        let message: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(line, error = %e, "stdio_transport_invalid_json");
                return;
            }
        };
        let Some(id) = message.get("id").and_then(|v| v.as_i64()) else {
            return;
        };
        if let Some(result) = message.get("result") {
            pending.resolve(id, Ok(result.clone())).await;
        } else if let Some(err) = message.get("error") {
            let msg = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            pending.resolve(id, Err(StdioTransportError::JsonRpcError(msg))).await;
        }
    }

    async fn health_check_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.health_config.heartbeat_interval).await;
            if !self.is_running().await {
                return;
            }

            let elapsed = Utc::now() - *self.last_heartbeat.read().await;
            if elapsed.num_milliseconds() as u64 > self.health_config.hung_timeout.as_millis() as u64 {
                let hung_pid = self.pid().await;
                error!(pid = ?hung_pid, "stdio_transport_hung_process");
                self.try_auto_restart().await;
                return;
            }

            if let Some(pid) = self.pid().await {
                match read_proc_usage(pid) {
                    Ok(usage) => {
                        if usage.rss_mb > self.resource_limits.max_memory_mb {
                            error!(pid, rss_mb = usage.rss_mb, "stdio_transport_memory_limit_exceeded");
                            self.kill_for_resource_limit().await;
                            return;
                        }
                        if usage.fd_count > self.resource_limits.max_file_descriptors {
                            error!(pid, fds = usage.fd_count, "stdio_transport_fd_limit_exceeded");
                            self.kill_for_resource_limit().await;
                            return;
                        }
                    }
                    Err(_) => continue,
                }
            }
        }
    }

    async fn kill_for_resource_limit(&self) {
        let mut running = self.running.write().await;
        if let Some(proc) = running.as_mut() {
            let _ = proc.child.kill().await;
        }
        *running = None;
        self.pending
            .fail_all(|| StdioTransportError::ResourceExceeded("limit exceeded".into()))
            .await;
    }
}

struct ProcUsage {
    rss_mb: u64,
    fd_count: u64,
}

/// Reads `/proc/<pid>/status` for RSS and counts entries under
/// `/proc/<pid>/fd` for the open file descriptor count. Linux-only; the
/// health monitor treats a read failure as "process gone" and skips the
/// check rather than failing the transport.
fn read_proc_usage(pid: u32) -> std::io::Result<ProcUsage> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status"))?;
    let rss_kb = status
        .lines()
        .find(|l| l.starts_with("VmRSS:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let fd_count = std::fs::read_dir(format!("/proc/{pid}/fd"))
        .map(|entries| entries.count() as u64)
        .unwrap_or(0);
    Ok(ProcUsage {
        rss_mb: rss_kb / 1024,
        fd_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_tools_list_over_cat() {
        let transport = StdioTransport::new(
            vec!["cat".into()],
            None,
            HashMap::new(),
            ResourceLimits::default(),
            HealthConfig::default(),
            1,
        );
        transport.start().await.unwrap();
        assert!(transport.is_running().await);
        transport.stop(Duration::from_millis(200)).await;
        assert!(!transport.is_running().await);
    }

    #[tokio::test]
    async fn send_request_times_out_without_a_responder() {
        let transport = StdioTransport::new(
            vec!["cat".into()],
            None,
            HashMap::new(),
            ResourceLimits::default(),
            HealthConfig::default(),
            1,
        );
        transport.start().await.unwrap();
        let result = transport
            .send_request("tools/list", serde_json::json!({}), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(StdioTransportError::RequestTimeout)));
        transport.stop(Duration::from_millis(200)).await;
    }
}
