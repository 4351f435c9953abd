// SPDX-License-Identifier: AGPL-3.0
//! Fans audit events out to every registered [`SiemSink`] through a
//! per-sink bounded queue, batcher, and circuit breaker. A sink that keeps
//! failing opens its breaker and events spill to a JSONL file instead of
//! blocking the invocation pipeline or being dropped.

use std::collections::VecDeque;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::audit::AuditEvent;
use crate::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

use super::sinks::SiemSink;

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub min_compress_bytes: usize,
    pub max_retries: u32,
    pub fallback_dir: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout: Duration::from_secs(3),
            min_compress_bytes: 8 * 1024,
            max_retries: 3,
            fallback_dir: PathBuf::from("./siem-fallback"),
        }
    }
}

/// Bounded drop-oldest queue: a full queue evicts its oldest entry rather
/// than rejecting the newest one, so a sustained burst loses history but
/// never blocks the caller.
struct BoundedQueue {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn push(&self, event: AuditEvent) {
        let mut guard = self.events.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
        drop(guard);
        self.notify.notify_one();
    }

    fn drain_up_to(&self, max: usize) -> Vec<AuditEvent> {
        let mut guard = self.events.lock();
        let n = guard.len().min(max);
        guard.drain(..n).collect()
    }

    fn len(&self) -> usize {
        self.events.lock().len()
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct SinkWorker {
    queue: Arc<BoundedQueue>,
    shutdown: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct SiemForwarder {
    workers: Vec<SinkWorker>,
}

impl SiemForwarder {
    pub fn new(sinks: Vec<Arc<dyn SiemSink>>, config: SinkConfig) -> Self {
        let workers = sinks
            .into_iter()
            .map(|sink| spawn_worker(sink, config.clone()))
            .collect();
        Self { workers }
    }

    /// Enqueue an event on every sink's queue. Never blocks: a full queue
    /// evicts its oldest buffered event instead of backpressuring the
    /// invocation pipeline.
    pub fn forward(&self, event: AuditEvent) {
        for worker in &self.workers {
            worker.queue.push(event.clone());
        }
    }

    /// Total events dropped per sink since startup, for the drop-counter
    /// metric the health monitor exposes.
    pub fn dropped_counts(&self) -> Vec<u64> {
        self.workers.iter().map(|w| w.queue.dropped_count()).collect()
    }

    pub async fn shutdown(self) {
        for worker in self.workers {
            worker.shutdown.store(true, Ordering::SeqCst);
            worker.queue.notify.notify_one();
            let _ = worker.task.await;
        }
    }
}

fn spawn_worker(sink: Arc<dyn SiemSink>, config: SinkConfig) -> SinkWorker {
    let queue = Arc::new(BoundedQueue::new(config.queue_capacity));
    let shutdown = Arc::new(AtomicBool::new(false));
    let breaker = CircuitBreaker::new(
        format!("siem:{}", sink.name()),
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            ..Default::default()
        },
    );
    let task = tokio::spawn(run_worker(sink, queue.clone(), shutdown.clone(), config, breaker));
    SinkWorker { queue, shutdown, task }
}

/// Flushes whenever the queue reaches `batch_size` or `batch_timeout`
/// elapses since the last flush, whichever comes first.
async fn run_worker(
    sink: Arc<dyn SiemSink>,
    queue: Arc<BoundedQueue>,
    shutdown: Arc<AtomicBool>,
    config: SinkConfig,
    breaker: Arc<CircuitBreaker>,
) {
    loop {
        if queue.len() < config.batch_size {
            tokio::select! {
                _ = queue.notify.notified() => {}
                _ = tokio::time::sleep(config.batch_timeout) => {}
            }
        }

        let mut batch = queue.drain_up_to(config.batch_size);
        if !batch.is_empty() {
            flush_batch(&sink, &mut batch, &config, &breaker).await;
        } else if shutdown.load(Ordering::SeqCst) {
            return;
        }

        if shutdown.load(Ordering::SeqCst) && queue.len() == 0 {
            return;
        }
    }
}

async fn flush_batch(
    sink: &Arc<dyn SiemSink>,
    batch: &mut Vec<AuditEvent>,
    config: &SinkConfig,
    breaker: &Arc<CircuitBreaker>,
) {
    let events = std::mem::take(batch);
    let sink = sink.clone();
    let events_for_retry = events.clone();

    let outcome = breaker
        .call(|| {
            let sink = sink.clone();
            let events = events.clone();
            async move {
                send_with_retry(sink.as_ref(), &events, config.max_retries).await
            }
        })
        .await;

    match outcome {
        Ok(Ok(())) => {
            info!(sink = sink.name(), count = events_for_retry.len(), "siem_batch_forwarded");
        }
        Ok(Err(e)) => {
            error!(sink = sink.name(), error = %e, "siem_batch_failed_falling_back_to_disk");
            fallback_to_disk(sink.name(), &events_for_retry, config);
        }
        Err(open) => {
            warn!(sink = sink.name(), error = %open, "siem_circuit_open_falling_back_to_disk");
            fallback_to_disk(sink.name(), &events_for_retry, config);
        }
    }
}

async fn send_with_retry(sink: &dyn SiemSink, events: &[AuditEvent], max_retries: u32) -> anyhow::Result<()> {
    let mut last_err = None;
    for attempt in 0..max_retries.max(1) {
        match sink.send(events).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < max_retries {
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts made")))
}

/// Gzip the batch above `min_compress_bytes` and append to a per-sink JSONL
/// file so operators can replay it once the sink recovers.
fn fallback_to_disk(sink_name: &str, events: &[AuditEvent], config: &SinkConfig) {
    let lines: String = events
        .iter()
        .filter_map(|e| serde_json::to_string(e).ok())
        .collect::<Vec<_>>()
        .join("\n");
    if lines.is_empty() {
        return;
    }

    if let Err(e) = std::fs::create_dir_all(&config.fallback_dir) {
        error!(error = %e, "siem_fallback_dir_create_failed");
        return;
    }

    if lines.len() >= config.min_compress_bytes {
        let path = config.fallback_dir.join(format!("{sink_name}.jsonl.gz"));
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let mut encoder = GzEncoder::new(file, Compression::default());
                if let Err(e) = writeln!(encoder, "{lines}") {
                    error!(error = %e, path = %path.display(), "siem_fallback_write_failed");
                }
            }
            Err(e) => error!(error = %e, path = %path.display(), "siem_fallback_open_failed"),
        }
    } else {
        let path = config.fallback_dir.join(format!("{sink_name}.jsonl"));
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{lines}") {
                    error!(error = %e, path = %path.display(), "siem_fallback_write_failed");
                }
            }
            Err(e) => error!(error = %e, path = %path.display(), "siem_fallback_open_failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::{AuditEventType, Severity};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SiemSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }
        async fn send(&self, _events: &[AuditEvent]) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("sink unreachable")
        }
    }

    fn event() -> AuditEvent {
        AuditEvent::builder(AuditEventType::InvocationSucceeded, Severity::Low, "req-1").build()
    }

    #[tokio::test]
    async fn failing_sink_falls_back_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn SiemSink> = Arc::new(FailingSink { attempts: attempts.clone() });
        let config = SinkConfig {
            queue_capacity: 10,
            batch_size: 1,
            batch_timeout: Duration::from_millis(50),
            min_compress_bytes: usize::MAX,
            max_retries: 1,
            fallback_dir: dir.path().to_path_buf(),
        };
        let forwarder = SiemForwarder::new(vec![sink], config);
        forwarder.forward(event());
        forwarder.shutdown().await;

        let fallback_path = dir.path().join("failing.jsonl");
        assert!(fallback_path.exists());
        assert!(attempts.load(Ordering::SeqCst) >= 1);
    }
}
