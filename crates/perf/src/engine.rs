//! Sampling sessions: one repeating task per session collects the requested
//! metrics in parallel, appends to a bounded ring buffer, and publishes on a
//! lossy broadcast stream. Slow consumers miss samples; the collector never
//! blocks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use ad_domain::error::{codes, AgentError, Result};
use ad_shell::Shell;

use crate::collect::{
    BatteryCollector, CpuCollector, FpsCollector, MemoryCollector, NetworkCollector,
};
use crate::sample::{MetricKind, PerfSample, PerfSummary};

/// Ring buffer bound: the engine keeps at least the last 1000 samples.
pub const MAX_SAMPLES: usize = 1000;

/// Broadcast capacity for the sample stream.
const STREAM_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub package: Option<String>,
    pub metrics: Vec<MetricKind>,
    pub interval: Duration,
}

/// Everything `perf.stop` returns.
#[derive(Debug, Clone)]
pub struct StopReport {
    pub session_id: String,
    pub duration_ms: u64,
    pub sample_count: usize,
    pub summary: PerfSummary,
    pub samples: Vec<PerfSample>,
}

struct SessionState {
    spec: SessionSpec,
    started: Instant,
    samples: Mutex<VecDeque<PerfSample>>,
    /// Total appended, including samples the ring has since discarded.
    total_count: Mutex<usize>,
    cancel: CancellationToken,
}

fn push_bounded(ring: &mut VecDeque<PerfSample>, sample: PerfSample) {
    if ring.len() == MAX_SAMPLES {
        ring.pop_front();
    }
    ring.push_back(sample);
}

/// The collectors owned by one session task.
struct CollectorSet {
    cpu: Option<CpuCollector>,
    memory: Option<MemoryCollector>,
    fps: Option<FpsCollector>,
    network: Option<NetworkCollector>,
    battery: Option<BatteryCollector>,
}

impl CollectorSet {
    fn new(shell: &Arc<dyn Shell>, spec: &SessionSpec) -> Self {
        let want = |k: MetricKind| spec.metrics.contains(&k);
        Self {
            cpu: want(MetricKind::Cpu)
                .then(|| CpuCollector::new(shell.clone(), spec.package.clone())),
            memory: want(MetricKind::Memory)
                .then(|| MemoryCollector::new(shell.clone(), spec.package.clone())),
            fps: want(MetricKind::Fps)
                .then(|| FpsCollector::new(shell.clone(), spec.package.clone())),
            network: want(MetricKind::Network).then(NetworkCollector::new),
            battery: want(MetricKind::Battery).then(|| BatteryCollector::new(shell.clone())),
        }
    }

    /// One tick: every requested collector runs concurrently.
    async fn collect(&mut self) -> PerfSample {
        let Self {
            cpu,
            memory,
            fps,
            network,
            battery,
        } = self;
        let (cpu, memory, fps, network, battery) = tokio::join!(
            async {
                match cpu {
                    Some(c) => c.collect().await,
                    None => None,
                }
            },
            async {
                match memory {
                    Some(c) => c.collect().await,
                    None => None,
                }
            },
            async {
                match fps {
                    Some(c) => c.collect().await,
                    None => None,
                }
            },
            async {
                match network {
                    Some(c) => c.collect().await,
                    None => None,
                }
            },
            async {
                match battery {
                    Some(c) => c.collect().await,
                    None => None,
                }
            },
        );

        PerfSample {
            timestamp: chrono::Utc::now().timestamp_millis(),
            cpu,
            memory,
            fps,
            network,
            battery,
        }
    }
}

pub struct PerfEngine {
    shell: Arc<dyn Shell>,
    sessions: RwLock<HashMap<String, Arc<SessionState>>>,
    sample_tx: broadcast::Sender<(String, PerfSample)>,
}

impl PerfEngine {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        let (sample_tx, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            shell,
            sessions: RwLock::new(HashMap::new()),
            sample_tx,
        }
    }

    /// Subscribe to the live `(session_id, sample)` stream.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, PerfSample)> {
        self.sample_tx.subscribe()
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Begin a sampling session; returns its id.
    pub fn start(&self, spec: SessionSpec) -> Result<String> {
        if spec.metrics.is_empty() {
            return Err(AgentError::internal("metrics must be a non-empty set"));
        }
        {
            let sessions = self.sessions.read();
            if sessions.values().any(|s| s.spec.package == spec.package) {
                return Err(AgentError::new(
                    codes::ALREADY_RUNNING,
                    match &spec.package {
                        Some(p) => format!("a session for {p} is already running"),
                        None => "a device-wide session is already running".to_string(),
                    },
                ));
            }
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(SessionState {
            spec: spec.clone(),
            started: Instant::now(),
            samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES.min(1024))),
            total_count: Mutex::new(0),
            cancel: CancellationToken::new(),
        });
        self.sessions
            .write()
            .insert(session_id.clone(), state.clone());

        let shell = self.shell.clone();
        let tx = self.sample_tx.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let mut collectors = CollectorSet::new(&shell, &state.spec);
            let mut ticker = tokio::time::interval(state.spec.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = state.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let sample = collectors.collect().await;
                        {
                            let mut ring = state.samples.lock();
                            push_bounded(&mut ring, sample.clone());
                            *state.total_count.lock() += 1;
                        }
                        // Lossy publish; nobody listening is fine.
                        let _ = tx.send((id.clone(), sample));
                    }
                }
            }
            tracing::debug!(session_id = %id, "perf session task exited");
        });

        tracing::info!(
            session_id = %session_id,
            package = spec.package.as_deref().unwrap_or("<device>"),
            metrics = ?spec.metrics,
            interval_ms = spec.interval.as_millis() as u64,
            "perf session started"
        );
        Ok(session_id)
    }

    /// One-off sample with the same collection logic as a session tick.
    pub async fn snapshot(
        &self,
        package: Option<String>,
        metrics: Vec<MetricKind>,
    ) -> Result<PerfSample> {
        if metrics.is_empty() {
            return Err(AgentError::internal("metrics must be a non-empty set"));
        }
        let spec = SessionSpec {
            package,
            metrics,
            interval: Duration::from_secs(1),
        };
        let mut collectors = CollectorSet::new(&self.shell, &spec);
        Ok(collectors.collect().await)
    }

    /// Stop a session: signal its task, drop it from the map, and summarize.
    pub fn stop(&self, session_id: &str) -> Result<StopReport> {
        let state = self
            .sessions
            .write()
            .remove(session_id)
            .ok_or_else(|| {
                AgentError::new(
                    codes::SESSION_NOT_FOUND,
                    format!("no perf session {session_id}"),
                )
            })?;
        state.cancel.cancel();

        let samples: Vec<PerfSample> = state.samples.lock().iter().cloned().collect();
        let summary = PerfSummary::from_samples(&samples);
        let report = StopReport {
            session_id: session_id.to_string(),
            duration_ms: state.started.elapsed().as_millis() as u64,
            sample_count: *state.total_count.lock(),
            summary,
            samples,
        };
        tracing::info!(
            session_id = %session_id,
            sample_count = report.sample_count,
            duration_ms = report.duration_ms,
            "perf session stopped"
        );
        Ok(report)
    }

    /// Stop every session (engine teardown).
    pub fn stop_all(&self) {
        let drained: Vec<(String, Arc<SessionState>)> =
            self.sessions.write().drain().collect();
        for (id, state) in drained {
            state.cancel.cancel();
            tracing::debug!(session_id = %id, "perf session cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ad_shell::ShellOutput;

    struct NullShell;

    #[async_trait::async_trait]
    impl Shell for NullShell {
        async fn run(
            &self,
            _command: &str,
            _privileged: bool,
            _timeout: Duration,
        ) -> Result<ShellOutput> {
            Ok(ShellOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn run_raw(
            &self,
            _command: &str,
            _privileged: bool,
            _timeout: Duration,
        ) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn engine() -> PerfEngine {
        PerfEngine::new(Arc::new(NullShell))
    }

    #[test]
    fn ring_discards_oldest_in_fifo_order() {
        let mut ring = VecDeque::new();
        for i in 0..(MAX_SAMPLES + 10) {
            push_bounded(
                &mut ring,
                PerfSample {
                    timestamp: i as i64,
                    ..Default::default()
                },
            );
        }
        assert_eq!(ring.len(), MAX_SAMPLES);
        assert_eq!(ring.front().unwrap().timestamp, 10);
        assert_eq!(ring.back().unwrap().timestamp, (MAX_SAMPLES + 9) as i64);
    }

    #[tokio::test]
    async fn snapshot_contains_exactly_the_requested_metrics() {
        let engine = engine();
        let sample = engine
            .snapshot(None, vec![MetricKind::Cpu, MetricKind::Memory])
            .await
            .unwrap();
        // Requested metrics may still be unknown on exotic hosts, but the
        // unrequested ones must be absent.
        assert!(sample.fps.is_none());
        assert!(sample.network.is_none());
        assert!(sample.battery.is_none());
        assert!(sample.timestamp > 0);
    }

    #[tokio::test]
    async fn snapshot_with_empty_metric_set_is_rejected() {
        let engine = engine();
        let err = engine.snapshot(None, vec![]).await.unwrap_err();
        assert_eq!(err.category(), ad_domain::error::ErrorCategory::Internal);
    }

    #[tokio::test]
    async fn start_collects_and_stop_reports() {
        let engine = engine();
        let id = engine
            .start(SessionSpec {
                package: None,
                metrics: vec![MetricKind::Cpu],
                interval: Duration::from_millis(20),
            })
            .unwrap();
        assert!(engine.session_exists(&id));

        let mut rx = engine.subscribe();
        let (sid, _sample) =
            tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("sample within 2s")
                .expect("stream open");
        assert_eq!(sid, id);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let report = engine.stop(&id).unwrap();
        assert!(report.sample_count >= 2, "got {}", report.sample_count);
        assert_eq!(report.samples.len(), report.sample_count.min(MAX_SAMPLES));
        assert!(!engine.session_exists(&id));
    }

    #[tokio::test]
    async fn duplicate_target_is_already_running() {
        let engine = engine();
        let spec = SessionSpec {
            package: Some("com.example".into()),
            metrics: vec![MetricKind::Cpu],
            interval: Duration::from_secs(1),
        };
        let id = engine.start(spec.clone()).unwrap();
        let err = engine.start(spec).unwrap_err();
        assert_eq!(err.code, codes::ALREADY_RUNNING);
        engine.stop(&id).unwrap();
    }

    #[test]
    fn stop_unknown_session_is_not_found() {
        let engine = engine();
        let err = engine.stop("nope").unwrap_err();
        assert_eq!(err.code, codes::SESSION_NOT_FOUND);
    }
}
