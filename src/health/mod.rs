//! Health monitoring for the remote proxy
//!
//! Periodically probes the proxy's health endpoint and adapts the probe
//! interval to what it sees: healthy services are probed less and less
//! often (up to a five-minute steady state), failing ones more and more
//! aggressively (down to a thirty-second floor) until they recover.
//! Transitions are pushed to subscribers over a watch channel; nobody
//! polls the monitor.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::{HttpTransport, TransportRequest};

/// Health monitor configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Floor for the probe interval (default: 30s)
    pub min_interval: Duration,
    /// Ceiling for the probe interval (default: 5min)
    pub max_interval: Duration,
    /// First interval after start (default: 60s)
    pub initial_interval: Duration,
    /// Deadline for a single probe (default: 5s)
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(300),
            initial_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl HealthConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(val) = std::env::var("HEALTH_MIN_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.min_interval = Duration::from_secs(secs.max(1));
            }
        }
        if let Ok(val) = std::env::var("HEALTH_MAX_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.max_interval = Duration::from_secs(secs.max(1));
            }
        }
        if let Ok(val) = std::env::var("HEALTH_PROBE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.probe_timeout = Duration::from_secs(secs.max(1));
            }
        }
        config
    }
}

/// Outcome of one probe
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub response_time_ms: u64,
    /// Raw payload from the health endpoint, when one came back
    pub raw: Option<serde_json::Value>,
    /// Failure description when unhealthy
    pub error: Option<String>,
}

/// Shared monitor state published to subscribers
#[derive(Debug, Clone)]
pub struct HealthState {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_response_time_ms: Option<u64>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Interval the next probe will wait for
    pub probe_interval: Duration,
    /// Total probes fired since start
    pub probes: u64,
}

impl HealthState {
    fn initial(interval: Duration) -> Self {
        Self {
            healthy: false,
            consecutive_failures: 0,
            last_response_time_ms: None,
            last_checked: None,
            last_error: None,
            probe_interval: interval,
            probes: 0,
        }
    }
}

/// Next probe interval after one observation
///
/// Success widens by 1.5x toward the ceiling, failure halves toward the
/// floor. Kept as a free function so the policy is testable on its own.
pub fn next_interval(current: Duration, healthy: bool, config: &HealthConfig) -> Duration {
    if healthy {
        current.mul_f64(1.5).min(config.max_interval)
    } else {
        current.div_f64(2.0).max(config.min_interval)
    }
}

/// Adaptive health prober for the proxy origin
pub struct HealthMonitor {
    transport: Arc<dyn HttpTransport>,
    origin: String,
    config: HealthConfig,
    state_tx: watch::Sender<HealthState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(origin: impl Into<String>, transport: Arc<dyn HttpTransport>, config: HealthConfig) -> Self {
        let initial = HealthState::initial(config.initial_interval);
        let (state_tx, _) = watch::channel(initial);
        Self {
            transport,
            origin: origin.into(),
            config,
            state_tx,
            handle: Mutex::new(None),
        }
    }

    /// Subscribe to health transitions
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.state_tx.subscribe()
    }

    /// Current state snapshot
    pub fn state(&self) -> HealthState {
        self.state_tx.borrow().clone()
    }

    /// Issue one probe against the proxy's health endpoint
    pub async fn check(&self) -> HealthReport {
        let url = format!("{}/api/health", self.origin);
        let started = Instant::now();
        let request = TransportRequest::get(url).with_timeout(self.config.probe_timeout);

        match self.transport.execute(request).await {
            Ok(response) => {
                let response_time_ms = started.elapsed().as_millis() as u64;
                let raw = response.json().ok();
                // A parseable payload must also claim health; a bare 2xx
                // without a body is taken at face value
                let healthy = response.is_success()
                    && raw
                        .as_ref()
                        .and_then(|v| v.get("status"))
                        .and_then(|s| s.as_str())
                        .map(|s| s == "healthy" || s == "ok")
                        .unwrap_or(response.is_success());
                let error = if healthy {
                    None
                } else {
                    Some(format!("health endpoint returned HTTP {}", response.status))
                };
                HealthReport {
                    healthy,
                    response_time_ms,
                    raw,
                    error,
                }
            }
            Err(e) => HealthReport {
                healthy: false,
                response_time_ms: started.elapsed().as_millis() as u64,
                raw: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Start the probe loop; a second call replaces the previous loop
    pub fn start(self: Arc<Self>) {
        let monitor = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            monitor.run().await;
        });
        let mut slot = self.handle.lock().unwrap();
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
        info!(origin = %self.origin, "Health monitor started");
    }

    /// Stop probing; takes effect synchronously, no further probe fires
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
            info!(origin = %self.origin, "Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    async fn run(&self) {
        let mut interval = self.config.initial_interval;
        loop {
            // Jitter keeps many instances from probing in lockstep
            let jitter = {
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(0..500))
            };
            tokio::time::sleep(interval + jitter).await;

            let report = self.check().await;
            interval = next_interval(interval, report.healthy, &self.config);

            if report.healthy {
                debug!(
                    response_time_ms = report.response_time_ms,
                    next_probe_secs = interval.as_secs(),
                    "Proxy healthy"
                );
            } else {
                warn!(
                    error = report.error.as_deref().unwrap_or("unknown"),
                    next_probe_secs = interval.as_secs(),
                    "Proxy health probe failed"
                );
            }

            self.state_tx.send_modify(|state| {
                state.healthy = report.healthy;
                state.consecutive_failures = if report.healthy {
                    0
                } else {
                    state.consecutive_failures + 1
                };
                state.last_response_time_ms = Some(report.response_time_ms);
                state.last_checked = Some(Utc::now());
                state.last_error = report.error.clone();
                state.probe_interval = interval;
                state.probes += 1;
            });
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use crate::types::{ArchwayError, ErrorKind, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FakeProxy {
        healthy: AtomicBool,
        probes: AtomicU64,
    }

    impl FakeProxy {
        fn new(healthy: bool) -> Self {
            Self {
                healthy: AtomicBool::new(healthy),
                probes: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for FakeProxy {
        async fn execute(&self, _request: TransportRequest) -> Result<TransportResponse> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(TransportResponse {
                    status: 200,
                    headers: vec![],
                    body: Bytes::from_static(br#"{"status":"healthy","version":"1.0.0"}"#),
                })
            } else {
                Err(ArchwayError::request(ErrorKind::Network, "connection refused"))
            }
        }
    }

    fn config() -> HealthConfig {
        HealthConfig::default()
    }

    #[test]
    fn test_interval_narrows_on_failure_to_floor() {
        let config = config();
        let mut interval = Duration::from_secs(240);
        let mut previous = interval;
        for _ in 0..3 {
            interval = next_interval(interval, false, &config);
            assert!(
                interval < previous || interval == config.min_interval,
                "failure must narrow the interval or sit at the floor"
            );
            previous = interval;
        }
        assert_eq!(interval, Duration::from_secs(30));

        // Floor holds
        assert_eq!(next_interval(interval, false, &config), config.min_interval);
    }

    #[test]
    fn test_interval_widens_on_success_to_ceiling() {
        let config = config();
        let mut interval = config.min_interval;
        let widened = next_interval(interval, true, &config);
        assert!(widened > interval);

        for _ in 0..20 {
            interval = next_interval(interval, true, &config);
        }
        assert_eq!(interval, config.max_interval);
    }

    #[tokio::test]
    async fn test_check_healthy() {
        let transport = Arc::new(FakeProxy::new(true));
        let monitor = HealthMonitor::new("https://proxy.test", Arc::clone(&transport) as Arc<dyn HttpTransport>, config());

        let report = monitor.check().await;
        assert!(report.healthy);
        assert!(report.error.is_none());
        assert_eq!(report.raw.unwrap()["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_check_unhealthy_carries_error() {
        let transport = Arc::new(FakeProxy::new(false));
        let monitor = HealthMonitor::new("https://proxy.test", Arc::clone(&transport) as Arc<dyn HttpTransport>, config());

        let report = monitor.check().await;
        assert!(!report.healthy);
        assert!(report.error.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_publishes_transitions() {
        let transport = Arc::new(FakeProxy::new(true));
        let monitor = Arc::new(HealthMonitor::new(
            "https://proxy.test",
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            config(),
        ));
        let mut rx = monitor.subscribe();

        Arc::clone(&monitor).start();
        assert!(monitor.is_running());

        // First probe fires after the initial interval (plus jitter)
        tokio::time::advance(Duration::from_secs(65)).await;
        rx.changed().await.unwrap();
        {
            let state = rx.borrow();
            assert!(state.healthy);
            assert_eq!(state.consecutive_failures, 0);
            assert_eq!(state.probes, 1);
        }

        // Flip the proxy down; the next probe reports the failure
        transport.healthy.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(95)).await;
        rx.changed().await.unwrap();
        {
            let state = rx.borrow();
            assert!(!state.healthy);
            assert_eq!(state.consecutive_failures, 1);
        }

        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_probes() {
        let transport = Arc::new(FakeProxy::new(true));
        let monitor = Arc::new(HealthMonitor::new(
            "https://proxy.test",
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            config(),
        ));

        Arc::clone(&monitor).start();
        monitor.stop();
        assert!(!monitor.is_running());

        tokio::time::advance(Duration::from_secs(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(transport.probes.load(Ordering::SeqCst), 0);
    }
}
