//! Proxy orchestration
//!
//! ## Overview
//!
//! The façade over the whole subsystem. The orchestrator:
//! 1. Converts target URLs into proxy form and decides routing
//! 2. Consults the response cache before touching the network
//! 3. Schedules requests through the priority queue
//! 4. Drives the health monitor and owns the status state machine
//! 5. Classifies and logs failures, falling back to direct requests
//!    when the proxy degrades
//!
//! ## State machine
//!
//! `disabled → checking → {enabled | error}`; repeated probe failures
//! move `enabled → degraded → error`; `disable()` reaches `disabled`
//! from any state. Only this module mutates the status.

pub mod rewrite;

pub use rewrite::UrlRewriter;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, CacheKey, CacheStats, CachedResponse, ResponseCache};
use crate::events::{EventBus, GatewayEvent};
use crate::faults::{classify, classify_status, ErrorLogEntry, FaultLog, FaultLogConfig, FaultStats};
use crate::health::{HealthConfig, HealthMonitor};
use crate::metrics::{PerformanceMetrics, PerformanceSnapshot, UsageStats};
use crate::persist::{StateStore, KEY_ENABLED, KEY_ERROR_LOG, KEY_USAGE_STATS};
use crate::queue::{QueueConfig, QueueStats, QueueTask, RequestQueue};
use crate::resource::ResourceType;
use crate::transport::{HttpTransport, TransportRequest, TransportResponse};
use crate::types::{ArchwayError, Result};

/// Orchestrator status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Disabled,
    Checking,
    Enabled,
    Degraded,
    Error,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Checking => "checking",
            Self::Enabled => "enabled",
            Self::Degraded => "degraded",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the remote rewriting proxy
    pub origin: String,
    /// Re-attempt failed proxied requests directly against the origin
    pub fallback_enabled: bool,
    /// Sleeps between connectivity probe attempts during `enable()`
    pub connect_backoff: Vec<Duration>,
    /// Deadline for a single connectivity probe
    pub connect_timeout: Duration,
    /// Consecutive probe failures before `degraded`
    pub degraded_threshold: u32,
    /// Consecutive probe failures before `error`
    pub error_threshold: u32,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub health: HealthConfig,
    pub faults: FaultLogConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            fallback_enabled: true,
            connect_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
            connect_timeout: Duration::from_secs(10),
            degraded_threshold: 3,
            error_threshold: 8,
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            health: HealthConfig::default(),
            faults: FaultLogConfig::default(),
        }
    }
}

/// Options for a single request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response handed back to the caller
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub resource_type: ResourceType,
    /// Served from the local cache without touching the network
    pub from_cache: bool,
    /// Went through the rewriting proxy (false for direct/fallback)
    pub via_proxy: bool,
}

/// Combined statistics snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub status: ProxyStatus,
    pub usage: UsageStats,
    pub performance: PerformanceSnapshot,
    pub cache: CacheStats,
    pub queue: QueueStats,
    pub faults: FaultStats,
}

/// State shared with the health watcher task
struct GatewayShared {
    status: watch::Sender<ProxyStatus>,
    enabled: AtomicBool,
    usage: Mutex<UsageStats>,
    metrics: Mutex<PerformanceMetrics>,
}

impl GatewayShared {
    fn set_status(&self, status: ProxyStatus, events: &EventBus) {
        let old = self.status.send_replace(status);
        if old != status {
            info!(from = %old, to = %status, "Proxy status changed");
            events.publish(GatewayEvent::StatusChanged {
                enabled: self.enabled.load(Ordering::Relaxed),
                status,
                timestamp: Utc::now(),
                stats: self.usage.lock().unwrap().clone(),
            });
        }
    }
}

/// The proxy orchestrator
pub struct ProxyGateway {
    config: GatewayConfig,
    rewriter: UrlRewriter,
    cache: Arc<ResponseCache>,
    queue: RequestQueue<TransportResponse>,
    faults: Arc<FaultLog>,
    health: Arc<HealthMonitor>,
    transport: Arc<dyn HttpTransport>,
    store: StateStore,
    events: EventBus,
    shared: Arc<GatewayShared>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyGateway {
    /// Wire up the gateway from its collaborators
    ///
    /// Restores persisted usage statistics and the rolling error log.
    /// The status always starts `disabled`; callers consult
    /// [`persisted_enabled`](Self::persisted_enabled) to decide whether
    /// to call `enable()` at startup.
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn HttpTransport>,
        store: StateStore,
    ) -> Result<Self> {
        let rewriter = UrlRewriter::new(&config.origin)?;
        let cache = Arc::new(ResponseCache::new(config.cache.clone()));
        let queue = RequestQueue::new(config.queue.clone());
        let faults = Arc::new(FaultLog::new(config.faults.clone()));
        let health = Arc::new(HealthMonitor::new(
            rewriter.origin().to_string(),
            Arc::clone(&transport),
            config.health.clone(),
        ));

        if let Some(log) = store.get_json::<Vec<ErrorLogEntry>>(KEY_ERROR_LOG) {
            faults.restore(log);
        }
        let usage = store
            .get_json::<UsageStats>(KEY_USAGE_STATS)
            .unwrap_or_default();

        let (status, _) = watch::channel(ProxyStatus::Disabled);
        Ok(Self {
            config,
            rewriter,
            cache,
            queue,
            faults,
            health,
            transport,
            store,
            events: EventBus::default(),
            shared: Arc::new(GatewayShared {
                status,
                enabled: AtomicBool::new(false),
                usage: Mutex::new(usage),
                metrics: Mutex::new(PerformanceMetrics::new()),
            }),
            watcher: Mutex::new(None),
        })
    }

    pub fn status(&self) -> ProxyStatus {
        *self.shared.status.borrow()
    }

    /// Watch status transitions
    pub fn status_watch(&self) -> watch::Receiver<ProxyStatus> {
        self.shared.status.subscribe()
    }

    /// Subscribe to observability events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Enabled flag from the durable store (last explicit user intent)
    pub fn persisted_enabled(&self) -> bool {
        self.store.get_bool(KEY_ENABLED).unwrap_or(false)
    }

    pub fn rewriter(&self) -> &UrlRewriter {
        &self.rewriter
    }

    pub fn fault_log(&self) -> &FaultLog {
        &self.faults
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Turn the proxy on
    ///
    /// Runs a connectivity probe with the configured backoff schedule;
    /// the first success transitions to `enabled`, persists the flag and
    /// starts the health monitor. Exhausting every attempt transitions
    /// to `error` and surfaces the last failure.
    pub async fn enable(&self) -> Result<()> {
        self.shared.enabled.store(true, Ordering::Relaxed);
        self.shared.set_status(ProxyStatus::Checking, &self.events);

        let probe_url = format!("{}/api/status", self.rewriter.origin());
        let attempts = self.config.connect_backoff.len() + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let request = TransportRequest::get(probe_url.clone())
                .with_timeout(self.config.connect_timeout);
            match self.execute_checked(request).await {
                Ok(response) => {
                    let version = response
                        .json()
                        .ok()
                        .and_then(|v| v.get("version").and_then(|s| s.as_str().map(String::from)));
                    info!(
                        origin = %self.rewriter.origin(),
                        version = version.as_deref().unwrap_or("unknown"),
                        "Proxy reachable, enabling"
                    );
                    self.store.set_bool(KEY_ENABLED, true);
                    self.store.save_async();
                    self.shared.set_status(ProxyStatus::Enabled, &self.events);
                    self.start_monitor();
                    return Ok(());
                }
                Err(e) => {
                    let can_retry = attempt < attempts;
                    warn!(attempt, error = %e, "Connectivity probe failed");
                    self.faults.record(
                        e.kind(),
                        e.to_string(),
                        json!({"stage": "enable", "attempt": attempt}),
                    );
                    self.events.publish(GatewayEvent::HealthCheckFailed {
                        error: e.to_string(),
                        timestamp: Utc::now(),
                        can_retry,
                        retry_count: attempt as u32,
                    });
                    last_error = Some(e);
                    if can_retry {
                        tokio::time::sleep(self.config.connect_backoff[attempt - 1]).await;
                    }
                }
            }
        }

        self.shared.set_status(ProxyStatus::Error, &self.events);
        Err(last_error
            .unwrap_or_else(|| ArchwayError::Internal("connectivity probe failed".to_string())))
    }

    /// Turn the proxy off
    ///
    /// Takes effect synchronously: the health monitor is stopped before
    /// this returns and no further probe fires.
    pub fn disable(&self) {
        self.health.stop();
        if let Some(handle) = self.watcher.lock().unwrap().take() {
            handle.abort();
        }
        self.shared.enabled.store(false, Ordering::Relaxed);
        self.store.set_bool(KEY_ENABLED, false);
        self.store.save_async();
        self.shared.set_status(ProxyStatus::Disabled, &self.events);
    }

    /// Start the probe loop and the task that folds health transitions
    /// into the status state machine
    fn start_monitor(&self) {
        Arc::clone(&self.health).start();

        let mut rx = self.health.subscribe();
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let faults = Arc::clone(&self.faults);
        let degraded_threshold = self.config.degraded_threshold;
        let error_threshold = self.config.error_threshold;

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                if state.healthy {
                    shared.set_status(ProxyStatus::Enabled, &events);
                    continue;
                }

                let error = state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "health probe failed".to_string());
                faults.record(
                    classify(&error),
                    error.clone(),
                    json!({"stage": "health", "consecutiveFailures": state.consecutive_failures}),
                );
                events.publish(GatewayEvent::HealthCheckFailed {
                    error,
                    timestamp: Utc::now(),
                    can_retry: state.consecutive_failures < error_threshold,
                    retry_count: state.consecutive_failures,
                });

                if state.consecutive_failures >= error_threshold {
                    shared.set_status(ProxyStatus::Error, &events);
                } else if state.consecutive_failures >= degraded_threshold {
                    shared.set_status(ProxyStatus::Degraded, &events);
                }
            }
        });

        if let Some(old) = self.watcher.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Fetch a resource through the proxy
    ///
    /// Fails fast when disabled. Otherwise: cache lookup, priority
    /// admission, HTTP call against the rewritten URL with a
    /// type-derived timeout, conditional caching on success, and on a
    /// retryable failure one direct attempt against the original URL
    /// before giving up with a combined error.
    pub async fn request(&self, target: &str, options: RequestOptions) -> Result<ProxyResponse> {
        let status = self.status();
        if status == ProxyStatus::Disabled {
            return Err(ArchwayError::Disabled);
        }

        let resource_type = ResourceType::from_url(target);
        let key = CacheKey::new(&options.method, target, &options.headers);

        if let Some(cached) = self.cache.get(&key) {
            {
                let mut usage = self.shared.usage.lock().unwrap();
                usage.total_requests += 1;
                usage.cache_hits += 1;
                usage.touch();
            }
            self.persist_state();
            return Ok(ProxyResponse {
                status: cached.status,
                headers: cached.headers,
                body: cached.body,
                resource_type,
                from_cache: true,
                via_proxy: false,
            });
        }
        {
            let mut usage = self.shared.usage.lock().unwrap();
            usage.total_requests += 1;
            usage.cache_misses += 1;
            usage.touch();
        }

        let started = Instant::now();
        let timeout = resource_type.timeout();
        // In error status the proxy is known-bad: go straight to the origin
        let via_proxy = status != ProxyStatus::Error && self.rewriter.is_supported(target);
        let first_url = if via_proxy {
            self.rewriter.rewrite(target)
        } else {
            target.to_string()
        };

        debug!(
            url = target,
            resource_type = %resource_type,
            via_proxy,
            "Dispatching request"
        );

        let request = TransportRequest {
            method: options.method.clone(),
            url: first_url,
            headers: options.headers.clone(),
            body: options.body.clone(),
            timeout,
        };
        let transport = Arc::clone(&self.transport);
        let task: QueueTask<TransportResponse> = Box::pin(async move {
            let url = request.url.clone();
            let response = transport.execute(request).await?;
            if response.is_success() {
                Ok(response)
            } else {
                Err(ArchwayError::request(
                    classify_status(response.status),
                    format!("HTTP {} from {}", response.status, url),
                ))
            }
        });

        let outcome = self.queue.add(resource_type.priority(), task).wait().await;

        match outcome {
            Ok(response) => {
                self.finish_success(&key, resource_type, &response, started);
                Ok(ProxyResponse {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                    resource_type,
                    from_cache: false,
                    via_proxy,
                })
            }
            Err(proxy_err) => {
                let kind = proxy_err.kind();
                let route = if via_proxy { "proxy" } else { "direct" };
                self.faults.record(
                    kind,
                    proxy_err.to_string(),
                    json!({"url": target, "route": route}),
                );

                if !(via_proxy && self.config.fallback_enabled && kind.is_retryable()) {
                    self.finish_failure(started);
                    return Err(proxy_err);
                }

                warn!(url = target, error = %proxy_err, "Proxied request failed, falling back to direct");
                let direct = TransportRequest {
                    method: options.method.clone(),
                    url: target.to_string(),
                    headers: options.headers.clone(),
                    body: options.body.clone(),
                    timeout,
                };
                match self.execute_checked(direct).await {
                    Ok(response) => {
                        {
                            let mut usage = self.shared.usage.lock().unwrap();
                            usage.fallback_successes += 1;
                        }
                        self.finish_success(&key, resource_type, &response, started);
                        Ok(ProxyResponse {
                            status: response.status,
                            headers: response.headers,
                            body: response.body,
                            resource_type,
                            from_cache: false,
                            via_proxy: false,
                        })
                    }
                    Err(direct_err) => {
                        self.faults.record(
                            direct_err.kind(),
                            direct_err.to_string(),
                            json!({"url": target, "route": "fallback"}),
                        );
                        self.finish_failure(started);
                        Err(ArchwayError::FallbackExhausted {
                            proxied: proxy_err.to_string(),
                            direct: direct_err.to_string(),
                        })
                    }
                }
            }
        }
    }

    /// Execute and turn HTTP error statuses into classified failures
    async fn execute_checked(&self, request: TransportRequest) -> Result<TransportResponse> {
        let url = request.url.clone();
        let response = self.transport.execute(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ArchwayError::request(
                classify_status(response.status),
                format!("HTTP {} from {}", response.status, url),
            ))
        }
    }

    fn should_cache(resource_type: ResourceType, response: &TransportResponse) -> bool {
        resource_type.always_cache()
            && response.is_success()
            && !response
                .header("cache-control")
                .map(|v| v.to_ascii_lowercase().contains("no-store"))
                .unwrap_or(false)
    }

    fn finish_success(
        &self,
        key: &CacheKey,
        resource_type: ResourceType,
        response: &TransportResponse,
        started: Instant,
    ) {
        if Self::should_cache(resource_type, response) {
            self.cache.insert(
                key,
                CachedResponse {
                    status: response.status,
                    headers: response.headers.clone(),
                    body: response.body.clone(),
                },
                resource_type,
            );
        }
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.shared.metrics.lock().unwrap().record(true, elapsed_ms);
        {
            let mut usage = self.shared.usage.lock().unwrap();
            usage.successful_requests += 1;
        }
        self.persist_state();
    }

    fn finish_failure(&self, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.shared.metrics.lock().unwrap().record(false, elapsed_ms);
        {
            let mut usage = self.shared.usage.lock().unwrap();
            usage.failed_requests += 1;
        }
        self.persist_state();
    }

    /// Persist usage statistics and the error log without blocking
    fn persist_state(&self) {
        let usage = self.shared.usage.lock().unwrap().clone();
        if self.store.set_json(KEY_USAGE_STATS, &usage).is_ok() {
            let _ = self.store.set_json(KEY_ERROR_LOG, &self.faults.entries());
            self.store.save_async();
        }
    }

    // ========================================================================
    // Cache & statistics
    // ========================================================================

    /// Clear the local cache, optionally only keys containing `pattern`,
    /// and ask the remote proxy to do the same on a best-effort basis
    pub async fn clear_cache(&self, pattern: Option<&str>) -> usize {
        let removed = self.cache.clear(pattern);

        let body = json!({ "pattern": pattern }).to_string();
        let request = TransportRequest::post(
            format!("{}/api/cache/clear", self.rewriter.origin()),
            Bytes::from(body),
        )
        .with_header("Content-Type", "application/json")
        .with_timeout(Duration::from_secs(5));
        // The local clear already happened; a remote failure is logged
        // and swallowed
        match self.transport.execute(request).await {
            Ok(response) if !response.is_success() => {
                warn!(status = response.status, "Remote cache clear refused");
            }
            Err(e) => {
                warn!(error = %e, "Remote cache clear failed");
            }
            Ok(_) => {}
        }

        removed
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn usage(&self) -> UsageStats {
        self.shared.usage.lock().unwrap().clone()
    }

    pub fn performance(&self) -> PerformanceSnapshot {
        self.shared.metrics.lock().unwrap().snapshot()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            status: self.status(),
            usage: self.usage(),
            performance: self.performance(),
            cache: self.cache.stats(),
            queue: self.queue.stats(),
            faults: self.faults.stats(Duration::from_secs(3600)),
        }
    }

    /// Explicit service reset: clears metrics and cumulative counters
    pub fn reset(&self) {
        self.shared.metrics.lock().unwrap().reset();
        *self.shared.usage.lock().unwrap() = UsageStats::default();
        self.persist_state();
    }
}

impl Drop for ProxyGateway {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().unwrap().take() {
            handle.abort();
        }
    }
}
