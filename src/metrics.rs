//! Performance metrics
//!
//! Latency and success-rate tracking smoothed with an exponentially
//! weighted moving average, plus the cumulative usage counters that get
//! persisted across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smoothing factor for latency/success-rate averages
pub const EWMA_ALPHA: f64 = 0.1;

/// Exponentially weighted moving average
///
/// Warm-starts on the first sample, then folds each new observation in
/// with weight `alpha`.
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// Fold in a new sample and return the updated average
    pub fn observe(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            Some(current) => current + self.alpha * (sample - current),
            None => sample,
        };
        self.value = Some(next);
        next
    }

    /// Current average, 0.0 before any sample
    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new(EWMA_ALPHA)
    }
}

/// Continuously updated response-time and success-rate averages
///
/// Never reset except through [`PerformanceMetrics::reset`].
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    avg_response_time_ms: Ewma,
    success_rate: Ewma,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminal request outcome
    pub fn record(&mut self, success: bool, elapsed_ms: f64) {
        self.avg_response_time_ms.observe(elapsed_ms);
        self.success_rate.observe(if success { 1.0 } else { 0.0 });
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            avg_response_time_ms: self.avg_response_time_ms.value(),
            success_rate: self.success_rate.value(),
        }
    }

    pub fn reset(&mut self) {
        self.avg_response_time_ms.reset();
        self.success_rate.reset();
    }
}

/// Point-in-time view of [`PerformanceMetrics`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
}

/// Cumulative usage counters, persisted across runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub fallback_successes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl UsageStats {
    pub fn touch(&mut self) {
        self.last_used = Some(Utc::now());
    }
}
