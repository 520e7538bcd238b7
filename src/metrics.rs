//! # Session Metrics
//!
//! Per-session latency and interruption accounting.
//!
//! ## Latency metrics (milliseconds):
//! - **stt / llm / tts**: duration of each provider call
//! - **total**: turn start until playback finished
//! - **eou_delay**: turn start until the transcript was available
//! - **ttfb**: turn start until the reply text was available
//! - **ttft**: turn start until the turn finished (equal to total)
//!
//! Averages are compared against configured targets. An average at or under
//! its target is `good`.

use crate::config::LatencyTargets;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMetric {
    Stt,
    Llm,
    Tts,
    Total,
    EouDelay,
    Ttft,
    Ttfb,
}

impl LatencyMetric {
    pub const ALL: [LatencyMetric; 7] = [
        LatencyMetric::Stt,
        LatencyMetric::Llm,
        LatencyMetric::Tts,
        LatencyMetric::Total,
        LatencyMetric::EouDelay,
        LatencyMetric::Ttft,
        LatencyMetric::Ttfb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LatencyMetric::Stt => "stt",
            LatencyMetric::Llm => "llm",
            LatencyMetric::Tts => "tts",
            LatencyMetric::Total => "total",
            LatencyMetric::EouDelay => "eou_delay",
            LatencyMetric::Ttft => "ttft",
            LatencyMetric::Ttfb => "ttfb",
        }
    }

    fn target_ms(&self, targets: &LatencyTargets) -> u64 {
        match self {
            LatencyMetric::Stt => targets.stt_ms,
            LatencyMetric::Llm => targets.llm_ms,
            LatencyMetric::Tts => targets.tts_ms,
            LatencyMetric::Total => targets.total_ms,
            LatencyMetric::EouDelay => targets.eou_ms,
            LatencyMetric::Ttft => targets.ttft_ms,
            LatencyMetric::Ttfb => targets.ttfb_ms,
        }
    }
}

/// Records what happened during a session's turns.
pub trait MetricsSink: Send + Sync {
    fn start_turn(&self);

    fn record_latency(&self, metric: LatencyMetric, elapsed: Duration);

    fn record_interruption(&self);

    fn summary(&self) -> MetricsSummary;

    /// Stamp the end of the session and return the final summary.
    /// Calling it again returns the same end time.
    fn finalize(&self) -> MetricsSummary;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Good,
    NeedsImprovement,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub samples_ms: Vec<f64>,
    pub average_ms: f64,
    pub target_ms: u64,
    pub status: TargetStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_duration_ms: i64,
    pub turns: u64,
    pub interruptions: u64,
    pub latencies: BTreeMap<&'static str, LatencyStats>,
}

impl MetricsSummary {
    pub fn stats(&self, metric: LatencyMetric) -> Option<&LatencyStats> {
        self.latencies.get(metric.as_str())
    }

    pub fn sample_count(&self, metric: LatencyMetric) -> usize {
        self.stats(metric).map(|s| s.samples_ms.len()).unwrap_or(0)
    }

    pub fn average_ms(&self, metric: LatencyMetric) -> f64 {
        self.stats(metric).map(|s| s.average_ms).unwrap_or(0.0)
    }
}

#[derive(Debug)]
struct MetricsInner {
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    turns: u64,
    interruptions: u64,
    samples: HashMap<LatencyMetric, Vec<f64>>,
}

/// In-memory [`MetricsSink`] for one session.
#[derive(Debug)]
pub struct SessionMetrics {
    session_id: String,
    user_id: String,
    targets: LatencyTargets,
    inner: Mutex<MetricsInner>,
}

impl SessionMetrics {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, targets: LatencyTargets) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            targets,
            inner: Mutex::new(MetricsInner {
                started_at: Utc::now(),
                ended_at: None,
                turns: 0,
                interruptions: 0,
                samples: HashMap::new(),
            }),
        }
    }

    fn build_summary(&self, inner: &MetricsInner) -> MetricsSummary {
        let latencies = LatencyMetric::ALL
            .iter()
            .map(|metric| {
                let samples = inner.samples.get(metric).cloned().unwrap_or_default();
                let average_ms = if samples.is_empty() {
                    0.0
                } else {
                    samples.iter().sum::<f64>() / samples.len() as f64
                };
                let target_ms = metric.target_ms(&self.targets);
                let status = if average_ms <= target_ms as f64 {
                    TargetStatus::Good
                } else {
                    TargetStatus::NeedsImprovement
                };

                (
                    metric.as_str(),
                    LatencyStats {
                        samples_ms: samples,
                        average_ms,
                        target_ms,
                        status,
                    },
                )
            })
            .collect();

        let end = inner.ended_at.unwrap_or_else(Utc::now);

        MetricsSummary {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            started_at: inner.started_at,
            ended_at: inner.ended_at,
            total_duration_ms: (end - inner.started_at).num_milliseconds(),
            turns: inner.turns,
            interruptions: inner.interruptions,
            latencies,
        }
    }
}

impl MetricsSink for SessionMetrics {
    fn start_turn(&self) {
        self.inner.lock().turns += 1;
    }

    fn record_latency(&self, metric: LatencyMetric, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.inner.lock().samples.entry(metric).or_default().push(ms);
    }

    fn record_interruption(&self) {
        self.inner.lock().interruptions += 1;
    }

    fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock();
        self.build_summary(&inner)
    }

    fn finalize(&self) -> MetricsSummary {
        let mut inner = self.inner.lock();
        if inner.ended_at.is_none() {
            inner.ended_at = Some(Utc::now());
        }
        self.build_summary(&inner)
    }
}
