//! Metrics instrumentation for session observability.
//!
//! Recording is a no-op until the host installs a `metrics` recorder.

use std::time::Instant;

pub const SESSION_DURATION: &str = "skill_session_duration";
pub const EXECUTION_LATENCY: &str = "skill_execution_latency";

pub fn record_session_started(forked: bool) {
    let forked = if forked { "true" } else { "false" };
    metrics::counter!("skill_sessions_started", 1, "forked" => forked);
}

pub fn record_session_finished() {
    metrics::counter!("skill_sessions_finished", 1);
}

pub fn record_tool_call() {
    metrics::counter!("skill_tool_calls_recorded", 1);
}

pub fn record_permission_denial() {
    metrics::counter!("skill_permission_denials", 1);
}

pub fn record_execution_failure() {
    metrics::counter!("skill_execution_failures", 1);
}

pub fn record_session_duration(duration_ms: f64) {
    metrics::histogram!(SESSION_DURATION, duration_ms);
}

pub fn record_execution_latency(duration_ms: f64) {
    metrics::histogram!(EXECUTION_LATENCY, duration_ms);
}

/// RAII timer for automatic metric recording.
pub struct MetricTimer {
    start: Instant,
    metric_name: &'static str,
}

impl MetricTimer {
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }
}

impl MetricTimer {
    pub fn metric_name(&self) -> &'static str {
        self.metric_name
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!(self.metric_name, duration_ms);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_records_under_its_own_name() {
        let timer = MetricTimer::new(EXECUTION_LATENCY);
        assert_eq!(timer.metric_name(), "skill_execution_latency");
        drop(timer);
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_session_started(true);
        record_session_finished();
        record_session_duration(1.5);
        record_execution_latency(0.5);
    }
}
