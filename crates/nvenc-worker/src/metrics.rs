//! Run metrics. Recorded through the `metrics` facade; the API binary
//! installs the Prometheus recorder.

use metrics::{counter, gauge, histogram};

pub mod names {
    pub const RUNS_TOTAL: &str = "nvenc_runs_total";
    pub const TOOL_DURATION_SECONDS: &str = "nvenc_tool_duration_seconds";
    pub const GATE_WAIT_SECONDS: &str = "nvenc_gate_wait_seconds";
    pub const GATE_IN_FLIGHT: &str = "nvenc_gate_in_flight";
    pub const GATE_WAITING: &str = "nvenc_gate_waiting";
}

/// Record a finished run by outcome (`success` or an error kind).
pub fn record_run(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::RUNS_TOTAL, &labels).increment(1);
}

/// Record how long the external tool ran.
pub fn record_tool_duration(success: bool, duration_secs: f64) {
    let labels = [("success", success.to_string())];
    histogram!(names::TOOL_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record time spent queued for an execution slot.
pub fn record_gate_wait(duration_secs: f64) {
    histogram!(names::GATE_WAIT_SECONDS).record(duration_secs);
}

/// Update the execution gate gauges.
pub fn set_gate_occupancy(in_flight: usize, waiting: usize) {
    gauge!(names::GATE_IN_FLIGHT).set(in_flight as f64);
    gauge!(names::GATE_WAITING).set(waiting as f64);
}
