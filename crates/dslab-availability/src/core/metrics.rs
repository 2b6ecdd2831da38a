//! Failure metrics collected during a run.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Scalar counters accumulated over the whole run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FailureMetrics {
    pub total_downtime: f64,
    pub total_failures: u64,
    pub total_cloudlets_failed: u64,
    pub total_processing_delay: f64,
    pub total_transmission_delay: f64,
    pub predicted_failures: u64,
    pub completed_units: u64,
}

impl FailureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_delay(&self) -> f64 {
        self.total_processing_delay + self.total_transmission_delay
    }

    pub fn report(&self, horizon: f64) -> FailureReport {
        FailureReport {
            availability: availability(horizon, self.total_downtime),
            simulation_time: horizon,
            total_downtime: self.total_downtime,
            total_failures: self.total_failures,
            total_cloudlets_failed: self.total_cloudlets_failed,
            total_processing_delay: self.total_processing_delay,
            total_transmission_delay: self.total_transmission_delay,
            total_delay: self.total_delay(),
            predicted_failures: self.predicted_failures,
            completed_units: self.completed_units,
        }
    }
}

/// Service availability in percent: `(horizon - downtime) / horizon * 100`.
///
/// A non-positive horizon yields 100%.
pub fn availability(horizon: f64, downtime: f64) -> f64 {
    if horizon <= 0. {
        return 100.;
    }
    (horizon - downtime) / horizon * 100.
}

/// Final metrics of a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailureReport {
    pub availability: f64,
    pub simulation_time: f64,
    pub total_downtime: f64,
    pub total_failures: u64,
    pub total_cloudlets_failed: u64,
    pub total_processing_delay: f64,
    pub total_transmission_delay: f64,
    pub total_delay: f64,
    pub predicted_failures: u64,
    pub completed_units: u64,
}

impl FailureReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Display for FailureReport {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        writeln!(f, "========== FAILURE METRICS ==========")?;
        writeln!(f, "Service Availability: {:.3}%", self.availability)?;
        writeln!(f, "Total Simulation Time: {:.3}", self.simulation_time)?;
        writeln!(f, "Total Downtime: {:.3}", self.total_downtime)?;
        writeln!(f, "Total Failures: {}", self.total_failures)?;
        writeln!(f, "Total Cloudlets Failed: {}", self.total_cloudlets_failed)?;
        writeln!(f, "Total Processing Delay: {:.3}", self.total_processing_delay)?;
        writeln!(f, "Total Transmission Delay: {:.3}", self.total_transmission_delay)?;
        writeln!(f, "Total Delay: {:.3}", self.total_delay)?;
        writeln!(f, "Predicted Failures: {}", self.predicted_failures)?;
        write!(f, "Completed Cloudlets: {}", self.completed_units)
    }
}
