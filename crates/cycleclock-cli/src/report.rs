//! Calibration run report.

use cycleclock_common::metrics::CalibrationMetrics;
use cycleclock_core::{CalibrationOutcome, CalibrationReport};
use serde::Serialize;

/// What a calibration round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// A new model was published.
    Recalibrated,
    /// Nothing was due.
    NotDue,
    /// Calibration failed; the previous model stayed in use.
    Failed,
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recalibrated => write!(f, "recalibrated"),
            Self::NotDue => write!(f, "not due"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One calibration round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub round: u32,
    pub status: RoundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_error_ns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected_error_ns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub frequency_hz: f64,
    /// `now_ns` minus the reference clock, read back to back.
    pub skew_ns: i64,
}

impl RoundReport {
    /// Build a round from a calibration result.
    pub fn new<E: std::fmt::Display>(
        round: u32,
        result: Result<CalibrationOutcome, E>,
        frequency_hz: f64,
        skew_ns: i64,
    ) -> Self {
        let mut report = Self {
            round,
            status: RoundStatus::NotDue,
            observed_error_ns: None,
            projected_error_ns: None,
            error: None,
            frequency_hz,
            skew_ns,
        };
        match result {
            Ok(CalibrationOutcome::Recalibrated(CalibrationReport {
                observed_error_ns,
                projected_error_ns,
                ..
            })) => {
                report.status = RoundStatus::Recalibrated;
                report.observed_error_ns = Some(observed_error_ns);
                report.projected_error_ns = Some(projected_error_ns);
            }
            Ok(CalibrationOutcome::NotDue) => {}
            Err(e) => {
                report.status = RoundStatus::Failed;
                report.error = Some(e.to_string());
            }
        }
        report
    }
}

/// Whole-run report.
#[derive(Debug, Clone, Serialize)]
pub struct ClockReport {
    pub counter_source: &'static str,
    pub warmup_ns: u64,
    pub calibration_interval_ns: u64,
    pub initial_frequency_hz: f64,
    pub initial_skew_ns: i64,
    pub rounds: Vec<RoundReport>,
    /// Peak-to-peak observed error over the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_spread_ns: Option<i64>,
    pub metrics: CalibrationMetrics,
}

/// Render a report as human-readable text.
pub fn format_text(report: &ClockReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("counter:   {}\n", report.counter_source));
    output.push_str(&format!(
        "warmup:    {} ns\ninterval:  {} ns\n",
        report.warmup_ns, report.calibration_interval_ns
    ));
    output.push_str(&format!(
        "initial:   {:.6} GHz, skew {} ns\n",
        report.initial_frequency_hz / 1e9,
        report.initial_skew_ns
    ));

    for round in &report.rounds {
        output.push_str(&format!(
            "round {:>3}: {:<12} {:.6} GHz  skew {:>8} ns",
            round.round,
            round.status.to_string(),
            round.frequency_hz / 1e9,
            round.skew_ns
        ));
        if let Some(observed) = round.observed_error_ns {
            output.push_str(&format!("  error {observed:>8} ns"));
        }
        if let Some(error) = &round.error {
            output.push_str(&format!("  ({error})"));
        }
        output.push('\n');
    }

    let metrics = &report.metrics;
    output.push_str(&format!(
        "calibrations: {}  skipped: {}  failures: {}\n",
        metrics.calibrations, metrics.skipped, metrics.failures
    ));
    if let (Some(mean), Some(mean_abs)) = (metrics.mean_error_ns(), metrics.mean_abs_error_ns()) {
        output.push_str(&format!(
            "observed error: mean {mean} ns, mean |error| {mean_abs} ns"
        ));
        if let Some(spread) = report.error_spread_ns {
            output.push_str(&format!(", spread {spread} ns"));
        }
        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use cycleclock_core::{CalibrationModel, SyncSample};

    fn recalibrated() -> CalibrationOutcome {
        CalibrationOutcome::Recalibrated(CalibrationReport {
            sample: SyncSample {
                cycle: 10,
                reference_ns: 20,
            },
            observed_error_ns: -42,
            projected_error_ns: -80,
            model: CalibrationModel {
                base_cycle: 10,
                base_ns: 20,
                ns_per_cycle: 0.5,
            },
            next_calibration_cycle: 1_000,
        })
    }

    #[test]
    fn test_round_from_outcomes() {
        let round = RoundReport::new::<String>(1, Ok(recalibrated()), 2e9, 3);
        assert_eq!(round.status, RoundStatus::Recalibrated);
        assert_eq!(round.observed_error_ns, Some(-42));
        assert_eq!(round.projected_error_ns, Some(-80));

        let round = RoundReport::new::<String>(2, Ok(CalibrationOutcome::NotDue), 2e9, 3);
        assert_eq!(round.status, RoundStatus::NotDue);
        assert!(round.observed_error_ns.is_none());

        let round = RoundReport::new(3, Err("boom"), 2e9, 3);
        assert_eq!(round.status, RoundStatus::Failed);
        assert_eq!(round.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_text_and_json_formats() {
        let mut metrics = CalibrationMetrics::new();
        metrics.record(-42);
        metrics.record(18);
        let report = ClockReport {
            counter_source: "rdtsc",
            warmup_ns: 200_000_000,
            calibration_interval_ns: 1_000_000_000,
            initial_frequency_hz: 3e9,
            initial_skew_ns: -12,
            rounds: vec![
                RoundReport::new::<String>(1, Ok(recalibrated()), 3e9, 5),
                RoundReport::new(2, Err("reference clock gone"), 3e9, 7),
            ],
            error_spread_ns: metrics.error_spread_ns(),
            metrics,
        };

        let text = format_text(&report);
        assert!(text.contains("counter:   rdtsc"));
        assert!(text.contains("3.000000 GHz"));
        assert!(text.contains("error      -42 ns"));
        assert!(text.contains("(reference clock gone)"));
        assert!(text.contains("calibrations: 2"));
        assert!(text.contains("mean -12 ns, mean |error| 30 ns"));
        assert!(text.contains(", spread 60 ns"));

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rounds"][0]["status"], "recalibrated");
        assert_eq!(json["rounds"][0]["observed_error_ns"], -42);
        assert_eq!(json["rounds"][1]["status"], "failed");
        assert!(json["rounds"][1].get("observed_error_ns").is_none());
        assert_eq!(json["error_spread_ns"], 60);
        assert_eq!(json["metrics"]["calibrations"], 2);
    }
}
