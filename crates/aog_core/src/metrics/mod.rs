use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::Milestones;

/// The three-bucket downtime decomposition plus the total, in hours with two
/// decimal places. `downtime_hours` mirrors `total_downtime_hours` for
/// callers that predate the bucket model.
///
/// `total_downtime_hours` spans effective-reported to effective-up-and-running
/// directly; it is NOT the sum of the three buckets. Bucket times may
/// undercount idle or overlap time the model does not capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DowntimeMetrics {
    pub technical_time_hours: f64,
    pub procurement_time_hours: f64,
    pub ops_time_hours: f64,
    pub total_downtime_hours: f64,
    pub downtime_hours: f64,
}

/// Round to two decimal places, the precision of every stored hour metric.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn parse_ts(raw: Option<&str>) -> Option<OffsetDateTime> {
    raw.and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

/// Hours between two nullable RFC3339 timestamps: 0 when either endpoint is
/// null or unparseable; negative raw differences clamp to 0. The clamping is
/// deliberate leniency for imperfect historical data, not a correctness
/// guarantee.
pub fn hours_between(a: Option<&str>, b: Option<&str>) -> f64 {
    let (Some(a), Some(b)) = (parse_ts(a), parse_ts(b)) else {
        return 0.0;
    };
    let hours = (b - a).whole_seconds() as f64 / 3600.0;
    round2(hours.max(0.0))
}

/// Compute all four stored metrics from the milestone timeline. Pure, never
/// errors; missing or inconsistent timestamps degrade to zero-length segments.
///
/// Endpoint defaults apply here as everywhere: `reported_at` falls back to
/// `detected_at` and `up_and_running_at` to `cleared_at`. When both effective
/// endpoints exist but none of the five interior milestones do, the whole
/// span is attributed to technical time (no finer-grained data to split on),
/// matching the attribution used for legacy records.
pub fn compute_downtime_metrics(
    milestones: &Milestones,
    detected_at: &str,
    cleared_at: Option<&str>,
) -> DowntimeMetrics {
    let reported = milestones.reported_at.as_deref().or(Some(detected_at));
    let up_and_running = milestones.up_and_running_at.as_deref().or(cleared_at);

    let procurement_requested = milestones.procurement_requested_at.as_deref();
    let available_at_store = milestones.available_at_store_at.as_deref();
    let installation_complete = milestones.installation_complete_at.as_deref();
    let test_start = milestones.test_start_at.as_deref();

    let total_downtime_hours = hours_between(reported, up_and_running);

    let interior_empty = procurement_requested.is_none()
        && available_at_store.is_none()
        && milestones.issued_back_at.is_none()
        && installation_complete.is_none()
        && test_start.is_none();

    let technical_time_hours = if interior_empty {
        total_downtime_hours
    } else {
        round2(
            hours_between(reported, procurement_requested)
                + hours_between(available_at_store, installation_complete),
        )
    };

    let procurement_time_hours = hours_between(procurement_requested, available_at_store);
    let ops_time_hours = hours_between(test_start, up_and_running);

    DowntimeMetrics {
        technical_time_hours,
        procurement_time_hours,
        ops_time_hours,
        total_downtime_hours,
        downtime_hours: total_downtime_hours,
    }
}
