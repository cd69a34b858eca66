use crate::domain::AogEvent;
use crate::metrics::{hours_between, DowntimeMetrics};

/// Classify a record as pre-migration ("legacy").
///
/// The rule is exactly three conditions, all required: no `reported_at`, all
/// four stored metrics absent or zero, and an empty milestone history. Any
/// one present means the record is modern, even if sparse. Keep this rule in
/// one place so schema evolution cannot silently reclassify modern records.
pub fn is_legacy(event: &AogEvent, milestone_history_len: usize) -> bool {
    fn absent_or_zero(v: Option<f64>) -> bool {
        v.map_or(true, |x| x == 0.0)
    }

    event.milestones.reported_at.is_none()
        && absent_or_zero(event.technical_time_hours)
        && absent_or_zero(event.procurement_time_hours)
        && absent_or_zero(event.ops_time_hours)
        && absent_or_zero(event.total_downtime_hours)
        && milestone_history_len == 0
}

/// Synthesize metrics for a legacy record: `detected_at` stands in for
/// `reported_at`, `cleared_at` for `up_and_running_at`, and the entire
/// duration is attributed to technical time since no finer-grained data
/// exists. Read-path only; never persisted.
pub fn compute_legacy_metrics(detected_at: &str, cleared_at: Option<&str>) -> DowntimeMetrics {
    let total = hours_between(Some(detected_at), cleared_at);
    DowntimeMetrics {
        technical_time_hours: total,
        procurement_time_hours: 0.0,
        ops_time_hours: 0.0,
        total_downtime_hours: total,
        downtime_hours: total,
    }
}
