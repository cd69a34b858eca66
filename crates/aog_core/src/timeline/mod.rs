use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::Milestones;
use crate::error::AppError;

/// Apply the endpoint defaults: `reported_at` falls back to `detected_at`,
/// `up_and_running_at` falls back to `cleared_at`. The defaults participate
/// in the ordering invariant, so this runs before `validate_milestone_order`.
pub fn with_defaults(
    milestones: &Milestones,
    detected_at: &str,
    cleared_at: Option<&str>,
) -> Milestones {
    let mut m = milestones.clone();
    if m.reported_at.is_none() {
        m.reported_at = Some(detected_at.to_string());
    }
    if m.up_and_running_at.is_none() {
        m.up_and_running_at = cleared_at.map(str::to_string);
    }
    m
}

fn parse_ts(raw: Option<&str>) -> Option<OffsetDateTime> {
    // Unparseable values are skipped here and degrade to zero-length segments
    // in the metrics calculator; ordering is only enforced over values we can
    // actually compare.
    raw.and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

/// Verify the chronological invariant over the non-null milestone subset:
/// each subsequent non-null value must be >= the prior non-null value. Nulls
/// are skipped entirely. On violation the error names the exact offending
/// pair and both values.
pub fn validate_milestone_order(milestones: &Milestones) -> Result<(), AppError> {
    let mut prev: Option<(&'static str, &str, OffsetDateTime)> = None;

    for (field, raw) in milestones.ordered_pairs() {
        let Some(raw) = raw else { continue };
        let Some(ts) = parse_ts(Some(raw)) else { continue };

        if let Some((prev_field, prev_raw, prev_ts)) = prev {
            if ts < prev_ts {
                return Err(AppError::new(
                    "INVALID_TIMESTAMP_ORDER",
                    format!("{field} must not precede {prev_field}"),
                )
                .with_details(format!(
                    "prev_field={prev_field}; prev_value={prev_raw}; field={field}; value={raw}"
                )));
            }
        }
        prev = Some((field, raw, ts));
    }

    Ok(())
}
