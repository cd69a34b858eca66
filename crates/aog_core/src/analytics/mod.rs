//! Read-only analytics over the event collection: three-bucket aggregation,
//! stage/bottleneck breakdowns, insight heuristics, and the downtime
//! forecast. Everything here re-aggregates from source records on each call;
//! the legacy-attribution rule is applied per record before aggregation.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::{AogStatus, BlockingReason};
use crate::error::AppError;
use crate::history;
use crate::metrics::{hours_between, round2};
use crate::repo;
use crate::service::{list_events, EventFilter, ListedEvent};
use crate::workflow;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl DateRange {
    fn to_filter(&self) -> EventFilter {
        EventFilter {
            aircraft_id: None,
            fleet_group: None,
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

fn parse_ts(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

fn effective_reported(event: &crate::domain::AogEvent) -> &str {
    event
        .milestones
        .reported_at
        .as_deref()
        .unwrap_or(&event.detected_at)
}

/// "YYYY-MM" label for a timestamp, or None when unparseable.
fn month_label(ts: &str) -> Option<String> {
    let dt = parse_ts(ts)?;
    Some(format!("{:04}-{:02}", dt.year(), dt.month() as u8))
}

/// Shift a "YYYY-MM" label by `delta` months.
fn month_add(label: &str, delta: i32) -> Option<String> {
    let (year, month) = label.split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: i32 = month.parse().ok()?;
    let idx = year * 12 + (month - 1) + delta;
    Some(format!("{:04}-{:02}", idx.div_euclid(12), idx.rem_euclid(12) + 1))
}

// ---------------------------------------------------------------------------
// Three-bucket aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftBuckets {
    pub aircraft_id: i64,
    pub registration: String,
    pub event_count: i64,
    pub technical_hours: f64,
    pub procurement_hours: f64,
    pub ops_hours: f64,
    pub total_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreeBucketReport {
    pub event_count: i64,
    pub technical_hours: f64,
    pub procurement_hours: f64,
    pub ops_hours: f64,
    pub total_hours: f64,
    pub technical_pct: f64,
    pub procurement_pct: f64,
    pub ops_pct: f64,
    pub per_aircraft: Vec<AircraftBuckets>,
}

/// Sum the three buckets and total across matched events, with per-bucket
/// percentage of total and a per-aircraft breakdown. Legacy records
/// contribute their synthesized metrics (whole span as technical).
pub fn three_bucket_analytics(
    conn: &Connection,
    filter: &EventFilter,
) -> Result<ThreeBucketReport, AppError> {
    let events = list_events(conn, filter)?;
    let registrations: BTreeMap<i64, String> = repo::list_aircraft(conn)?
        .into_iter()
        .map(|a| (a.id, a.registration))
        .collect();

    let mut technical = 0.0;
    let mut procurement = 0.0;
    let mut ops = 0.0;
    let mut total = 0.0;
    let mut per_aircraft: BTreeMap<i64, AircraftBuckets> = BTreeMap::new();

    for ListedEvent { event, .. } in &events {
        let t = event.technical_time_hours.unwrap_or(0.0);
        let p = event.procurement_time_hours.unwrap_or(0.0);
        let o = event.ops_time_hours.unwrap_or(0.0);
        let tot = event.total_downtime_hours.unwrap_or(0.0);

        technical += t;
        procurement += p;
        ops += o;
        total += tot;

        let row = per_aircraft
            .entry(event.aircraft_id)
            .or_insert_with(|| AircraftBuckets {
                aircraft_id: event.aircraft_id,
                registration: registrations
                    .get(&event.aircraft_id)
                    .cloned()
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                event_count: 0,
                technical_hours: 0.0,
                procurement_hours: 0.0,
                ops_hours: 0.0,
                total_hours: 0.0,
            });
        row.event_count += 1;
        row.technical_hours = round2(row.technical_hours + t);
        row.procurement_hours = round2(row.procurement_hours + p);
        row.ops_hours = round2(row.ops_hours + o);
        row.total_hours = round2(row.total_hours + tot);
    }

    let pct = |bucket: f64| {
        if total > 0.0 {
            round2(bucket / total * 100.0)
        } else {
            0.0
        }
    };

    let mut per_aircraft: Vec<AircraftBuckets> = per_aircraft.into_values().collect();
    per_aircraft.sort_by(|a, b| {
        (a.registration.clone(), a.aircraft_id).cmp(&(b.registration.clone(), b.aircraft_id))
    });

    Ok(ThreeBucketReport {
        event_count: events.len() as i64,
        technical_pct: pct(technical),
        procurement_pct: pct(procurement),
        ops_pct: pct(ops),
        technical_hours: round2(technical),
        procurement_hours: round2(procurement),
        ops_hours: round2(ops),
        total_hours: round2(total),
        per_aircraft,
    })
}

// ---------------------------------------------------------------------------
// Stage breakdown / bottleneck
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRow {
    pub status: AogStatus,
    /// Events currently sitting in this state.
    pub open_count: i64,
    /// Completed stays in this state, derived from status history.
    pub closed_intervals: i64,
    pub total_hours: f64,
    pub avg_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageBreakdownReport {
    pub stages: Vec<StageRow>,
}

/// Per-state counts and average time-in-state. Durations come from closed
/// intervals only (entry i's state lasts until entry i+1; the REPORTED stage
/// opens at the effective reported-at), so the result is reproducible from
/// stored data alone.
pub fn stage_breakdown(conn: &Connection, range: &DateRange) -> Result<StageBreakdownReport, AppError> {
    let events = list_events(conn, &range.to_filter())?;

    let mut open: BTreeMap<&str, i64> = BTreeMap::new();
    let mut closed: BTreeMap<&str, (i64, f64)> = BTreeMap::new();

    for ListedEvent { event, .. } in &events {
        *open.entry(event.current_status.as_str()).or_insert(0) += 1;

        let entries = history::list_status_history(conn, event.id)?;
        let mut timeline: Vec<(AogStatus, String)> =
            vec![(AogStatus::Reported, effective_reported(event).to_string())];
        for e in &entries {
            timeline.push((e.to_status, e.changed_at.clone()));
        }

        for pair in timeline.windows(2) {
            let (status, entered) = &pair[0];
            let (_, left) = &pair[1];
            let hours = hours_between(Some(entered), Some(left));
            let slot = closed.entry(status.as_str()).or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += hours;
        }
    }

    let stages = AogStatus::ALL
        .into_iter()
        .map(|status| {
            let open_count = open.get(status.as_str()).copied().unwrap_or(0);
            let (closed_intervals, total_hours) =
                closed.get(status.as_str()).copied().unwrap_or((0, 0.0));
            let avg_hours = if closed_intervals > 0 {
                round2(total_hours / closed_intervals as f64)
            } else {
                0.0
            };
            StageRow {
                status,
                open_count,
                closed_intervals,
                total_hours: round2(total_hours),
                avg_hours,
            }
        })
        .collect();

    Ok(StageBreakdownReport { stages })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BottleneckRow {
    pub blocking_reason: BlockingReason,
    pub event_count: i64,
    pub avg_blocked_hours: f64,
}

/// Events currently held in a blocking state, grouped by blocking reason,
/// with the average time since entering that state. `as_of` exists so the
/// open-interval durations are testable; `None` means wall-clock now.
pub fn bottleneck_analytics(
    conn: &Connection,
    range: &DateRange,
    as_of: Option<&str>,
) -> Result<Vec<BottleneckRow>, AppError> {
    let now = match as_of {
        Some(ts) => ts.to_string(),
        None => OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
            AppError::new("CLOCK_FAILED", "Failed to format current time")
                .with_details(e.to_string())
        })?,
    };

    let events = list_events(conn, &range.to_filter())?;
    let mut rows: BTreeMap<&str, (BlockingReason, i64, f64)> = BTreeMap::new();

    for ListedEvent { event, .. } in &events {
        if !workflow::requires_blocking_reason(event.current_status) {
            continue;
        }
        let Some(reason) = event.blocking_reason else {
            continue;
        };

        let entries = history::list_status_history(conn, event.id)?;
        let entered = entries
            .last()
            .map(|e| e.changed_at.clone())
            .unwrap_or_else(|| effective_reported(event).to_string());
        let blocked_hours = hours_between(Some(&entered), Some(&now));

        let slot = rows
            .entry(reason.as_str())
            .or_insert((reason, 0, 0.0));
        slot.1 += 1;
        slot.2 += blocked_hours;
    }

    Ok(rows
        .into_values()
        .map(|(blocking_reason, event_count, total)| BottleneckRow {
            blocking_reason,
            event_count,
            avg_blocked_hours: round2(total / event_count as f64),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Insight heuristics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSeverity {
    Warning,
    Info,
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub severity: InsightSeverity,
    pub code: String,
    pub message: String,
}

fn insight(severity: InsightSeverity, code: &str, message: String) -> Insight {
    Insight {
        severity,
        code: code.to_string(),
        message,
    }
}

fn monthly_totals(events: &[ListedEvent]) -> BTreeMap<String, f64> {
    let mut out: BTreeMap<String, f64> = BTreeMap::new();
    for ListedEvent { event, .. } in events {
        let Some(month) = month_label(effective_reported(event)) else {
            continue;
        };
        *out.entry(month).or_insert(0.0) += event.total_downtime_hours.unwrap_or(0.0);
    }
    out
}

fn bucket_sums(events: &[ListedEvent]) -> (f64, f64, f64, f64) {
    let mut t = 0.0;
    let mut p = 0.0;
    let mut o = 0.0;
    let mut tot = 0.0;
    for ListedEvent { event, .. } in events {
        t += event.technical_time_hours.unwrap_or(0.0);
        p += event.procurement_time_hours.unwrap_or(0.0);
        o += event.ops_time_hours.unwrap_or(0.0);
        tot += event.total_downtime_hours.unwrap_or(0.0);
    }
    (t, p, o, tot)
}

fn detect_procurement_dominance(events: &[ListedEvent]) -> Option<Insight> {
    let (_, procurement, _, total) = bucket_sums(events);
    if total > 0.0 && procurement / total > 0.5 {
        return Some(insight(
            InsightSeverity::Warning,
            "PROCUREMENT_DOMINANT",
            format!(
                "Procurement accounts for {:.0}% of downtime in the period",
                procurement / total * 100.0
            ),
        ));
    }
    None
}

fn detect_recurring_reasons(events: &[ListedEvent]) -> Option<Insight> {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
    for ListedEvent { event, .. } in events {
        if let Some(code) = event.reason_code.as_deref() {
            *counts.entry(code).or_insert(0) += 1;
        }
    }
    let (code, count) = counts.into_iter().max_by_key(|(_, c)| *c)?;
    if count >= 3 {
        return Some(insight(
            InsightSeverity::Info,
            "RECURRING_REASON",
            format!("Reason code '{code}' occurred {count} times in the period"),
        ));
    }
    None
}

fn detect_cost_spike(events: &[ListedEvent]) -> Option<Insight> {
    let mut monthly_costs: BTreeMap<String, f64> = BTreeMap::new();
    for ListedEvent { event, .. } in events {
        let Some(month) = month_label(effective_reported(event)) else {
            continue;
        };
        let cost = event.labor_cost.unwrap_or(0.0)
            + event.parts_cost.unwrap_or(0.0)
            + event.external_cost.unwrap_or(0.0);
        *monthly_costs.entry(month).or_insert(0.0) += cost;
    }

    let current_month = monthly_costs.keys().next_back()?.clone();
    let current = *monthly_costs.get(&current_month)?;
    let mut trailing = 0.0;
    for k in 1..=3 {
        let month = month_add(&current_month, -k)?;
        trailing += monthly_costs.get(&month).copied().unwrap_or(0.0);
    }
    let trailing_avg = trailing / 3.0;

    if trailing_avg > 0.0 && current > 1.5 * trailing_avg {
        return Some(insight(
            InsightSeverity::Warning,
            "COST_SPIKE",
            format!(
                "Spend in {current_month} ({current:.0}) exceeds 150% of the trailing 3-month average ({trailing_avg:.0})"
            ),
        ));
    }
    None
}

fn detect_improving_trend(all: &[ListedEvent], range: &DateRange) -> Option<Insight> {
    let from = parse_ts(range.from.as_deref()?)?;
    let to = parse_ts(range.to.as_deref()?)?;
    if to <= from {
        return None;
    }
    let prior_from = from - (to - from);

    let mut current_sum = 0.0;
    let mut prior_sum = 0.0;
    for ListedEvent { event, .. } in all {
        let Some(ts) = parse_ts(effective_reported(event)) else {
            continue;
        };
        let hours = event.total_downtime_hours.unwrap_or(0.0);
        if ts >= from && ts <= to {
            current_sum += hours;
        } else if ts >= prior_from && ts < from {
            prior_sum += hours;
        }
    }

    if prior_sum > 0.0 && current_sum < 0.8 * prior_sum {
        let reduction = (1.0 - current_sum / prior_sum) * 100.0;
        return Some(insight(
            InsightSeverity::Success,
            "IMPROVING_TREND",
            format!("Downtime is down {reduction:.0}% versus the prior equal-length period"),
        ));
    }
    None
}

fn detect_data_quality(events: &[ListedEvent]) -> Option<Insight> {
    if events.is_empty() {
        return None;
    }
    let legacy = events.iter().filter(|e| e.is_legacy).count();
    let modern_ratio = 1.0 - legacy as f64 / events.len() as f64;
    if modern_ratio < 0.7 {
        return Some(insight(
            InsightSeverity::Warning,
            "DATA_QUALITY",
            format!(
                "Only {:.0}% of events in the period carry milestone-level data; bucket attribution is coarse for the rest",
                modern_ratio * 100.0
            ),
        ));
    }
    None
}

fn detect_high_risk_aircraft(
    events: &[ListedEvent],
    registrations: &BTreeMap<i64, String>,
) -> Option<Insight> {
    let mut per_aircraft: BTreeMap<i64, (i64, f64)> = BTreeMap::new();
    for ListedEvent { event, .. } in events {
        let slot = per_aircraft.entry(event.aircraft_id).or_insert((0, 0.0));
        slot.0 += 1;
        slot.1 += event.total_downtime_hours.unwrap_or(0.0);
    }

    // risk score = eventCount * 5 + totalHours / 10
    let (aircraft_id, score) = per_aircraft
        .into_iter()
        .map(|(id, (count, hours))| (id, count as f64 * 5.0 + hours / 10.0))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    if score > 70.0 {
        let registration = registrations
            .get(&aircraft_id)
            .cloned()
            .unwrap_or_else(|| format!("#{aircraft_id}"));
        return Some(insight(
            InsightSeverity::Warning,
            "HIGH_RISK_AIRCRAFT",
            format!("Aircraft {registration} has a risk score of {:.1}", round2(score)),
        ));
    }
    None
}

fn detect_seasonal_pattern(events: &[ListedEvent]) -> Option<Insight> {
    if events.len() < 12 {
        return None;
    }
    let mut by_calendar_month = [0.0f64; 12];
    for ListedEvent { event, .. } in events {
        let Some(ts) = parse_ts(effective_reported(event)) else {
            continue;
        };
        by_calendar_month[ts.month() as usize - 1] += event.total_downtime_hours.unwrap_or(0.0);
    }
    let avg: f64 = by_calendar_month.iter().sum::<f64>() / 12.0;
    if avg <= 0.0 {
        return None;
    }
    let (idx, peak) = by_calendar_month
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if *peak > 1.3 * avg {
        const MONTHS: [&str; 12] = [
            "January", "February", "March", "April", "May", "June", "July", "August",
            "September", "October", "November", "December",
        ];
        return Some(insight(
            InsightSeverity::Info,
            "SEASONAL_PATTERN",
            format!(
                "{} downtime runs {:.0}% above the monthly average",
                MONTHS[idx],
                (peak / avg - 1.0) * 100.0
            ),
        ));
    }
    None
}

fn detect_bucket_concentration(events: &[ListedEvent]) -> Option<Insight> {
    let (technical, procurement, ops, total) = bucket_sums(events);
    if total <= 0.0 {
        return None;
    }
    let buckets = [
        ("technical", technical),
        ("procurement", procurement),
        ("ops", ops),
    ];
    let (name, hours) = buckets.into_iter().max_by(|a, b| a.1.total_cmp(&b.1))?;
    if hours / total > 0.6 {
        return Some(insight(
            InsightSeverity::Info,
            "BUCKET_CONCENTRATION",
            format!(
                "The {name} bucket holds {:.0}% of total downtime",
                hours / total * 100.0
            ),
        ));
    }
    None
}

/// Run the 8 independent detectors over the period, rank the findings
/// warning > info > success, and keep the top 5.
pub fn insights(conn: &Connection, range: &DateRange) -> Result<Vec<Insight>, AppError> {
    let all = list_events(conn, &EventFilter::default())?;
    let in_period = list_events(conn, &range.to_filter())?;
    let registrations: BTreeMap<i64, String> = repo::list_aircraft(conn)?
        .into_iter()
        .map(|a| (a.id, a.registration))
        .collect();

    let mut findings: Vec<Insight> = [
        detect_procurement_dominance(&in_period),
        detect_recurring_reasons(&in_period),
        detect_cost_spike(&in_period),
        detect_improving_trend(&all, range),
        detect_data_quality(&in_period),
        detect_high_risk_aircraft(&in_period, &registrations),
        detect_seasonal_pattern(&in_period),
        detect_bucket_concentration(&in_period),
    ]
    .into_iter()
    .flatten()
    .collect();

    findings.sort_by(|a, b| (a.severity, a.code.clone()).cmp(&(b.severity, b.code.clone())));
    findings.truncate(5);
    Ok(findings)
}

// ---------------------------------------------------------------------------
// Forecast / moving average
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPoint {
    pub month: String,
    pub total_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub month: String,
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastReport {
    pub historical: Vec<MonthlyPoint>,
    pub forecast: Vec<ForecastPoint>,
}

/// Ordinary least-squares regression over the last <= 12 monthly totals,
/// projected 3 months forward with a symmetric ±20% band floored at 0. Fewer
/// than 3 historical points yields the history with an empty forecast.
pub fn generate_forecast(conn: &Connection, range: &DateRange) -> Result<ForecastReport, AppError> {
    let events = list_events(conn, &range.to_filter())?;
    let totals = monthly_totals(&events);

    let mut historical: Vec<MonthlyPoint> = totals
        .into_iter()
        .map(|(month, total)| MonthlyPoint {
            month,
            total_hours: round2(total),
        })
        .collect();
    if historical.len() > 12 {
        historical.drain(..historical.len() - 12);
    }

    let n = historical.len();
    if n < 3 {
        return Ok(ForecastReport {
            historical,
            forecast: Vec::new(),
        });
    }

    let nf = n as f64;
    let sum_x: f64 = (0..n).map(|i| i as f64).sum();
    let sum_y: f64 = historical.iter().map(|p| p.total_hours).sum();
    let sum_xy: f64 = historical
        .iter()
        .enumerate()
        .map(|(i, p)| i as f64 * p.total_hours)
        .sum();
    let sum_x2: f64 = (0..n).map(|i| (i * i) as f64).sum();

    let denom = nf * sum_x2 - sum_x * sum_x;
    let slope = if denom != 0.0 {
        (nf * sum_xy - sum_x * sum_y) / denom
    } else {
        0.0
    };
    let intercept = (sum_y - slope * sum_x) / nf;

    let last_month = historical[n - 1].month.clone();
    let mut forecast = Vec::with_capacity(3);
    for step in 1..=3 {
        let x = (n - 1 + step) as f64;
        let predicted = round2((intercept + slope * x).max(0.0));
        let month = month_add(&last_month, step as i32).unwrap_or_else(|| last_month.clone());
        forecast.push(ForecastPoint {
            month,
            predicted,
            lower: round2((predicted * 0.8).max(0.0)),
            upper: round2(predicted * 1.2),
        });
    }

    Ok(ForecastReport {
        historical,
        forecast,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub month: String,
    pub total_hours: f64,
    pub moving_average: f64,
}

/// Trailing moving average over a series; the first `window - 1` points pass
/// through as their raw value.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if i + 1 < window {
                *v
            } else {
                let slice = &values[i + 1 - window..=i];
                round2(slice.iter().sum::<f64>() / window as f64)
            }
        })
        .collect()
}

/// Monthly downtime totals with the trailing moving average (default window
/// 3) alongside each point.
pub fn downtime_trend(
    conn: &Connection,
    range: &DateRange,
    window: Option<usize>,
) -> Result<Vec<TrendPoint>, AppError> {
    let events = list_events(conn, &range.to_filter())?;
    let totals = monthly_totals(&events);

    let months: Vec<String> = totals.keys().cloned().collect();
    let values: Vec<f64> = totals.values().map(|v| round2(*v)).collect();
    let averaged = moving_average(&values, window.unwrap_or(3));

    Ok(months
        .into_iter()
        .zip(values.into_iter().zip(averaged))
        .map(|(month, (total_hours, moving_average))| TrendPoint {
            month,
            total_hours,
            moving_average,
        })
        .collect())
}
