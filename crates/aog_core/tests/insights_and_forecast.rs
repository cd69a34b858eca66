use pretty_assertions::assert_eq;

use aog_core::analytics::{
    downtime_trend, generate_forecast, insights, DateRange, InsightSeverity,
};
use aog_core::db;
use aog_core::domain::{AogCategory, AogEvent, AogStatus, Milestones};
use aog_core::repo;

fn setup() -> rusqlite::Connection {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    conn
}

/// A modern stored row: reported_at present, metrics precomputed.
#[allow(clippy::too_many_arguments)]
fn seed_modern(
    conn: &rusqlite::Connection,
    aircraft_id: i64,
    reported_at: &str,
    reason_code: Option<&str>,
    technical: f64,
    procurement: f64,
    ops: f64,
    total: f64,
) {
    let event = AogEvent {
        id: 0,
        aircraft_id,
        category: AogCategory::Aog,
        reason_code: reason_code.map(str::to_string),
        responsible_party: None,
        location: None,
        current_status: AogStatus::Closed,
        blocking_reason: None,
        detected_at: reported_at.to_string(),
        cleared_at: None,
        milestones: Milestones {
            reported_at: Some(reported_at.to_string()),
            ..Default::default()
        },
        technical_time_hours: Some(technical),
        procurement_time_hours: Some(procurement),
        ops_time_hours: Some(ops),
        total_downtime_hours: Some(total),
        downtime_hours: Some(total),
        labor_cost: None,
        parts_cost: None,
        external_cost: None,
        version: 1,
        created_at: reported_at.to_string(),
        updated_at: reported_at.to_string(),
    };
    repo::insert_event(conn, &event).expect("insert event");
}

/// A pre-migration row: no reported_at, no metrics, no milestone history.
/// The read path attributes the whole detected->cleared span to technical.
fn seed_legacy(
    conn: &rusqlite::Connection,
    aircraft_id: i64,
    detected_at: &str,
    cleared_at: &str,
    reason_code: Option<&str>,
    labor_cost: Option<f64>,
) {
    let event = AogEvent {
        id: 0,
        aircraft_id,
        category: AogCategory::Aog,
        reason_code: reason_code.map(str::to_string),
        responsible_party: None,
        location: None,
        current_status: AogStatus::Closed,
        blocking_reason: None,
        detected_at: detected_at.to_string(),
        cleared_at: Some(cleared_at.to_string()),
        milestones: Milestones::default(),
        technical_time_hours: None,
        procurement_time_hours: None,
        ops_time_hours: None,
        total_downtime_hours: None,
        downtime_hours: None,
        labor_cost,
        parts_cost: None,
        external_cost: None,
        version: 1,
        created_at: detected_at.to_string(),
        updated_at: detected_at.to_string(),
    };
    repo::insert_event(conn, &event).expect("insert event");
}

#[test]
fn linear_history_forecasts_three_months_ahead() {
    let conn = setup();
    let a1 = repo::insert_aircraft(&conn, "5N-AAA", None, None).expect("aircraft");
    for (i, total) in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0].into_iter().enumerate() {
        let reported = format!("2024-{:02}-10T00:00:00Z", i + 1);
        seed_modern(&conn, a1, &reported, None, total, 0.0, 0.0, total);
    }

    let report = generate_forecast(&conn, &DateRange::default()).expect("forecast");
    assert_eq!(report.historical.len(), 6);
    assert_eq!(report.historical[0].month, "2024-01");
    assert_eq!(report.historical[5].total_hours, 60.0);

    assert_eq!(report.forecast.len(), 3);
    let months: Vec<&str> = report.forecast.iter().map(|p| p.month.as_str()).collect();
    assert_eq!(months, vec!["2024-07", "2024-08", "2024-09"]);
    let predicted: Vec<f64> = report.forecast.iter().map(|p| p.predicted).collect();
    assert_eq!(predicted, vec![70.0, 80.0, 90.0]);

    for point in &report.forecast {
        assert!(point.lower >= 0.0);
        assert!(point.lower <= point.predicted);
        assert!(point.predicted <= point.upper);
    }
    assert_eq!(report.forecast[0].lower, 56.0);
    assert_eq!(report.forecast[0].upper, 84.0);
}

#[test]
fn sparse_history_yields_no_forecast() {
    let conn = setup();
    let a1 = repo::insert_aircraft(&conn, "5N-AAA", None, None).expect("aircraft");
    seed_modern(&conn, a1, "2024-01-10T00:00:00Z", None, 10.0, 0.0, 0.0, 10.0);
    seed_modern(&conn, a1, "2024-02-10T00:00:00Z", None, 20.0, 0.0, 0.0, 20.0);

    let report = generate_forecast(&conn, &DateRange::default()).expect("forecast");
    assert_eq!(report.historical.len(), 2);
    assert!(report.forecast.is_empty());
}

#[test]
fn declining_history_floors_predictions_at_zero() {
    let conn = setup();
    let a1 = repo::insert_aircraft(&conn, "5N-AAA", None, None).expect("aircraft");
    for (i, total) in [60.0, 40.0, 20.0].into_iter().enumerate() {
        let reported = format!("2024-{:02}-10T00:00:00Z", i + 1);
        seed_modern(&conn, a1, &reported, None, total, 0.0, 0.0, total);
    }

    let report = generate_forecast(&conn, &DateRange::default()).expect("forecast");
    // Slope -20/month from 20 at 2024-03: 0 for every projected month.
    for point in &report.forecast {
        assert_eq!(point.predicted, 0.0);
        assert_eq!(point.lower, 0.0);
        assert_eq!(point.upper, 0.0);
    }
}

#[test]
fn trend_carries_the_trailing_moving_average() {
    let conn = setup();
    let a1 = repo::insert_aircraft(&conn, "5N-AAA", None, None).expect("aircraft");
    for (i, total) in [10.0, 20.0, 30.0, 40.0].into_iter().enumerate() {
        let reported = format!("2024-{:02}-10T00:00:00Z", i + 1);
        seed_modern(&conn, a1, &reported, None, total, 0.0, 0.0, total);
    }

    let trend = downtime_trend(&conn, &DateRange::default(), None).expect("trend");
    let averages: Vec<f64> = trend.iter().map(|p| p.moving_average).collect();
    assert_eq!(averages, vec![10.0, 20.0, 20.0, 30.0]);
    assert_eq!(trend[3].month, "2024-04");
    assert_eq!(trend[3].total_hours, 40.0);
}

#[test]
fn procurement_dominance_is_the_only_finding_for_a_clean_fleet() {
    let conn = setup();
    let a1 = repo::insert_aircraft(&conn, "5N-AAA", None, None).expect("aircraft");
    // 60% of downtime in procurement: above the 50% dominance bar, exactly at
    // (not above) the 60% concentration bar.
    seed_modern(&conn, a1, "2024-03-05T00:00:00Z", None, 20.0, 30.0, 0.0, 50.0);
    seed_modern(&conn, a1, "2024-04-05T00:00:00Z", None, 20.0, 30.0, 0.0, 50.0);

    let findings = insights(&conn, &DateRange::default()).expect("insights");
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].code, "PROCUREMENT_DOMINANT");
    assert_eq!(findings[0].severity, InsightSeverity::Warning);
}

#[test]
fn findings_rank_warnings_before_info_before_success() {
    let conn = setup();
    let a1 = repo::insert_aircraft(&conn, "5N-AAA", None, None).expect("aircraft");

    // Prior period (Jan-Feb): 100h. Current period (Mar-Apr): 75h across
    // three procurement-heavy events sharing one reason code.
    seed_modern(&conn, a1, "2024-01-15T00:00:00Z", None, 100.0, 0.0, 0.0, 100.0);
    for reported in [
        "2024-03-05T00:00:00Z",
        "2024-03-20T00:00:00Z",
        "2024-04-10T00:00:00Z",
    ] {
        seed_modern(&conn, a1, reported, Some("HYD-PUMP"), 5.0, 20.0, 0.0, 25.0);
    }

    let range = DateRange {
        from: Some("2024-03-01T00:00:00Z".to_string()),
        to: Some("2024-04-30T00:00:00Z".to_string()),
    };
    let findings = insights(&conn, &range).expect("insights");
    let codes: Vec<&str> = findings.iter().map(|f| f.code.as_str()).collect();
    assert_eq!(
        codes,
        vec![
            "PROCUREMENT_DOMINANT",
            "BUCKET_CONCENTRATION",
            "RECURRING_REASON",
            "IMPROVING_TREND",
        ]
    );
    assert_eq!(findings[0].severity, InsightSeverity::Warning);
    assert_eq!(findings[3].severity, InsightSeverity::Success);
}

#[test]
fn findings_are_capped_at_five() {
    let conn = setup();
    let a1 = repo::insert_aircraft(&conn, "5N-OLD", None, None).expect("aircraft");

    // Twelve 24h legacy events over 2023, three of them in July, with a cost
    // spike in the final month. Triggers six detectors; only five survive.
    let mut months: Vec<u32> = (1..=10).collect();
    months.extend([7, 7]);
    for (i, month) in months.into_iter().enumerate() {
        let cost = match month {
            10 => Some(1000.0),
            7 if i == 6 => Some(100.0), // first July event only
            8 | 9 => Some(100.0),
            _ => None,
        };
        let day = 10 + i; // keep rows distinct within a month
        seed_legacy(
            &conn,
            a1,
            &format!("2023-{month:02}-{day:02}T00:00:00Z"),
            &format!("2023-{month:02}-{day:02}T23:59:59Z"),
            Some("ENG-STALL"),
            cost,
        );
    }

    let findings = insights(&conn, &DateRange::default()).expect("insights");
    assert_eq!(findings.len(), 5);
    // Warnings sort ahead of the info findings.
    assert!(findings[..3]
        .iter()
        .all(|f| f.severity == InsightSeverity::Warning));
    assert!(findings[3..]
        .iter()
        .all(|f| f.severity == InsightSeverity::Info));
    // The sixth finding, last in the info ordering, is the one dropped.
    assert!(findings.iter().all(|f| f.code != "SEASONAL_PATTERN"));
}

#[test]
fn mostly_legacy_periods_raise_a_data_quality_warning() {
    let conn = setup();
    let a1 = repo::insert_aircraft(&conn, "5N-OLD", None, None).expect("aircraft");
    seed_modern(&conn, a1, "2024-01-05T00:00:00Z", None, 10.0, 0.0, 0.0, 10.0);
    for day in 10..14 {
        seed_legacy(
            &conn,
            a1,
            &format!("2024-01-{day}T00:00:00Z"),
            &format!("2024-01-{day}T12:00:00Z"),
            None,
            None,
        );
    }

    let findings = insights(&conn, &DateRange::default()).expect("insights");
    assert!(findings.iter().any(|f| f.code == "DATA_QUALITY"
        && f.severity == InsightSeverity::Warning));
}
