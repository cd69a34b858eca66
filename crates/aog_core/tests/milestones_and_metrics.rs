use pretty_assertions::assert_eq;

use aog_core::db;
use aog_core::domain::{AogCategory, FieldPatch, Milestones};
use aog_core::service::{create_event, update_event, AogEventPatch, NewAogEvent};

fn setup() -> (rusqlite::Connection, i64) {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    let aircraft_id =
        aog_core::repo::insert_aircraft(&conn, "5N-XYZ", Some("widebody"), None).expect("aircraft");
    (conn, aircraft_id)
}

fn new_event(aircraft_id: i64, detected_at: &str, cleared_at: Option<&str>, milestones: Milestones) -> NewAogEvent {
    NewAogEvent {
        aircraft_id,
        category: AogCategory::Aog,
        reason_code: None,
        responsible_party: None,
        location: None,
        detected_at: detected_at.to_string(),
        cleared_at: cleared_at.map(str::to_string),
        milestones,
        labor_cost: None,
        parts_cost: None,
        external_cost: None,
    }
}

#[test]
fn milestone_less_event_attributes_full_span() {
    // detected 08:00Z, cleared 16:00Z, no milestones.
    let (mut conn, aircraft_id) = setup();
    let detail = create_event(
        &mut conn,
        &new_event(
            aircraft_id,
            "2024-01-15T08:00:00Z",
            Some("2024-01-15T16:00:00Z"),
            Milestones::default(),
        ),
        "tech-1",
    )
    .expect("create");

    assert_eq!(detail.event.total_downtime_hours, Some(8.0));
    assert_eq!(detail.event.technical_time_hours, Some(8.0));
    assert_eq!(detail.event.procurement_time_hours, Some(0.0));
    assert_eq!(detail.event.ops_time_hours, Some(0.0));
    assert_eq!(detail.event.downtime_hours, Some(8.0));
}

#[test]
fn full_milestone_chain_splits_the_buckets() {
    let (mut conn, aircraft_id) = setup();
    let milestones = Milestones {
        reported_at: Some("2024-03-01T00:00:00Z".to_string()),
        procurement_requested_at: Some("2024-03-01T04:00:00Z".to_string()),
        available_at_store_at: Some("2024-03-06T04:00:00Z".to_string()),
        issued_back_at: None,
        installation_complete_at: Some("2024-03-06T12:00:00Z".to_string()),
        test_start_at: Some("2024-03-06T12:00:00Z".to_string()),
        up_and_running_at: Some("2024-03-06T15:00:00Z".to_string()),
    };
    let detail = create_event(
        &mut conn,
        &new_event(aircraft_id, "2024-03-01T00:00:00Z", None, milestones),
        "tech-1",
    )
    .expect("create");

    assert_eq!(detail.event.technical_time_hours, Some(12.0));
    assert_eq!(detail.event.procurement_time_hours, Some(120.0));
    assert_eq!(detail.event.ops_time_hours, Some(3.0));
    assert_eq!(detail.event.total_downtime_hours, Some(135.0));
}

#[test]
fn total_is_not_the_sum_of_the_buckets() {
    // One idle hour between installation complete and test start is counted
    // by no bucket but remains inside the total span.
    let (mut conn, aircraft_id) = setup();
    let milestones = Milestones {
        reported_at: Some("2024-03-01T00:00:00Z".to_string()),
        procurement_requested_at: Some("2024-03-01T04:00:00Z".to_string()),
        available_at_store_at: Some("2024-03-06T04:00:00Z".to_string()),
        issued_back_at: None,
        installation_complete_at: Some("2024-03-06T12:00:00Z".to_string()),
        test_start_at: Some("2024-03-06T13:00:00Z".to_string()),
        up_and_running_at: Some("2024-03-06T15:00:00Z".to_string()),
    };
    let detail = create_event(
        &mut conn,
        &new_event(aircraft_id, "2024-03-01T00:00:00Z", None, milestones),
        "tech-1",
    )
    .expect("create");

    let e = &detail.event;
    let bucket_sum = e.technical_time_hours.unwrap()
        + e.procurement_time_hours.unwrap()
        + e.ops_time_hours.unwrap();
    assert_eq!(bucket_sum, 134.0);
    assert_eq!(e.total_downtime_hours, Some(135.0));
}

#[test]
fn metrics_are_non_negative_with_two_decimals() {
    let (mut conn, aircraft_id) = setup();
    // 100 minutes of downtime: 1.67h after rounding.
    let detail = create_event(
        &mut conn,
        &new_event(
            aircraft_id,
            "2024-05-01T00:00:00Z",
            Some("2024-05-01T01:40:00Z"),
            Milestones::default(),
        ),
        "tech-1",
    )
    .expect("create");

    for v in [
        detail.event.technical_time_hours,
        detail.event.procurement_time_hours,
        detail.event.ops_time_hours,
        detail.event.total_downtime_hours,
    ] {
        let v = v.unwrap();
        assert!(v >= 0.0);
        assert_eq!((v * 100.0).round() / 100.0, v, "more than 2 decimals: {v}");
    }
    assert_eq!(detail.event.total_downtime_hours, Some(1.67));
}

#[test]
fn create_rejects_out_of_order_milestones() {
    let (mut conn, aircraft_id) = setup();
    let milestones = Milestones {
        reported_at: Some("2024-03-02T00:00:00Z".to_string()),
        procurement_requested_at: Some("2024-03-01T00:00:00Z".to_string()),
        ..Default::default()
    };
    let err = create_event(
        &mut conn,
        &new_event(aircraft_id, "2024-03-02T00:00:00Z", None, milestones),
        "tech-1",
    )
    .unwrap_err();
    assert_eq!(err.code, "INVALID_TIMESTAMP_ORDER");
}

#[test]
fn synthesized_reported_at_participates_in_ordering() {
    // No explicit reported_at: the detected_at default must still order
    // against later milestones.
    let (mut conn, aircraft_id) = setup();
    let milestones = Milestones {
        procurement_requested_at: Some("2024-03-01T00:00:00Z".to_string()),
        ..Default::default()
    };
    let err = create_event(
        &mut conn,
        &new_event(aircraft_id, "2024-03-02T00:00:00Z", None, milestones),
        "tech-1",
    )
    .unwrap_err();
    assert_eq!(err.code, "INVALID_TIMESTAMP_ORDER");
}

#[test]
fn update_rejects_order_violation_without_partial_writes() {
    let (mut conn, aircraft_id) = setup();
    let detail = create_event(
        &mut conn,
        &new_event(
            aircraft_id,
            "2024-03-01T00:00:00Z",
            None,
            Milestones {
                reported_at: Some("2024-03-01T00:00:00Z".to_string()),
                ..Default::default()
            },
        ),
        "tech-1",
    )
    .expect("create");
    let id = detail.event.id;
    let history_before = detail.milestone_history.len();

    let patch = AogEventPatch {
        procurement_requested_at: FieldPatch::Set("2024-02-28T00:00:00Z".to_string()),
        ..Default::default()
    };
    let err = update_event(&mut conn, id, &patch, "tech-1", None).unwrap_err();
    assert_eq!(err.code, "INVALID_TIMESTAMP_ORDER");
    let details = err.details.expect("structured details");
    assert!(details.contains("prev_field=reported_at"));
    assert!(details.contains("field=procurement_requested_at"));

    let after = aog_core::service::get_event(&conn, id).expect("get");
    assert!(after.event.milestones.procurement_requested_at.is_none());
    assert_eq!(after.milestone_history.len(), history_before);
    assert_eq!(after.event.version, detail.event.version);
}

#[test]
fn recompute_is_idempotent_across_no_op_updates() {
    let (mut conn, aircraft_id) = setup();
    let detail = create_event(
        &mut conn,
        &new_event(
            aircraft_id,
            "2024-01-15T08:00:00Z",
            Some("2024-01-15T16:00:00Z"),
            Milestones::default(),
        ),
        "tech-1",
    )
    .expect("create");
    let id = detail.event.id;

    // A non-timestamp update must not disturb any stored metric.
    let patch = AogEventPatch {
        location: FieldPatch::Set("ABV".to_string()),
        ..Default::default()
    };
    let updated = update_event(&mut conn, id, &patch, "tech-1", None).expect("update");

    assert_eq!(updated.event.technical_time_hours, detail.event.technical_time_hours);
    assert_eq!(updated.event.procurement_time_hours, detail.event.procurement_time_hours);
    assert_eq!(updated.event.ops_time_hours, detail.event.ops_time_hours);
    assert_eq!(updated.event.total_downtime_hours, detail.event.total_downtime_hours);
}

#[test]
fn clearing_a_milestone_triggers_recompute() {
    let (mut conn, aircraft_id) = setup();
    let milestones = Milestones {
        reported_at: Some("2024-03-01T00:00:00Z".to_string()),
        procurement_requested_at: Some("2024-03-01T04:00:00Z".to_string()),
        available_at_store_at: Some("2024-03-06T04:00:00Z".to_string()),
        up_and_running_at: Some("2024-03-06T15:00:00Z".to_string()),
        ..Default::default()
    };
    let detail = create_event(
        &mut conn,
        &new_event(aircraft_id, "2024-03-01T00:00:00Z", None, milestones),
        "tech-1",
    )
    .expect("create");
    assert_eq!(detail.event.procurement_time_hours, Some(120.0));

    let patch = AogEventPatch {
        procurement_requested_at: FieldPatch::Clear,
        available_at_store_at: FieldPatch::Clear,
        ..Default::default()
    };
    let updated = update_event(&mut conn, detail.event.id, &patch, "tech-1", None).expect("update");
    assert_eq!(updated.event.procurement_time_hours, Some(0.0));
    assert_eq!(updated.event.total_downtime_hours, Some(135.0));
}
