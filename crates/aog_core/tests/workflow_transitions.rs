use aog_core::db;
use aog_core::domain::{AogCategory, AogStatus, BlockingReason};
use aog_core::repo;
use aog_core::service::{create_event, transition_status, NewAogEvent, TransitionRequest};
use aog_core::workflow::{allowed_transitions, requires_blocking_reason, validate_transition};

fn transition(to: AogStatus, blocking_reason: Option<BlockingReason>) -> TransitionRequest {
    TransitionRequest {
        to_status: to,
        blocking_reason,
        notes: None,
        metadata_json: None,
        actor: "tech-1".to_string(),
        actor_role: Some("engineer".to_string()),
        expected_version: None,
    }
}

fn seeded_event(conn: &mut rusqlite::Connection) -> i64 {
    let aircraft_id = repo::insert_aircraft(conn, "5N-ABC", Some("narrowbody"), None).expect("aircraft");
    let input = NewAogEvent {
        aircraft_id,
        category: AogCategory::Aog,
        reason_code: Some("HYD-LEAK".to_string()),
        responsible_party: None,
        location: Some("LOS".to_string()),
        detected_at: "2024-04-01T06:00:00Z".to_string(),
        cleared_at: None,
        milestones: Default::default(),
        labor_cost: None,
        parts_cost: None,
        external_cost: None,
    };
    create_event(conn, &input, "tech-1").expect("create").event.id
}

#[test]
fn transition_closure_over_all_pairs() {
    // Pairs in the table succeed (with a reason supplied); everything else
    // fails with INVALID_TRANSITION, regardless of blocking reason.
    for from in AogStatus::ALL {
        for to in AogStatus::ALL {
            let result = validate_transition(from, to, Some(BlockingReason::Other));
            if allowed_transitions(from).contains(&to) {
                assert!(result.is_ok(), "{} -> {} should be legal", from.as_str(), to.as_str());
            } else {
                let err = result.unwrap_err();
                assert_eq!(err.code, "INVALID_TRANSITION", "{} -> {}", from.as_str(), to.as_str());
            }
        }
    }
}

#[test]
fn blocking_states_require_a_reason() {
    let entry_points = [
        (AogStatus::ProcurementRequested, AogStatus::FinanceApprovalPending),
        (AogStatus::OrderPlaced, AogStatus::InTransit),
        (AogStatus::InTransit, AogStatus::AtPort),
        (AogStatus::AtPort, AogStatus::CustomsClearance),
    ];
    for (from, to) in entry_points {
        assert!(requires_blocking_reason(to), "{}", to.as_str());
        let err = validate_transition(from, to, None).unwrap_err();
        assert_eq!(err.code, "BLOCKING_REASON_REQUIRED", "{}", to.as_str());
        assert!(validate_transition(from, to, Some(BlockingReason::Vendor)).is_ok());
    }
}

#[test]
fn reported_cannot_skip_to_issue_identified() {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    let id = seeded_event(&mut conn);

    let err = transition_status(&mut conn, id, &transition(AogStatus::IssueIdentified, None))
        .unwrap_err();
    assert_eq!(err.code, "INVALID_TRANSITION");

    // The legal route goes through TROUBLESHOOTING.
    transition_status(&mut conn, id, &transition(AogStatus::Troubleshooting, None)).expect("ok");
    transition_status(&mut conn, id, &transition(AogStatus::IssueIdentified, None)).expect("ok");
}

#[test]
fn at_port_flow_keeps_blocking_reason_discipline() {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    let id = seeded_event(&mut conn);

    for (to, reason) in [
        (AogStatus::Troubleshooting, None),
        (AogStatus::IssueIdentified, None),
        (AogStatus::PartRequired, None),
        (AogStatus::ProcurementRequested, None),
        (AogStatus::OrderPlaced, None),
        (AogStatus::InTransit, Some(BlockingReason::Vendor)),
    ] {
        transition_status(&mut conn, id, &transition(to, reason)).expect("setup transition");
    }

    // Entering AT_PORT without a reason is rejected; retrying with one works.
    let err = transition_status(&mut conn, id, &transition(AogStatus::AtPort, None)).unwrap_err();
    assert_eq!(err.code, "BLOCKING_REASON_REQUIRED");

    let detail = transition_status(
        &mut conn,
        id,
        &transition(AogStatus::AtPort, Some(BlockingReason::Port)),
    )
    .expect("at port");
    assert_eq!(detail.event.blocking_reason, Some(BlockingReason::Port));

    // The next blocking state needs its own reason; nothing is cleared until
    // it either sets one or the event moves to a non-blocking state.
    let err = transition_status(&mut conn, id, &transition(AogStatus::CustomsClearance, None))
        .unwrap_err();
    assert_eq!(err.code, "BLOCKING_REASON_REQUIRED");

    let detail = transition_status(
        &mut conn,
        id,
        &transition(AogStatus::CustomsClearance, Some(BlockingReason::Customs)),
    )
    .expect("customs");
    assert_eq!(detail.event.blocking_reason, Some(BlockingReason::Customs));

    let detail = transition_status(&mut conn, id, &transition(AogStatus::ReceivedInStores, None))
        .expect("stores");
    assert_eq!(detail.event.blocking_reason, None);
}

#[test]
fn reaching_back_in_service_stamps_cleared_at_once() {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    let id = seeded_event(&mut conn);

    for to in [
        AogStatus::Troubleshooting,
        AogStatus::IssueIdentified,
        AogStatus::ResolvedNoParts,
    ] {
        transition_status(&mut conn, id, &transition(to, None)).expect("setup");
    }

    let detail = transition_status(&mut conn, id, &transition(AogStatus::BackInService, None))
        .expect("back in service");
    let stamped = detail.event.cleared_at.clone().expect("cleared_at stamped");
    assert!(detail.event.total_downtime_hours.is_some());

    let detail = transition_status(&mut conn, id, &transition(AogStatus::Closed, None))
        .expect("closed");
    assert_eq!(detail.event.cleared_at.as_deref(), Some(stamped.as_str()));
}

#[test]
fn version_conflict_is_reported_on_stale_writes() {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    let id = seeded_event(&mut conn);

    let mut req = transition(AogStatus::Troubleshooting, None);
    req.expected_version = Some(1);
    let detail = transition_status(&mut conn, id, &req).expect("first writer wins");
    assert_eq!(detail.event.version, 2);

    let mut stale = transition(AogStatus::IssueIdentified, None);
    stale.expected_version = Some(1);
    let err = transition_status(&mut conn, id, &stale).unwrap_err();
    assert_eq!(err.code, "VERSION_CONFLICT");
}
