//! The CRUD-plus-transition operation surface over AOG events.
//!
//! Every mutating operation follows the same shape: load, validate, compute,
//! then persist and append history inside one transaction. Validation
//! failures abort before any write; there are no partial writes.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::{
    AogCategory, AogEvent, AogStatus, BlockingReason, CostAuditEntry, FieldPatch,
    MilestoneHistoryEntry, Milestones, PartRequest, PartRequestStatus, ResponsibleParty,
    StatusHistoryEntry,
};
use crate::error::AppError;
use crate::history;
use crate::legacy;
use crate::metrics::{compute_downtime_metrics, DowntimeMetrics};
use crate::repo;
use crate::timeline;
use crate::workflow;

#[derive(Debug, Clone, Deserialize)]
pub struct NewAogEvent {
    pub aircraft_id: i64,
    pub category: AogCategory,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub responsible_party: Option<ResponsibleParty>,
    #[serde(default)]
    pub location: Option<String>,
    pub detected_at: String,
    #[serde(default)]
    pub cleared_at: Option<String>,
    #[serde(default)]
    pub milestones: Milestones,
    #[serde(default)]
    pub labor_cost: Option<f64>,
    #[serde(default)]
    pub parts_cost: Option<f64>,
    #[serde(default)]
    pub external_cost: Option<f64>,
}

/// Partial update of an event. Each field is tri-state: absent from the
/// request (`Unchanged`), explicitly cleared (`Clear`), or provided (`Set`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AogEventPatch {
    #[serde(default)]
    pub reason_code: FieldPatch<String>,
    #[serde(default)]
    pub responsible_party: FieldPatch<ResponsibleParty>,
    #[serde(default)]
    pub location: FieldPatch<String>,
    /// `detected_at` is required on the event; `Clear` is treated as
    /// `Unchanged`.
    #[serde(default)]
    pub detected_at: FieldPatch<String>,
    #[serde(default)]
    pub cleared_at: FieldPatch<String>,
    #[serde(default)]
    pub reported_at: FieldPatch<String>,
    #[serde(default)]
    pub procurement_requested_at: FieldPatch<String>,
    #[serde(default)]
    pub available_at_store_at: FieldPatch<String>,
    #[serde(default)]
    pub issued_back_at: FieldPatch<String>,
    #[serde(default)]
    pub installation_complete_at: FieldPatch<String>,
    #[serde(default)]
    pub test_start_at: FieldPatch<String>,
    #[serde(default)]
    pub up_and_running_at: FieldPatch<String>,
    #[serde(default)]
    pub labor_cost: FieldPatch<f64>,
    #[serde(default)]
    pub parts_cost: FieldPatch<f64>,
    #[serde(default)]
    pub external_cost: FieldPatch<f64>,
}

impl AogEventPatch {
    fn milestone_patches(&self) -> [(&'static str, &FieldPatch<String>); 7] {
        [
            ("reported_at", &self.reported_at),
            ("procurement_requested_at", &self.procurement_requested_at),
            ("available_at_store_at", &self.available_at_store_at),
            ("issued_back_at", &self.issued_back_at),
            ("installation_complete_at", &self.installation_complete_at),
            ("test_start_at", &self.test_start_at),
            ("up_and_running_at", &self.up_and_running_at),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRequest {
    pub to_status: AogStatus,
    #[serde(default)]
    pub blocking_reason: Option<BlockingReason>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Free-form cross-references (part request id, finance/shipping/ops-run
    /// refs) stored verbatim on the history entry. Must parse as JSON.
    #[serde(default)]
    pub metadata_json: Option<String>,
    pub actor: String,
    #[serde(default)]
    pub actor_role: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPartRequest {
    pub part_number: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub unit_cost: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub requested_at: Option<String>,
    #[serde(default)]
    pub needed_by: Option<String>,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartRequestPatch {
    #[serde(default)]
    pub status: Option<PartRequestStatus>,
    #[serde(default)]
    pub description: FieldPatch<String>,
    #[serde(default)]
    pub vendor: FieldPatch<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub unit_cost: FieldPatch<f64>,
    #[serde(default)]
    pub currency: FieldPatch<String>,
    #[serde(default)]
    pub requested_at: FieldPatch<String>,
    #[serde(default)]
    pub needed_by: FieldPatch<String>,
    #[serde(default)]
    pub received_at: FieldPatch<String>,
}

/// A fully hydrated event as returned by the read paths. For legacy records
/// the metric fields on `event` carry the synthesized legacy values; the
/// stored row is never touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AogEventDetail {
    pub event: AogEvent,
    pub is_legacy: bool,
    pub part_requests: Vec<PartRequest>,
    pub status_history: Vec<StatusHistoryEntry>,
    pub milestone_history: Vec<MilestoneHistoryEntry>,
    pub cost_audit: Vec<CostAuditEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListedEvent {
    pub event: AogEvent,
    pub is_legacy: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub aircraft_id: Option<i64>,
    #[serde(default)]
    pub fleet_group: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetSpend {
    pub id: i64,
    pub event_id: i64,
    pub budget_line: String,
    pub amount: f64,
    pub recorded_at: String,
    pub recorded_by: String,
}

fn now_ts() -> Result<String, AppError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| {
            AppError::new("CLOCK_FAILED", "Failed to format current time")
                .with_details(e.to_string())
        })
}

fn parse_ts(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

fn apply_metrics(event: &mut AogEvent, m: DowntimeMetrics) {
    // The four metrics (plus the compat mirror) are always overwritten as a
    // group; partial recomputation is not permitted.
    event.technical_time_hours = Some(m.technical_time_hours);
    event.procurement_time_hours = Some(m.procurement_time_hours);
    event.ops_time_hours = Some(m.ops_time_hours);
    event.total_downtime_hours = Some(m.total_downtime_hours);
    event.downtime_hours = Some(m.downtime_hours);
}

fn check_version(event: &AogEvent, expected: Option<i64>) -> Result<(), AppError> {
    if let Some(expected) = expected {
        if event.version != expected {
            return Err(AppError::new(
                "VERSION_CONFLICT",
                format!("AOG event {} was modified concurrently", event.id),
            )
            .with_details(format!(
                "expected_version={expected}; actual_version={}",
                event.version
            )));
        }
    }
    Ok(())
}

/// Create an event in state REPORTED, with `reported_at` defaulted from
/// `detected_at` and stored. Every stored milestone value, the default
/// included, is recorded in milestone history; the ordering invariant is
/// checked with the endpoint defaults applied.
pub fn create_event(
    conn: &mut Connection,
    input: &NewAogEvent,
    actor: &str,
) -> Result<AogEventDetail, AppError> {
    repo::get_aircraft(conn, input.aircraft_id)?;

    // The reported_at default is persisted on the stored row, so a fresh
    // event is never mistaken for a pre-migration record. The
    // up_and_running_at fallback to cleared_at stays a read-time rule.
    let mut milestones = input.milestones.clone();
    if milestones.reported_at.is_none() {
        milestones.reported_at = Some(input.detected_at.clone());
    }

    let effective = timeline::with_defaults(
        &milestones,
        &input.detected_at,
        input.cleared_at.as_deref(),
    );
    timeline::validate_milestone_order(&effective)?;

    let metrics = compute_downtime_metrics(
        &milestones,
        &input.detected_at,
        input.cleared_at.as_deref(),
    );

    let now = now_ts()?;
    let mut event = AogEvent {
        id: 0,
        aircraft_id: input.aircraft_id,
        category: input.category,
        reason_code: input.reason_code.clone(),
        responsible_party: input.responsible_party,
        location: input.location.clone(),
        current_status: AogStatus::Reported,
        blocking_reason: None,
        detected_at: input.detected_at.clone(),
        cleared_at: input.cleared_at.clone(),
        milestones: milestones.clone(),
        technical_time_hours: None,
        procurement_time_hours: None,
        ops_time_hours: None,
        total_downtime_hours: None,
        downtime_hours: None,
        labor_cost: input.labor_cost,
        parts_cost: input.parts_cost,
        external_cost: input.external_cost,
        version: 1,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    apply_metrics(&mut event, metrics);

    let tx = conn.transaction().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to start transaction").with_details(e.to_string())
    })?;

    let id = repo::insert_event(&tx, &event)?;
    for (field, value) in milestones.ordered_pairs() {
        if let Some(value) = value {
            history::append_milestone_entry(&tx, id, field, Some(value), &now, actor)?;
        }
    }

    tx.commit().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to commit transaction").with_details(e.to_string())
    })?;

    get_event(conn, id)
}

/// Partial update. Rejects on milestone-order violation before any write;
/// any timestamp change triggers atomic recomputation of all stored metrics.
/// Milestone and cost changes are recorded in their respective logs.
pub fn update_event(
    conn: &mut Connection,
    id: i64,
    patch: &AogEventPatch,
    actor: &str,
    expected_version: Option<i64>,
) -> Result<AogEventDetail, AppError> {
    let current = repo::get_event(conn, id)?;
    check_version(&current, expected_version)?;

    let mut merged = current.clone();
    merged.reason_code = patch.reason_code.resolve(&current.reason_code);
    merged.responsible_party = patch.responsible_party.resolve(&current.responsible_party);
    merged.location = patch.location.resolve(&current.location);
    if let FieldPatch::Set(v) = &patch.detected_at {
        merged.detected_at = v.clone();
    }
    merged.cleared_at = patch.cleared_at.resolve(&current.cleared_at);
    merged.milestones = Milestones {
        reported_at: patch.reported_at.resolve(&current.milestones.reported_at),
        procurement_requested_at: patch
            .procurement_requested_at
            .resolve(&current.milestones.procurement_requested_at),
        available_at_store_at: patch
            .available_at_store_at
            .resolve(&current.milestones.available_at_store_at),
        issued_back_at: patch
            .issued_back_at
            .resolve(&current.milestones.issued_back_at),
        installation_complete_at: patch
            .installation_complete_at
            .resolve(&current.milestones.installation_complete_at),
        test_start_at: patch.test_start_at.resolve(&current.milestones.test_start_at),
        up_and_running_at: patch
            .up_and_running_at
            .resolve(&current.milestones.up_and_running_at),
    };
    merged.labor_cost = patch.labor_cost.resolve(&current.labor_cost);
    merged.parts_cost = patch.parts_cost.resolve(&current.parts_cost);
    merged.external_cost = patch.external_cost.resolve(&current.external_cost);

    let timestamps_changed = merged.detected_at != current.detected_at
        || merged.cleared_at != current.cleared_at
        || merged.milestones != current.milestones;

    if timestamps_changed {
        let effective = timeline::with_defaults(
            &merged.milestones,
            &merged.detected_at,
            merged.cleared_at.as_deref(),
        );
        timeline::validate_milestone_order(&effective)?;
        let metrics = compute_downtime_metrics(
            &merged.milestones,
            &merged.detected_at,
            merged.cleared_at.as_deref(),
        );
        apply_metrics(&mut merged, metrics);
    }

    let now = now_ts()?;
    merged.version = current.version + 1;
    merged.updated_at = now.clone();

    let tx = conn.transaction().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to start transaction").with_details(e.to_string())
    })?;

    repo::update_event(&tx, &merged)?;

    for (field, fp) in patch.milestone_patches() {
        if fp.is_unchanged() {
            continue;
        }
        let value = match fp {
            FieldPatch::Set(v) => Some(v.as_str()),
            _ => None,
        };
        history::append_milestone_entry(&tx, id, field, value, &now, actor)?;
    }

    for (field, previous, new) in [
        ("labor_cost", current.labor_cost, merged.labor_cost),
        ("parts_cost", current.parts_cost, merged.parts_cost),
        ("external_cost", current.external_cost, merged.external_cost),
    ] {
        if previous != new {
            history::append_cost_entry(&tx, id, field, previous, new, &now, actor)?;
        }
    }

    tx.commit().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to commit transaction").with_details(e.to_string())
    })?;

    get_event(conn, id)
}

/// Transition an event through the workflow graph. Appends a status history
/// entry; first entry into BACK_IN_SERVICE or CLOSED stamps `cleared_at` and
/// recomputes metrics. Entering a non-blocking state clears any stored
/// blocking reason.
pub fn transition_status(
    conn: &mut Connection,
    id: i64,
    req: &TransitionRequest,
) -> Result<AogEventDetail, AppError> {
    let current = repo::get_event(conn, id)?;
    check_version(&current, req.expected_version)?;

    workflow::validate_transition(current.current_status, req.to_status, req.blocking_reason)?;

    let now = now_ts()?;
    let from = current.current_status;
    let mut updated = current.clone();
    updated.current_status = req.to_status;
    updated.blocking_reason = if workflow::requires_blocking_reason(req.to_status) {
        req.blocking_reason
    } else {
        None
    };

    if workflow::stamps_cleared_at(req.to_status) && updated.cleared_at.is_none() {
        updated.cleared_at = Some(now.clone());
        let metrics = compute_downtime_metrics(
            &updated.milestones,
            &updated.detected_at,
            updated.cleared_at.as_deref(),
        );
        apply_metrics(&mut updated, metrics);
    }

    updated.version = current.version + 1;
    updated.updated_at = now.clone();

    let tx = conn.transaction().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to start transaction").with_details(e.to_string())
    })?;

    repo::update_event(&tx, &updated)?;
    history::append_status_entry(
        &tx,
        id,
        from,
        req.to_status,
        &now,
        &req.actor,
        req.actor_role.as_deref(),
        req.notes.as_deref(),
        req.metadata_json.as_deref(),
    )?;

    tx.commit().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to commit transaction").with_details(e.to_string())
    })?;

    get_event(conn, id)
}

/// Read one event with sub-entities and logs. The legacy adapter runs here:
/// pre-migration records get synthesized metrics on the returned copy only.
pub fn get_event(conn: &Connection, id: i64) -> Result<AogEventDetail, AppError> {
    let mut event = repo::get_event(conn, id)?;
    let milestone_history = history::list_milestone_history(conn, id)?;

    let is_legacy = legacy::is_legacy(&event, milestone_history.len());
    if is_legacy {
        let m = legacy::compute_legacy_metrics(&event.detected_at, event.cleared_at.as_deref());
        apply_metrics(&mut event, m);
    }

    Ok(AogEventDetail {
        part_requests: repo::list_part_requests(conn, id)?,
        status_history: history::list_status_history(conn, id)?,
        cost_audit: history::list_cost_audit(conn, id)?,
        milestone_history,
        event,
        is_legacy,
    })
}

fn in_range(effective: &str, from: Option<&str>, to: Option<&str>) -> bool {
    let Some(ts) = parse_ts(effective) else {
        return from.is_none() && to.is_none();
    };
    if let Some(from) = from.and_then(parse_ts) {
        if ts < from {
            return false;
        }
    }
    if let Some(to) = to.and_then(parse_ts) {
        if ts > to {
            return false;
        }
    }
    true
}

/// List events matching the filter, legacy adapter applied to each record.
/// The date range applies to `reported_at` with fallback to `detected_at`,
/// so pre-migration records are not silently excluded.
pub fn list_events(conn: &Connection, filter: &EventFilter) -> Result<Vec<ListedEvent>, AppError> {
    let fleet_lookup: std::collections::BTreeMap<i64, Option<String>> = repo::list_aircraft(conn)?
        .into_iter()
        .map(|a| (a.id, a.fleet_group))
        .collect();
    let milestone_counts = history::milestone_history_counts(conn)?;

    let mut out = Vec::new();
    for mut event in repo::list_events(conn)? {
        if let Some(aircraft_id) = filter.aircraft_id {
            if event.aircraft_id != aircraft_id {
                continue;
            }
        }
        if let Some(fleet_group) = filter.fleet_group.as_deref() {
            let matches = fleet_lookup
                .get(&event.aircraft_id)
                .and_then(|g| g.as_deref())
                .map_or(false, |g| g == fleet_group);
            if !matches {
                continue;
            }
        }
        let effective = event
            .milestones
            .reported_at
            .clone()
            .unwrap_or_else(|| event.detected_at.clone());
        if !in_range(&effective, filter.from.as_deref(), filter.to.as_deref()) {
            continue;
        }

        let milestone_count = milestone_counts.get(&event.id).copied().unwrap_or(0);
        let is_legacy = legacy::is_legacy(&event, milestone_count as usize);
        if is_legacy {
            let m = legacy::compute_legacy_metrics(&event.detected_at, event.cleared_at.as_deref());
            apply_metrics(&mut event, m);
        }
        out.push(ListedEvent { event, is_legacy });
    }

    Ok(out)
}

/// Add a part request to an event. Sub-operations never touch workflow state
/// or metrics.
pub fn add_part_request(
    conn: &Connection,
    event_id: i64,
    input: &NewPartRequest,
) -> Result<PartRequest, AppError> {
    repo::get_event(conn, event_id)?;

    let now = now_ts()?;
    let part = PartRequest {
        id: 0,
        event_id,
        part_number: input.part_number.clone(),
        description: input.description.clone(),
        status: PartRequestStatus::Requested,
        vendor: input.vendor.clone(),
        quantity: input.quantity,
        unit_cost: input.unit_cost,
        currency: input.currency.clone(),
        requested_at: input.requested_at.clone(),
        needed_by: input.needed_by.clone(),
        received_at: None,
        created_at: now.clone(),
        updated_at: now,
    };
    let id = repo::insert_part_request(conn, &part)?;
    repo::get_part_request(conn, id)
}

pub fn update_part_request(
    conn: &Connection,
    part_id: i64,
    patch: &PartRequestPatch,
) -> Result<PartRequest, AppError> {
    let current = repo::get_part_request(conn, part_id)?;

    let mut merged = current.clone();
    if let Some(status) = patch.status {
        // Part lifecycle is forward-only: REQUESTED -> ... -> ISSUED.
        if status.ordinal() < current.status.ordinal() {
            return Err(AppError::new(
                "INVALID_PART_STATUS",
                format!(
                    "Part request status cannot move back from {} to {}",
                    current.status.as_str(),
                    status.as_str()
                ),
            ));
        }
        merged.status = status;
    }
    merged.description = patch.description.resolve(&current.description);
    merged.vendor = patch.vendor.resolve(&current.vendor);
    if let Some(quantity) = patch.quantity {
        merged.quantity = quantity;
    }
    merged.unit_cost = patch.unit_cost.resolve(&current.unit_cost);
    merged.currency = patch.currency.resolve(&current.currency);
    merged.requested_at = patch.requested_at.resolve(&current.requested_at);
    merged.needed_by = patch.needed_by.resolve(&current.needed_by);
    merged.received_at = patch.received_at.resolve(&current.received_at);
    merged.updated_at = now_ts()?;

    repo::update_part_request(conn, &merged)?;
    repo::get_part_request(conn, part_id)
}

/// Link an event's costs to its budget line. Guard order: budget-affecting
/// category, mapping present, no prior spend, non-zero costs.
pub fn link_budget_spend(
    conn: &Connection,
    event_id: i64,
    actor: &str,
) -> Result<BudgetSpend, AppError> {
    let event = repo::get_event(conn, event_id)?;

    if event.category == AogCategory::Scheduled {
        return Err(AppError::new(
            "NOT_BUDGET_AFFECTING",
            "Scheduled events do not spend against the disruption budget",
        )
        .with_details(format!("category={}", event.category.as_str())));
    }

    let budget_line = repo::get_budget_mapping(conn, event.category.as_str())?.ok_or_else(|| {
        AppError::new(
            "MISSING_BUDGET_MAPPING",
            format!("No budget mapping for category {}", event.category.as_str()),
        )
    })?;

    if repo::has_budget_spend(conn, event_id)? {
        return Err(AppError::new(
            "DUPLICATE_SPEND",
            format!("AOG event {event_id} already has a recorded spend"),
        ));
    }

    let amount = event.labor_cost.unwrap_or(0.0)
        + event.parts_cost.unwrap_or(0.0)
        + event.external_cost.unwrap_or(0.0);
    if amount <= 0.0 {
        return Err(AppError::new(
            "NO_COSTS",
            format!("AOG event {event_id} has no costs to spend"),
        ));
    }

    let now = now_ts()?;
    let id = repo::insert_budget_spend(conn, event_id, &budget_line, amount, &now, actor)?;
    Ok(BudgetSpend {
        id,
        event_id,
        budget_line,
        amount,
        recorded_at: now,
        recorded_by: actor.to_string(),
    })
}
