use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::domain::{AogEvent, Milestones, PartRequest};
use crate::error::AppError;

/// Read-only aircraft registry entry (id -> registration / fleet group).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Aircraft {
    pub id: i64,
    pub registration: String,
    pub fleet_group: Option<String>,
    pub model: Option<String>,
}

const EVENT_COLUMNS: &str = r#"
      id, aircraft_id, category, reason_code, responsible_party, location,
      current_status, blocking_reason, detected_at, cleared_at,
      reported_at, procurement_requested_at, available_at_store_at, issued_back_at,
      installation_complete_at, test_start_at, up_and_running_at,
      technical_time_hours, procurement_time_hours, ops_time_hours,
      total_downtime_hours, downtime_hours,
      labor_cost, parts_cost, external_cost,
      version, created_at, updated_at
"#;

fn map_event_row(row: &Row<'_>) -> rusqlite::Result<AogEvent> {
    Ok(AogEvent {
        id: row.get(0)?,
        aircraft_id: row.get(1)?,
        category: row.get(2)?,
        reason_code: row.get(3)?,
        responsible_party: row.get(4)?,
        location: row.get(5)?,
        current_status: row.get(6)?,
        blocking_reason: row.get(7)?,
        detected_at: row.get(8)?,
        cleared_at: row.get(9)?,
        milestones: Milestones {
            reported_at: row.get(10)?,
            procurement_requested_at: row.get(11)?,
            available_at_store_at: row.get(12)?,
            issued_back_at: row.get(13)?,
            installation_complete_at: row.get(14)?,
            test_start_at: row.get(15)?,
            up_and_running_at: row.get(16)?,
        },
        technical_time_hours: row.get(17)?,
        procurement_time_hours: row.get(18)?,
        ops_time_hours: row.get(19)?,
        total_downtime_hours: row.get(20)?,
        downtime_hours: row.get(21)?,
        labor_cost: row.get(22)?,
        parts_cost: row.get(23)?,
        external_cost: row.get(24)?,
        version: row.get(25)?,
        created_at: row.get(26)?,
        updated_at: row.get(27)?,
    })
}

pub fn insert_aircraft(
    conn: &Connection,
    registration: &str,
    fleet_group: Option<&str>,
    model: Option<&str>,
) -> Result<i64, AppError> {
    conn.execute(
        "INSERT INTO aircraft (registration, fleet_group, model) VALUES (?1, ?2, ?3)",
        params![registration, fleet_group, model],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to insert aircraft").with_details(e.to_string())
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn get_aircraft(conn: &Connection, id: i64) -> Result<Aircraft, AppError> {
    conn.query_row(
        "SELECT id, registration, fleet_group, model FROM aircraft WHERE id = ?1",
        [id],
        |row| {
            Ok(Aircraft {
                id: row.get(0)?,
                registration: row.get(1)?,
                fleet_group: row.get(2)?,
                model: row.get(3)?,
            })
        },
    )
    .map_err(|e| {
        AppError::not_found("AIRCRAFT_NOT_FOUND", "Aircraft", id).with_details(e.to_string())
    })
}

pub fn list_aircraft(conn: &Connection) -> Result<Vec<Aircraft>, AppError> {
    let mut stmt = conn
        .prepare("SELECT id, registration, fleet_group, model FROM aircraft ORDER BY registration ASC")
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare aircraft query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map([], |row| {
            Ok(Aircraft {
                id: row.get(0)?,
                registration: row.get(1)?,
                fleet_group: row.get(2)?,
                model: row.get(3)?,
            })
        })
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query aircraft").with_details(e.to_string())
        })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode aircraft row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

/// Insert a new event row; the `id` field of the argument is ignored.
pub fn insert_event(conn: &Connection, event: &AogEvent) -> Result<i64, AppError> {
    conn.execute(
        r#"
      INSERT INTO aog_events
        (aircraft_id, category, reason_code, responsible_party, location,
         current_status, blocking_reason, detected_at, cleared_at,
         reported_at, procurement_requested_at, available_at_store_at, issued_back_at,
         installation_complete_at, test_start_at, up_and_running_at,
         technical_time_hours, procurement_time_hours, ops_time_hours,
         total_downtime_hours, downtime_hours,
         labor_cost, parts_cost, external_cost,
         version, created_at, updated_at)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
              ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)
      "#,
        params![
            event.aircraft_id,
            event.category,
            event.reason_code,
            event.responsible_party,
            event.location,
            event.current_status,
            event.blocking_reason,
            event.detected_at,
            event.cleared_at,
            event.milestones.reported_at,
            event.milestones.procurement_requested_at,
            event.milestones.available_at_store_at,
            event.milestones.issued_back_at,
            event.milestones.installation_complete_at,
            event.milestones.test_start_at,
            event.milestones.up_and_running_at,
            event.technical_time_hours,
            event.procurement_time_hours,
            event.ops_time_hours,
            event.total_downtime_hours,
            event.downtime_hours,
            event.labor_cost,
            event.parts_cost,
            event.external_cost,
            event.version,
            event.created_at,
            event.updated_at,
        ],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to insert AOG event").with_details(e.to_string())
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn get_event(conn: &Connection, id: i64) -> Result<AogEvent, AppError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM aog_events WHERE id = ?1");
    conn.query_row(&sql, [id], map_event_row)
        .map_err(|e| AppError::not_found("AOG_NOT_FOUND", "AOG event", id).with_details(e.to_string()))
}

pub fn list_events(conn: &Connection) -> Result<Vec<AogEvent>, AppError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM aog_events ORDER BY COALESCE(reported_at, detected_at) ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to prepare events query")
            .with_details(e.to_string())
    })?;

    let rows = stmt.query_map([], map_event_row).map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to query AOG events").with_details(e.to_string())
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode AOG event row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

/// Overwrite every mutable column of an event row, keyed by `event.id`.
/// Metric columns are always written as a group; partial metric writes are
/// not expressible through this function.
pub fn update_event(conn: &Connection, event: &AogEvent) -> Result<(), AppError> {
    let n = conn
        .execute(
            r#"
      UPDATE aog_events SET
        category = ?2, reason_code = ?3, responsible_party = ?4, location = ?5,
        current_status = ?6, blocking_reason = ?7, detected_at = ?8, cleared_at = ?9,
        reported_at = ?10, procurement_requested_at = ?11, available_at_store_at = ?12,
        issued_back_at = ?13, installation_complete_at = ?14, test_start_at = ?15,
        up_and_running_at = ?16,
        technical_time_hours = ?17, procurement_time_hours = ?18, ops_time_hours = ?19,
        total_downtime_hours = ?20, downtime_hours = ?21,
        labor_cost = ?22, parts_cost = ?23, external_cost = ?24,
        version = ?25, updated_at = ?26
      WHERE id = ?1
      "#,
            params![
                event.id,
                event.category,
                event.reason_code,
                event.responsible_party,
                event.location,
                event.current_status,
                event.blocking_reason,
                event.detected_at,
                event.cleared_at,
                event.milestones.reported_at,
                event.milestones.procurement_requested_at,
                event.milestones.available_at_store_at,
                event.milestones.issued_back_at,
                event.milestones.installation_complete_at,
                event.milestones.test_start_at,
                event.milestones.up_and_running_at,
                event.technical_time_hours,
                event.procurement_time_hours,
                event.ops_time_hours,
                event.total_downtime_hours,
                event.downtime_hours,
                event.labor_cost,
                event.parts_cost,
                event.external_cost,
                event.version,
                event.updated_at,
            ],
        )
        .map_err(|e| {
            AppError::new("DB_WRITE_FAILED", "Failed to update AOG event")
                .with_details(e.to_string())
        })?;

    if n == 0 {
        return Err(AppError::not_found("AOG_NOT_FOUND", "AOG event", event.id));
    }
    Ok(())
}

pub fn insert_part_request(conn: &Connection, part: &PartRequest) -> Result<i64, AppError> {
    conn.execute(
        r#"
      INSERT INTO part_requests
        (event_id, part_number, description, status, vendor, quantity, unit_cost,
         currency, requested_at, needed_by, received_at, created_at, updated_at)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
      "#,
        params![
            part.event_id,
            part.part_number,
            part.description,
            part.status,
            part.vendor,
            part.quantity,
            part.unit_cost,
            part.currency,
            part.requested_at,
            part.needed_by,
            part.received_at,
            part.created_at,
            part.updated_at,
        ],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to insert part request")
            .with_details(e.to_string())
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn get_part_request(conn: &Connection, id: i64) -> Result<PartRequest, AppError> {
    conn.query_row(
        r#"
      SELECT id, event_id, part_number, description, status, vendor, quantity,
             unit_cost, currency, requested_at, needed_by, received_at, created_at, updated_at
      FROM part_requests
      WHERE id = ?1
      "#,
        [id],
        |row| {
            Ok(PartRequest {
                id: row.get(0)?,
                event_id: row.get(1)?,
                part_number: row.get(2)?,
                description: row.get(3)?,
                status: row.get(4)?,
                vendor: row.get(5)?,
                quantity: row.get(6)?,
                unit_cost: row.get(7)?,
                currency: row.get(8)?,
                requested_at: row.get(9)?,
                needed_by: row.get(10)?,
                received_at: row.get(11)?,
                created_at: row.get(12)?,
                updated_at: row.get(13)?,
            })
        },
    )
    .map_err(|e| {
        AppError::not_found("PART_NOT_FOUND", "Part request", id).with_details(e.to_string())
    })
}

pub fn list_part_requests(conn: &Connection, event_id: i64) -> Result<Vec<PartRequest>, AppError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT id, event_id, part_number, description, status, vendor, quantity,
             unit_cost, currency, requested_at, needed_by, received_at, created_at, updated_at
      FROM part_requests
      WHERE event_id = ?1
      ORDER BY created_at ASC, id ASC
      "#,
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare part requests query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map([event_id], |row| {
            Ok(PartRequest {
                id: row.get(0)?,
                event_id: row.get(1)?,
                part_number: row.get(2)?,
                description: row.get(3)?,
                status: row.get(4)?,
                vendor: row.get(5)?,
                quantity: row.get(6)?,
                unit_cost: row.get(7)?,
                currency: row.get(8)?,
                requested_at: row.get(9)?,
                needed_by: row.get(10)?,
                received_at: row.get(11)?,
                created_at: row.get(12)?,
                updated_at: row.get(13)?,
            })
        })
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query part requests")
                .with_details(e.to_string())
        })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode part request row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

pub fn update_part_request(conn: &Connection, part: &PartRequest) -> Result<(), AppError> {
    let n = conn
        .execute(
            r#"
      UPDATE part_requests SET
        part_number = ?2, description = ?3, status = ?4, vendor = ?5, quantity = ?6,
        unit_cost = ?7, currency = ?8, requested_at = ?9, needed_by = ?10,
        received_at = ?11, updated_at = ?12
      WHERE id = ?1
      "#,
            params![
                part.id,
                part.part_number,
                part.description,
                part.status,
                part.vendor,
                part.quantity,
                part.unit_cost,
                part.currency,
                part.requested_at,
                part.needed_by,
                part.received_at,
                part.updated_at,
            ],
        )
        .map_err(|e| {
            AppError::new("DB_WRITE_FAILED", "Failed to update part request")
                .with_details(e.to_string())
        })?;

    if n == 0 {
        return Err(AppError::not_found("PART_NOT_FOUND", "Part request", part.id));
    }
    Ok(())
}

pub fn upsert_budget_mapping(
    conn: &Connection,
    category: &str,
    budget_line: &str,
) -> Result<(), AppError> {
    conn.execute(
        r#"
      INSERT INTO budget_mappings (category, budget_line) VALUES (?1, ?2)
      ON CONFLICT(category) DO UPDATE SET budget_line = excluded.budget_line
      "#,
        params![category, budget_line],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to upsert budget mapping")
            .with_details(e.to_string())
    })?;
    Ok(())
}

pub fn get_budget_mapping(conn: &Connection, category: &str) -> Result<Option<String>, AppError> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT budget_line FROM budget_mappings WHERE category = ?1",
        [category],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to query budget mapping")
            .with_details(e.to_string())
    })
}

pub fn has_budget_spend(conn: &Connection, event_id: i64) -> Result<bool, AppError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM budget_spends WHERE event_id = ?1",
            [event_id],
            |row| row.get(0),
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query budget spends")
                .with_details(e.to_string())
        })?;
    Ok(count > 0)
}

pub fn insert_budget_spend(
    conn: &Connection,
    event_id: i64,
    budget_line: &str,
    amount: f64,
    recorded_at: &str,
    recorded_by: &str,
) -> Result<i64, AppError> {
    conn.execute(
        r#"
      INSERT INTO budget_spends (event_id, budget_line, amount, recorded_at, recorded_by)
      VALUES (?1, ?2, ?3, ?4, ?5)
      "#,
        params![event_id, budget_line, amount, recorded_at, recorded_by],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to insert budget spend")
            .with_details(e.to_string())
    })?;
    Ok(conn.last_insert_rowid())
}
