//! Append-only recorders for the three per-event logs: status history,
//! milestone history, and the cost audit trail.
//!
//! Only INSERT and SELECT statements exist for these tables. An "undo" is a
//! new entry with the updated value, never an edit or a deletion.

use std::collections::BTreeMap;

use rusqlite::{params, Connection};

use crate::domain::{AogStatus, CostAuditEntry, MilestoneHistoryEntry, StatusHistoryEntry};
use crate::error::AppError;

#[allow(clippy::too_many_arguments)]
pub fn append_status_entry(
    conn: &Connection,
    event_id: i64,
    from_status: AogStatus,
    to_status: AogStatus,
    changed_at: &str,
    actor: &str,
    actor_role: Option<&str>,
    notes: Option<&str>,
    metadata_json: Option<&str>,
) -> Result<(), AppError> {
    // Cross-references are stored verbatim but must at least be valid JSON,
    // or downstream consumers of the log cannot decode them.
    if let Some(raw) = metadata_json {
        serde_json::from_str::<serde_json::Value>(raw).map_err(|e| {
            AppError::new("INVALID_METADATA", "metadata_json must be valid JSON")
                .with_details(e.to_string())
        })?;
    }

    conn.execute(
        r#"
      INSERT INTO status_history
        (event_id, from_status, to_status, changed_at, actor, actor_role, notes, metadata_json)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
      "#,
        params![
            event_id,
            from_status,
            to_status,
            changed_at,
            actor,
            actor_role,
            notes,
            metadata_json
        ],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to append status history entry")
            .with_details(e.to_string())
    })?;
    Ok(())
}

pub fn list_status_history(
    conn: &Connection,
    event_id: i64,
) -> Result<Vec<StatusHistoryEntry>, AppError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT id, event_id, from_status, to_status, changed_at, actor, actor_role, notes, metadata_json
      FROM status_history
      WHERE event_id = ?1
      ORDER BY changed_at ASC, id ASC
      "#,
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare status history query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map([event_id], |row| {
            Ok(StatusHistoryEntry {
                id: row.get(0)?,
                event_id: row.get(1)?,
                from_status: row.get(2)?,
                to_status: row.get(3)?,
                changed_at: row.get(4)?,
                actor: row.get(5)?,
                actor_role: row.get(6)?,
                notes: row.get(7)?,
                metadata_json: row.get(8)?,
            })
        })
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query status history")
                .with_details(e.to_string())
        })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode status history row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

/// Record a milestone value set or changed. `value_ts` is the milestone's own
/// (possibly backdated) timestamp, or NULL when the milestone was cleared;
/// `recorded_at`/`recorded_by` capture the recording action.
pub fn append_milestone_entry(
    conn: &Connection,
    event_id: i64,
    milestone: &str,
    value_ts: Option<&str>,
    recorded_at: &str,
    recorded_by: &str,
) -> Result<(), AppError> {
    conn.execute(
        r#"
      INSERT INTO milestone_history (event_id, milestone, value_ts, recorded_at, recorded_by)
      VALUES (?1, ?2, ?3, ?4, ?5)
      "#,
        params![event_id, milestone, value_ts, recorded_at, recorded_by],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to append milestone history entry")
            .with_details(e.to_string())
    })?;
    Ok(())
}

pub fn list_milestone_history(
    conn: &Connection,
    event_id: i64,
) -> Result<Vec<MilestoneHistoryEntry>, AppError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT id, event_id, milestone, value_ts, recorded_at, recorded_by
      FROM milestone_history
      WHERE event_id = ?1
      ORDER BY recorded_at ASC, id ASC
      "#,
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare milestone history query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map([event_id], |row| {
            Ok(MilestoneHistoryEntry {
                id: row.get(0)?,
                event_id: row.get(1)?,
                milestone: row.get(2)?,
                value_ts: row.get(3)?,
                recorded_at: row.get(4)?,
                recorded_by: row.get(5)?,
            })
        })
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query milestone history")
                .with_details(e.to_string())
        })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode milestone history row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

/// Milestone history entry counts for every event in one query. Events with
/// no entries are simply absent from the map.
pub fn milestone_history_counts(conn: &Connection) -> Result<BTreeMap<i64, i64>, AppError> {
    let mut stmt = conn
        .prepare("SELECT event_id, COUNT(*) FROM milestone_history GROUP BY event_id")
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare milestone count query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to count milestone history")
                .with_details(e.to_string())
        })?;

    let mut out = BTreeMap::new();
    for r in rows {
        let (event_id, count) = r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode milestone count row")
                .with_details(e.to_string())
        })?;
        out.insert(event_id, count);
    }
    Ok(out)
}

pub fn append_cost_entry(
    conn: &Connection,
    event_id: i64,
    field: &str,
    previous_value: Option<f64>,
    new_value: Option<f64>,
    changed_at: &str,
    changed_by: &str,
) -> Result<(), AppError> {
    conn.execute(
        r#"
      INSERT INTO cost_audit (event_id, field, previous_value, new_value, changed_at, changed_by)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6)
      "#,
        params![event_id, field, previous_value, new_value, changed_at, changed_by],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to append cost audit entry")
            .with_details(e.to_string())
    })?;
    Ok(())
}

pub fn list_cost_audit(conn: &Connection, event_id: i64) -> Result<Vec<CostAuditEntry>, AppError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT id, event_id, field, previous_value, new_value, changed_at, changed_by
      FROM cost_audit
      WHERE event_id = ?1
      ORDER BY changed_at ASC, id ASC
      "#,
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to prepare cost audit query")
                .with_details(e.to_string())
        })?;

    let rows = stmt
        .query_map([event_id], |row| {
            Ok(CostAuditEntry {
                id: row.get(0)?,
                event_id: row.get(1)?,
                field: row.get(2)?,
                previous_value: row.get(3)?,
                new_value: row.get(4)?,
                changed_at: row.get(5)?,
                changed_by: row.get(6)?,
            })
        })
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to query cost audit trail")
                .with_details(e.to_string())
        })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to decode cost audit row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}
