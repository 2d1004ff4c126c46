//! Schedule Materializer (§4.D): on every session mutation, (re)computes the
//! set of future reminder + status-transition instants and reconciles them
//! into `notification_schedule`.
//!
//! The expected-set computation and the diff against existing rows are pure
//! functions, unit tested without a database. `materialize` itself drives
//! them against `Store` inside the caller's transaction — grounded on the
//! teacher's habit (`db.rs`'s repeated idempotent `ALTER TABLE ... ADD
//! COLUMN`) of treating "desired schema state" as something to reconcile
//! against, not something to assume.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Channel, NotificationSchedule, ScheduleKind, Session, Tenant};
use crate::store::Store;

const DEFAULT_OFFSETS: &[i32] = &[60, 15];

/// One member of the expected schedule set, keyed for diffing by
/// `(kind, due_at, payload)` — canonical-form comparison per §4.D step 3.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedRow {
    pub kind: ScheduleKind,
    pub due_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Resolves the effective reminder offsets by inheritance: session → channel
/// → tenant → `[60, 15]` (§4.D step 1).
pub fn resolve_offsets(session: &Session, channel: &Channel, tenant: &Tenant) -> Vec<i32> {
    if let Some(offsets) = &session.reminder_offsets {
        return offsets.clone();
    }
    if let Some(offsets) = &channel.reminder_offsets_override {
        return offsets.clone();
    }
    if !tenant.default_reminder_offsets.is_empty() {
        return tenant.default_reminder_offsets.clone();
    }
    DEFAULT_OFFSETS.to_vec()
}

/// Computes the full expected set of due instants for a session (§4.D step
/// 2). `now` is passed in rather than read from the clock so this stays a
/// pure function.
pub fn expected_rows(
    session: &Session,
    offsets: &[i32],
    now: DateTime<Utc>,
) -> Vec<ExpectedRow> {
    let mut rows = Vec::new();

    let mut distinct_offsets = offsets.to_vec();
    distinct_offsets.sort_unstable();
    distinct_offsets.dedup();

    for offset in distinct_offsets {
        let due_at = session.scheduled_at - chrono::Duration::minutes(offset as i64);
        if due_at > now {
            rows.push(ExpectedRow {
                kind: ScheduleKind::Reminder,
                due_at,
                payload: json!({ "offset_minutes": offset }),
            });
        }
    }

    rows.push(ExpectedRow {
        kind: ScheduleKind::StatusTransition,
        due_at: session.scheduled_at,
        payload: json!({ "target_status": "IN_PROGRESS" }),
    });
    rows.push(ExpectedRow {
        kind: ScheduleKind::StatusTransition,
        due_at: session.end_at(),
        payload: json!({ "target_status": "COMPLETED" }),
    });

    rows
}

/// Diffs `expected` against `existing` non-dispatched rows, returning the
/// ids to delete and the expected rows still missing. Pure, order
/// independent, and idempotent: diffing `expected` against its own
/// reconciled output yields no changes (§8.2, §4.D policy).
pub fn diff(
    existing: &[NotificationSchedule],
    expected: &[ExpectedRow],
) -> (Vec<Uuid>, Vec<ExpectedRow>) {
    let mut remaining_expected: Vec<ExpectedRow> = expected.to_vec();
    let mut to_delete = Vec::new();

    for row in existing {
        let key = ExpectedRow {
            kind: row.kind,
            due_at: row.due_at,
            payload: row.payload.clone(),
        };
        if let Some(pos) = remaining_expected.iter().position(|e| *e == key) {
            remaining_expected.remove(pos);
        } else {
            to_delete.push(row.id);
        }
    }

    (to_delete, remaining_expected)
}

/// Reconciles the schedule for `session` inside `tx` (§4.D contract: called
/// synchronously in the transaction that created/mutated the session, so a
/// materialization failure rolls back the whole mutation).
#[instrument(skip(store, tx, session, channel, tenant), fields(session_id = %session.id))]
pub async fn materialize(
    store: &Store,
    tx: &mut Transaction<'_, Postgres>,
    session: &Session,
    channel: &Channel,
    tenant: &Tenant,
    now: DateTime<Utc>,
) -> Result<()> {
    if session.status.is_terminal() {
        store.delete_all_non_dispatched(tx, session.id).await?;
        return Ok(());
    }

    let offsets = resolve_offsets(session, channel, tenant);
    let expected = expected_rows(session, &offsets, now);
    let existing = store.non_dispatched_schedule_rows_tx(tx, session.id).await?;
    let (to_delete, to_insert) = diff(&existing, &expected);

    store.delete_schedule_rows(tx, &to_delete).await?;
    for row in to_insert {
        store
            .insert_schedule_row(
                tx,
                session.id,
                row.kind,
                row.due_at,
                session.scheduled_at,
                row.payload,
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use chrono::TimeZone;

    fn base_session(scheduled_at: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            channel_id: Uuid::nil(),
            host_user_id: Uuid::nil(),
            title: "Game night".into(),
            description: None,
            signup_instructions: None,
            scheduled_at,
            duration_minutes: 60,
            status: SessionStatus::Scheduled,
            min_players: None,
            max_players: Some(4),
            reminder_offsets: None,
            notify_role_ids: vec![],
            announcement_message_id: None,
            announcement_channel_external_id: None,
            created_at: scheduled_at,
        }
    }

    #[test]
    fn expected_rows_skips_past_due_reminders_but_keeps_status_transitions() {
        let scheduled_at = Utc.with_ymd_and_hms(2030, 1, 1, 20, 0, 0).unwrap();
        let now = scheduled_at - chrono::Duration::minutes(30);
        let session = base_session(scheduled_at);

        let rows = expected_rows(&session, &[60, 15], now);

        // the 60-minute reminder is still in the future at t-30m; the
        // 15-minute reminder is not.
        let reminders: Vec<_> = rows
            .iter()
            .filter(|r| r.kind == ScheduleKind::Reminder)
            .collect();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].payload["offset_minutes"], 60);

        let transitions: Vec<_> = rows
            .iter()
            .filter(|r| r.kind == ScheduleKind::StatusTransition)
            .collect();
        assert_eq!(transitions.len(), 2);
    }

    #[test]
    fn diff_is_idempotent() {
        let scheduled_at = Utc.with_ymd_and_hms(2030, 1, 1, 20, 0, 0).unwrap();
        let now = scheduled_at - chrono::Duration::hours(2);
        let session = base_session(scheduled_at);
        let expected = expected_rows(&session, &[60, 15], now);

        let existing: Vec<NotificationSchedule> = expected
            .iter()
            .map(|e| NotificationSchedule {
                id: Uuid::new_v4(),
                session_id: session.id,
                kind: e.kind,
                due_at: e.due_at,
                game_scheduled_at: session.scheduled_at,
                payload: e.payload.clone(),
                dispatched_at: None,
            })
            .collect();

        let (to_delete, to_insert) = diff(&existing, &expected);
        assert!(to_delete.is_empty());
        assert!(to_insert.is_empty());
    }

    #[test]
    fn diff_deletes_stale_and_inserts_missing() {
        let scheduled_at = Utc.with_ymd_and_hms(2030, 1, 1, 20, 0, 0).unwrap();
        let stale = NotificationSchedule {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            kind: ScheduleKind::Reminder,
            due_at: scheduled_at - chrono::Duration::minutes(1440),
            game_scheduled_at: scheduled_at,
            payload: json!({ "offset_minutes": 1440 }),
            dispatched_at: None,
        };
        let expected = vec![ExpectedRow {
            kind: ScheduleKind::Reminder,
            due_at: scheduled_at - chrono::Duration::minutes(60),
            payload: json!({ "offset_minutes": 60 }),
        }];

        let (to_delete, to_insert) = diff(&[stale.clone()], &expected);
        assert_eq!(to_delete, vec![stale.id]);
        assert_eq!(to_insert.len(), 1);
    }

    #[test]
    fn reschedule_reuses_rows_unaffected_by_the_change() {
        let scheduled_at = Utc.with_ymd_and_hms(2030, 1, 1, 20, 0, 0).unwrap();
        let now = scheduled_at - chrono::Duration::hours(3);
        let session = base_session(scheduled_at);
        let before = expected_rows(&session, &[60, 15], now);

        // Host moves the game back by 30 minutes, offsets unchanged.
        let mut moved = session.clone();
        moved.scheduled_at = scheduled_at + chrono::Duration::minutes(30);
        let after = expected_rows(&moved, &[60, 15], now);

        let existing: Vec<NotificationSchedule> = before
            .iter()
            .map(|e| NotificationSchedule {
                id: Uuid::new_v4(),
                session_id: session.id,
                kind: e.kind,
                due_at: e.due_at,
                game_scheduled_at: session.scheduled_at,
                payload: e.payload.clone(),
                dispatched_at: None,
            })
            .collect();

        let (to_delete, to_insert) = diff(&existing, &after);
        // every due_at shifted, so every row is considered stale and
        // replaced — there's nothing to reuse when the time itself changes.
        assert_eq!(to_delete.len(), existing.len());
        assert_eq!(to_insert.len(), after.len());
    }
}
