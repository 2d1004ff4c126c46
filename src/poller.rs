//! Generic Poller Daemon (§4.E): one loop parameterized by `(kind,
//! event-builder)`, run as a separate binary per event family. Grounded on
//! the teacher's `retention.rs` `spawn_retention_task` loop shape
//! (sleep/tick/sweep, with the per-tick work factored out of the loop that
//! calls it repeatedly) generalized per design note §9 ("one generic
//! poller, not two copies") instead of copy-pasting the loop per event kind.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::broker::Broker;
use crate::error::Result;
use crate::events::DomainEvent;
use crate::models::{NotificationSchedule, ScheduleKind};
use crate::store::Store;

/// Pure function: schedule row → (event, ttl in ms). `None` TTL means the
/// event must not expire (§4.E: status transitions are "critical; must not
/// expire").
pub type EventBuilder = fn(&NotificationSchedule) -> (DomainEvent, Option<u64>);

pub fn reminder_builder(row: &NotificationSchedule) -> (DomainEvent, Option<u64>) {
    let offset_minutes = row
        .payload
        .get("offset_minutes")
        .and_then(|v| v.as_i64())
        .unwrap_or(0) as i32;
    let event = DomainEvent::ReminderDue {
        session_id: row.session_id,
        offset_minutes,
        game_scheduled_at: row.game_scheduled_at,
    };
    let ttl_ms = (row.game_scheduled_at - chrono::Utc::now())
        .num_milliseconds()
        .max(0) as u64;
    (event, Some(ttl_ms))
}

pub fn status_transition_builder(row: &NotificationSchedule) -> (DomainEvent, Option<u64>) {
    let target_status = row
        .payload
        .get("target_status")
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok())
        .unwrap_or(crate::models::SessionStatus::InProgress);
    let event = DomainEvent::SessionStatusChanged {
        session_id: row.session_id,
        target_status,
    };
    (event, None)
}

/// Runs one claim-build-publish-mark tick for `kind` (§4.E main loop). The
/// whole tick is one transaction: a publish failure rolls the transaction
/// back, leaving the row undispatched for the next tick — there is no
/// per-row retry counter, only the `dispatched_at IS NULL` predicate.
#[instrument(skip(store, broker, builder), fields(kind = ?kind))]
pub async fn run_tick(
    store: &Store,
    broker: &Broker,
    kind: ScheduleKind,
    builder: EventBuilder,
    batch_size: i64,
) -> Result<usize> {
    let mut tx = store.begin_bound(None).await?;
    let rows = store.claim_due_rows(&mut tx, kind, batch_size).await?;
    let claimed = rows.len();

    for row in &rows {
        let (event, ttl_ms) = builder(row);
        broker.publish(&event, ttl_ms).await?;
        store.mark_dispatched(&mut tx, row.id).await?;
    }

    tx.commit().await?;
    Ok(claimed)
}

/// Drains the dead-letter queue on a slower cadence than the main tick
/// (§4.E: default every 900s), republishing messages with TTL stripped.
#[instrument(skip(broker))]
pub async fn drain_dlq(broker: &Broker, cap: u16) -> Result<usize> {
    broker.drain_dlq_once(cap).await
}

/// Runs the poller forever: a tick every `tick_interval`, a DLQ drain every
/// `dlq_interval`. Honors `shutdown`: finishes the current tick (commit or
/// rollback already happened inside `run_tick`), then exits (§5 cancellation
/// contract).
pub async fn run_forever(
    store: &Store,
    broker: &Broker,
    kind: ScheduleKind,
    builder: EventBuilder,
    batch_size: i64,
    tick_interval: Duration,
    dlq_interval: Duration,
    dlq_cap: u16,
    shutdown: Arc<AtomicBool>,
) {
    let mut tick = tokio::time::interval(tick_interval);
    let mut dlq_tick = tokio::time::interval(dlq_interval);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("poller shutting down");
            break;
        }
        tokio::select! {
            _ = tick.tick() => {
                match run_tick(store, broker, kind, builder, batch_size).await {
                    Ok(n) if n > 0 => info!(claimed = n, "poller tick dispatched rows"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "poller tick failed, row(s) remain undispatched"),
                }
            }
            _ = dlq_tick.tick() => {
                match drain_dlq(broker, dlq_cap).await {
                    Ok(n) if n > 0 => info!(drained = n, "dlq drain republished messages"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "dlq drain failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn row(game_scheduled_at: chrono::DateTime<chrono::Utc>, payload: serde_json::Value) -> NotificationSchedule {
        NotificationSchedule {
            id: Uuid::from_u128(1),
            session_id: Uuid::from_u128(2),
            kind: ScheduleKind::Reminder,
            due_at: game_scheduled_at,
            game_scheduled_at,
            payload,
            dispatched_at: None,
        }
    }

    #[test]
    fn reminder_builder_ttl_matches_time_to_game() {
        let scheduled = chrono::Utc::now() + chrono::Duration::minutes(30);
        let r = row(scheduled, serde_json::json!({ "offset_minutes": 15 }));
        let (event, ttl_ms) = reminder_builder(&r);
        match event {
            DomainEvent::ReminderDue { offset_minutes, session_id, .. } => {
                assert_eq!(offset_minutes, 15);
                assert_eq!(session_id, r.session_id);
            }
            _ => panic!("expected ReminderDue"),
        }
        let ttl = ttl_ms.expect("reminders expire");
        // allow slack for wall-clock time elapsed between building `scheduled` and calling the builder
        assert!(ttl <= 30 * 60 * 1000 && ttl > 29 * 60 * 1000);
    }

    #[test]
    fn reminder_builder_clamps_ttl_at_zero_for_past_due_rows() {
        let scheduled = chrono::Utc::now() - chrono::Duration::minutes(5);
        let r = row(scheduled, serde_json::json!({ "offset_minutes": 10 }));
        let (_, ttl_ms) = reminder_builder(&r);
        assert_eq!(ttl_ms, Some(0));
    }

    #[test]
    fn reminder_builder_defaults_offset_when_missing() {
        let r = row(chrono::Utc::now(), serde_json::json!({}));
        let (event, _) = reminder_builder(&r);
        match event {
            DomainEvent::ReminderDue { offset_minutes, .. } => assert_eq!(offset_minutes, 0),
            _ => panic!("expected ReminderDue"),
        }
    }

    #[test]
    fn status_transition_builder_never_expires() {
        let r = row(
            chrono::Utc::now(),
            serde_json::json!({ "target_status": "IN_PROGRESS" }),
        );
        let (event, ttl_ms) = status_transition_builder(&r);
        assert!(ttl_ms.is_none());
        match event {
            DomainEvent::SessionStatusChanged { session_id, target_status } => {
                assert_eq!(session_id, r.session_id);
                assert_eq!(target_status, crate::models::SessionStatus::InProgress);
            }
            _ => panic!("expected SessionStatusChanged"),
        }
    }

    #[test]
    fn status_transition_builder_falls_back_when_target_status_missing() {
        let r = row(chrono::Utc::now(), serde_json::json!({}));
        let (event, _) = status_transition_builder(&r);
        match event {
            DomainEvent::SessionStatusChanged { target_status, .. } => {
                assert_eq!(target_status, crate::models::SessionStatus::InProgress);
            }
            _ => panic!("expected SessionStatusChanged"),
        }
    }
}
