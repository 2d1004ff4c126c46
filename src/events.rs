//! Domain events published to the Broker (§6). Grounded on the teacher's
//! `events.rs` `ChatEvent` enum shape, generalized from an in-process
//! `broadcast::Sender` to wire events with a routing key and a TTL, since
//! here the bus is a real out-of-process broker rather than an in-memory
//! channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::SessionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        session_id: Uuid,
        notify_role_ids: Vec<String>,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated { session_id: Uuid },
    #[serde(rename = "session.deleted")]
    SessionDeleted { session_id: Uuid },
    #[serde(rename = "session.cancelled")]
    SessionCancelled { session_id: Uuid },
    #[serde(rename = "participant.joined")]
    ParticipantJoined { session_id: Uuid, user_id: Uuid },
    #[serde(rename = "participant.left")]
    ParticipantLeft { session_id: Uuid, user_id: Uuid },
    #[serde(rename = "participant.removed")]
    ParticipantRemoved {
        session_id: Uuid,
        user_id: Uuid,
        removed_by: Uuid,
    },
    #[serde(rename = "participant.promoted")]
    ParticipantPromoted { session_id: Uuid, user_id: Uuid },
    #[serde(rename = "reminder.due")]
    ReminderDue {
        session_id: Uuid,
        offset_minutes: i32,
        game_scheduled_at: DateTime<Utc>,
    },
    #[serde(rename = "session.status_changed")]
    SessionStatusChanged {
        session_id: Uuid,
        target_status: SessionStatus,
    },
}

/// Envelope wrapping a `DomainEvent` the way §6 specifies:
/// `{type, data, occurred_at}`. `#[serde(flatten)]` would collapse the
/// `type`/`data` tag-content pair emitted by `DomainEvent`'s own attribute,
/// so the envelope is built by re-serializing and splicing `occurred_at` in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: DomainEvent,
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent) -> Self {
        EventEnvelope {
            event,
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent {
    /// Broker topic routing key (§6).
    pub fn routing_key(&self) -> &'static str {
        match self {
            DomainEvent::SessionCreated { .. } => "game.created",
            DomainEvent::SessionUpdated { .. } => "game.updated",
            DomainEvent::SessionDeleted { .. } => "game.deleted",
            DomainEvent::SessionCancelled { .. } => "game.cancelled",
            DomainEvent::ParticipantJoined { .. } => "participant.joined",
            DomainEvent::ParticipantLeft { .. } => "participant.left",
            DomainEvent::ParticipantRemoved { .. } => "participant.removed",
            DomainEvent::ParticipantPromoted { .. } => "participant.promoted",
            DomainEvent::ReminderDue { .. } => "reminder.due",
            DomainEvent::SessionStatusChanged { .. } => "session.status_changed",
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            DomainEvent::SessionCreated { session_id, .. }
            | DomainEvent::SessionUpdated { session_id }
            | DomainEvent::SessionDeleted { session_id }
            | DomainEvent::SessionCancelled { session_id }
            | DomainEvent::ParticipantJoined { session_id, .. }
            | DomainEvent::ParticipantLeft { session_id, .. }
            | DomainEvent::ParticipantRemoved { session_id, .. }
            | DomainEvent::ParticipantPromoted { session_id, .. }
            | DomainEvent::ReminderDue { session_id, .. }
            | DomainEvent::SessionStatusChanged { session_id, .. } => *session_id,
        }
    }
}
