//! Event Consumer / Chat Announcer (§4.F): translates typed events into
//! chat-surface side effects, reconciling from authoritative Store state on
//! every event. Owns the cache-backed refresh throttle with trailing-edge
//! semantics and the manual ack/nack delivery discipline.
//!
//! Grounded on the teacher's `webhooks.rs` `spawn_dispatcher` loop shape
//! (subscribe, match event, act), but the delivery discipline is new: the
//! teacher's dispatcher is fire-and-forget (`eprintln!` on failure, no
//! ack/nack concept at all) — §4.F requires manual ack explicitly ("never
//! uses auto-ack"), so that part has no teacher counterpart and is built
//! from the spec directly. The trailing-refresh cancel/reschedule state
//! machine is grounded on `routes/mod.rs`'s `PresenceGuard` Drop-based
//! cleanup idiom, generalized into a scheduled-flag guard.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use futures_util::StreamExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::arbiter::arbiter;
use crate::broker::Broker;
use crate::cache::Cache;
use crate::chat_client::ChatClient;
use crate::error::{Error, Result};
use crate::events::{DomainEvent, EventEnvelope};
use crate::models::SessionStatus;
use crate::store::Store;

pub struct Announcer {
    store: Arc<Store>,
    broker: Arc<Broker>,
    cache: Arc<Cache>,
    chat: Arc<dyn ChatClient>,
    trailing_scheduled: Arc<StdMutex<HashSet<Uuid>>>,
}

impl Announcer {
    pub fn new(
        store: Arc<Store>,
        broker: Arc<Broker>,
        cache: Arc<Cache>,
        chat: Arc<dyn ChatClient>,
    ) -> Arc<Self> {
        Arc::new(Announcer {
            store,
            broker,
            cache,
            chat,
            trailing_scheduled: Arc::new(StdMutex::new(HashSet::new())),
        })
    }

    /// Consumes from `queue_name` forever, dispatching each delivery through
    /// `handle_event` and translating the outcome into ack / nack-to-DLQ
    /// (§4.F delivery discipline).
    pub async fn run(self: Arc<Self>, queue_name: &str) -> Result<()> {
        let mut consumer = self.broker.consume(queue_name, "announcer", 16).await?;
        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "consumer stream error");
                    continue;
                }
            };
            let envelope: Result<EventEnvelope> = serde_json::from_slice(&delivery.data)
                .map_err(|e| Error::Invariant(e.to_string()));

            let outcome = match envelope {
                Ok(envelope) => self.handle_event(&envelope.event).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    let _ = self.broker.ack(&delivery).await;
                }
                Err(Error::Permanent(reason)) => {
                    info!(reason, "permanent failure, dropping event");
                    let _ = self.broker.ack(&delivery).await;
                }
                Err(Error::NotFound) | Err(Error::Conflict(_)) => {
                    // §7: not found / conflict → quietly finish.
                    let _ = self.broker.ack(&delivery).await;
                }
                Err(e) => {
                    warn!(error = %e, "transient or unexpected failure, routing to DLQ");
                    let _ = self.broker.nack_to_dlq(&delivery).await;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self, event))]
    async fn handle_event(&self, event: &DomainEvent) -> Result<()> {
        match event {
            DomainEvent::SessionCreated { session_id, .. } => self.post_announcement(*session_id).await,
            DomainEvent::SessionUpdated { session_id } => self.refresh(*session_id).await,
            DomainEvent::SessionCancelled { session_id } | DomainEvent::SessionDeleted { session_id } => {
                self.announce_terminal(*session_id).await
            }
            DomainEvent::ParticipantJoined { session_id, .. }
            | DomainEvent::ParticipantLeft { session_id, .. } => self.refresh(*session_id).await,
            DomainEvent::ParticipantRemoved { session_id, user_id, .. } => {
                self.refresh(*session_id).await?;
                let user = self.store.get_user(*user_id).await?;
                self.chat
                    .dm_user(&user.external_id, "You were removed from a session.")
                    .await
            }
            DomainEvent::ParticipantPromoted { session_id, user_id } => {
                let session = self.store.get_session(*session_id).await?;
                let user = self.store.get_user(*user_id).await?;
                self.chat
                    .dm_user(
                        &user.external_id,
                        &format!(
                            "A seat opened up in \"{}\" scheduled at {}.",
                            session.title,
                            session.scheduled_at.to_rfc3339()
                        ),
                    )
                    .await
            }
            DomainEvent::ReminderDue {
                session_id,
                offset_minutes,
                game_scheduled_at,
            } => self.deliver_reminder(*session_id, *offset_minutes, *game_scheduled_at).await,
            DomainEvent::SessionStatusChanged { session_id, target_status } => {
                self.apply_status_transition(*session_id, *target_status).await
            }
        }
    }

    /// §4.F reminder handling: staleness check, then notify-target
    /// resolution (host ∪ current confirmed participants ∪ users holding
    /// any `notify_role_ids` role), each deduplicated via the 7-day cache
    /// key.
    async fn deliver_reminder(
        &self,
        session_id: Uuid,
        offset_minutes: i32,
        game_scheduled_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        if chrono::Utc::now() >= game_scheduled_at {
            // §8.3, S2: dropped via staleness check, not TTL this time.
            return Ok(());
        }

        let session = match self.store.get_session(session_id).await {
            Ok(s) => s,
            Err(Error::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        if session.status != SessionStatus::Scheduled {
            return Ok(());
        }

        let participants = self.store.list_participants(session_id).await?;
        let confirmed = arbiter(&participants, session.max_players).confirmed;
        let host = self.store.get_user(session.host_user_id).await?;

        let mut targets: Vec<Uuid> = vec![host.id];
        targets.extend(confirmed.iter().filter_map(|p| p.user_id));

        if !session.notify_role_ids.is_empty() {
            let tenant = self.store.get_tenant(session.tenant_id).await?;
            let role_members = self
                .chat
                .guild_members_with_roles(&tenant.external_id, &session.notify_role_ids)
                .await?;
            for external_id in role_members {
                let user = self.store.upsert_user_by_external_id(&external_id).await?;
                targets.push(user.id);
            }
        }

        targets.sort_unstable();
        targets.dedup();

        for user_id in targets {
            if !self
                .cache
                .try_claim_reminder_sent(session_id, user_id, offset_minutes)
                .await?
            {
                continue; // already sent, §8.4 no-duplicate-reminders
            }
            let user = self.store.get_user(user_id).await?;
            self.chat
                .dm_user(
                    &user.external_id,
                    &format!(
                        "Reminder: \"{}\" starts in {} minutes.",
                        session.title, offset_minutes
                    ),
                )
                .await?;
        }
        Ok(())
    }

    async fn apply_status_transition(
        &self,
        session_id: Uuid,
        target_status: SessionStatus,
    ) -> Result<()> {
        let mut tx = self.store.begin_bound(None).await?;
        self.store
            .update_session_status(&mut tx, session_id, target_status)
            .await?;
        tx.commit().await?;
        self.refresh(session_id).await
    }

    async fn post_announcement(&self, session_id: Uuid) -> Result<()> {
        let session = self.store.get_session(session_id).await?;
        let participants = self.store.list_participants(session_id).await?;
        let content = render_announcement(&session, &participants);
        let channel = self.store.get_channel(session.channel_id).await?;
        let message_id = self.chat.post_message(&channel.external_id, &content).await?;
        self.store
            .set_announcement_message(session_id, &channel.external_id, &message_id)
            .await?;
        Ok(())
    }

    async fn announce_terminal(&self, session_id: Uuid) -> Result<()> {
        self.refresh(session_id).await
    }

    /// §4.F refresh protocol: at most one edit in flight per throttle
    /// period, with trailing-edge re-read so the final state after a burst
    /// is always reflected (§8.9, §8.10, S3).
    async fn refresh(&self, session_id: Uuid) -> Result<()> {
        if self.cache.try_arm_throttle(session_id).await? {
            return self.perform_refresh(session_id).await;
        }

        let already_scheduled = {
            let mut scheduled = self.trailing_scheduled.lock().unwrap();
            if scheduled.contains(&session_id) {
                true
            } else {
                scheduled.insert(session_id);
                false
            }
        };
        if already_scheduled {
            return Ok(());
        }

        let store = self.store.clone();
        let broker = self.broker.clone();
        let cache = self.cache.clone();
        let chat = self.chat.clone();
        let trailing_scheduled = self.trailing_scheduled.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            // Clear before the fresh read (§4.F step 3): an event arriving
            // after this point schedules its own trailing refresh rather
            // than being silently absorbed by this one.
            trailing_scheduled.lock().unwrap().remove(&session_id);
            let _ = perform_refresh_standalone(&store, &broker, &cache, &chat, session_id).await;
        });
        Ok(())
    }

    async fn perform_refresh(&self, session_id: Uuid) -> Result<()> {
        perform_refresh_standalone(&self.store, &self.broker, &self.cache, &self.chat, session_id).await
    }
}

/// Free function so the spawned trailing-refresh task doesn't need to hold
/// `&Announcer` across an `.await` — it clears its in-process "scheduled"
/// marker before re-reading state, per §4.F step 3, then performs the edit.
async fn perform_refresh_standalone(
    store: &Store,
    _broker: &Broker,
    cache: &Cache,
    chat: &Arc<dyn ChatClient>,
    session_id: Uuid,
) -> Result<()> {
    let session = match store.get_session(session_id).await {
        Ok(s) => s,
        Err(Error::NotFound) => return Ok(()),
        Err(e) => return Err(e),
    };
    let Some(message_id) = session.announcement_message_id.clone() else {
        return Ok(());
    };
    let Some(channel_external_id) = session.announcement_channel_external_id.clone() else {
        return Ok(());
    };
    let participants = store.list_participants(session_id).await?;
    let content = render_announcement(&session, &participants);

    match chat.edit_message(&channel_external_id, &message_id, &content).await {
        Ok(()) => {
            cache.rearm_throttle(session_id).await?;
            Ok(())
        }
        Err(Error::Permanent(_)) => {
            // §4.F: the announcement was deleted manually. Clear and ACK;
            // do not recreate it.
            store.clear_announcement_message(session_id).await?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn render_announcement(session: &crate::models::Session, participants: &[crate::models::Participant]) -> String {
    let partition = arbiter(participants, session.max_players);
    let confirmed = partition
        .confirmed
        .iter()
        .map(|p| p.display_name.clone().unwrap_or_else(|| "(user)".to_string()))
        .collect::<Vec<_>>()
        .join(", ");
    let waitlist = partition
        .waitlist
        .iter()
        .map(|p| p.display_name.clone().unwrap_or_else(|| "(user)".to_string()))
        .collect::<Vec<_>>()
        .join(", ");

    let status_line = match session.status {
        SessionStatus::Scheduled => format!("Scheduled for {}", session.scheduled_at.to_rfc3339()),
        SessionStatus::InProgress => "In progress".to_string(),
        SessionStatus::Completed => "Completed".to_string(),
        SessionStatus::Cancelled => "Cancelled".to_string(),
    };

    format!(
        "**{}**\n{}\nConfirmed: {}\nWaitlist: {}",
        session.title, status_line, confirmed, waitlist
    )
}
