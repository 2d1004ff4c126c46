//! Interaction Router (§4.I): maps chat button clicks (`join_{uuid}`,
//! `leave_{uuid}`) to participant mutations, publishing follow-up events.
//!
//! Grounded on `routes/rooms.rs`'s mutate-then-publish shape, but duplicate
//! protection changes deliberately: the teacher's SQLite layer catches
//! `UNIQUE` violations by string-sniffing the rusqlite error message; here
//! it's a typed check against Postgres SQLSTATE `23505`
//! (`sqlx::Error::Database` → `Error::Conflict`, see `error.rs`), matching
//! §4.I's explicit ban on application-level pre-checks ("forbidden — they
//! reintroduce TOCTOU races").

use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::arbiter::{arbiter, promoted_users};
use crate::broker::Broker;
use crate::chat_client::ChatClient;
use crate::error::{Error, Result};
use crate::events::DomainEvent;
use crate::models::SessionStatus;
use crate::store::Store;

pub struct InteractionRouter {
    store: Arc<Store>,
    broker: Arc<Broker>,
    chat: Arc<dyn ChatClient>,
}

/// The two actions a button's `custom_id` can carry (§4.I).
pub enum Action {
    Join,
    Leave,
}

pub fn parse_custom_id(custom_id: &str) -> Option<(Action, Uuid)> {
    if let Some(rest) = custom_id.strip_prefix("join_") {
        return Uuid::parse_str(rest).ok().map(|id| (Action::Join, id));
    }
    if let Some(rest) = custom_id.strip_prefix("leave_") {
        return Uuid::parse_str(rest).ok().map(|id| (Action::Leave, id));
    }
    None
}

impl InteractionRouter {
    pub fn new(store: Arc<Store>, broker: Arc<Broker>, chat: Arc<dyn ChatClient>) -> Self {
        InteractionRouter { store, broker, chat }
    }

    #[instrument(skip(self))]
    pub async fn join(&self, session_id: Uuid, user_external_id: &str) -> Result<()> {
        let mut tx = self.store.begin_bound(None).await?;
        let session = match self.store.get_session_tx(&mut tx, session_id).await {
            Ok(s) => s,
            Err(Error::NotFound) => return Ok(()), // §4.I: quietly finish
            Err(e) => return Err(e),
        };
        if session.status != SessionStatus::Scheduled {
            return Ok(());
        }
        let user = self.store.upsert_user_by_external_id(user_external_id).await?;

        let before = self.store.list_participants_tx(&mut tx, session_id).await?;
        let before_partition = arbiter(&before, session.max_players);

        let insert = self
            .store
            .insert_self_added_participant(&mut tx, session_id, user.id)
            .await;
        match insert {
            Ok(_) => {}
            // §4.I: double-click races the UNIQUE index — quietly finish.
            Err(Error::Conflict(_)) => return Ok(()),
            Err(e) => return Err(e),
        }

        let after = self.store.list_participants_tx(&mut tx, session_id).await?;
        let after_partition = arbiter(&after, session.max_players);
        let promoted = promoted_users(&before_partition, &after_partition);

        tx.commit().await?;

        self.broker
            .publish(
                &DomainEvent::ParticipantJoined { session_id, user_id: user.id },
                None,
            )
            .await?;
        for promoted_user in promoted {
            self.broker
                .publish(
                    &DomainEvent::ParticipantPromoted { session_id, user_id: promoted_user },
                    None,
                )
                .await?;
        }
        self.chat
            .dm_user(user_external_id, &format!("You've joined \"{}\".", session.title))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn leave(&self, session_id: Uuid, user_external_id: &str) -> Result<()> {
        let mut tx = self.store.begin_bound(None).await?;
        let session = match self.store.get_session_tx(&mut tx, session_id).await {
            Ok(s) => s,
            Err(Error::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        let user = self.store.upsert_user_by_external_id(user_external_id).await?;

        let before = self.store.list_participants_tx(&mut tx, session_id).await?;
        let before_partition = arbiter(&before, session.max_players);

        let removed = self
            .store
            .delete_participant_by_user(&mut tx, session_id, user.id)
            .await?;
        if !removed {
            return Ok(());
        }

        let after = self.store.list_participants_tx(&mut tx, session_id).await?;
        let after_partition = arbiter(&after, session.max_players);
        let promoted = promoted_users(&before_partition, &after_partition);

        tx.commit().await?;

        self.broker
            .publish(
                &DomainEvent::ParticipantLeft { session_id, user_id: user.id },
                None,
            )
            .await?;
        for promoted_user in promoted {
            self.broker
                .publish(
                    &DomainEvent::ParticipantPromoted { session_id, user_id: promoted_user },
                    None,
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_custom_id() {
        let id = Uuid::new_v4();
        let parsed = parse_custom_id(&format!("join_{id}"));
        assert!(matches!(parsed, Some((Action::Join, parsed_id)) if parsed_id == id));
    }

    #[test]
    fn parses_leave_custom_id() {
        let id = Uuid::new_v4();
        let parsed = parse_custom_id(&format!("leave_{id}"));
        assert!(matches!(parsed, Some((Action::Leave, parsed_id)) if parsed_id == id));
    }

    #[test]
    fn rejects_unrecognized_prefix() {
        assert!(parse_custom_id("cancel_not-a-uuid").is_none());
    }

    #[test]
    fn rejects_malformed_uuid() {
        assert!(parse_custom_id("join_not-a-uuid").is_none());
    }
}
