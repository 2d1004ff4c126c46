//! Chat-surface contract (§6). `ChatClient` is a narrow trait wrapping
//! `twilight-http` — REST only, no gateway, since gateway connection
//! management is explicitly out of scope (§1). Grounded on
//! `other_examples/ed196ff3_Samzyre-riveting-bot__src-lib-lib.rs.rs`'s
//! `Context` struct, which bundles a standalone `twilight_http::Client`
//! independent of its gateway shard.
//!
//! The trait boundary plays the role the teacher's injected `Db`/`EventBus`
//! managed state plays for its routes: it lets `announcer.rs`/`router.rs` be
//! unit tested against a fake implementation instead of a live bot token.

use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker, MessageMarker, RoleMarker, UserMarker};

use crate::error::{Error, Result};

#[rocket::async_trait]
pub trait ChatClient: Send + Sync {
    async fn post_message(&self, channel_external_id: &str, content: &str) -> Result<String>;
    async fn edit_message(
        &self,
        channel_external_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<()>;
    /// Returns `Ok(())` both when the DM sends and when the recipient has
    /// DMs disabled — §6: "treats this as permanent success (no retry)".
    async fn dm_user(&self, user_external_id: &str, content: &str) -> Result<()>;
    /// Resolves guild members holding any of `role_ids` (§4.F notify-role
    /// fanout) to their platform user ids.
    async fn guild_members_with_roles(
        &self,
        guild_external_id: &str,
        role_ids: &[String],
    ) -> Result<Vec<String>>;
}

pub struct TwilightChatClient {
    http: twilight_http::Client,
}

impl TwilightChatClient {
    pub fn new(bot_token: String) -> Self {
        TwilightChatClient {
            http: twilight_http::Client::new(bot_token),
        }
    }
}

fn is_message_not_found(status: u16) -> bool {
    status == 404
}

fn is_cannot_send_dm(status: u16) -> bool {
    // Discord returns 403 Forbidden for "cannot send messages to this user"
    // (e.g. DMs disabled, bot blocked).
    status == 403
}

#[rocket::async_trait]
impl ChatClient for TwilightChatClient {
    async fn post_message(&self, channel_external_id: &str, content: &str) -> Result<String> {
        let channel_id: Id<ChannelMarker> = channel_external_id
            .parse()
            .map_err(|_| Error::InvalidInput("invalid channel id".into()))?;
        let response = self
            .http
            .create_message(channel_id)
            .content(content)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        let message = response
            .model()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(message.id.to_string())
    }

    async fn edit_message(
        &self,
        channel_external_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<()> {
        let channel_id: Id<ChannelMarker> = channel_external_id
            .parse()
            .map_err(|_| Error::InvalidInput("invalid channel id".into()))?;
        let message_id: Id<MessageMarker> = message_id
            .parse()
            .map_err(|_| Error::InvalidInput("invalid message id".into()))?;
        let result = self
            .http
            .update_message(channel_id, message_id)
            .content(Some(content))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(status) = e.status()
                    && is_message_not_found(status.get())
                {
                    // §4.F: the user deleted the announcement manually.
                    return Err(Error::Permanent("message no longer exists".into()));
                }
                Err(Error::Transient(e.to_string()))
            }
        }
    }

    async fn dm_user(&self, user_external_id: &str, content: &str) -> Result<()> {
        let user_id: Id<UserMarker> = user_external_id
            .parse()
            .map_err(|_| Error::InvalidInput("invalid user id".into()))?;
        let channel = match self.http.create_private_channel(user_id).await {
            Ok(resp) => resp
                .model()
                .await
                .map_err(|e| Error::Transient(e.to_string()))?,
            Err(e) => {
                if let Some(status) = e.status()
                    && is_cannot_send_dm(status.get())
                {
                    return Ok(());
                }
                return Err(Error::Transient(e.to_string()));
            }
        };
        match self
            .http
            .create_message(channel.id)
            .content(content)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(status) = e.status()
                    && is_cannot_send_dm(status.get())
                {
                    Ok(())
                } else {
                    Err(Error::Transient(e.to_string()))
                }
            }
        }
    }

    async fn guild_members_with_roles(
        &self,
        guild_external_id: &str,
        role_ids: &[String],
    ) -> Result<Vec<String>> {
        let guild_id: Id<GuildMarker> = guild_external_id
            .parse()
            .map_err(|_| Error::InvalidInput("invalid guild id".into()))?;
        let role_ids: Vec<Id<RoleMarker>> = role_ids.iter().filter_map(|r| r.parse().ok()).collect();
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Paginate the full member list (Discord caps a page at 1000) since
        // a guild's notify-role holders can span more than one page.
        let mut matched = Vec::new();
        let mut after: Option<Id<UserMarker>> = None;
        loop {
            let mut request = self.http.guild_members(guild_id).limit(1000);
            if let Some(after_id) = after {
                request = request.after(after_id);
            }
            let page = request
                .await
                .map_err(|e| Error::Transient(e.to_string()))?
                .model()
                .await
                .map_err(|e| Error::Transient(e.to_string()))?;

            for member in &page {
                if member.roles.iter().any(|r| role_ids.contains(r)) {
                    matched.push(member.user.id.to_string());
                }
            }
            after = page.last().map(|m| m.user.id);
            if page.len() < 1000 {
                break;
            }
        }
        Ok(matched)
    }
}
