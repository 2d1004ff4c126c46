//! Data model (§3). One struct per row shape, plus request/response DTOs for
//! the Command/Mutation API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_reminder_offsets() -> Vec<i32> {
    vec![60, 15]
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub external_id: String,
    pub default_max_players: Option<i32>,
    #[sqlx(json)]
    pub default_reminder_offsets: Vec<i32>,
    #[sqlx(json)]
    pub host_role_ids: Vec<String>,
    #[sqlx(json)]
    pub manager_role_ids: Vec<String>,
    #[sqlx(json)]
    pub notify_role_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTenant {
    pub external_id: String,
    #[serde(default)]
    pub default_max_players: Option<i32>,
    #[serde(default = "default_reminder_offsets")]
    pub default_reminder_offsets: Vec<i32>,
    #[serde(default)]
    pub host_role_ids: Vec<String>,
    #[serde(default)]
    pub manager_role_ids: Vec<String>,
    #[serde(default)]
    pub notify_role_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Channel {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub max_players_override: Option<i32>,
    #[sqlx(json)]
    pub reminder_offsets_override: Option<Vec<i32>>,
    pub active: bool,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannel {
    pub external_id: String,
    #[serde(default)]
    pub max_players_override: Option<i32>,
    #[serde(default)]
    pub reminder_offsets_override: Option<Vec<i32>>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Template {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub default_title: Option<String>,
    pub default_description: Option<String>,
    pub default_min_players: Option<i32>,
    pub default_max_players: Option<i32>,
    pub default_duration_minutes: Option<i32>,
    pub ordering_index: i32,
    pub is_default: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub channel_id: Uuid,
    pub host_user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub signup_instructions: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: SessionStatus,
    pub min_players: Option<i32>,
    pub max_players: Option<i32>,
    #[sqlx(json)]
    pub reminder_offsets: Option<Vec<i32>>,
    #[sqlx(json)]
    pub notify_role_ids: Vec<String>,
    pub announcement_message_id: Option<String>,
    pub announcement_channel_external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn end_at(&self) -> DateTime<Utc> {
        self.scheduled_at + chrono::Duration::minutes(self.duration_minutes as i64)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSession {
    pub channel_id: Uuid,
    pub host_user_external_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub signup_instructions: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default = "default_duration")]
    pub duration_minutes: i32,
    #[serde(default)]
    pub min_players: Option<i32>,
    #[serde(default)]
    pub max_players: Option<i32>,
    #[serde(default)]
    pub reminder_offsets: Option<Vec<i32>>,
    #[serde(default)]
    pub notify_role_ids: Vec<String>,
    #[serde(default)]
    pub pre_populated: Vec<PrePopulatedEntry>,
}

fn default_duration() -> i32 {
    60
}

#[derive(Debug, Deserialize)]
pub struct UpdateSession {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub min_players: Option<i32>,
    #[serde(default)]
    pub max_players: Option<i32>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub pre_populated: Option<Vec<PrePopulatedEntry>>,
}

/// One entry of a caller-supplied pre-populated participant list (§4.J).
/// `reference` is either `@mention`-shaped (resolved via tenant member
/// search) or a bare placeholder display name.
#[derive(Debug, Deserialize, Clone)]
pub struct PrePopulatedEntry {
    pub reference: String,
    pub position: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionType {
    PrePopulated,
    SelfAdded,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Participant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Option<Uuid>,
    pub display_name: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub position_type: PositionType,
    pub pre_fill_position: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleKind {
    Reminder,
    StatusTransition,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct NotificationSchedule {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: ScheduleKind,
    pub due_at: DateTime<Utc>,
    pub game_scheduled_at: DateTime<Utc>,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub dispatched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
}

/// Structured "which @mention did you mean" error payload (§4.J step 3).
#[derive(Debug, Serialize)]
pub struct AmbiguousReference {
    pub input: String,
    pub reason: String,
    pub suggestions: Vec<String>,
}
