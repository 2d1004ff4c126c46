//! Durable record of tenants, channels, sessions, participants, templates,
//! and the notification schedule (§2.A, §3). Enforces tenant isolation via
//! row-level-security policies keyed on a session-local parameter (§4.H)
//! rather than application-level filtering.
//!
//! Grounded on the teacher's `db.rs`: a thin struct wrapping a connection
//! resource, an idempotent `migrate()`, seed data on first run. The teacher's
//! single `Mutex<Connection>` becomes a real `PgPool` here — Postgres (unlike
//! the teacher's embedded SQLite) supports genuine concurrent connections, so
//! there is no single-writer mutex to carry forward.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::*;

pub struct Store {
    pub pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Store { pool })
    }

    /// Run idempotent migrations. Intended to run under an admin role; the
    /// application itself connects with a lower-privileged role subject to
    /// the row policies created here (§6: "migrations are applied by a
    /// dedicated admin database user").
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id UUID PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                default_max_players INTEGER,
                default_reminder_offsets JSONB NOT NULL DEFAULT '[60,15]',
                host_role_ids JSONB NOT NULL DEFAULT '[]',
                manager_role_ids JSONB NOT NULL DEFAULT '[]',
                notify_role_ids JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );

            CREATE TABLE IF NOT EXISTS channels (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                tenant_external_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                max_players_override INTEGER,
                reminder_offsets_override JSONB,
                active BOOLEAN NOT NULL DEFAULT true,
                category TEXT,
                UNIQUE(tenant_id, external_id)
            );

            CREATE TABLE IF NOT EXISTS templates (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                tenant_external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                default_title TEXT,
                default_description TEXT,
                default_min_players INTEGER,
                default_max_players INTEGER,
                default_duration_minutes INTEGER,
                ordering_index INTEGER NOT NULL DEFAULT 0,
                is_default BOOLEAN NOT NULL DEFAULT false
            );

            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                tenant_external_id TEXT NOT NULL,
                channel_id UUID NOT NULL REFERENCES channels(id),
                host_user_id UUID NOT NULL REFERENCES users(id),
                title TEXT NOT NULL,
                description TEXT,
                signup_instructions TEXT,
                scheduled_at TIMESTAMPTZ NOT NULL,
                duration_minutes INTEGER NOT NULL DEFAULT 60,
                status TEXT NOT NULL DEFAULT 'SCHEDULED',
                min_players INTEGER,
                max_players INTEGER,
                reminder_offsets JSONB,
                notify_role_ids JSONB NOT NULL DEFAULT '[]',
                announcement_message_id TEXT,
                announcement_channel_external_id TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                CHECK (min_players IS NULL OR max_players IS NULL OR min_players <= max_players)
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_tenant ON sessions(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

            CREATE TABLE IF NOT EXISTS participants (
                id UUID PRIMARY KEY,
                session_id UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                user_id UUID REFERENCES users(id),
                display_name TEXT,
                joined_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                position_type TEXT NOT NULL,
                pre_fill_position INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_participants_session_user
                ON participants(session_id, user_id) WHERE user_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_participants_session ON participants(session_id);

            CREATE TABLE IF NOT EXISTS notification_schedule (
                id UUID PRIMARY KEY,
                session_id UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                due_at TIMESTAMPTZ NOT NULL,
                game_scheduled_at TIMESTAMPTZ NOT NULL,
                payload JSONB NOT NULL DEFAULT '{}',
                dispatched_at TIMESTAMPTZ
            );
            CREATE INDEX IF NOT EXISTS idx_schedule_due
                ON notification_schedule(kind, dispatched_at, due_at);
            CREATE INDEX IF NOT EXISTS idx_schedule_session ON notification_schedule(session_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Tenant isolation (§4.H, §8.8): row-level-security policies keyed on
        // a session-local GUC. Idempotent — `DROP POLICY IF EXISTS` first,
        // the way the teacher's `.ok()`-tolerant `ALTER TABLE` calls accept
        // re-running migrations against an already-migrated database.
        for table in ["channels", "templates", "sessions"] {
            let enable = format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;");
            sqlx::query(&enable).execute(&self.pool).await.ok();
            let drop = format!("DROP POLICY IF EXISTS tenant_isolation ON {table};");
            sqlx::query(&drop).execute(&self.pool).await.ok();
            let create = format!(
                "CREATE POLICY tenant_isolation ON {table} USING (
                    current_setting('app.tenant_ids', true) IS NULL
                    OR current_setting('app.tenant_ids', true) = ''
                    OR tenant_external_id = ANY(string_to_array(current_setting('app.tenant_ids', true), ','))
                );"
            );
            sqlx::query(&create).execute(&self.pool).await.ok();
        }

        Ok(())
    }

    /// Begin a transaction, optionally bound to a set of tenant external ids
    /// (§4.H). `None` falls back to whatever `binder::current()` reports for
    /// the calling task — the caller's `TenantScope`, if a route bound one —
    /// and stays unbound if nothing did. Daemons never bind, so their
    /// `begin_bound(None)` calls see every tenant, per §4.H: "daemons do not
    /// bind, they need to see all tenants."
    pub async fn begin_bound(
        &self,
        tenant_external_ids: Option<&[String]>,
    ) -> Result<Transaction<'_, Postgres>> {
        let mut tx = self.pool.begin().await?;
        let ids = match tenant_external_ids {
            Some(ids) => Some(ids.to_vec()),
            None => crate::binder::current(),
        };
        if let Some(ids) = ids {
            let joined = ids.join(",");
            sqlx::query("SELECT set_config('app.tenant_ids', $1, true)")
                .bind(joined)
                .execute(&mut *tx)
                .await?;
        }
        Ok(tx)
    }

    // --- Tenants ---

    pub async fn create_tenant(&self, req: CreateTenant) -> Result<Tenant> {
        let row = sqlx::query_as::<_, Tenant>(
            "INSERT INTO tenants
                (id, external_id, default_max_players, default_reminder_offsets,
                 host_role_ids, manager_role_ids, notify_role_ids)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&req.external_id)
        .bind(req.default_max_players)
        .bind(serde_json::to_value(&req.default_reminder_offsets).unwrap())
        .bind(serde_json::to_value(&req.host_role_ids).unwrap())
        .bind(serde_json::to_value(&req.manager_role_ids).unwrap())
        .bind(serde_json::to_value(&req.notify_role_ids).unwrap())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_tenant(&self, id: Uuid) -> Result<Tenant> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn get_tenant_by_external_id(&self, external_id: &str) -> Result<Tenant> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)
    }

    // --- Channels ---

    pub async fn create_channel(&self, tenant_id: Uuid, req: CreateChannel) -> Result<Channel> {
        let tenant = self.get_tenant(tenant_id).await?;
        let row = sqlx::query_as::<_, Channel>(
            "INSERT INTO channels
                (id, tenant_id, tenant_external_id, external_id, max_players_override,
                 reminder_offsets_override, category)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&tenant.external_id)
        .bind(&req.external_id)
        .bind(req.max_players_override)
        .bind(req.reminder_offsets_override.map(|v| serde_json::to_value(v).unwrap()))
        .bind(&req.category)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Unscoped — see `get_session`'s caveat.
    pub async fn get_channel(&self, id: Uuid) -> Result<Channel> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)
    }

    /// Caller-scoped read (§4.H, §8.8).
    pub async fn get_channel_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Channel> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(Error::NotFound)
    }

    // --- Templates ---

    pub async fn create_template(&self, tenant_id: Uuid, name: String) -> Result<Template> {
        let tenant = self.get_tenant(tenant_id).await?;
        let _ = tenant; // existence check only
        let row = sqlx::query_as::<_, Template>(
            "INSERT INTO templates (id, tenant_id, tenant_external_id, name)
             VALUES ($1, $2, (SELECT external_id FROM tenants WHERE id = $2), $3)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_default_template(&self, tenant_id: Uuid) -> Result<Option<Template>> {
        let row = sqlx::query_as::<_, Template>(
            "SELECT * FROM templates WHERE tenant_id = $1 AND is_default = true",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // --- Users ---

    pub async fn upsert_user_by_external_id(&self, external_id: &str) -> Result<User> {
        let row = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, external_id) VALUES ($1, $2)
             ON CONFLICT (external_id) DO UPDATE SET external_id = EXCLUDED.external_id
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)
    }

    // --- Sessions ---

    pub async fn create_session(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        tenant_external_id: &str,
        host_user_id: Uuid,
        req: &CreateSession,
    ) -> Result<Session> {
        let row = sqlx::query_as::<_, Session>(
            "INSERT INTO sessions
                (id, tenant_id, tenant_external_id, channel_id, host_user_id, title,
                 description, signup_instructions, scheduled_at, duration_minutes,
                 min_players, max_players, reminder_offsets, notify_role_ids)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(tenant_external_id)
        .bind(req.channel_id)
        .bind(host_user_id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.signup_instructions)
        .bind(req.scheduled_at)
        .bind(req.duration_minutes)
        .bind(req.min_players)
        .bind(req.max_players)
        .bind(req.reminder_offsets.as_ref().map(|v| serde_json::to_value(v).unwrap()))
        .bind(serde_json::to_value(&req.notify_role_ids).unwrap())
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    /// Unscoped read — no RLS, sees every tenant's row. Only for daemons and
    /// the announcer, which never bind a `TenantScope` (§4.H). Tenant-facing
    /// routes must read through `get_session_in_tx` inside a `begin_bound`
    /// transaction instead, or the RLS policy never applies.
    pub async fn get_session(&self, id: Uuid) -> Result<Session> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)
    }

    /// Caller-scoped read (§4.H, §8.8): runs inside the caller's
    /// `begin_bound` transaction, so the RLS policy's `app.tenant_ids`
    /// predicate actually applies. A session outside the caller's scope
    /// simply isn't visible to this query — it comes back `NotFound`, not a
    /// distinct forbidden shape, matching `Error::status`'s "avoid probing"
    /// rule.
    pub async fn get_session_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Session> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn get_session_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Session> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn update_session_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: SessionStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE sessions SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn clear_announcement_message(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE sessions SET announcement_message_id = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_announcement_message(
        &self,
        id: Uuid,
        channel_external_id: &str,
        message_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET announcement_channel_external_id = $1,
             announcement_message_id = $2 WHERE id = $3",
        )
        .bind(channel_external_id)
        .bind(message_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unscoped — see `get_session`'s caveat. No route should call this.
    pub async fn list_sessions_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE tenant_id = $1 ORDER BY scheduled_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Caller-scoped read (§4.H, §8.8): a tenant outside the caller's
    /// `TenantScope` yields an empty list, not the other tenant's sessions.
    pub async fn list_sessions_for_tenant_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
    ) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE tenant_id = $1 ORDER BY scheduled_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    // --- Participants ---

    pub async fn list_participants(&self, session_id: Uuid) -> Result<Vec<Participant>> {
        let rows = sqlx::query_as::<_, Participant>(
            "SELECT * FROM participants WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_participants_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
    ) -> Result<Vec<Participant>> {
        let rows = sqlx::query_as::<_, Participant>(
            "SELECT * FROM participants WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    /// Insert a self-added participant (join, §4.I). Duplicate protection is
    /// the `UNIQUE(session_id, user_id)` index alone — no pre-check. A
    /// Postgres `unique_violation` (SQLSTATE 23505) surfaces as
    /// `Error::Conflict` via the `From<sqlx::Error>` impl.
    pub async fn insert_self_added_participant(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<Participant> {
        let row = sqlx::query_as::<_, Participant>(
            "INSERT INTO participants (id, session_id, user_id, position_type, joined_at)
             VALUES ($1, $2, $3, 'SELF_ADDED', now())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    pub async fn delete_participant_by_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM participants WHERE session_id = $1 AND user_id = $2",
        )
        .bind(session_id)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_pre_populated_participant(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
        user_id: Option<Uuid>,
        display_name: Option<String>,
        position: i32,
    ) -> Result<Participant> {
        let row = sqlx::query_as::<_, Participant>(
            "INSERT INTO participants
                (id, session_id, user_id, display_name, position_type, joined_at, pre_fill_position)
             VALUES ($1, $2, $3, $4, 'PRE_POPULATED', now(), $5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(user_id)
        .bind(display_name)
        .bind(position)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    pub async fn delete_participant_by_id(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<()> {
        sqlx::query("DELETE FROM participants WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn update_pre_fill_position(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        position: i32,
    ) -> Result<()> {
        sqlx::query("UPDATE participants SET pre_fill_position = $1 WHERE id = $2")
            .bind(position)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // --- Notification schedule (§4.D, §4.E) ---

    pub async fn non_dispatched_schedule_rows(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<NotificationSchedule>> {
        let rows = sqlx::query_as::<_, NotificationSchedule>(
            "SELECT * FROM notification_schedule
             WHERE session_id = $1 AND dispatched_at IS NULL",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn non_dispatched_schedule_rows_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
    ) -> Result<Vec<NotificationSchedule>> {
        let rows = sqlx::query_as::<_, NotificationSchedule>(
            "SELECT * FROM notification_schedule
             WHERE session_id = $1 AND dispatched_at IS NULL",
        )
        .bind(session_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    pub async fn insert_schedule_row(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
        kind: ScheduleKind,
        due_at: DateTime<Utc>,
        game_scheduled_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_schedule
                (id, session_id, kind, due_at, game_scheduled_at, payload)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(kind)
        .bind(due_at)
        .bind(game_scheduled_at)
        .bind(payload)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn delete_schedule_rows(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM notification_schedule WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn delete_all_non_dispatched(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM notification_schedule WHERE session_id = $1 AND dispatched_at IS NULL",
        )
        .bind(session_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Atomically claim up to `limit` due, non-dispatched rows of `kind`
    /// (§4.E). Caller must mark each claimed row dispatched and commit in
    /// the same transaction; `SKIP LOCKED` makes concurrent daemons of the
    /// same kind safe without double-claiming a row.
    pub async fn claim_due_rows(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        kind: ScheduleKind,
        limit: i64,
    ) -> Result<Vec<NotificationSchedule>> {
        let rows = sqlx::query_as::<_, NotificationSchedule>(
            "SELECT * FROM notification_schedule
             WHERE kind = $1 AND dispatched_at IS NULL AND due_at <= now()
             ORDER BY due_at ASC, id ASC
             FOR UPDATE SKIP LOCKED
             LIMIT $2",
        )
        .bind(kind)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    pub async fn mark_dispatched(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<()> {
        sqlx::query("UPDATE notification_schedule SET dispatched_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Housekeeping query for operator tooling (§7: internal invariant
    /// violations "must be cleaned up by operator tooling"). Lists
    /// non-dispatched rows whose `due_at` is implausibly far in the past,
    /// which can only happen if a daemon has been down or a row's `kind`
    /// stopped matching any running poller.
    pub async fn list_stale_schedule_rows(
        &self,
        older_than: chrono::Duration,
    ) -> Result<Vec<NotificationSchedule>> {
        let cutoff = Utc::now() - older_than;
        let rows = sqlx::query_as::<_, NotificationSchedule>(
            "SELECT * FROM notification_schedule
             WHERE dispatched_at IS NULL AND due_at < $1
             ORDER BY due_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
