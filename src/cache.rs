//! Key/value cache with TTL (§2.C, §6). Centralizes the key surface table
//! into typed helper methods the way the teacher's `db.rs` centralizes SQL
//! behind named functions rather than scattering raw queries through
//! route handlers.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::Result;

const THROTTLE_TTL_SECS: u64 = 1;
const REMINDER_DEDUP_TTL_SECS: u64 = 7 * 24 * 3600;
const TENANT_MEMBERSHIP_TTL_SECS: u64 = 5 * 60;
const DISPLAY_NAME_TTL_SECS: u64 = 5 * 60;
const SESSION_TOKEN_TTL_SECS: u64 = 24 * 3600;

#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Cache { conn })
    }

    /// `chat_refresh_throttle:{session_id}` — 1s TTL, arms the §4.F refresh
    /// throttle. Returns true if this call armed a previously-unarmed key
    /// (i.e. the caller should refresh now, not schedule a trailing one).
    pub async fn try_arm_throttle(&self, session_id: Uuid) -> Result<bool> {
        let key = format!("chat_refresh_throttle:{session_id}");
        let mut conn = self.conn.clone();
        let set: bool = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(THROTTLE_TTL_SECS)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        Ok(set)
    }

    pub async fn rearm_throttle(&self, session_id: Uuid) -> Result<()> {
        let key = format!("chat_refresh_throttle:{session_id}");
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, 1, THROTTLE_TTL_SECS).await?;
        Ok(())
    }

    /// `reminder_sent:{session_id}:{user_id}:{offset_min}` — 7 day TTL dedup
    /// key (§4.F, §8.4). Returns true if this call claimed the key (i.e. no
    /// reminder has been sent yet for this tuple).
    pub async fn try_claim_reminder_sent(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        offset_minutes: i32,
    ) -> Result<bool> {
        let key = format!("reminder_sent:{session_id}:{user_id}:{offset_minutes}");
        let mut conn = self.conn.clone();
        let claimed: bool = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(REMINDER_DEDUP_TTL_SECS)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        Ok(claimed)
    }

    pub async fn cache_user_tenants(&self, user_id: Uuid, tenant_ids: &[String]) -> Result<()> {
        let key = format!("user_tenants:{user_id}");
        let value = serde_json::to_string(tenant_ids).unwrap_or_default();
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, TENANT_MEMBERSHIP_TTL_SECS).await?;
        Ok(())
    }

    pub async fn get_cached_user_tenants(&self, user_id: Uuid) -> Result<Option<Vec<String>>> {
        let key = format!("user_tenants:{user_id}");
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value.and_then(|v| serde_json::from_str(&v).ok()))
    }

    pub async fn cache_display_name(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        display_name: &str,
    ) -> Result<()> {
        let key = format!("display_name:{tenant_id}:{user_id}");
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, display_name, DISPLAY_NAME_TTL_SECS)
            .await?;
        Ok(())
    }

    pub async fn get_cached_display_name(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<String>> {
        let key = format!("display_name:{tenant_id}:{user_id}");
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    /// `user_session:{opaque_uuid}` — opaque session-token → user-id bridge.
    pub async fn create_session_token(&self, user_id: Uuid) -> Result<Uuid> {
        let token = Uuid::new_v4();
        let key = format!("user_session:{token}");
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, user_id.to_string(), SESSION_TOKEN_TTL_SECS)
            .await?;
        Ok(token)
    }

    pub async fn resolve_session_token(&self, token: Uuid) -> Result<Option<Uuid>> {
        let key = format!("user_session:{token}");
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value.and_then(|v| Uuid::parse_str(&v).ok()))
    }
}
