use rocket::State;
use rocket::serde::json::Json;
use uuid::Uuid;

use crate::arbiter::{arbiter, promoted_users};
use crate::binder::{self, TenantScope};
use crate::error::{Error, Result};
use crate::events::DomainEvent;
use crate::materializer;
use crate::models::{CreateSession, PrePopulatedEntry, Session, SessionStatus, UpdateSession};

use super::AppState;

/// Resolves one pre-populated reference (§4.J step 3). `@<external_id>`
/// resolves to a real user (upserted by external id); anything else is a
/// placeholder identified only by its display name. Ambiguous `@mention`
/// search against live tenant membership is chat-gateway plumbing and is
/// out of scope here (§1) — this API takes the already-resolved external id
/// directly, the way a calling bot command handler would supply it after
/// doing that search itself.
async fn resolve_reference(
    state: &AppState,
    reference: &str,
) -> Result<(Option<Uuid>, Option<String>)> {
    if let Some(external_id) = reference.strip_prefix('@') {
        let user = state.store.upsert_user_by_external_id(external_id).await?;
        Ok((Some(user.id), None))
    } else {
        Ok((None, Some(reference.to_string())))
    }
}

async fn insert_pre_populated(
    state: &AppState,
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    session_id: Uuid,
    entries: &[PrePopulatedEntry],
) -> Result<()> {
    for entry in entries {
        let (user_id, display_name) = resolve_reference(state, &entry.reference).await?;
        state
            .store
            .insert_pre_populated_participant(tx, session_id, user_id, display_name, entry.position)
            .await?;
    }
    Ok(())
}

/// Binds the caller's `TenantScope` for the duration of `body` (§4.H): every
/// `begin_bound(None)` call `body` makes picks the scope up via
/// `binder::current()`, so the RLS policy restricts every query inside it to
/// tenants the caller is actually authorized for.
async fn scoped<F, Fut, T>(scope: TenantScope, body: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    binder::bind(scope.0, body).await
}

#[rocket::post("/api/v1/tenants/<tenant_id>/sessions", data = "<req>")]
pub async fn create_session(
    state: &State<AppState>,
    scope: TenantScope,
    tenant_id: Uuid,
    req: Json<CreateSession>,
) -> Result<Json<Session>> {
    let req = req.into_inner();

    if let (Some(min), Some(max)) = (req.min_players, req.max_players)
        && min > max
    {
        return Err(Error::InvalidInput("min_players must be <= max_players".into()));
    }

    scoped(scope, move || async move {
        let tenant = state.store.get_tenant(tenant_id).await?;

        let mut tx = state.store.begin_bound(None).await?;
        let channel = state.store.get_channel_in_tx(&mut tx, req.channel_id).await?;
        let host = state
            .store
            .upsert_user_by_external_id(&req.host_user_external_id)
            .await?;
        let session = state
            .store
            .create_session(&mut tx, tenant_id, &tenant.external_id, host.id, &req)
            .await?;
        insert_pre_populated(state, &mut tx, session.id, &req.pre_populated).await?;
        materializer::materialize(&state.store, &mut tx, &session, &channel, &tenant, chrono::Utc::now())
            .await?;
        tx.commit().await?;

        state
            .broker
            .publish(
                &DomainEvent::SessionCreated {
                    session_id: session.id,
                    notify_role_ids: session.notify_role_ids.clone(),
                },
                None,
            )
            .await?;

        Ok(Json(session))
    })
    .await
}

#[rocket::get("/api/v1/sessions/<id>")]
pub async fn get_session(state: &State<AppState>, scope: TenantScope, id: Uuid) -> Result<Json<Session>> {
    scoped(scope, move || async move {
        let mut tx = state.store.begin_bound(None).await?;
        let session = state.store.get_session_in_tx(&mut tx, id).await?;
        Ok(Json(session))
    })
    .await
}

#[rocket::get("/api/v1/tenants/<tenant_id>/sessions")]
pub async fn list_sessions(
    state: &State<AppState>,
    scope: TenantScope,
    tenant_id: Uuid,
) -> Result<Json<Vec<Session>>> {
    scoped(scope, move || async move {
        let mut tx = state.store.begin_bound(None).await?;
        let sessions = state.store.list_sessions_for_tenant_in_tx(&mut tx, tenant_id).await?;
        Ok(Json(sessions))
    })
    .await
}

#[rocket::patch("/api/v1/sessions/<id>", data = "<req>")]
pub async fn update_session(
    state: &State<AppState>,
    scope: TenantScope,
    id: Uuid,
    req: Json<UpdateSession>,
) -> Result<Json<Session>> {
    let req = req.into_inner();
    scoped(scope, move || async move { update_session_scoped(state, id, req).await }).await
}

async fn update_session_scoped(
    state: &State<AppState>,
    id: Uuid,
    req: UpdateSession,
) -> Result<Json<Session>> {
    let mut tx = state.store.begin_bound(None).await?;
    let mut session = state.store.get_session_in_tx(&mut tx, id).await?;
    let tenant = state.store.get_tenant(session.tenant_id).await?;
    let channel = state.store.get_channel_in_tx(&mut tx, session.channel_id).await?;

    let before_participants = state.store.list_participants_tx(&mut tx, id).await?;
    let before_partition = arbiter(&before_participants, session.max_players);

    // §4.J pre-populated reconciliation: diff existing vs. desired, delete
    // removed, insert new, update positions on survivors.
    if let Some(desired) = &req.pre_populated {
        let existing: Vec<_> = before_participants
            .iter()
            .filter(|p| p.position_type == crate::models::PositionType::PrePopulated)
            .collect();

        // Resolve desired entries up front so survivors can be matched by
        // identity (user id, or display name for placeholders).
        let mut desired_resolved = Vec::with_capacity(desired.len());
        for entry in desired {
            let (user_id, display_name) = resolve_reference(state, &entry.reference).await?;
            desired_resolved.push((user_id, display_name, entry.position));
        }

        for row in &existing {
            let still_wanted = desired_resolved.iter().any(|(uid, name, _)| {
                (row.user_id.is_some() && row.user_id == *uid)
                    || (row.user_id.is_none() && row.display_name == *name)
            });
            if !still_wanted {
                state.store.delete_participant_by_id(&mut tx, row.id).await?;
            }
        }

        for (user_id, display_name, position) in &desired_resolved {
            let survivor = existing.iter().find(|row| {
                (row.user_id.is_some() && row.user_id == *user_id)
                    || (row.user_id.is_none() && row.display_name == *display_name)
            });
            match survivor {
                Some(row) => {
                    state.store.update_pre_fill_position(&mut tx, row.id, *position).await?;
                }
                None => {
                    state
                        .store
                        .insert_pre_populated_participant(
                            &mut tx,
                            id,
                            *user_id,
                            display_name.clone(),
                            *position,
                        )
                        .await?;
                }
            }
        }
    }

    if let Some(title) = req.title {
        session.title = title;
    }
    if let Some(description) = req.description {
        session.description = Some(description);
    }
    if let Some(scheduled_at) = req.scheduled_at {
        session.scheduled_at = scheduled_at;
    }
    if let Some(duration) = req.duration_minutes {
        session.duration_minutes = duration;
    }
    if let Some(min_players) = req.min_players {
        session.min_players = Some(min_players);
    }
    if let Some(max_players) = req.max_players {
        session.max_players = Some(max_players);
    }
    if let (Some(min), Some(max)) = (session.min_players, session.max_players)
        && min > max
    {
        return Err(Error::InvalidInput("min_players must be <= max_players".into()));
    }
    if let Some(status) = req.status {
        session.status = status;
    }

    sqlx::query(
        "UPDATE sessions SET title = $1, description = $2, scheduled_at = $3,
         duration_minutes = $4, min_players = $5, max_players = $6, status = $7
         WHERE id = $8",
    )
    .bind(&session.title)
    .bind(&session.description)
    .bind(session.scheduled_at)
    .bind(session.duration_minutes)
    .bind(session.min_players)
    .bind(session.max_players)
    .bind(session.status)
    .bind(session.id)
    .execute(&mut *tx)
    .await
    .map_err(Error::from)?;

    materializer::materialize(&state.store, &mut tx, &session, &channel, &tenant, chrono::Utc::now())
        .await?;

    let after_participants = state.store.list_participants_tx(&mut tx, id).await?;
    let after_partition = arbiter(&after_participants, session.max_players);
    let promoted = promoted_users(&before_partition, &after_partition);

    tx.commit().await?;

    state
        .broker
        .publish(&DomainEvent::SessionUpdated { session_id: id }, None)
        .await?;
    for user_id in promoted {
        state
            .broker
            .publish(&DomainEvent::ParticipantPromoted { session_id: id, user_id }, None)
            .await?;
    }

    Ok(Json(session))
}

#[rocket::delete("/api/v1/sessions/<id>")]
pub async fn delete_session(state: &State<AppState>, scope: TenantScope, id: Uuid) -> Result<Json<Session>> {
    scoped(scope, move || async move {
        let mut tx = state.store.begin_bound(None).await?;
        let mut session = state.store.get_session_in_tx(&mut tx, id).await?;
        session.status = SessionStatus::Cancelled;
        state.store.update_session_status(&mut tx, id, SessionStatus::Cancelled).await?;
        state.store.delete_all_non_dispatched(&mut tx, id).await?;
        tx.commit().await?;

        state
            .broker
            .publish(&DomainEvent::SessionCancelled { session_id: id }, None)
            .await?;

        Ok(Json(session))
    })
    .await
}
