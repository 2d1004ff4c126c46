use rocket::State;
use rocket::serde::json::Json;

use crate::error::Result;
use crate::models::{Channel, CreateChannel};

use super::AppState;

#[rocket::post("/api/v1/tenants/<tenant_id>/channels", data = "<req>")]
pub async fn create_channel(
    state: &State<AppState>,
    tenant_id: uuid::Uuid,
    req: Json<CreateChannel>,
) -> Result<Json<Channel>> {
    let channel = state.store.create_channel(tenant_id, req.into_inner()).await?;
    Ok(Json(channel))
}
