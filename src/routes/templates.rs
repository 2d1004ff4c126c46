use rocket::State;
use rocket::serde::json::Json;
use serde::Deserialize;

use crate::error::Result;
use crate::models::Template;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
}

#[rocket::post("/api/v1/tenants/<tenant_id>/templates", data = "<req>")]
pub async fn create_template(
    state: &State<AppState>,
    tenant_id: uuid::Uuid,
    req: Json<CreateTemplateRequest>,
) -> Result<Json<Template>> {
    let template = state.store.create_template(tenant_id, req.into_inner().name).await?;
    Ok(Json(template))
}
