use rocket::State;
use rocket::serde::json::Json;

use crate::error::Result;
use crate::models::{CreateTenant, Tenant};

use super::AppState;

#[rocket::post("/api/v1/tenants", data = "<req>")]
pub async fn create_tenant(state: &State<AppState>, req: Json<CreateTenant>) -> Result<Json<Tenant>> {
    let tenant = state.store.create_tenant(req.into_inner()).await?;
    Ok(Json(tenant))
}

#[rocket::get("/api/v1/tenants/<id>")]
pub async fn get_tenant(state: &State<AppState>, id: uuid::Uuid) -> Result<Json<Tenant>> {
    let tenant = state.store.get_tenant(id).await?;
    Ok(Json(tenant))
}
