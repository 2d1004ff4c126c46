use rocket::State;
use rocket::serde::json::Json;
use serde_json::{Value, json};

use super::AppState;

#[rocket::get("/health")]
pub async fn health(state: &State<AppState>) -> Json<Value> {
    let db_ok = sqlx::query("SELECT 1").execute(&state.store.pool).await.is_ok();
    Json(json!({ "database": db_ok }))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<Value> {
    Json(json!({ "error": { "kind": "not_found", "message": "not found" } }))
}
