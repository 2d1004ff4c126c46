pub mod arbiter;
pub mod binder;
pub mod broker;
pub mod cache;
pub mod chat_client;
pub mod config;
pub mod error;
pub mod events;
pub mod materializer;
pub mod models;
pub mod poller;
pub mod router;
pub mod routes;
pub mod store;

use std::sync::Arc;

use rocket::serde::json::Json;
use serde_json::{Value, json};

use broker::Broker;
use cache::Cache;
use config::Config;
use routes::AppState;
use store::Store;

#[rocket::catch(500)]
fn internal_error() -> Json<Value> {
    Json(json!({ "error": { "kind": "internal_invariant_violation", "message": "internal error" } }))
}

/// Assembles the Command/Mutation API (§5's `api` process). Grounded on the
/// teacher's `build_rocket`: connect the managed collaborators once, attach
/// them as Rocket state, mount every route, register catchers.
pub async fn rocket(config: &Config) -> error::Result<rocket::Rocket<rocket::Build>> {
    let store = Arc::new(Store::connect(&config.database_url).await?);
    store.migrate().await?;
    let broker = Arc::new(Broker::connect(&config.broker_url).await?);
    let cache = Arc::new(Cache::connect(&config.cache_url).await?);

    let state = AppState { store, broker, cache };

    Ok(rocket::build()
        .manage(state)
        .register("/", rocket::catchers![routes::not_found, internal_error])
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::create_tenant,
                routes::get_tenant,
                routes::create_channel,
                routes::create_template,
                routes::create_session,
                routes::get_session,
                routes::list_sessions,
                routes::update_session,
                routes::delete_session,
            ],
        ))
}

/// Initializes the `tracing` subscriber every binary in the workspace
/// starts with (§5: "ambient structured logging, not per-binary
/// `println!`"), honoring `RUST_LOG` the way the teacher's processes honor
/// their own env-driven toggles.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
