//! Interaction Router process (§4.I, §5: "shares a long-lived chat-gateway
//! connection; handles interactions serially per connection, but handler
//! bodies are spawned as independent tasks").
//!
//! Gateway connection management is explicitly out of scope (§1) — this
//! binary exposes the HTTP interactions-endpoint surface instead (Discord's
//! alternative to a gateway shard for slash-command/button delivery), which
//! keeps the same `custom_id`-driven join/leave contract without pulling in
//! a gateway client. Each request is deferred immediately and its handler
//! body spawned onto its own task, matching the sub-3s deferred-response
//! budget in §5.

use std::sync::Arc;

use rocket::State;
use rocket::serde::json::Json;
use serde::Deserialize;
use tracing::warn;

use session_scheduler::broker::Broker;
use session_scheduler::chat_client::TwilightChatClient;
use session_scheduler::config::Config;
use session_scheduler::error::{Error, Result};
use session_scheduler::router::{Action, InteractionRouter, parse_custom_id};
use session_scheduler::store::Store;

struct AppState {
    router: Arc<InteractionRouter>,
}

#[derive(Debug, Deserialize)]
struct InteractionPayload {
    custom_id: String,
    user_external_id: String,
}

/// Deferred-response budget (§5): validate and spawn, return immediately.
#[rocket::post("/interactions", data = "<payload>")]
async fn handle_interaction(
    state: &State<AppState>,
    payload: Json<InteractionPayload>,
) -> Result<Json<serde_json::Value>> {
    let Some((action, session_id)) = parse_custom_id(&payload.custom_id) else {
        return Err(Error::InvalidInput("unrecognized custom_id".into()));
    };
    let router = state.router.clone();
    let user_external_id = payload.user_external_id.clone();
    tokio::spawn(async move {
        let result = match action {
            Action::Join => router.join(session_id, &user_external_id).await,
            Action::Leave => router.leave(session_id, &user_external_id).await,
        };
        // §4.I: a stale "interaction already acknowledged" error from the
        // chat platform is swallowed by the gateway layer upstream of this
        // process; here a failed handler is simply logged, since the
        // response was already deferred.
        if let Err(e) = result {
            warn!(error = %e, "interaction handler failed");
        }
    });
    Ok(Json(serde_json::json!({ "deferred": true })))
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    session_scheduler::init_tracing();
    let config = Config::from_env();

    let store = Arc::new(Store::connect(&config.database_url).await?);
    store.migrate().await?;
    let broker = Arc::new(Broker::connect(&config.broker_url).await?);
    let bot_token = config
        .discord_bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DISCORD_BOT_TOKEN not set"))?;
    let chat = Arc::new(TwilightChatClient::new(bot_token));

    let router = Arc::new(InteractionRouter::new(store, broker, chat));
    let state = AppState { router };

    rocket::build()
        .manage(state)
        .mount("/", rocket::routes![handle_interaction])
        .launch()
        .await?;

    Ok(())
}
