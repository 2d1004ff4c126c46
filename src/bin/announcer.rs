//! Event Consumer / Chat Announcer process (§4.F, §5: "one event
//! consumer"). Declares its durable, DLX-backed queue bound to every
//! game-lifecycle and notification routing key, then consumes forever with
//! manual ack/nack.

use std::sync::Arc;

use session_scheduler::announcer::Announcer;
use session_scheduler::broker::Broker;
use session_scheduler::cache::Cache;
use session_scheduler::chat_client::TwilightChatClient;
use session_scheduler::config::Config;
use session_scheduler::store::Store;

const QUEUE_NAME: &str = "announcer";
const ROUTING_KEYS: &[&str] = &[
    "game.created",
    "game.updated",
    "game.deleted",
    "game.cancelled",
    "participant.joined",
    "participant.left",
    "participant.removed",
    "participant.promoted",
    "reminder.due",
    "session.status_changed",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    session_scheduler::init_tracing();
    let config = Config::from_env();

    let store = Arc::new(Store::connect(&config.database_url).await?);
    store.migrate().await?;
    let broker = Arc::new(Broker::connect(&config.broker_url).await?);
    broker.declare_bound_queue(QUEUE_NAME, ROUTING_KEYS).await?;
    let cache = Arc::new(Cache::connect(&config.cache_url).await?);

    let bot_token = config
        .discord_bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DISCORD_BOT_TOKEN not set"))?;
    let chat = Arc::new(TwilightChatClient::new(bot_token));

    let announcer = Announcer::new(store, broker, cache, chat);
    announcer.run(QUEUE_NAME).await?;
    Ok(())
}
