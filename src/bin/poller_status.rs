//! Generic Poller Daemon, status-transition family (§4.E) — the
//! `kind = STATUS_TRANSITION` instance. See `poller_reminder` for the
//! sibling; both wrap the same `poller::run_forever` loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use session_scheduler::broker::Broker;
use session_scheduler::config::Config;
use session_scheduler::models::ScheduleKind;
use session_scheduler::poller::{run_forever, status_transition_builder};
use session_scheduler::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    session_scheduler::init_tracing();
    let config = Config::from_env();

    let store = Store::connect(&config.database_url).await?;
    store.migrate().await?;
    let broker = Broker::connect(&config.broker_url).await?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_signal.store(true, Ordering::Relaxed);
    });

    run_forever(
        &store,
        &broker,
        ScheduleKind::StatusTransition,
        status_transition_builder,
        config.poll_batch_size,
        Duration::from_secs(config.poll_interval_secs),
        Duration::from_secs(config.dlq_drain_interval_secs),
        config.dlq_drain_batch_size,
        shutdown,
    )
    .await;

    Ok(())
}
