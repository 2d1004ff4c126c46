//! Command/Mutation API process (§5: "one command/mutation API worker
//! pool"). Thin binary: load config, build the rocket instance assembled by
//! the library, launch it.

use session_scheduler::config::Config;

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    session_scheduler::init_tracing();
    let config = Config::from_env();
    let rocket = session_scheduler::rocket(&config).await?;
    rocket.launch().await?;
    Ok(())
}
