//! Bulletin client binary entrypoint.

use tracing_subscriber::EnvFilter;

use bulletin_common::config::AppConfig;
use bulletin_engine::cursor::{SeenCursorStore, open_storage};
use bulletin_engine::{EngineOutputs, EngineSettings, Observable, SyncEngine, sound};

use bulletin_client::console;
use bulletin_client::scheduler::FetchScheduler;
use bulletin_client::source::HttpNotificationSource;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;

    // Initialize tracing (stderr, so stdout stays for rendered notices)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bulletin_client=info,bulletin_engine=info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!(
        api = %config.api_base_url,
        scope = %config.identity,
        "Bulletin client starting..."
    );

    let storage = open_storage(&config.cursor_backend)?;
    tracing::info!(backend = storage.name(), "Seen cursor storage ready");

    let cursors = SeenCursorStore::new(storage, config.cursor_namespace.clone());
    let sound = sound::from_config(&config.sound)?;
    let outputs = EngineOutputs::default();
    let identity = Observable::new(config.identity.clone());

    let engine = SyncEngine::new(
        config.identity.clone(),
        cursors,
        sound,
        EngineSettings::from(&config),
        outputs.clone(),
    );
    let source = HttpNotificationSource::from_config(&config)?;
    let (scheduler, handle) =
        FetchScheduler::new(engine, source, identity.clone(), config.poll_interval());

    tokio::spawn(console::render(outputs));
    tokio::spawn(console::read_commands(console::stdin_lines(), handle, identity));

    // Run with graceful shutdown on Ctrl+C
    let stats = scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await;
    tracing::info!(delivered = stats.delivered, "Scheduler finished");

    tracing::info!("Bulletin client stopped.");
    Ok(())
}
