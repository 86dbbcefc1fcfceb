use color_eyre::Result;
use tasmota_dash::config::{default_config_path, load_config};
use tasmota_dash::events::DashboardEvent;
use tasmota_dash::{Dispatcher, RumqttcTransport};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = default_config_path();
    info!("Loading configuration from {}", config_path.display());
    let config = load_config(&config_path)?;
    if config.dump_config {
        info!("Active configuration:\n{}", config.to_toml()?);
    }

    let dispatcher = Dispatcher::new(RumqttcTransport::new(), config.mqtt)?;
    let mut events = dispatcher.subscribe();
    let registry = dispatcher.registry();
    let mut handle = dispatcher.spawn();

    let _event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(DashboardEvent::Device(event)) => {
                    debug!("{:?} from {}", event.kind, event.device_id)
                }
                // Diagnostics are already logged where they are raised
                Ok(DashboardEvent::Diagnostic(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event log fell behind, skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    handle.shutdown().await?;

    info!(
        "Stopped with {} known devices ({} online)",
        registry.len().await,
        registry.online_count().await
    );
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
