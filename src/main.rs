use anyhow::Result;
use growatt_monitor::{api, config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to load .env: {e}");
        }
    }
    init_tracing();

    let config_path = config::config_path();
    let cfg = Config::load_from(&config_path)?;
    info!(path = %config_path.display(), "configuration loaded");

    let app_state = controller::AppState::new(cfg.clone(), Some(config_path));
    let poller = controller::spawn_poller(&app_state)?;

    let app = api::router(app_state, &cfg);
    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0, the API is reachable from the network");
    }

    info!(%addr, "starting Growatt monitor");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    poller.abort();
    warn!("shutdown complete");
    Ok(())
}
