mod app;
mod auth;
mod config;
mod error;
mod events;
mod http;
mod logging;
mod network;
mod panel;
mod session;
mod store;

use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};

use app::{AppController, Platform};
use config::{Config, DriverKind};
use events::EventBus;
use http::ReqwestTransport;
use network::{HostDriver, NetworkDriver, SimulatedDriver};
use panel::{Panel, PanelDevice, StatusPanel};
use store::{FileTokenStore, MemoryTokenStore, TokenStore};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    if let Err(e) = logging::init_logging(Path::new(&config.app.log_dir)) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let device = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    tracing::info!(device = %device, "=== Spotify Controller Starting ===");
    match &config.source {
        Some(path) => tracing::info!(path = %path.display(), "Configuration loaded"),
        None => tracing::info!("No config file found, using defaults"),
    }

    let transport = ReqwestTransport::new(config.spotify.request_timeout())
        .context("Failed to create HTTP client")?;
    let driver: Box<dyn NetworkDriver> = match config.network.driver {
        DriverKind::Host => Box::new(HostDriver::new()),
        DriverKind::Simulated => Box::new(SimulatedDriver::new(
            std::time::Duration::from_millis(config.network.simulated_latency_ms),
        )),
    };
    let store: Box<dyn TokenStore> = match FileTokenStore::open(&config.app.token_store) {
        Ok(store) => Box::new(store),
        Err(e) => {
            tracing::error!(
                path = %config.app.token_store.display(),
                error = %e,
                "Token store unavailable, logins will not survive a restart"
            );
            Box::new(MemoryTokenStore::new())
        }
    };

    let mut panel = Panel::new(config.display.panel, config.display.touch);
    panel.init().context("Failed to initialize display panel")?;

    let bus = Rc::new(EventBus::new());
    let _status = StatusPanel::attach(bus.clone());

    let platform = Platform {
        driver,
        transport: Rc::new(transport),
        store,
    };
    let mut app = AppController::initialize(config, platform, bus.clone())
        .context("Failed to initialize controller")?;

    let tick = app.tick_interval();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = async {
                app.tick().await;
                if let Some(point) = panel.read() {
                    tracing::debug!(x = point.x, y = point.y, "Touch");
                }
                tokio::time::sleep(tick).await;
            } => {}
        }
    }

    app.shutdown();
    bus.clear_all();
    tracing::info!(
        state = %app.state(),
        network = ?app.connectivity().state(),
        error = ?app.error_cause(),
        track = ?app.playback().track_id(),
        "=== Spotify Controller Stopped ==="
    );
    Ok(())
}
