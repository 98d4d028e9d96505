pub mod config;
pub mod display;
pub mod mqtt;
pub mod ui;

use crate::config::Config;
use crate::display::surface::DISPLAY_CHANNEL_CAPACITY;
use crate::mqtt::mqtt_handler::SubscriptionHandle;
use crate::ui::PhotoViewerUI;
use color_eyre::{eyre::eyre, Result};
use eframe::egui;
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load_or_default().await;
    info!("Using broker {}", config.mqtt.broker());

    // Worker tasks post here, only the UI thread receives
    let (display_tx, display_rx) = mpsc::channel(DISPLAY_CHANNEL_CAPACITY);

    let mut session = SubscriptionHandle::spawn(config.mqtt.clone(), display_tx);
    let commander = session.commander();
    let status_rx = session.status();

    info!("Starting UI");
    let mut native_options = eframe::NativeOptions::default();
    native_options.viewport = egui::ViewportBuilder::default()
        .with_title("Animal Photos")
        .with_fullscreen(config.ui.fullscreen);

    let ui_config = config.ui.clone();
    let ui_result = eframe::run_native(
        "Animal Photos",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(PhotoViewerUI::new(
                cc, display_rx, commander, status_rx, &ui_config,
            )))
        }),
    );

    info!("UI closed, shutting down session");
    if let Err(e) = session.shutdown().await {
        error!("Session shutdown failed: {}", e);
    }

    ui_result.map_err(|e| eyre!("UI terminated with error: {}", e))
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
