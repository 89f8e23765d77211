//! Joshua Desktop: application entry.

mod app;

use anyhow::Context;
use eframe::egui;

/// Runtime for the connection driver, plus the loaded config (defaults when unreadable).
fn bootstrap() -> anyhow::Result<(tokio::runtime::Runtime, joshua::config::Config)> {
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let config = match joshua::config::load_config(None) {
        Ok((config, _)) => config,
        Err(e) => {
            log::warn!("using default config: {:#}", e);
            joshua::config::Config::default()
        }
    };
    Ok((runtime, config))
}

fn main() -> eframe::Result<()> {
    app::install_logger();

    let (runtime, config) = match bootstrap() {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("joshua-desktop: {:#}", e);
            std::process::exit(1);
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 760.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Joshua",
        options,
        Box::new(move |_cc| Box::new(app::JoshuaApp::new(runtime, &config))),
    )
}
