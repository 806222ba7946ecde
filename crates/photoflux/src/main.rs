mod cli;
mod host;

use anyhow::{Context, Result};
use collageconfig::WallpaperConfig;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::parse();
    initialise_tracing();

    let mut config = match &args.config {
        Some(path) => WallpaperConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => WallpaperConfig::default(),
    };
    if !args.media.is_empty() {
        config.media_paths = args.media.clone();
    }
    if let Some(interval) = args.interval {
        config.transition_interval = interval;
    }
    if config.media_paths.is_empty() {
        anyhow::bail!(
            "no media directories configured; pass --media DIR or set media_paths in the config"
        );
    }

    let size = args.size.unwrap_or((
        config.surface_hint_width,
        (config.surface_hint_width * 9) / 16,
    ));
    config.surface_hint_width = size.0;

    tracing::info!(
        media_dirs = config.media_paths.len(),
        interval = ?config.transition_interval,
        width = size.0,
        height = size.1,
        "starting photoflux"
    );
    host::run_window(config, size)
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
