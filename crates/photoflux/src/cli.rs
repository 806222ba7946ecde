use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "photoflux",
    about = "Animated photo-collage wallpaper",
    version
)]
pub struct Args {
    /// TOML configuration file.
    #[arg(long, value_name = "FILE", env = "PHOTOFLUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory scanned for photos; repeatable. Overrides the config's
    /// media paths.
    #[arg(long = "media", value_name = "DIR")]
    pub media: Vec<PathBuf>,

    /// Time between photo transitions, e.g. "5s" or "750ms".
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Window size.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,
}

pub fn parse() -> Args {
    Args::parse()
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|err| format!("invalid duration '{raw}': {err}"))
}

fn parse_size(raw: &str) -> Result<(u32, u32), String> {
    let (width, height) = raw
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let width: u32 = width.parse().map_err(|_| format!("bad width '{width}'"))?;
    let height: u32 = height
        .parse()
        .map_err(|_| format!("bad height '{height}'"))?;
    if width == 0 || height == 0 {
        return Err("window size must be non-zero".into());
    }
    Ok((width, height))
}
