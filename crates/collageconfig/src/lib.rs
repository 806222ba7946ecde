use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// RGBA color with components in `0.0..=1.0`.
///
/// Deserializes from `#RRGGBB` or `#AARRGGBB` hex strings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Self = Self::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parses `#RRGGBB` (opaque) or `#AARRGGBB` hex notation.
    pub fn from_hex(value: &str) -> Result<Self, ConfigError> {
        let digits = value.strip_prefix('#').unwrap_or(value);
        let (a, rgb) = match digits.len() {
            6 => (255u8, digits),
            8 => {
                let alpha = u8::from_str_radix(&digits[0..2], 16)
                    .map_err(|_| ConfigError::Invalid(format!("bad color '{value}'")))?;
                (alpha, &digits[2..])
            }
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "color '{value}' must be #RRGGBB or #AARRGGBB"
                )))
            }
        };
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&rgb[range], 16)
                .map_err(|_| ConfigError::Invalid(format!("bad color '{value}'")))
        };
        Ok(Self {
            r: channel(0..2)? as f32 / 255.0,
            g: channel(2..4)? as f32 / 255.0,
            b: channel(4..6)? as f32 / 255.0,
            a: a as f32 / 255.0,
        })
    }

    /// Returns the color with its alpha replaced.
    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Color::from_hex(&text).map_err(de::Error::custom)
    }
}

impl Serialize for Color {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        serializer.serialize_str(&format!(
            "#{:02X}{:02X}{:02X}{:02X}",
            to_byte(self.a),
            to_byte(self.r),
            to_byte(self.g),
            to_byte(self.b)
        ))
    }
}

/// Row/column layout of the photo grid for one orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Disposition {
    pub rows: u32,
    pub cols: u32,
}

impl Disposition {
    pub fn frame_count(&self) -> usize {
        (self.rows * self.cols) as usize
    }
}

/// Visual effects the transition engine may pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Fade,
    Slide,
    Flip,
    Swap,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WallpaperConfig {
    #[serde(default = "default_background")]
    pub background_color: Color,
    #[serde(default = "default_border")]
    pub border_color: Color,
    #[serde(default = "default_overlay")]
    pub overlay_color: Color,
    /// Overlay dim strength as a percentage, clamped to 0..=100.
    #[serde(default)]
    pub dim_percent: u8,
    #[serde(default = "default_portrait")]
    pub portrait_disposition: Disposition,
    #[serde(default = "default_landscape")]
    pub landscape_disposition: Disposition,
    #[serde(
        default = "default_transition_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub transition_interval: Duration,
    #[serde(
        default = "default_transition_max",
        deserialize_with = "deserialize_duration"
    )]
    pub transition_max_duration: Duration,
    #[serde(default = "default_effects")]
    pub effects: Vec<EffectKind>,
    /// Zero disables the periodic media re-scan.
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub media_scan_interval: Duration,
    /// Height reserved at the top of the viewport for the status bar.
    #[serde(default)]
    pub status_bar_inset: u32,
    /// Directories scanned for photos.
    #[serde(default)]
    pub media_paths: Vec<PathBuf>,
    /// Expected surface width, used to pre-size the texture cache
    /// before the first surface-changed callback arrives.
    #[serde(default = "default_surface_hint")]
    pub surface_hint_width: u32,
}

impl WallpaperConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: WallpaperConfig = toml::from_str(raw)?;
        config.validate()?;
        config.dim_percent = config.dim_percent.min(100);
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Picks the disposition matching the viewport orientation.
    pub fn disposition_for(&self, width: u32, height: u32) -> Disposition {
        if height > width {
            self.portrait_disposition
        } else {
            self.landscape_disposition
        }
    }

    /// Overlay color with the configured dim strength applied.
    pub fn overlay(&self) -> Color {
        self.overlay_color
            .with_alpha(self.dim_percent.min(100) as f32 / 100.0)
    }

    pub fn media_scan_enabled(&self) -> bool {
        !self.media_scan_interval.is_zero()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for disposition in [self.portrait_disposition, self.landscape_disposition] {
            if disposition.rows == 0 || disposition.cols == 0 {
                return Err(ConfigError::Invalid(
                    "disposition rows and cols must be at least 1".into(),
                ));
            }
        }
        if self.effects.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one transition effect must be enabled".into(),
            ));
        }
        if self.transition_max_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "transition_max_duration must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for WallpaperConfig {
    fn default() -> Self {
        Self {
            background_color: default_background(),
            border_color: default_border(),
            overlay_color: default_overlay(),
            dim_percent: 0,
            portrait_disposition: default_portrait(),
            landscape_disposition: default_landscape(),
            transition_interval: default_transition_interval(),
            transition_max_duration: default_transition_max(),
            effects: default_effects(),
            media_scan_interval: Duration::ZERO,
            status_bar_inset: 0,
            media_paths: Vec::new(),
            surface_hint_width: default_surface_hint(),
        }
    }
}

fn default_background() -> Color {
    Color::BLACK
}

fn default_border() -> Color {
    Color::from_hex("#FF202020").expect("static color")
}

fn default_overlay() -> Color {
    Color::BLACK
}

fn default_portrait() -> Disposition {
    Disposition { rows: 3, cols: 2 }
}

fn default_landscape() -> Disposition {
    Disposition { rows: 2, cols: 3 }
}

fn default_transition_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_transition_max() -> Duration {
    Duration::from_millis(2500)
}

fn default_effects() -> Vec<EffectKind> {
    vec![
        EffectKind::Fade,
        EffectKind::Slide,
        EffectKind::Flip,
        EffectKind::Swap,
    ]
}

fn default_surface_hint() -> u32 {
    1920
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = WallpaperConfig::from_toml_str("").unwrap();
        assert_eq!(config.portrait_disposition, Disposition { rows: 3, cols: 2 });
        assert_eq!(config.transition_interval, Duration::from_secs(5));
        assert!(!config.media_scan_enabled());
        assert_eq!(config.dim_percent, 0);
    }

    #[test]
    fn parses_full_config() {
        let config = WallpaperConfig::from_toml_str(
            r##"
background_color = "#101010"
border_color = "#80FFFFFF"
overlay_color = "#000000"
dim_percent = 30
transition_interval = "3s"
transition_max_duration = "1500ms"
media_scan_interval = 3600
effects = ["fade", "slide"]
status_bar_inset = 24
media_paths = ["/home/me/Pictures"]

[portrait_disposition]
rows = 4
cols = 2

[landscape_disposition]
rows = 2
cols = 4
"##,
        )
        .unwrap();
        assert_eq!(config.dim_percent, 30);
        assert_eq!(config.transition_interval, Duration::from_secs(3));
        assert_eq!(config.transition_max_duration, Duration::from_millis(1500));
        assert_eq!(config.media_scan_interval, Duration::from_secs(3600));
        assert!(config.media_scan_enabled());
        assert_eq!(config.effects, vec![EffectKind::Fade, EffectKind::Slide]);
        assert_eq!(config.landscape_disposition.frame_count(), 8);
    }

    #[test]
    fn color_hex_roundtrip() {
        let opaque = Color::from_hex("#FF0080").unwrap();
        assert!((opaque.r - 1.0).abs() < 1e-6);
        assert!((opaque.g - 0.0).abs() < 1e-6);
        assert!((opaque.a - 1.0).abs() < 1e-6);

        let translucent = Color::from_hex("#80000000").unwrap();
        assert!((translucent.a - 128.0 / 255.0).abs() < 1e-3);

        assert!(Color::from_hex("#12345").is_err());
        assert!(Color::from_hex("notacolor").is_err());
    }

    #[test]
    fn dim_percent_is_clamped() {
        let config = WallpaperConfig::from_toml_str("dim_percent = 250").unwrap();
        assert_eq!(config.dim_percent, 100);
        assert!((config.overlay().a - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orientation_picks_disposition() {
        let config = WallpaperConfig::default();
        assert_eq!(config.disposition_for(1080, 1920), config.portrait_disposition);
        assert_eq!(config.disposition_for(1920, 1080), config.landscape_disposition);
        // Square viewports count as landscape.
        assert_eq!(config.disposition_for(512, 512), config.landscape_disposition);
    }

    #[test]
    fn rejects_degenerate_layouts() {
        let result = WallpaperConfig::from_toml_str(
            r#"
[portrait_disposition]
rows = 0
cols = 2
"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = WallpaperConfig::from_toml_str("effects = []");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
