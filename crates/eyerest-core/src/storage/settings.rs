//! Break settings: the validated runtime model and its TOML file form.
//!
//! Settings are stored at `~/.config/eyerest/settings.toml`. The file is
//! written with defaults on first run. Loading validates every field and
//! reports all problems at once, so the scheduler only ever sees a
//! [`Settings`] value whose invariants hold.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use indoc::indoc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::data_dir;
use crate::error::{ConfigError, FieldError};

const MAX_FADE: Duration = Duration::from_secs(5);
const REST_SECONDS_RANGE: std::ops::RangeInclusive<u32> = 1..=99;

const FILE_APPENDIX: &str = indoc! {"

    # Durations: interval_minutes and escape_next_minutes are minutes,
    # the others are seconds. rest_seconds must be a whole number in 1..=99,
    # fades must not exceed 5 seconds.
    #
    # Colors: a name (\"Cyan\", \"Gold\", \"OrangeRed\", ...) or \"#AARRGGBB\" / \"#RRGGBB\".
    # invisibility is the overlay opacity, 0 to 255.
"};

/// ARGB color used by the overlay. Display-only, the scheduler never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn from_argb(argb: u32) -> Self {
        Self {
            a: (argb >> 24) as u8,
            r: (argb >> 16) as u8,
            g: (argb >> 8) as u8,
            b: argb as u8,
        }
    }

    pub const fn argb(self) -> u32 {
        (self.a as u32) << 24 | (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    fn name(self) -> Option<&'static str> {
        NAMED_COLORS
            .iter()
            .find(|(_, argb)| *argb == self.argb())
            .map(|(name, _)| *name)
    }
}

const NAMED_COLORS: &[(&str, u32)] = &[
    ("Black", 0xFF000000),
    ("White", 0xFFFFFFFF),
    ("Red", 0xFFFF0000),
    ("Green", 0xFF008000),
    ("Lime", 0xFF00FF00),
    ("Blue", 0xFF0000FF),
    ("Cyan", 0xFF00FFFF),
    ("Magenta", 0xFFFF00FF),
    ("Yellow", 0xFFFFFF00),
    ("Gold", 0xFFFFD700),
    ("Orange", 0xFFFFA500),
    ("OrangeRed", 0xFFFF4500),
    ("Gray", 0xFF808080),
    ("Transparent", 0x00FFFFFF),
];

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            let value =
                u32::from_str_radix(hex, 16).map_err(|_| format!("invalid color: {s}"))?;
            return match hex.len() {
                8 => Ok(Color::from_argb(value)),
                6 => Ok(Color::from_argb(0xFF00_0000 | value)),
                _ => Err(format!("invalid color: {s}")),
            };
        }
        // Aqua is an alias of Cyan.
        let s = if s.eq_ignore_ascii_case("aqua") { "Cyan" } else { s };
        NAMED_COLORS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, argb)| Color::from_argb(*argb))
            .ok_or_else(|| format!("invalid color: {s}"))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "#{:08X}", self.argb()),
        }
    }
}

/// Validated, immutable settings for one scheduling session.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Time between the end of one break and the next.
    pub interval: Duration,
    /// Retry interval after a break was force-cancelled.
    pub escape_next: Duration,
    /// Length of the in-overlay countdown.
    pub rest: Duration,
    pub fade_in: Duration,
    pub fade_out: Duration,
    /// Delay between a completed countdown and the start of the fade-out.
    pub color_change_lead: Duration,
    /// Refresh period of every countdown display. Not persisted.
    pub tick: Duration,
    pub countdown_color: Color,
    pub failed_color: Color,
    pub success_color: Color,
    /// Overlay opacity, 0..=255.
    pub invisibility: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20 * 60),
            escape_next: Duration::from_secs(2 * 60),
            rest: Duration::from_secs(20),
            fade_in: Duration::from_millis(1000),
            fade_out: Duration::from_millis(800),
            color_change_lead: Duration::from_millis(800),
            tick: Duration::from_secs(1),
            countdown_color: Color::from_argb(0xFF00FFFF),
            failed_color: Color::from_argb(0xFFFF4500),
            success_color: Color::from_argb(0xFFFFD700),
            invisibility: 0x60,
        }
    }
}

impl Settings {
    /// Check the invariants the scheduler relies on.
    ///
    /// Weaker than the file rules: any settings accepted by
    /// [`Settings::from_file`] pass this check.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing every violated invariant.
    pub fn check_invariants(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("interval", self.interval),
            ("escape_next", self.escape_next),
            ("rest", self.rest),
            ("fade_in", self.fade_in),
            ("fade_out", self.fade_out),
            ("color_change_lead", self.color_change_lead),
            ("tick", self.tick),
        ] {
            if value.is_zero() {
                errors.push(FieldError::new(field, "must be positive"));
            }
        }
        if self.escape_next > self.interval {
            errors.push(FieldError::new("escape_next", "must not exceed interval"));
        }
        if self.escape_next <= self.fade_out {
            errors.push(FieldError::new("escape_next", "must be longer than fade_out"));
        }
        if self.fade_in + self.fade_out + self.rest >= self.interval {
            errors.push(FieldError::new(
                "interval",
                "must be longer than fade_in + fade_out + rest",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Validate a settings file and convert it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] with one entry per problem found.
    pub fn from_file(file: &SettingsFile) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();

        let interval = seconds("interval_minutes", file.interval_minutes * 60.0, &mut errors);
        let escape_next =
            seconds("escape_next_minutes", file.escape_next_minutes * 60.0, &mut errors);
        let fade_in = seconds("fade_in_seconds", file.fade_in_seconds, &mut errors);
        let fade_out = seconds("fade_out_seconds", file.fade_out_seconds, &mut errors);
        let color_change_lead =
            seconds("color_change_seconds", file.color_change_seconds, &mut errors);

        if !REST_SECONDS_RANGE.contains(&file.rest_seconds) {
            errors.push(FieldError::new(
                "rest_seconds",
                format!(
                    "must be between {} and {} seconds",
                    REST_SECONDS_RANGE.start(),
                    REST_SECONDS_RANGE.end()
                ),
            ));
        }
        let rest = Duration::from_secs(u64::from(file.rest_seconds));

        for (field, value) in [("fade_in_seconds", fade_in), ("fade_out_seconds", fade_out)] {
            if value.is_some_and(|v| v > MAX_FADE) {
                errors.push(FieldError::new(
                    field,
                    format!("must not exceed {} seconds", MAX_FADE.as_secs()),
                ));
            }
        }

        if let (Some(interval), Some(escape_next)) = (interval, escape_next) {
            if escape_next > interval {
                errors.push(FieldError::new(
                    "escape_next_minutes",
                    "must not exceed interval_minutes",
                ));
            }
        }

        if let (Some(fade_in), Some(fade_out), Some(lead)) = (fade_in, fade_out, color_change_lead)
        {
            let episode = rest + fade_in + fade_out + lead;
            for (field, value) in [
                ("escape_next_minutes", escape_next),
                ("interval_minutes", interval),
            ] {
                if value.is_some_and(|v| v <= episode) {
                    errors.push(FieldError::new(
                        field,
                        "must be longer than rest + fade_in + fade_out + color_change",
                    ));
                }
            }
        }

        let countdown_color = color("countdown_color", &file.countdown_color, &mut errors);
        let failed_color = color("failed_color", &file.failed_color, &mut errors);
        let success_color = color("success_color", &file.success_color, &mut errors);

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        let defaults = Settings::default();
        Ok(Self {
            interval: interval.unwrap_or(defaults.interval),
            escape_next: escape_next.unwrap_or(defaults.escape_next),
            rest,
            fade_in: fade_in.unwrap_or(defaults.fade_in),
            fade_out: fade_out.unwrap_or(defaults.fade_out),
            color_change_lead: color_change_lead.unwrap_or(defaults.color_change_lead),
            tick: defaults.tick,
            countdown_color: countdown_color.unwrap_or(defaults.countdown_color),
            failed_color: failed_color.unwrap_or(defaults.failed_color),
            success_color: success_color.unwrap_or(defaults.success_color),
            invisibility: file.invisibility,
        })
    }

    pub fn to_file(&self) -> SettingsFile {
        SettingsFile {
            interval_minutes: self.interval.as_secs_f64() / 60.0,
            escape_next_minutes: self.escape_next.as_secs_f64() / 60.0,
            rest_seconds: u32::try_from(self.rest.as_secs()).unwrap_or(u32::MAX),
            fade_in_seconds: self.fade_in.as_secs_f64(),
            fade_out_seconds: self.fade_out.as_secs_f64(),
            color_change_seconds: self.color_change_lead.as_secs_f64(),
            countdown_color: self.countdown_color.to_string(),
            failed_color: self.failed_color.to_string(),
            success_color: self.success_color.to_string(),
            invisibility: self.invisibility,
        }
    }

    /// Default location of the settings file.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("settings.toml"))
    }

    /// Load from the default location, writing defaults on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let file: SettingsFile =
                    toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
                Self::from_file(&file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "settings file missing, writing defaults");
                let settings = Self::default();
                settings.save_to(path)?;
                Ok(settings)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let mut content =
            toml::to_string_pretty(&self.to_file()).map_err(|e| save_failed(e.to_string()))?;
        content.push_str(FILE_APPENDIX);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }
}

fn seconds(field: &'static str, secs: f64, errors: &mut Vec<FieldError>) -> Option<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(value) if value.is_zero() => {
            errors.push(FieldError::new(field, "must be positive"));
            Some(value)
        }
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(FieldError::new(field, "must be a positive, finite number"));
            None
        }
    }
}

fn color(field: &'static str, value: &str, errors: &mut Vec<FieldError>) -> Option<Color> {
    match value.parse() {
        Ok(color) => Some(color),
        Err(message) => {
            errors.push(FieldError::new(field, message));
            None
        }
    }
}

/// On-disk form of [`Settings`]. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: f64,
    #[serde(default = "default_escape_next_minutes")]
    pub escape_next_minutes: f64,
    #[serde(default = "default_rest_seconds")]
    pub rest_seconds: u32,
    #[serde(default = "default_fade_in_seconds")]
    pub fade_in_seconds: f64,
    #[serde(default = "default_fade_out_seconds")]
    pub fade_out_seconds: f64,
    #[serde(default = "default_color_change_seconds")]
    pub color_change_seconds: f64,
    #[serde(default = "default_countdown_color")]
    pub countdown_color: String,
    #[serde(default = "default_failed_color")]
    pub failed_color: String,
    #[serde(default = "default_success_color")]
    pub success_color: String,
    #[serde(default = "default_invisibility")]
    pub invisibility: u8,
}

fn default_interval_minutes() -> f64 {
    20.0
}
fn default_escape_next_minutes() -> f64 {
    2.0
}
fn default_rest_seconds() -> u32 {
    20
}
fn default_fade_in_seconds() -> f64 {
    1.0
}
fn default_fade_out_seconds() -> f64 {
    0.8
}
fn default_color_change_seconds() -> f64 {
    0.8
}
fn default_countdown_color() -> String {
    "Cyan".into()
}
fn default_failed_color() -> String {
    "OrangeRed".into()
}
fn default_success_color() -> String {
    "Gold".into()
}
fn default_invisibility() -> u8 {
    0x60
}

impl Default for SettingsFile {
    fn default() -> Self {
        Settings::default().to_file()
    }
}
