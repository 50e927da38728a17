//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ChorusSettings::default()`]
//! 2. If the settings file exists, overlay user values on the defaults
//! 3. Apply `CHORUS_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! A user file only has to name the keys it changes: nested objects are
//! overlaid key by key, any other value replaces the default, and `null`
//! keeps the default.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chorus_core::logging::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ChorusSettings;

/// Resolve the default settings file path (`~/.chorus/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".chorus").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ChorusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; an unreadable or malformed file is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<ChorusSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<ChorusSettings> {
    let mut settings = serde_json::to_value(ChorusSettings::default())?;

    if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        overlay(&mut settings, serde_json::from_str(&content)?);
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    Ok(serde_json::from_value(settings)?)
}

/// Overlay `user` onto `base` in place.
pub fn overlay(base: &mut Value, user: Value) {
    let Value::Object(fields) = user else {
        *base = user;
        return;
    };
    let Value::Object(base_fields) = base else {
        *base = Value::Object(fields);
        return;
    };
    for (key, value) in fields.into_iter().filter(|(_, v)| !v.is_null()) {
        match base_fields.get_mut(&key) {
            Some(slot) => overlay(slot, value),
            None => {
                let _ = base_fields.insert(key, value);
            }
        }
    }
}

/// Apply `CHORUS_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut ChorusSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules; values that fail to parse or fall
/// outside their range are logged and ignored.
pub fn apply_overrides<F>(settings: &mut ChorusSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("CHORUS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.number("CHORUS_PORT", 1..=u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.number("CHORUS_QUEUE_CAPACITY", 1..=65_536) {
        settings.server.queue_capacity = v;
    }
    if let Some(v) = env.number("CHORUS_PING_INTERVAL_SECS", 1..=3600) {
        settings.server.ping_interval_secs = v;
    }
    if let Some(v) = env.number("CHORUS_READ_TIMEOUT_SECS", 1..=7200) {
        settings.server.read_timeout_secs = v;
    }
    if let Some(v) = env.number("CHORUS_MAX_MESSAGE_SIZE", 64..=16 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = env.number("CHORUS_MAX_CONNECTIONS", 1..=1_000_000) {
        settings.server.max_connections = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = env.string("CHORUS_JWT_SECRET") {
        settings.auth.jwt_secret = Some(v);
    }
    if let Some(v) = env.string("CHORUS_JWT_ISSUER") {
        settings.auth.issuer = Some(v);
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.number("CHORUS_LISTENER_TTL_SECS", 60..=30 * 24 * 60 * 60) {
        settings.store.listener_ttl_secs = v;
    }
    if let Some(v) = env.string("CHORUS_PROFILES_PATH") {
        settings.store.profiles_path = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("CHORUS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("CHORUS_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "CHORUS_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

/// Check constraints that span several fields.
pub fn validate(settings: &ChorusSettings) -> Result<()> {
    let server = &settings.server;
    if server.queue_capacity == 0 {
        return Err(SettingsError::invalid("server.queueCapacity", "must be greater than 0"));
    }
    if server.ping_interval_secs == 0 {
        return Err(SettingsError::invalid("server.pingIntervalSecs", "must be greater than 0"));
    }
    if server.ping_interval_secs >= server.read_timeout_secs {
        return Err(SettingsError::invalid(
            "server.pingIntervalSecs",
            format!(
                "{} must be less than server.readTimeoutSecs ({})",
                server.ping_interval_secs, server.read_timeout_secs
            ),
        ));
    }
    if settings.auth.jwt_secret.as_deref() == Some("") {
        return Err(SettingsError::invalid("auth.jwtSecret", "must not be empty"));
    }
    Ok(())
}

/// Parse `val` as a number inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn number<T>(&self, name: &str, range: RangeInclusive<T>) -> Option<T>
    where
        T: FromStr + PartialOrd + Clone + std::fmt::Debug,
    {
        let val = (self.lookup)(name)?;
        let parsed = parse_in_range(&val, range.clone());
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, allowed = ?range, "env override out of range or not a number, ignoring");
        }
        parsed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
