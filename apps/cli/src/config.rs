use std::{collections::HashMap, fs, path::Path};

use anyhow::{bail, Context};
use shared::domain::{CustomerUserId, LogLevel};

pub const DEFAULT_SETTINGS_FILE: &str = "commerce.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub sdk_key: Option<String>,
    pub backend_url: String,
    pub customer_user_id: Option<String>,
    pub log_level: LogLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sdk_key: None,
            backend_url: "http://127.0.0.1:8080".into(),
            customer_user_id: None,
            log_level: LogLevel::Info,
        }
    }
}

impl Settings {
    pub fn require_sdk_key(&self) -> anyhow::Result<&str> {
        match self.sdk_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!(
                "no sdk key configured; set sdk_key in {DEFAULT_SETTINGS_FILE}, COMMERCE_SDK_KEY, or --sdk-key"
            ),
        }
    }

    pub fn customer_user_id(&self) -> Option<CustomerUserId> {
        self.customer_user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(CustomerUserId::new)
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_with(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file (if present), then environment overrides.
pub fn load_settings_with(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let file_cfg = toml::from_str::<HashMap<String, String>>(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
        if let Some(v) = file_cfg.get("sdk_key") {
            settings.sdk_key = Some(v.clone());
        }
        if let Some(v) = file_cfg.get("backend_url") {
            settings.backend_url = v.clone();
        }
        if let Some(v) = file_cfg.get("customer_user_id") {
            settings.customer_user_id = Some(v.clone());
        }
        if let Some(v) = file_cfg.get("log_level") {
            settings.log_level = parse_log_level(v)?;
        }
    }

    if let Some(v) = env("COMMERCE_SDK_KEY") {
        settings.sdk_key = Some(v);
    }
    if let Some(v) = env("APP__SDK_KEY") {
        settings.sdk_key = Some(v);
    }

    if let Some(v) = env("COMMERCE_BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = env("APP__BACKEND_URL") {
        settings.backend_url = v;
    }

    if let Some(v) = env("COMMERCE_CUSTOMER_USER_ID") {
        settings.customer_user_id = Some(v);
    }

    if let Some(v) = env("APP__LOG_LEVEL") {
        settings.log_level = parse_log_level(&v)?;
    }

    Ok(settings)
}

pub fn parse_log_level(raw: &str) -> anyhow::Result<LogLevel> {
    LogLevel::parse(raw).with_context(|| {
        format!("unknown log level '{raw}' (expected none, errors, info, verbose)")
    })
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
