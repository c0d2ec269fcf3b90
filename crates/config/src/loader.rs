use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    chanrelay_common::ChannelRef,
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "chanrelay.toml",
    "chanrelay.yaml",
    "chanrelay.yml",
    "chanrelay.json",
];

const ENV_TARGET: &str = "CHANRELAY_TARGET_CHANNEL";
const ENV_SOURCES: &str = "CHANRELAY_SOURCE_CHANNELS";
const ENV_DATABASE_URL: &str = "CHANRELAY_DATABASE_URL";
const ENV_TELEGRAM_TOKEN: &str = "CHANRELAY_TELEGRAM_TOKEN";

/// Loads a fresh [`RelayConfig`] snapshot on every call.
///
/// The supervisor calls [`ConfigLoader::load`] before each run cycle, so edits
/// to the file or environment take effect on the next reconnect.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load from `path` when given, otherwise discover a config file.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// The file this loader reads, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(find_config_file)
    }

    /// Parse the config file (defaults when none exists) and apply env overrides.
    pub fn load(&self) -> anyhow::Result<RelayConfig> {
        let mut config = match self.path() {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                load_config(&path)?
            },
            None => {
                debug!("no config file found, using defaults and environment");
                RelayConfig::default()
            },
        };
        apply_env_overrides(&mut config)?;
        Ok(config)
    }
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Apply `CHANRELAY_*` environment overrides.
pub fn apply_env_overrides(config: &mut RelayConfig) -> anyhow::Result<()> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

pub(crate) fn apply_env_overrides_with(
    config: &mut RelayConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(raw) = lookup(ENV_TARGET) {
        config.target =
            Some(ChannelRef::parse(&raw).with_context(|| format!("invalid {ENV_TARGET}"))?);
    }
    if let Some(raw) = lookup(ENV_SOURCES) {
        config.sources = raw
            .split_whitespace()
            .map(ChannelRef::parse)
            .collect::<Result<_, _>>()
            .with_context(|| format!("invalid {ENV_SOURCES}"))?;
    }
    if let Some(url) = lookup(ENV_DATABASE_URL) {
        config.store.url = Some(url);
    }
    if let Some(token) = lookup(ENV_TELEGRAM_TOKEN) {
        config.telegram.token = Secret::new(token);
    }
    Ok(())
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// User-global config directory (`~/.config/chanrelay/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "chanrelay").map(|d| d.config_dir().to_path_buf())
}

/// User data directory, home of the default cursor database.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "chanrelay")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| {
            warn!("no home directory found, keeping data in the working directory");
            PathBuf::from(".")
        })
}

/// SQLite URL for the cursor store: the configured one or `<data dir>/chanrelay.db`.
pub fn resolve_store_url(config: &RelayConfig) -> anyhow::Result<String> {
    if let Some(url) = &config.store.url {
        return Ok(url.clone());
    }
    let dir = data_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    Ok(format!(
        "sqlite://{}?mode=rwc",
        dir.join("chanrelay.db").display()
    ))
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RelayConfig> {
    match extension(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

/// Parse raw config text into a format-neutral JSON value.
pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    match extension(path) {
        "toml" => Ok(serde_json::to_value(toml::from_str::<toml::Value>(raw)?)?),
        "yaml" | "yml" => Ok(serde_json::to_value(serde_yaml::from_str::<
            serde_yaml::Value,
        >(raw)?)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}
