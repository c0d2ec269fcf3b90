//! Configuration loading, env substitution and overrides, and validation.
//!
//! Config files: `chanrelay.toml`, `chanrelay.yaml`, or `chanrelay.json`,
//! searched in `./` then in the user config directory.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file, and `CHANRELAY_*` environment overrides on top of the parsed values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        ConfigLoader, apply_env_overrides, config_dir, data_dir, load_config, resolve_store_url,
    },
    schema::{
        ForwardingConfig, MetricsConfig, NewSourcePolicy, RelayConfig, StoreConfig,
        SupervisorConfig, TelegramConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
