//! Configuration schema and discovery for herald.
//!
//! Config lives in `herald.{toml,yaml,yml,json}`, found project-local first
//! and then under `~/.config/herald/`. String values support `${ENV_VAR}`
//! substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config, set_config_dir},
    schema::{
        AccountConfig, BindingConfig, CredentialConfig, GatewayDefaults, HeraldConfig,
        ScreenshotConfig,
    },
};
