//! Configuration for the Aether atmosphere engine.
//!
//! Settings persist to disk as RON files. Every section is `#[serde(default)]`,
//! so older files keep loading when new fields appear. CLI arguments parsed
//! with clap override whatever was loaded.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    AtmosphereConfig, Backend, Config, DebugConfig, MieConfig, OzoneConfig, RayleighConfig,
    ShadowCasterConfig, ShadowsConfig, SunConfig, TablesConfig, default_config_dir,
};
pub use error::ConfigError;
