//! YAML configuration for rpcweave.
//!
//! ## Module Organization
//!
//! - `schema` - configuration structures and their defaults
//! - `loader` - file discovery, env substitution, parsing, validation
//! - `error` - [`ConfigError`]

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{
    CONFIG_ENV_VAR, default_config_paths, find_config_file, load_and_validate, load_config,
    substitute_env_vars, validate,
};
pub use schema::{Config, DispatchConfig, HttpConfig};
