//! Configuration loading and validation.

use regex::Regex;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::error::ConfigError;
use super::schema::Config;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "RPCWEAVE_CONFIG";

/// Configuration file search paths (in priority order).
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from("./rpcweave.yaml"));

    paths
}

/// Find the first existing config file from the search paths.
///
/// An explicit path (CLI flag) wins and must exist.
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::ConfigFileNotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let paths = default_config_paths();
    for path in &paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    Err(ConfigError::ConfigFileNotFound { searched: paths })
}

/// Load configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;

    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let contents = substitute_env_vars(&contents)?;
    let config: Config = serde_saphyr::from_str(&contents)?;

    Ok(config)
}

/// Load and validate configuration.
pub fn load_and_validate(path: &Path) -> Result<Config, ConfigError> {
    let config = load_config(path)?;
    validate(&config)?;
    Ok(config)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// SAFETY: .expect() on LazyLock with a compile-time literal regex pattern.
// The pattern is known-valid and tested by test_env_var_pattern_compiles().
#[allow(clippy::expect_used)]
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("BUG: ENV_VAR_PATTERN regex is invalid")
});

/// Substitute environment variables in a string.
///
/// # Syntax
/// - `${VAR}` - Required, fail if not set
/// - `${VAR:-default}` - Optional with default
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing = None;

    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures<'_>| {
        let var_name = cap.get(1).map_or("", |m| m.as_str());
        match std::env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.get_or_insert_with(|| var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if let Some(var) = missing {
        return Err(ConfigError::MissingEnvVar {
            var,
            field: "configuration".to_string(),
        });
    }

    Ok(result.into_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a loaded configuration. Stops at the first violation.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let http = &config.http;

    if let Err(e) = http.listen.parse::<SocketAddr>() {
        return Err(ConfigError::InvalidListenAddress {
            listen: http.listen.clone(),
            message: e.to_string(),
        });
    }

    if !http.path.starts_with('/') {
        return Err(ConfigError::InvalidPath {
            path: http.path.clone(),
        });
    }

    if !http.content_type.starts_with("application/json") {
        return Err(ConfigError::InvalidContentType {
            content_type: http.content_type.clone(),
        });
    }

    if http.min_body_length > http.max_body_size {
        return Err(ConfigError::InvalidBodyLimits {
            min: http.min_body_length,
            max: http.max_body_size,
        });
    }

    if !matches!(http.empty_response_status, 200 | 204) {
        return Err(ConfigError::InvalidEmptyResponseStatus {
            status: http.empty_response_status,
        });
    }

    if config
        .dispatch
        .cancel_method
        .as_deref()
        .is_some_and(|m| m.trim().is_empty())
    {
        return Err(ConfigError::EmptyCancelMethod);
    }

    Ok(())
}
