use std::path::PathBuf;

use ditchnet_worker::config::ConfigError;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. In production,
/// override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `300`). Uploads of large
    /// rasters must fit inside it.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for running jobs, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Folder holding `index.html` and the `assets/` directory.
    pub assets_path: PathBuf,
    /// Upper bound on a request body, in bytes (default: 512 MiB).
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            request_timeout_secs: 300,
            shutdown_timeout_secs: 30,
            assets_path: PathBuf::from("./assets"),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default     |
    /// |-------------------------|-------------|
    /// | `HOST`                  | `0.0.0.0`   |
    /// | `PORT`                  | `8080`      |
    /// | `REQUEST_TIMEOUT_SECS`  | `300`       |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`        |
    /// | `ASSETS_PATH`           | `./assets`  |
    /// | `MAX_UPLOAD_BYTES`      | `536870912` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            request_timeout_secs: parse(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            shutdown_timeout_secs: parse(
                &lookup,
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout_secs,
            )?,
            assets_path: lookup("ASSETS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_path),
            max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError {
            var,
            value,
            reason: "must be a valid number",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_upload_bytes, 536_870_912);

        let config = ServerConfig::from_lookup(|k| match k {
            "PORT" => Some("9000".into()),
            "ASSETS_PATH" => Some("/srv/www".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.assets_path, PathBuf::from("/srv/www"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = ServerConfig::from_lookup(|k| (k == "PORT").then(|| "70000".into())).unwrap_err();
        assert_eq!(err.var, "PORT");
    }
}
