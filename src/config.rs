//! Configuration loading via `ortho-config`.
//!
//! Two structures are layered from the same sources: [`ServerConfig`]
//! controls where machinist keeps its state and where it listens, and
//! [`ScalewayConfig`] carries Scaleway credentials and the defaults the
//! Scaleway driver declares for its options.

use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// File name searched for by configuration discovery.
pub const CONFIG_FILE_NAME: &str = "machinist.toml";

/// Default directory holding the state store.
pub const DEFAULT_STORE_ROOT: &str = ".machine";

/// Server settings derived from environment variables and configuration
/// files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "MACHINIST",
    discovery(
        app_name = "machinist",
        env_var = "MACHINIST_CONFIG_PATH",
        config_file_name = "machinist.toml",
        dotfile_name = ".machinist.toml",
        project_file_name = "machinist.toml"
    )
)]
pub struct ServerConfig {
    /// Root directory of the state store. Defaults to `.machine`.
    #[ortho_config(default = DEFAULT_STORE_ROOT.to_owned())]
    pub store_root: String,
    /// Address the HTTP API binds to.
    #[ortho_config(default = "127.0.0.1".to_owned())]
    pub bind_address: String,
    /// Port the HTTP API listens on.
    #[ortho_config(default = 8080)]
    pub port: u16,
}

impl ServerConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("machinist")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Root directory of the state store.
    #[must_use]
    pub fn store_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.store_root)
    }

    /// Socket address the HTTP API should bind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `bind_address` is not an IP
    /// address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind_address.trim().parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "bind address {:?} is not an IP address: set MACHINIST_BIND_ADDRESS or \
                 add bind_address to {CONFIG_FILE_NAME}",
                self.bind_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the store root is empty or the bind
    /// address is unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.store_root,
            &FieldMetadata::new("state store root", "MACHINIST_STORE_ROOT", "store_root"),
        )?;
        self.socket_addr().map(|_| ())
    }
}

/// Scaleway credentials and driver defaults.
///
/// Only the secret key is needed to talk to the API. The remaining values
/// seed the defaults the Scaleway driver declares, so every host can still
/// override them individually.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "machinist",
        env_var = "MACHINIST_CONFIG_PATH",
        config_file_name = "machinist.toml",
        dotfile_name = ".machinist.toml",
        project_file_name = "machinist.toml"
    )
)]
pub struct ScalewayConfig {
    /// Secret key used for authentication. Never written to snapshots.
    #[ortho_config(default = String::new())]
    pub secret_key: String,
    /// Project identifier used for billing and resource scoping.
    #[ortho_config(default = String::new())]
    pub default_project_id: String,
    /// Organisation identifier used to scope image lookups.
    pub default_organization_id: Option<String>,
    /// Preferred availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for new servers. Defaults to `DEV1-S`.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Human-friendly image label (for example `Ubuntu 24.04 Noble Numbat`).
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
}

impl ScalewayConfig {
    /// Configuration with built-in defaults and no credentials.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            secret_key: String::new(),
            default_project_id: String::new(),
            default_organization_id: None,
            default_zone: String::from("fr-par-1"),
            default_instance_type: String::from("DEV1-S"),
            default_image: String::from("Ubuntu 24.04 Noble Numbat"),
            default_architecture: String::from("x86_64"),
        }
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("machinist")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the API secret key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming `SCW_SECRET_KEY` when the
    /// key is empty.
    pub fn require_secret_key(&self) -> Result<&str, ConfigError> {
        require_field(
            &self.secret_key,
            &FieldMetadata::new("Scaleway API secret key", "SCW_SECRET_KEY", "secret_key"),
        )?;
        Ok(self.secret_key.trim())
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::EnvGuard;
    use rstest::rstest;

    fn server(bind_address: &str) -> ServerConfig {
        ServerConfig {
            store_root: String::from(DEFAULT_STORE_ROOT),
            bind_address: bind_address.to_owned(),
            port: 8080,
        }
    }

    #[rstest]
    #[case("127.0.0.1", "127.0.0.1:8080")]
    #[case("::1", "[::1]:8080")]
    #[case(" 0.0.0.0 ", "0.0.0.0:8080")]
    fn socket_addr_accepts_ip_addresses(#[case] bind: &str, #[case] expected: &str) {
        let addr = server(bind)
            .socket_addr()
            .unwrap_or_else(|err| panic!("{bind}: {err}"));
        assert_eq!(addr.to_string(), expected);
    }

    #[test]
    fn socket_addr_rejects_host_names_with_guidance() {
        let err = server("localhost").socket_addr().expect_err("not an IP");
        let message = err.to_string();
        assert!(message.contains("MACHINIST_BIND_ADDRESS"), "{message}");
        assert!(message.contains("machinist.toml"), "{message}");
    }

    #[test]
    fn validate_rejects_empty_store_root() {
        let cfg = ServerConfig {
            store_root: String::from("  "),
            ..server("127.0.0.1")
        };
        let err = cfg.validate().expect_err("store root is required");
        assert!(err.to_string().contains("MACHINIST_STORE_ROOT"), "{err}");
    }

    #[tokio::test]
    async fn server_config_reads_environment_overrides() {
        let _guard = EnvGuard::set_var("MACHINIST_PORT", "9191").await;
        let cfg = ServerConfig::load_without_cli_args()
            .unwrap_or_else(|err| panic!("load config: {err}"));
        assert_eq!(cfg.port, 9191);
    }

    #[test]
    fn secret_key_is_required_with_actionable_error() {
        let err = ScalewayConfig::unconfigured()
            .require_secret_key()
            .expect_err("no secret configured");
        let ConfigError::MissingField(ref message) = err else {
            panic!("expected MissingField error, got {err:?}");
        };
        assert!(message.contains("SCW_SECRET_KEY"), "{message}");
        assert!(message.contains("secret_key"), "{message}");
        assert!(message.contains("machinist.toml"), "{message}");
    }
}
