//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::controller::DEFAULT_DRIVER_NAME;
use crate::credentials::{CredentialsError, resolve_access_token};

/// Backend and driver configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "BLOCK_CSI")]
pub struct CloudConfig {
    /// Base URL of the IaaS API, for example `https://iaas.api.example.cloud`.
    pub api_url: String,
    /// Bearer token used for API calls. Mutually exclusive with
    /// `access_token_file`.
    pub access_token: Option<String>,
    /// Path to a file holding the bearer token, as mounted from a secret.
    pub access_token_file: Option<String>,
    /// Project that owns every volume, snapshot and backup.
    pub project_id: String,
    /// CSI driver name, also the prefix of the topology key.
    #[ortho_config(default = DEFAULT_DRIVER_NAME.to_owned())]
    pub driver_name: String,
    /// Cluster identifier written into backend labels when set.
    pub cluster: Option<String>,
    /// Per-request HTTP timeout in seconds. Defaults to 30.
    #[ortho_config(default = 30)]
    pub http_timeout_secs: u64,
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

impl CloudConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to block-csi.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("block-csi")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_url,
            &FieldMetadata::new("IaaS API URL", "BLOCK_CSI_API_URL", "api_url"),
        )?;
        Self::require_field(
            &self.project_id,
            &FieldMetadata::new("project ID", "BLOCK_CSI_PROJECT_ID", "project_id"),
        )?;
        Self::require_field(
            &self.driver_name,
            &FieldMetadata::new("driver name", "BLOCK_CSI_DRIVER_NAME", "driver_name"),
        )?;
        if self.access_token.is_none() && self.access_token_file.is_none() {
            return Err(ConfigError::MissingField(String::from(
                "missing API access token: set BLOCK_CSI_ACCESS_TOKEN or \
                 BLOCK_CSI_ACCESS_TOKEN_FILE, or add access_token to block-csi.toml",
            )));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "http_timeout_secs must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Resolves the bearer token from the inline value or the token file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Credentials`] when neither or both sources are
    /// set, or the file cannot be read.
    pub fn access_token(&self) -> Result<String, ConfigError> {
        resolve_access_token(self.access_token.as_deref(), self.access_token_file.as_deref())
            .map_err(ConfigError::from)
    }

    /// HTTP timeout applied to each backend request.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Surfaces access-token resolution failures.
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
