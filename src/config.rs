use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::identity::{CredentialState, StaticAuthority};

const ENV_PREFIX: &str = "HOOK_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("secure_store_key must be 64 hex characters (32 bytes)")]
    InvalidKey,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityConfig {
    #[serde(default)]
    pub default_state: CredentialState,
    #[serde(default)]
    pub overrides: HashMap<String, CredentialState>,
}

impl IdentityConfig {
    pub fn authority(&self) -> StaticAuthority {
        StaticAuthority::new(self.default_state).with_overrides(self.overrides.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub data_dir: String,
    pub log_dir: String,
    /// Service name credentials are filed under in the secure store.
    pub bundle_identifier: String,
    pub secure_store_path: String,
    pub secure_store_key: String,
    pub identity: IdentityConfig,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialHookConfig {
    database_url: Option<String>,
    max_connections: Option<u32>,
    data_dir: Option<String>,
    log_dir: Option<String>,
    bundle_identifier: Option<String>,
    secure_store_path: Option<String>,
    secure_store_key: Option<String>,
    #[serde(default)]
    identity: Option<IdentityConfig>,
}

// Environment variables are flat, so the identity section collapses to its
// default state.
#[derive(Deserialize, Default, Debug)]
struct PartialEnvConfig {
    database_url: Option<String>,
    max_connections: Option<u32>,
    data_dir: Option<String>,
    log_dir: Option<String>,
    bundle_identifier: Option<String>,
    secure_store_path: Option<String>,
    secure_store_key: Option<String>,
    identity_default_state: Option<CredentialState>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_bundle_identifier() -> String {
    "app.hook".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_database_url(data_dir: &str) -> String {
    format!("sqlite://{}?mode=rwc", Path::new(data_dir).join("hook.db").display())
}

fn default_secure_store_path(data_dir: &str) -> String {
    Path::new(data_dir)
        .join("credentials.enc")
        .display()
        .to_string()
}

fn default_secure_store_key() -> String {
    // Development key; override it through HOOK_SECURE_STORE_KEY.
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_string()
}

impl HookConfig {
    /// Loads config from an optional TOML file, then `HOOK_*` environment
    /// variables (after `.env`), then defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path) if path.exists() => read_file(path)?,
            _ => PartialHookConfig::default(),
        };
        let env_config: PartialEnvConfig = envy::prefixed(ENV_PREFIX).from_env()?;

        Self::merge(file_config, env_config)
    }

    /// Parses a TOML document with no environment layer.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let file_config: PartialHookConfig = toml::from_str(contents)?;
        // Key validation is reported separately by `validate_key`.
        Ok(Self::merge_unchecked(file_config, PartialEnvConfig::default()))
    }

    fn merge(file: PartialHookConfig, env: PartialEnvConfig) -> Result<Self, ConfigError> {
        let config = Self::merge_unchecked(file, env);
        config.validate_key()?;
        Ok(config)
    }

    fn merge_unchecked(file: PartialHookConfig, env: PartialEnvConfig) -> Self {
        let data_dir = env.data_dir.or(file.data_dir).unwrap_or_else(default_data_dir);
        let mut identity = file.identity.unwrap_or_default();
        if let Some(state) = env.identity_default_state {
            identity.default_state = state;
        }

        HookConfig {
            database_url: env
                .database_url
                .or(file.database_url)
                .unwrap_or_else(|| default_database_url(&data_dir)),
            max_connections: env
                .max_connections
                .or(file.max_connections)
                .unwrap_or_else(default_max_connections),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            bundle_identifier: env
                .bundle_identifier
                .or(file.bundle_identifier)
                .unwrap_or_else(default_bundle_identifier),
            secure_store_path: env
                .secure_store_path
                .or(file.secure_store_path)
                .unwrap_or_else(|| default_secure_store_path(&data_dir)),
            secure_store_key: env
                .secure_store_key
                .or(file.secure_store_key)
                .unwrap_or_else(default_secure_store_key),
            identity,
            data_dir,
        }
    }

    pub fn validate_key(&self) -> Result<(), ConfigError> {
        match hex::decode(self.secure_store_key.trim()) {
            Ok(key) if key.len() == 32 => Ok(()),
            _ => Err(ConfigError::InvalidKey),
        }
    }
}

fn read_file(path: &Path) -> Result<PartialHookConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
