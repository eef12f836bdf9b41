// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AUTH_SIGNING_KEY` | HMAC secret reference (`env:NAME`, `vault:mount/path`) or `unload` | generated |
//! | `AUTH_KEY_SOURCE_REGION` | Namespace sent to remote secret backends | - |
//! | `VAULT_ADDR` / `VAULT_TOKEN` | Vault endpoint and token | backend not registered |
//! | `AUTH_JWKS_URI` | `file://` JWKS used instead of local custody | - |
//! | `AUTH_CACHE_DIR` | Root directory of the JWKS cache | in-memory |
//! | `AUTH_CACHE_TTL_SECS` | JWKS cache TTL | `60` |
//! | `AUTH_ALGORITHM` | `HS256`, `HS384`, `HS512`, `ES256`, `ES384` | `ES256` |
//! | `AUTH_CURVE` | `P-256` or `P-384`, must match the algorithm | derived |
//! | `AUTH_KEYRING` | Keyring name (cache file stem) | `default` |
//! | `AUTH_ISSUER` | Issuer stamped and enforced | - |
//! | `AUTH_AUDIENCE` | Audience required on access tokens | `ACCESS` |
//! | `AUTH_TOKEN_TTL_SECS` | Lifetime of tokens without `exp` | `3600` |
//! | `AUTH_LEEWAY_SECS` | Clock skew tolerance | `60` |
//! | `AUTH_LOG_SAMPLE_RATE` | Share of verified payloads logged | `0.2` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::auth::claims::DEFAULT_AUDIENCE;
use crate::auth::derivation::DEFAULT_LOG_SAMPLE_RATE;
use crate::auth::signature::DEFAULT_TOKEN_TTL;
use crate::auth::verification::DEFAULT_LEEWAY;
use crate::keys::cache::DEFAULT_CACHE_TTL;
use crate::keys::{Curve, KeyReference, KeyringSettings, SigningAlgorithm};

pub const SIGNING_KEY_ENV: &str = "AUTH_SIGNING_KEY";
pub const KEY_SOURCE_REGION_ENV: &str = "AUTH_KEY_SOURCE_REGION";
pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";
pub const JWKS_URI_ENV: &str = "AUTH_JWKS_URI";
pub const CACHE_DIR_ENV: &str = "AUTH_CACHE_DIR";
pub const CACHE_TTL_ENV: &str = "AUTH_CACHE_TTL_SECS";
pub const ALGORITHM_ENV: &str = "AUTH_ALGORITHM";
pub const CURVE_ENV: &str = "AUTH_CURVE";
pub const KEYRING_ENV: &str = "AUTH_KEYRING";
pub const ISSUER_ENV: &str = "AUTH_ISSUER";
pub const AUDIENCE_ENV: &str = "AUTH_AUDIENCE";
pub const TOKEN_TTL_ENV: &str = "AUTH_TOKEN_TTL_SECS";
pub const LEEWAY_ENV: &str = "AUTH_LEEWAY_SECS";
pub const LOG_SAMPLE_RATE_ENV: &str = "AUTH_LOG_SAMPLE_RATE";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Keyring used when `AUTH_KEYRING` is unset.
pub const DEFAULT_KEYRING: &str = "default";

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}='{value}' is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("AUTH_CURVE={curve} does not match AUTH_ALGORITHM={algorithm}")]
    CurveMismatch {
        algorithm: SigningAlgorithm,
        curve: String,
    },
    #[error("VAULT_ADDR and VAULT_TOKEN must be set together")]
    IncompleteVault,
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_secs(var: &'static str, value: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| invalid(var, &raw, e)),
        None => Ok(default),
    }
}

/// Remote secret manager settings.
#[derive(Clone)]
pub struct VaultConfig {
    pub addr: Url,
    pub token: String,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("addr", &self.addr.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Key custody, token and verification settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret reference; `None` generates a secret
    pub signing_key: Option<KeyReference>,
    /// `AUTH_SIGNING_KEY=unload`
    pub disabled: bool,
    pub key_source_region: Option<String>,
    pub vault: Option<VaultConfig>,
    pub jwks_uri: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub algorithm: SigningAlgorithm,
    pub keyring: String,
    pub issuer: Option<String>,
    pub audience: String,
    pub token_ttl: Duration,
    pub leeway: Duration,
    pub log_sample_rate: f64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            disabled: false,
            key_source_region: None,
            vault: None,
            jwks_uri: None,
            cache_dir: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            algorithm: SigningAlgorithm::Es256,
            keyring: DEFAULT_KEYRING.to_string(),
            issuer: None,
            audience: DEFAULT_AUDIENCE.to_string(),
            token_ttl: DEFAULT_TOKEN_TTL,
            leeway: DEFAULT_LEEWAY,
            log_sample_rate: DEFAULT_LOG_SAMPLE_RATE,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let (signing_key, disabled) = match get(SIGNING_KEY_ENV) {
            Some(raw) => {
                let reference = KeyReference::new(raw.trim());
                if reference.is_unload() {
                    (None, true)
                } else {
                    (Some(reference), false)
                }
            }
            None => (None, false),
        };

        let algorithm = match get(ALGORITHM_ENV) {
            Some(raw) => {
                SigningAlgorithm::from_str(&raw).map_err(|e| invalid(ALGORITHM_ENV, &raw, e))?
            }
            None => defaults.algorithm,
        };

        if let Some(raw) = get(CURVE_ENV) {
            let curve = Curve::from_str(&raw).map_err(|e| invalid(CURVE_ENV, &raw, e))?;
            if algorithm.curve() != Some(curve) {
                return Err(ConfigError::CurveMismatch {
                    algorithm,
                    curve: raw,
                });
            }
        }

        let vault = match (get(VAULT_ADDR_ENV), get(VAULT_TOKEN_ENV)) {
            (Some(addr), Some(token)) => Some(VaultConfig {
                addr: Url::parse(&addr).map_err(|e| invalid(VAULT_ADDR_ENV, &addr, e))?,
                token,
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteVault),
        };

        let log_sample_rate = match get(LOG_SAMPLE_RATE_ENV) {
            Some(raw) => {
                let rate: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|e| invalid(LOG_SAMPLE_RATE_ENV, &raw, e))?;
                if !(0.0..=1.0).contains(&rate) {
                    return Err(invalid(LOG_SAMPLE_RATE_ENV, &raw, "must be within [0, 1]"));
                }
                rate
            }
            None => defaults.log_sample_rate,
        };

        let config = Self {
            signing_key,
            disabled,
            key_source_region: get(KEY_SOURCE_REGION_ENV),
            vault,
            jwks_uri: get(JWKS_URI_ENV),
            cache_dir: get(CACHE_DIR_ENV).map(PathBuf::from),
            cache_ttl: parse_secs(CACHE_TTL_ENV, get(CACHE_TTL_ENV), defaults.cache_ttl)?,
            algorithm,
            keyring: get(KEYRING_ENV).unwrap_or(defaults.keyring),
            issuer: get(ISSUER_ENV),
            audience: get(AUDIENCE_ENV).unwrap_or(defaults.audience),
            token_ttl: parse_secs(TOKEN_TTL_ENV, get(TOKEN_TTL_ENV), defaults.token_ttl)?,
            leeway: parse_secs(LEEWAY_ENV, get(LEEWAY_ENV), defaults.leeway)?,
            log_sample_rate,
        };
        config.warn_on_weak_custody();
        Ok(config)
    }

    fn warn_on_weak_custody(&self) {
        if self.disabled {
            warn!(
                "{SIGNING_KEY_ENV}=unload: token signing and verification are disabled, \
                 every request is anonymous"
            );
        }
        if self.jwks_uri.is_some() && self.signing_key.is_some() {
            warn!("{JWKS_URI_ENV} is set; {SIGNING_KEY_ENV} is ignored");
        }
        if self.signing_key.is_some() && !self.algorithm.is_symmetric() {
            warn!(
                algorithm = %self.algorithm,
                "{SIGNING_KEY_ENV} only applies to HMAC algorithms; a key pair will be generated"
            );
        }
    }

    /// Settings of the local custody keyring.
    pub fn keyring_settings(&self) -> KeyringSettings {
        KeyringSettings {
            keyring: self.keyring.clone(),
            algorithm: self.algorithm,
            secret_ref: self.signing_key.clone(),
            disabled: self.disabled,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var(HOST_ENV).unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match std::env::var(PORT_ENV) {
            Ok(raw) => raw.parse().map_err(|e| invalid(PORT_ENV, &raw, e))?,
            Err(_) => 8080,
        };
        let log_format = match std::env::var(LOG_FORMAT_ENV).as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Ok(Self {
            host,
            port,
            log_format,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AuthConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AuthConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.algorithm, SigningAlgorithm::Es256);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.keyring, DEFAULT_KEYRING);
        assert_eq!(config.audience, "ACCESS");
        assert!(!config.disabled);
        assert!(config.signing_key.is_none());
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn unload_sentinel_is_case_insensitive() {
        let config = config(&[(SIGNING_KEY_ENV, "UnLoad")]).unwrap();
        assert!(config.disabled);
        assert!(config.signing_key.is_none());
        assert!(config.keyring_settings().disabled);
    }

    #[test]
    fn curve_must_match_algorithm() {
        assert!(config(&[(ALGORITHM_ENV, "ES384"), (CURVE_ENV, "P-384")]).is_ok());
        assert!(matches!(
            config(&[(ALGORITHM_ENV, "ES256"), (CURVE_ENV, "P-384")]),
            Err(ConfigError::CurveMismatch { .. })
        ));
        assert!(matches!(
            config(&[(ALGORITHM_ENV, "HS256"), (CURVE_ENV, "P-256")]),
            Err(ConfigError::CurveMismatch { .. })
        ));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            config(&[(CACHE_TTL_ENV, "-1")]),
            Err(ConfigError::Invalid { var: CACHE_TTL_ENV, .. })
        ));
        assert!(matches!(
            config(&[(ALGORITHM_ENV, "RS256")]),
            Err(ConfigError::Invalid { var: ALGORITHM_ENV, .. })
        ));
        assert!(matches!(
            config(&[(LOG_SAMPLE_RATE_ENV, "1.5")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            config(&[(VAULT_ADDR_ENV, "https://vault.internal:8200")]),
            Err(ConfigError::IncompleteVault)
        ));
    }

    #[test]
    fn reads_custody_settings() {
        let config = config(&[
            (SIGNING_KEY_ENV, "env:JWT_SECRET"),
            (ALGORITHM_ENV, "hs512"),
            (CACHE_DIR_ENV, "/var/lib/authn"),
            (CACHE_TTL_ENV, "5"),
            (KEYRING_ENV, "access"),
            (VAULT_ADDR_ENV, "https://vault.internal:8200"),
            (VAULT_TOKEN_ENV, "s.token"),
        ])
        .unwrap();

        let settings = config.keyring_settings();
        assert_eq!(settings.algorithm, SigningAlgorithm::Hs512);
        assert_eq!(settings.keyring, "access");
        assert_eq!(
            settings.secret_ref.as_ref().map(KeyReference::as_str),
            Some("env:JWT_SECRET")
        );
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/lib/authn")));
        assert!(config.vault.is_some());
    }
}
