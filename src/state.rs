// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Composition root.
//!
//! Builds the secret registry, JWKS cache, key custody and the token
//! providers from an [`AuthConfig`], and shares them with every handler.

use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use tracing::{info, warn};

use crate::auth::{
    AuthError, Authenticator, JwtSigner, JwtVerifier, LogSampler, SignatureProvider,
    SigningKeySource, VerificationKeySource, VerificationProvider,
};
use crate::config::AuthConfig;
use crate::keys::jwks_uri::load_jwks;
use crate::keys::material::is_secret_jwk;
use crate::keys::{
    EnvSecretBackend, JwkCache, KeyGenerationMutex, SecretRegistry, VaultSecretBackend,
};

/// Health of token custody as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodyStatus {
    Ok,
    Disabled,
    Unavailable,
}

impl CustodyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CustodyStatus::Ok => "ok",
            CustodyStatus::Disabled => "disabled",
            CustodyStatus::Unavailable => "unavailable",
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    /// Local key custody; `None` when unloaded or reading a JWKS URI
    pub custody: Option<Arc<KeyGenerationMutex>>,
    /// Public keys of a configured JWKS URI
    pub external_jwks: Option<Arc<JwkSet>>,
    pub signer: Arc<SignatureProvider>,
    pub verifier: Arc<VerificationProvider>,
    pub authenticator: Arc<Authenticator>,
}

fn secret_registry(config: &AuthConfig) -> Result<SecretRegistry, AuthError> {
    let mut registry = SecretRegistry::new().with_backend(EnvSecretBackend);
    if let Some(vault) = &config.vault {
        registry = registry.with_backend(VaultSecretBackend::new(
            vault.addr.clone(),
            vault.token.clone(),
            config.key_source_region.clone(),
        )?);
    }
    info!(protocols = ?registry.protocols(), "Secret backends registered");
    Ok(registry)
}

fn public_keys(jwks: &JwkSet) -> JwkSet {
    JwkSet {
        keys: jwks
            .keys
            .iter()
            .filter(|jwk| !is_secret_jwk(jwk))
            .cloned()
            .collect(),
    }
}

impl AppState {
    /// Build and initialize every provider.
    ///
    /// Fails when a requested key cannot be acquired; the process must
    /// not run unauthenticated by accident.
    pub async fn from_config(config: AuthConfig) -> Result<Self, AuthError> {
        let (custody, external_jwks, signer, verifier) = if config.disabled {
            (None, None, SignatureProvider::Disabled, VerificationProvider::Disabled)
        } else if let Some(uri) = &config.jwks_uri {
            let jwks = load_jwks(uri)?;
            let signer = if jwks.keys.first().is_some_and(is_secret_jwk) {
                let signer = Self::signer(&config, SigningKeySource::JwksUri(uri.clone()));
                signer.initialize().await?;
                SignatureProvider::Jwt(signer)
            } else {
                warn!(uri = %uri, "JWKS holds no signing material; token signing is disabled");
                SignatureProvider::Disabled
            };
            let verifier = Self::verifier(&config, VerificationKeySource::from_jwks_uri(uri)?);
            (
                None,
                Some(Arc::new(public_keys(&jwks))),
                signer,
                VerificationProvider::Jwt(verifier),
            )
        } else {
            let cache = match &config.cache_dir {
                Some(dir) => JwkCache::filesystem(dir, config.cache_ttl),
                None => JwkCache::in_memory(config.cache_ttl),
            };
            let custody = Arc::new(KeyGenerationMutex::new(
                config.keyring_settings(),
                secret_registry(&config)?,
                Arc::new(cache),
            ));

            let signer = Self::signer(&config, SigningKeySource::Custody(Arc::clone(&custody)));
            signer.initialize().await?;
            let verifier =
                Self::verifier(&config, VerificationKeySource::Custody(Arc::clone(&custody)));
            (
                Some(custody),
                None,
                SignatureProvider::Jwt(signer),
                VerificationProvider::Jwt(verifier),
            )
        };

        let verifier = Arc::new(verifier);
        let authenticator = Authenticator::new(Arc::clone(&verifier))
            .with_audience(config.audience.clone())
            .with_sampler(LogSampler::new(config.log_sample_rate));

        Ok(Self {
            config: Arc::new(config),
            custody,
            external_jwks,
            signer: Arc::new(signer),
            verifier,
            authenticator: Arc::new(authenticator),
        })
    }

    fn signer(config: &AuthConfig, source: SigningKeySource) -> JwtSigner {
        let signer = JwtSigner::new(source).with_token_ttl(config.token_ttl);
        match &config.issuer {
            Some(issuer) => signer.with_issuer(issuer.clone()),
            None => signer,
        }
    }

    fn verifier(config: &AuthConfig, source: VerificationKeySource) -> JwtVerifier {
        let verifier = JwtVerifier::new(source).with_leeway(config.leeway);
        match &config.issuer {
            Some(issuer) => verifier.with_issuer(issuer.clone()),
            None => verifier,
        }
    }

    /// Public verification keys, or `None` when nothing may be published
    /// (unloaded, or shared-secret algorithms).
    pub async fn public_jwks(&self) -> Result<Option<JwkSet>, AuthError> {
        let jwks = match (&self.custody, &self.external_jwks) {
            (Some(custody), _) => match custody.published_entry().await? {
                Some(entry) => public_keys(&entry.jwk_set()),
                None => return Ok(None),
            },
            (None, Some(jwks)) => JwkSet::clone(jwks),
            (None, None) => return Ok(None),
        };
        Ok((!jwks.keys.is_empty()).then_some(jwks))
    }

    pub async fn custody_status(&self) -> CustodyStatus {
        if !self.verifier.is_enabled() {
            return CustodyStatus::Disabled;
        }
        match &self.custody {
            Some(custody) => match custody.published_entry().await {
                Ok(Some(_)) => CustodyStatus::Ok,
                Ok(None) | Err(_) => CustodyStatus::Unavailable,
            },
            None => CustodyStatus::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SIGNING_KEY_ENV;
    use crate::keys::SigningAlgorithm;
    use tempfile::TempDir;

    #[tokio::test]
    async fn default_config_generates_es256_custody() {
        let state = AppState::from_config(AuthConfig::default()).await.unwrap();
        assert!(state.signer.is_enabled());
        assert!(state.verifier.is_enabled());
        assert_eq!(state.custody_status().await, CustodyStatus::Ok);

        let jwks = state.public_jwks().await.unwrap().unwrap();
        assert_eq!(jwks.keys.len(), 1);
    }

    #[tokio::test]
    async fn unload_disables_everything() {
        let config = AuthConfig::from_lookup(|var| {
            (var == SIGNING_KEY_ENV).then(|| "unload".to_string())
        })
        .unwrap();
        let state = AppState::from_config(config).await.unwrap();

        assert!(state.signer.signer().is_none());
        assert!(!state.verifier.is_enabled());
        assert!(state.custody.is_none());
        assert_eq!(state.custody_status().await, CustodyStatus::Disabled);
        assert!(state.public_jwks().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hmac_keys_are_never_published() {
        let config = AuthConfig {
            algorithm: SigningAlgorithm::Hs256,
            ..AuthConfig::default()
        };
        let state = AppState::from_config(config).await.unwrap();
        assert!(state.signer.is_enabled());
        assert!(state.public_jwks().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_secret_is_fatal() {
        let config = AuthConfig {
            algorithm: SigningAlgorithm::Hs256,
            signing_key: Some(crate::keys::KeyReference::new(
                "env:RELATIONAL_AUTHN_TEST_SECRET_THAT_IS_NEVER_SET",
            )),
            ..AuthConfig::default()
        };
        let result = AppState::from_config(config).await;
        assert!(matches!(result, Err(AuthError::SecretNotFound(_))));
    }

    #[tokio::test]
    async fn processes_sharing_a_cache_dir_share_hmac_keys() {
        let dir = TempDir::new().unwrap();
        let config = AuthConfig {
            algorithm: SigningAlgorithm::Hs256,
            cache_dir: Some(dir.path().to_path_buf()),
            ..AuthConfig::default()
        };

        let first = AppState::from_config(config.clone()).await.unwrap();
        let second = AppState::from_config(config).await.unwrap();

        let first_kid = first.signer.signer().and_then(|s| s.kid().map(str::to_string));
        let second_kid = second.signer.signer().and_then(|s| s.kid().map(str::to_string));
        assert!(first_kid.is_some());
        assert_eq!(first_kid, second_kid);
    }

    #[tokio::test]
    async fn non_file_jwks_uri_is_rejected() {
        let config = AuthConfig {
            jwks_uri: Some("https://auth.example.com/.well-known/jwks.json".to_string()),
            ..AuthConfig::default()
        };
        let result = AppState::from_config(config).await;
        assert!(matches!(result, Err(AuthError::UnsupportedKeyFormat(_))));
    }
}
