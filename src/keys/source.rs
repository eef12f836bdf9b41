// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key material sources.
//!
//! A key reference is `<protocol>:<name>` (e.g. `env:JWT_SECRET` or
//! `vault:secret/authn/jwt`). The protocol selects a [`SecretBackend`]
//! from the [`SecretRegistry`] built at startup.
//!
//! ## Security
//!
//! - Material is never logged; only its length and fingerprint are.
//! - When no backend matches a reference, [`SecretRegistry::resolve_or_default`]
//!   falls back to a fixed development key and says so at `warn` level.
//!   A missing secret on a matching backend is never papered over.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::material::fingerprint;
use crate::auth::AuthError;

/// Sentinel that disables key material entirely (case-insensitive).
pub const UNLOAD_SENTINEL: &str = "unload";

/// Development-only signing secret used when a reference names no
/// registered backend.
pub const DEV_FALLBACK_KEY: &str = "relational-authn-development-only-signing-secret";

/// Source name reported for the development fallback key.
pub const DEV_FALLBACK_SOURCE: &str = "development-fallback";

/// Whether a configuration value is the `unload` sentinel.
pub fn is_unload(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(UNLOAD_SENTINEL)
}

/// Reference to a key held by a secret backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyReference(String);

impl KeyReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Protocol prefix (text before the first `:`).
    pub fn protocol(&self) -> Option<&str> {
        self.0.split_once(':').map(|(protocol, _)| protocol)
    }

    /// Backend-specific name (text after the first `:`).
    pub fn name(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, name)| name)
    }

    pub fn is_unload(&self) -> bool {
        is_unload(&self.0)
    }
}

impl fmt::Display for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw key bytes plus the name of the source that produced them.
#[derive(Clone)]
pub struct KeyMaterial {
    material: Vec<u8>,
    source_name: String,
}

impl KeyMaterial {
    pub fn new(material: Vec<u8>, source_name: impl Into<String>) -> Self {
        Self {
            material,
            source_name: source_name.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.material
    }

    pub fn len(&self) -> usize {
        self.material.len()
    }

    pub fn is_empty(&self) -> bool {
        self.material.is_empty()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.material)
    }

    pub fn is_development_fallback(&self) -> bool {
        self.source_name == DEV_FALLBACK_SOURCE
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.material.len())
            .field("fingerprint", &self.fingerprint())
            .field("source_name", &self.source_name)
            .finish()
    }
}

/// Named-secret lookup against one kind of store.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Reference prefix this backend answers for (without the `:`).
    fn protocol(&self) -> &str;

    /// Fetch a secret by name. Fails when the secret does not exist.
    async fn get(&self, name: &str) -> Result<String, AuthError>;
}

/// Secrets from process environment variables (`env:NAME`).
#[derive(Debug, Default, Clone)]
pub struct EnvSecretBackend;

#[async_trait]
impl SecretBackend for EnvSecretBackend {
    fn protocol(&self) -> &str {
        "env"
    }

    async fn get(&self, name: &str) -> Result<String, AuthError> {
        std::env::var(name).map_err(|_| AuthError::SecretNotFound(format!("env:{name}")))
    }
}

/// Secrets from a HashiCorp Vault KV v2 engine (`vault:<mount>/<path>`).
///
/// The secret value is read from the `value` field of the stored document.
#[derive(Clone)]
pub struct VaultSecretBackend {
    addr: Url,
    token: String,
    namespace: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct VaultKvResponse {
    data: VaultKvData,
}

#[derive(Deserialize)]
struct VaultKvData {
    data: VaultSecret,
}

#[derive(Deserialize)]
struct VaultSecret {
    #[serde(default)]
    value: Option<String>,
}

impl VaultSecretBackend {
    /// Create a Vault backend.
    ///
    /// `namespace` is the configured key source region; it is sent as
    /// `X-Vault-Namespace` when present.
    pub fn new(
        addr: Url,
        token: impl Into<String>,
        namespace: Option<String>,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::KeySource(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            addr,
            token: token.into(),
            namespace,
            client,
        })
    }

    fn secret_url(&self, name: &str) -> Result<Url, AuthError> {
        let (mount, path) = name
            .trim_matches('/')
            .split_once('/')
            .ok_or_else(|| AuthError::SecretNotFound(format!("vault:{name}")))?;
        self.addr
            .join(&format!("v1/{mount}/data/{path}"))
            .map_err(|e| AuthError::KeySource(format!("invalid Vault URL: {e}")))
    }
}

#[async_trait]
impl SecretBackend for VaultSecretBackend {
    fn protocol(&self) -> &str {
        "vault"
    }

    async fn get(&self, name: &str) -> Result<String, AuthError> {
        let url = self.secret_url(name)?;
        let mut request = self.client.get(url).header("X-Vault-Token", &self.token);
        if let Some(namespace) = &self.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::KeySource(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AuthError::SecretNotFound(format!("vault:{name}")));
        }
        if !response.status().is_success() {
            return Err(AuthError::KeySource(format!(
                "HTTP {} from Vault",
                response.status()
            )));
        }

        let body: VaultKvResponse = response
            .json()
            .await
            .map_err(|e| AuthError::KeySource(e.to_string()))?;

        Ok(body.data.data.value.unwrap_or_default())
    }
}

/// Registry of secret backends, owned by the composition root.
#[derive(Clone, Default)]
pub struct SecretRegistry {
    backends: Vec<Arc<dyn SecretBackend>>,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. A later backend with the same protocol shadows
    /// an earlier one.
    pub fn with_backend(mut self, backend: impl SecretBackend + 'static) -> Self {
        self.backends.insert(0, Arc::new(backend));
        self
    }

    /// Protocols currently registered.
    pub fn protocols(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.protocol()).collect()
    }

    /// Resolve a reference through the backend matching its prefix.
    pub async fn resolve(&self, reference: &KeyReference) -> Result<KeyMaterial, AuthError> {
        let backend = reference
            .protocol()
            .and_then(|protocol| self.backends.iter().find(|b| b.protocol() == protocol))
            .ok_or_else(|| AuthError::UnsupportedProtocol(reference.to_string()))?;

        let value = backend.get(reference.name()).await?;
        if value.is_empty() {
            return Err(AuthError::SecretNotFound(reference.to_string()));
        }

        let material = KeyMaterial::new(value.into_bytes(), reference.as_str());
        debug!(
            reference = %reference,
            len = material.len(),
            fingerprint = %material.fingerprint(),
            "Resolved key material"
        );
        Ok(material)
    }

    /// Like [`resolve`](Self::resolve), but an unsupported protocol yields
    /// the development fallback key instead of an error.
    pub async fn resolve_or_default(
        &self,
        reference: &KeyReference,
    ) -> Result<KeyMaterial, AuthError> {
        match self.resolve(reference).await {
            Err(AuthError::UnsupportedProtocol(_)) => {
                warn!(
                    reference = %reference,
                    registered = ?self.protocols(),
                    fallback_len = DEV_FALLBACK_KEY.len(),
                    "No secret backend matches key reference; using the development fallback key. \
                     Tokens signed with it are forgeable and MUST NOT be trusted outside development"
                );
                Ok(KeyMaterial::new(
                    DEV_FALLBACK_KEY.as_bytes().to_vec(),
                    DEV_FALLBACK_SOURCE,
                ))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticBackend(&'static str);

    #[async_trait]
    impl SecretBackend for StaticBackend {
        fn protocol(&self) -> &str {
            "static"
        }

        async fn get(&self, _name: &str) -> Result<String, AuthError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn reference_splits_protocol_and_name() {
        let reference = KeyReference::new("vault:secret/authn/jwt");
        assert_eq!(reference.protocol(), Some("vault"));
        assert_eq!(reference.name(), "secret/authn/jwt");

        let bare = KeyReference::new("no-protocol");
        assert_eq!(bare.protocol(), None);
        assert_eq!(bare.name(), "no-protocol");
    }

    #[test]
    fn unload_sentinel_is_case_insensitive() {
        assert!(is_unload("unload"));
        assert!(is_unload(" UnLoad "));
        assert!(KeyReference::new("UNLOAD").is_unload());
        assert!(!is_unload("env:unload"));
    }

    #[test]
    fn debug_never_prints_material() {
        let material = KeyMaterial::new(b"super-secret".to_vec(), "test");
        let printed = format!("{material:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("len: 12"));
    }

    #[tokio::test]
    async fn resolve_dispatches_by_prefix() {
        let registry = SecretRegistry::new().with_backend(StaticBackend("s3cr3t"));
        let material = registry
            .resolve(&KeyReference::new("static:anything"))
            .await
            .unwrap();
        assert_eq!(material.as_bytes(), b"s3cr3t");
        assert_eq!(material.source_name(), "static:anything");
    }

    #[tokio::test]
    async fn unknown_prefix_is_unsupported() {
        let registry = SecretRegistry::new().with_backend(StaticBackend("s3cr3t"));
        let result = registry.resolve(&KeyReference::new("ssm:/path")).await;
        assert!(matches!(result, Err(AuthError::UnsupportedProtocol(_))));
    }

    #[tokio::test]
    async fn empty_secret_is_not_found() {
        let registry = SecretRegistry::new().with_backend(StaticBackend(""));
        let result = registry.resolve(&KeyReference::new("static:x")).await;
        assert!(matches!(result, Err(AuthError::SecretNotFound(_))));
    }

    #[tokio::test]
    async fn fallback_applies_only_to_unknown_protocols() {
        let registry = SecretRegistry::new()
            .with_backend(EnvSecretBackend)
            .with_backend(StaticBackend(""));

        let fallback = registry
            .resolve_or_default(&KeyReference::new("ssm:/path"))
            .await
            .unwrap();
        assert!(fallback.is_development_fallback());
        assert_eq!(fallback.len(), DEV_FALLBACK_KEY.len());

        let missing = registry
            .resolve_or_default(&KeyReference::new("static:x"))
            .await;
        assert!(matches!(missing, Err(AuthError::SecretNotFound(_))));

        let missing_env = registry
            .resolve_or_default(&KeyReference::new(
                "env:RELATIONAL_AUTHN_TEST_VARIABLE_THAT_IS_NEVER_SET",
            ))
            .await;
        assert!(matches!(missing_env, Err(AuthError::SecretNotFound(_))));
    }

    #[test]
    fn vault_url_layout() {
        let backend = VaultSecretBackend::new(
            Url::parse("https://vault.internal:8200/").unwrap(),
            "token",
            None,
        )
        .unwrap();
        let url = backend.secret_url("secret/authn/jwt").unwrap();
        assert_eq!(
            url.as_str(),
            "https://vault.internal:8200/v1/secret/data/authn/jwt"
        );
        assert!(backend.secret_url("no-mount").is_err());
    }
}
