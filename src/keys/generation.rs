// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-flight custody of the process's current signing key.
//!
//! The current key is provisioned at most once per process and memoized,
//! failures included. Provisioning, in order:
//!
//! 1. adopt the first key of a live cache entry when it carries signing
//!    material for the configured algorithm,
//! 2. resolve the configured secret reference (HMAC algorithms only),
//! 3. generate a fresh key.
//!
//! Every mutation of the keyring's cache entry happens while holding the
//! single publish permit. Publishing keeps the previously published key as
//! the second JWK so tokens signed just before a rotation still verify.
//! The last entry this process published is remembered, so the previous
//! key survives the cache entry expiring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OnceCell, Semaphore, SemaphorePermit};
use tracing::{error, info, warn};

use super::cache::{JwkCache, JwksCacheEntry};
use super::material::{SigningAlgorithm, SigningKey};
use super::source::{KeyReference, SecretRegistry};
use crate::auth::AuthError;

/// Keys published per keyring: current plus one predecessor.
const MAX_PUBLISHED_KEYS: usize = 2;

/// What the custody layer manages for one keyring.
#[derive(Debug, Clone)]
pub struct KeyringSettings {
    /// Cache entry name
    pub keyring: String,
    pub algorithm: SigningAlgorithm,
    /// Secret reference for HMAC algorithms; `None` generates a secret
    pub secret_ref: Option<KeyReference>,
    /// Set by the `unload` sentinel
    pub disabled: bool,
}

type Provisioned = Result<Option<Arc<SigningKey>>, AuthError>;

/// Process-wide key generation guard for one keyring.
pub struct KeyGenerationMutex {
    settings: KeyringSettings,
    secrets: SecretRegistry,
    cache: Arc<JwkCache>,
    current: OnceCell<Provisioned>,
    publish: Semaphore,
    /// Last entry this process wrote, carried over when the cache expires
    last_published: Mutex<Option<JwksCacheEntry>>,
    generations: AtomicU64,
}

impl KeyGenerationMutex {
    pub fn new(settings: KeyringSettings, secrets: SecretRegistry, cache: Arc<JwkCache>) -> Self {
        Self {
            settings,
            secrets,
            cache,
            current: OnceCell::new(),
            publish: Semaphore::new(1),
            last_published: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    pub fn keyring(&self) -> &str {
        &self.settings.keyring
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.settings.algorithm
    }

    pub fn is_disabled(&self) -> bool {
        self.settings.disabled
    }

    pub fn cache(&self) -> &Arc<JwkCache> {
        &self.cache
    }

    /// Number of keys actually generated or resolved by this process
    /// (adopting a cached key does not count).
    pub fn generation_count(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    /// The current signing key, provisioning it on first use.
    ///
    /// `Ok(None)` means key material is disabled. Provisioning runs on its
    /// own task so a caller that gives up waiting does not abandon it
    /// halfway.
    pub async fn current(self: &Arc<Self>) -> Provisioned {
        if let Some(provisioned) = self.current.get() {
            return provisioned.clone();
        }

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            this.current
                .get_or_init(|| this.provision())
                .await
                .clone()
        });

        match task.await {
            Ok(provisioned) => provisioned,
            Err(e) => Err(AuthError::KeyGeneration(format!(
                "key provisioning task failed: {e}"
            ))),
        }
    }

    /// The live cache entry, republishing the current key when the entry
    /// is missing or expired.
    pub async fn published_entry(self: &Arc<Self>) -> Result<Option<JwksCacheEntry>, AuthError> {
        if let Some(entry) = self.cache.get(self.keyring())? {
            return Ok(Some(entry));
        }

        let Some(key) = self.current().await? else {
            return Ok(None);
        };

        let _permit = self.acquire_publish().await?;
        // double check that no one beat us to republishing.
        let live = self.cache.get(self.keyring())?;
        if let Some(entry) = &live {
            if entry.find(key.kid()).is_some() {
                return Ok(live);
            }
        }
        let previous = live.or_else(|| self.last_published());
        self.publish_locked(&key, previous.as_ref()).map(Some)
    }

    fn last_published(&self) -> Option<JwksCacheEntry> {
        self.last_published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn acquire_publish(&self) -> Result<SemaphorePermit<'_>, AuthError> {
        self.publish
            .acquire()
            .await
            .map_err(|_| AuthError::Internal("key publish semaphore closed".to_string()))
    }

    async fn provision(&self) -> Provisioned {
        if self.settings.disabled {
            warn!(
                keyring = self.keyring(),
                "Key material is unloaded; tokens can be neither signed nor verified"
            );
            return Ok(None);
        }

        let result = self.provision_key().await;
        if let Err(e) = &result {
            error!(
                keyring = self.keyring(),
                algorithm = %self.settings.algorithm,
                error = %e,
                error_detail = ?e,
                "Signing key provisioning failed"
            );
        }
        result.map(Some)
    }

    async fn provision_key(&self) -> Result<Arc<SigningKey>, AuthError> {
        let _permit = self.acquire_publish().await?;
        let algorithm = self.settings.algorithm;
        let cached = self.cache.get(self.keyring())?;

        if let Some(adopted) = cached.as_ref().and_then(|entry| self.adoptable(entry)) {
            info!(
                keyring = self.keyring(),
                kid = adopted.kid(),
                algorithm = %algorithm,
                "Adopted signing key from JWKS cache"
            );
            return Ok(Arc::new(adopted));
        }

        let key = match (&self.settings.secret_ref, algorithm.is_symmetric()) {
            (Some(reference), true) => {
                let material = self.secrets.resolve_or_default(reference).await?;
                if material.is_development_fallback() {
                    warn!(
                        keyring = self.keyring(),
                        "Signing with the development fallback key"
                    );
                }
                SigningKey::from_material(algorithm, &material)?
            }
            (Some(reference), false) => {
                warn!(
                    keyring = self.keyring(),
                    reference = %reference,
                    algorithm = %algorithm,
                    "Secret references only apply to HMAC algorithms; generating a key pair"
                );
                SigningKey::generate(algorithm)?
            }
            (None, _) => SigningKey::generate(algorithm)?,
        };
        self.generations.fetch_add(1, Ordering::SeqCst);

        info!(
            keyring = self.keyring(),
            kid = key.kid(),
            algorithm = %algorithm,
            "Provisioned signing key"
        );

        let key = Arc::new(key);
        self.publish_locked(&key, cached.as_ref())?;
        Ok(key)
    }

    /// A cached first key this process can sign with.
    fn adoptable(&self, entry: &JwksCacheEntry) -> Option<SigningKey> {
        let key = SigningKey::from_jwk(entry.first()?).ok()?;
        (key.algorithm() == self.settings.algorithm).then_some(key)
    }

    /// Publish `key` as the current key. Caller holds the publish permit.
    fn publish_locked(
        &self,
        key: &SigningKey,
        previous: Option<&JwksCacheEntry>,
    ) -> Result<JwksCacheEntry, AuthError> {
        let mut keys = vec![key.verification_jwk().clone()];
        if let Some(previous) = previous {
            keys.extend(
                previous
                    .keys
                    .iter()
                    .filter(|k| k.common.key_id.as_deref() != Some(key.kid()))
                    .take(MAX_PUBLISHED_KEYS - 1)
                    .cloned(),
            );
        }

        let entry = JwksCacheEntry::new(keys, self.cache.next_timestamp(previous));
        self.cache.set(self.keyring(), entry.clone())?;
        *self
            .last_published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(entry.clone());
        Ok(entry)
    }
}
