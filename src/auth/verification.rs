// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token verification.
//!
//! Keys come from the same place the signer's do: a `file://` JWKS, or the
//! keyring's cache entry backed by the process's own custody. Tokens naming
//! a `kid` are checked against that key only. Tokens without one are tried
//! against the current key, then the previous one.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use tokio::sync::RwLock;

use super::{AuthError, Claims};
use crate::keys::jwks_uri::load_jwks;
use crate::keys::material::decoding_key;
use crate::keys::KeyGenerationMutex;

/// Clock skew tolerance (60 seconds).
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// A decoded verification key.
pub struct VerificationKey {
    kid: Option<String>,
    key: DecodingKey,
    algorithm: Algorithm,
}

type KeyList = Arc<Vec<VerificationKey>>;

fn build_keys<'a>(jwks: impl IntoIterator<Item = &'a Jwk>) -> Result<Vec<VerificationKey>, AuthError> {
    jwks.into_iter()
        .map(|jwk| {
            let (key, algorithm) = decoding_key(jwk)?;
            Ok(VerificationKey {
                kid: jwk.common.key_id.clone(),
                key,
                algorithm,
            })
        })
        .collect()
}

/// Where the verifier takes its keys from.
pub enum VerificationKeySource {
    /// Keys loaded once from a `file://` JWKS
    Static(KeyList),
    /// The keyring cache, falling back to local custody
    Custody(Arc<KeyGenerationMutex>),
}

impl VerificationKeySource {
    /// Load a `file://` JWKS.
    pub fn from_jwks_uri(uri: &str) -> Result<Self, AuthError> {
        let jwks = load_jwks(uri)?;
        Ok(VerificationKeySource::Static(Arc::new(build_keys(&jwks.keys)?)))
    }
}

/// Verifier backed by a key source.
pub struct JwtVerifier {
    source: VerificationKeySource,
    issuer: Option<String>,
    leeway: Duration,
    /// Decoded keys of the last cache entry seen, by its timestamp
    decoded: RwLock<Option<(u64, KeyList)>>,
}

impl JwtVerifier {
    pub fn new(source: VerificationKeySource) -> Self {
        Self {
            source,
            issuer: None,
            leeway: DEFAULT_LEEWAY,
            decoded: RwLock::new(None),
        }
    }

    /// Require `iss` to equal `issuer`.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    async fn keys(&self) -> Result<KeyList, AuthError> {
        let custody = match &self.source {
            VerificationKeySource::Static(keys) => return Ok(Arc::clone(keys)),
            VerificationKeySource::Custody(custody) => custody,
        };

        let entry = custody
            .published_entry()
            .await?
            .ok_or(AuthError::VerificationUnavailable)?;

        if let Some((updated_at, keys)) = &*self.decoded.read().await {
            if *updated_at == entry.updated_at_epoch_ms {
                return Ok(Arc::clone(keys));
            }
        }

        let mut keys = build_keys(&entry.keys)?;
        // Another instance may have published over this process's key;
        // keep verifying what this process signs.
        if let Some(own) = custody.current().await? {
            if entry.find(own.kid()).is_none() {
                keys.extend(build_keys([own.verification_jwk()])?);
            }
        }

        let keys = Arc::new(keys);
        *self.decoded.write().await = Some((entry.updated_at_epoch_ms, Arc::clone(&keys)));
        Ok(keys)
    }

    fn validation(&self, algorithm: Algorithm, audience: &str) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway.as_secs();
        validation.validate_nbf = true;
        validation.set_audience(&[audience]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }

    /// Verify `token` and return its claims.
    pub async fn verify(&self, token: &str, audience: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        let keys = self.keys().await?;

        let candidates: Vec<&VerificationKey> = match &header.kid {
            Some(kid) => keys
                .iter()
                .filter(|k| k.kid.as_deref() == Some(kid.as_str()))
                .collect(),
            None => keys.iter().collect(),
        };

        let mut failure: Option<AuthError> = None;
        for candidate in candidates {
            let validation = self.validation(candidate.algorithm, audience);
            match decode::<Claims>(token, &candidate.key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => {
                    let e = AuthError::from(e);
                    // The first error more specific than a bad signature wins.
                    if matches!(failure, None | Some(AuthError::SignatureInvalid)) {
                        failure = Some(e);
                    }
                }
            }
        }

        Err(failure.unwrap_or(AuthError::SignatureInvalid))
    }
}

/// Token verifier, or its absence.
pub enum VerificationProvider {
    Jwt(JwtVerifier),
    /// Key material unloaded by configuration; nothing verifies
    Disabled,
}

impl VerificationProvider {
    pub async fn verify(&self, token: &str, audience: &str) -> Result<Claims, AuthError> {
        match self {
            VerificationProvider::Jwt(verifier) => verifier.verify(token, audience).await,
            VerificationProvider::Disabled => Err(AuthError::VerificationUnavailable),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, VerificationProvider::Jwt(_))
    }
}
