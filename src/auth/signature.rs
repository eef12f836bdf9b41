// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token issuance.
//!
//! [`SignatureProvider::Disabled`] has no signing capability at all: callers
//! reach the signer through [`SignatureProvider::signer`] and must handle
//! `None`, instead of discovering an unusable key at call time.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{encode, Header};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::info;

use super::AuthError;
use crate::keys::jwks_uri::load_jwks;
use crate::keys::{KeyGenerationMutex, SigningKey};

/// Lifetime stamped on tokens whose payload has no `exp` (1 hour).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Where the signer takes its key from.
pub enum SigningKeySource {
    /// `file://` JWKS whose first key holds signing material
    JwksUri(String),
    /// Local custody (cache, then single-flight provisioning)
    Custody(Arc<KeyGenerationMutex>),
}

/// Token under construction, handed to the per-call initializer before
/// the signature is applied.
#[derive(Debug, Clone)]
pub struct TokenBuilder {
    header: Header,
    claims: Map<String, Value>,
}

impl TokenBuilder {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn set_type(&mut self, typ: impl Into<String>) -> &mut Self {
        self.header.typ = Some(typ.into());
        self
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn set_claim(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    pub fn remove_claim(&mut self, name: &str) -> Option<Value> {
        self.claims.remove(name)
    }

    fn set_claim_if_absent(&mut self, name: &str, value: impl Into<Value>) {
        self.claims
            .entry(name.to_string())
            .or_insert_with(|| value.into());
    }
}

/// Signer backed by a loaded key.
pub struct JwtSigner {
    source: SigningKeySource,
    issuer: Option<String>,
    token_ttl: Duration,
    key: OnceCell<Arc<SigningKey>>,
}

impl JwtSigner {
    pub fn new(source: SigningKeySource) -> Self {
        Self {
            source,
            issuer: None,
            token_ttl: DEFAULT_TOKEN_TTL,
            key: OnceCell::new(),
        }
    }

    /// Issuer stamped on tokens whose payload has no `iss`.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Load the signing key. Later calls are no-ops.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        self.key
            .get_or_try_init(|| async {
                let key = match &self.source {
                    SigningKeySource::JwksUri(uri) => {
                        let jwks = load_jwks(uri)?;
                        let first = jwks.keys.first().ok_or_else(|| {
                            AuthError::UnsupportedKeyFormat(format!("JWKS at '{uri}' is empty"))
                        })?;
                        Arc::new(SigningKey::from_jwk(first)?)
                    }
                    SigningKeySource::Custody(custody) => {
                        custody.current().await?.ok_or(AuthError::NotInitialized)?
                    }
                };
                info!(kid = key.kid(), algorithm = %key.algorithm(), "Token signer initialized");
                Ok::<_, AuthError>(key)
            })
            .await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.key.initialized()
    }

    /// Key id placed in issued token headers.
    pub fn kid(&self) -> Option<&str> {
        self.key.get().map(|k| k.kid())
    }

    /// Sign `payload` as-is (plus default `iat`/`exp`/`iss`).
    pub fn sign<C: Serialize>(&self, payload: &C) -> Result<String, AuthError> {
        self.sign_with(payload, |_| {})
    }

    /// Sign `payload`, letting `initializer` adjust header and claims just
    /// before the signature is computed.
    pub fn sign_with<C, F>(&self, payload: &C, initializer: F) -> Result<String, AuthError>
    where
        C: Serialize,
        F: FnOnce(&mut TokenBuilder),
    {
        let key = self.key.get().ok_or(AuthError::NotInitialized)?;

        let claims = match serde_json::to_value(payload) {
            Ok(Value::Object(claims)) => claims,
            Ok(_) => {
                return Err(AuthError::Internal(
                    "token payload must serialize to a JSON object".to_string(),
                ))
            }
            Err(e) => return Err(AuthError::Internal(format!("invalid token payload: {e}"))),
        };

        let mut header = Header::new(key.algorithm().jwt_algorithm());
        header.kid = Some(key.kid().to_string());
        let mut builder = TokenBuilder { header, claims };

        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        builder.set_claim_if_absent("iat", now);
        if builder.claim("exp").is_none() {
            let iat = builder.claim("iat").and_then(Value::as_u64).unwrap_or(now);
            let exp = iat.checked_add(self.token_ttl.as_secs()).ok_or_else(|| {
                AuthError::Internal(format!("token lifetime overflows exp (iat = {iat})"))
            })?;
            builder.set_claim("exp", exp);
        }
        if let Some(issuer) = &self.issuer {
            builder.set_claim_if_absent("iss", issuer.as_str());
        }

        initializer(&mut builder);

        encode(&builder.header, &builder.claims, key.encoding_key())
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))
    }
}

/// Token issuer, or its absence.
pub enum SignatureProvider {
    Jwt(JwtSigner),
    /// Key material unloaded by configuration
    Disabled,
}

impl SignatureProvider {
    /// The signer, if signing is available.
    pub fn signer(&self) -> Option<&JwtSigner> {
        match self {
            SignatureProvider::Jwt(signer) => Some(signer),
            SignatureProvider::Disabled => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.signer().is_some()
    }
}
