// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims carried by access tokens.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `token_use` value of access tokens.
pub const ACCESS_TOKEN_USE: &str = "access";

/// Audience expected on access tokens unless configured otherwise.
pub const DEFAULT_AUDIENCE: &str = "ACCESS";

/// Claim names with a typed field on [`Claims`].
pub const REGISTERED_CLAIMS: &[&str] = &["sub", "iss", "aud", "exp", "nbf", "iat", "jti", "token_use"];

/// The `aud` claim, which may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(a) => a == audience,
            Audience::Multiple(all) => all.iter().any(|a| a == audience),
        }
    }
}

impl From<&str> for Audience {
    fn from(audience: &str) -> Self {
        Audience::Single(audience.to_string())
    }
}

/// Verified token claims.
///
/// Registered claims are typed; anything else lands in `extra` so a
/// verified token round-trips without losing custom claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Expiration timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Not before timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Issued at timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Token ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// What the token may be used for (`access`, `refresh`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_use: Option<String>,

    /// Custom claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Claims of an access token for `sub`, expiring at `exp`.
    pub fn access(sub: impl Into<String>, exp: u64) -> Self {
        Self {
            sub: Some(sub.into()),
            aud: Some(Audience::from(DEFAULT_AUDIENCE)),
            exp: Some(exp),
            token_use: Some(ACCESS_TOKEN_USE.to_string()),
            ..Default::default()
        }
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.aud = Some(Audience::Single(audience.into()));
        self
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Add custom claims. Registered claim names are dropped so they
    /// cannot be serialized twice.
    pub fn with_custom_claims(mut self, claims: Map<String, Value>) -> Self {
        self.extra.extend(
            claims
                .into_iter()
                .filter(|(name, _)| !REGISTERED_CLAIMS.contains(&name.as_str())),
        );
        self
    }

    /// Whether `token_use` equals `expected`.
    pub fn has_token_use(&self, expected: &str) -> bool {
        self.token_use.as_deref() == Some(expected)
    }

    /// Any claim by name, registered or custom.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "sub" => self.sub.clone().map(Value::from),
            "iss" => self.iss.clone().map(Value::from),
            "aud" => self.aud.as_ref().and_then(|a| serde_json::to_value(a).ok()),
            "exp" => self.exp.map(Value::from),
            "nbf" => self.nbf.map(Value::from),
            "iat" => self.iat.map(Value::from),
            "jti" => self.jti.clone().map(Value::from),
            "token_use" => self.token_use.clone().map(Value::from),
            other => self.extra.get(other).cloned(),
        }
    }
}
