// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Externally supplied JWKS documents.
//!
//! Only `file://` URIs are supported; any other scheme fails with
//! `UnsupportedKeyFormat`. When a JWKS URI is configured every instance is
//! a pure reader and no key is generated locally.

use jsonwebtoken::jwk::JwkSet;
use tracing::info;
use url::Url;

use crate::auth::AuthError;

/// Load and parse a JWKS document from `uri`.
pub fn load_jwks(uri: &str) -> Result<JwkSet, AuthError> {
    let url = Url::parse(uri)
        .map_err(|e| AuthError::UnsupportedKeyFormat(format!("invalid JWKS URI '{uri}': {e}")))?;

    if url.scheme() != "file" {
        return Err(AuthError::UnsupportedKeyFormat(format!(
            "JWKS URI scheme '{}' is not supported (expected file://)",
            url.scheme()
        )));
    }

    let path = url
        .to_file_path()
        .map_err(|_| AuthError::UnsupportedKeyFormat(format!("invalid JWKS file URI '{uri}'")))?;
    let raw = std::fs::read(&path)
        .map_err(|e| AuthError::KeySource(format!("cannot read {}: {e}", path.display())))?;
    let jwks: JwkSet = serde_json::from_slice(&raw)
        .map_err(|e| AuthError::UnsupportedKeyFormat(format!("invalid JWKS document: {e}")))?;

    if jwks.keys.is_empty() {
        return Err(AuthError::UnsupportedKeyFormat(format!(
            "JWKS at '{uri}' contains no keys"
        )));
    }

    info!(uri, keys = jwks.keys.len(), "Loaded JWKS");
    Ok(jwks)
}
