// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session endpoints.

use axum::Json;
use serde::Serialize;

use crate::auth::{Auth, Claims};

/// The caller's verified identity.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// User ID from the `sub` claim.
    pub user_id: Option<String>,
    /// Expiration timestamp of the presented token.
    pub expires_at: Option<u64>,
    /// Every verified claim.
    pub claims: Claims,
}

/// Describe the authenticated caller.
pub async fn session(Auth(claims): Auth) -> Json<SessionResponse> {
    Json(SessionResponse {
        user_id: claims.sub.clone(),
        expires_at: claims.exp,
        claims,
    })
}

#[cfg(feature = "dev")]
pub use dev::{dev_token, DevTokenRequest, DevTokenResponse};

/// Token minting for local development.
#[cfg(feature = "dev")]
mod dev {
    use axum::{extract::State, Json};
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value};
    use tracing::warn;

    use crate::auth::Claims;
    use crate::error::ApiError;
    use crate::state::AppState;

    #[derive(Debug, Deserialize)]
    pub struct DevTokenRequest {
        pub sub: String,
        /// Lifetime in seconds; the configured token TTL when absent.
        #[serde(default)]
        pub ttl_secs: Option<u64>,
        /// Extra claims copied into the token.
        #[serde(default)]
        pub claims: Map<String, Value>,
    }

    #[derive(Debug, Serialize)]
    pub struct DevTokenResponse {
        pub access_token: String,
        pub token_type: &'static str,
        pub expires_in: u64,
    }

    /// Mint an access token for any subject.
    pub async fn dev_token(
        State(state): State<AppState>,
        Json(request): Json<DevTokenRequest>,
    ) -> Result<Json<DevTokenResponse>, ApiError> {
        let signer = state
            .signer
            .signer()
            .ok_or_else(|| ApiError::service_unavailable("Token signing is disabled"))?;
        if request.sub.is_empty() {
            return Err(ApiError::bad_request("sub must not be empty"));
        }

        let expires_in = request
            .ttl_secs
            .unwrap_or_else(|| state.config.token_ttl.as_secs());
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        let exp = now
            .checked_add(expires_in)
            .ok_or_else(|| ApiError::bad_request("ttl_secs is too large"))?;

        let mut claims = Claims::access(request.sub.as_str(), exp)
            .with_audience(state.config.audience.as_str())
            .with_custom_claims(request.claims);
        claims.iat = Some(now);

        warn!(sub = %request.sub, "Minted development access token");
        let access_token = signer.sign(&claims)?;

        Ok(Json(DevTokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in,
        }))
    }
}
