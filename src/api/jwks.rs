// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Public verification keys for relying parties.

use axum::{extract::State, Json};
use jsonwebtoken::jwk::JwkSet;

use crate::{error::ApiError, state::AppState};

/// Serve the current public JWKS.
///
/// Shared-secret keys are never served; HMAC deployments and unloaded
/// custody answer 404.
pub async fn jwks(State(state): State<AppState>) -> Result<Json<JwkSet>, ApiError> {
    state
        .public_jwks()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No public signing keys are published"))
}
