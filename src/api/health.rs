// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::{AppState, CustodyStatus};

/// Health check response with individual component status.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Token key custody ("ok", "disabled" or "unavailable").
    pub keys: String,
}

/// Health check endpoint handler.
///
/// Returns 503 only when key custody is configured but cannot publish
/// keys. Unloaded keys are a configuration choice and report 200.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let keys = state.custody_status().await;
    let healthy = keys != CustodyStatus::Unavailable;

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            keys: keys.as_str().to_string(),
        },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
