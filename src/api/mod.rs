// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::{
    body::Body,
    http::Request,
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{
    auth::{authenticated, derive_principal, enforce, GuardChain},
    state::AppState,
};

pub mod health;
pub mod jwks;
pub mod session;

pub fn router(state: AppState) -> Router {
    let session_guard = Arc::new(GuardChain::new(authenticated()));

    let v1_routes = Router::new()
        .route("/session", get(session::session))
        .route_layer(from_fn_with_state(session_guard, enforce));

    #[cfg(feature = "dev")]
    let v1_routes = v1_routes.route("/dev/token", axum::routing::post(session::dev_token));

    Router::new()
        .route("/health", get(health::health))
        .route("/.well-known/jwks.json", get(jwks::jwks))
        .nest("/v1", v1_routes)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            Arc::clone(&state.authenticator),
            derive_principal,
        ))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
