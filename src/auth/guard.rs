// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization guards.
//!
//! A guard is a side-effect-free predicate over the request's
//! [`Principal`]. Guards are chained with [`GuardChain`], which stops at the
//! first rejection.
//!
//! ```rust,ignore
//! let chain = GuardChain::new(authenticated()).then(claim_equals("tenant", "t-1"));
//! let routes = Router::new()
//!     .route("/v1/session", get(session))
//!     .route_layer(axum::middleware::from_fn_with_state(Arc::new(chain), enforce));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, error};

use super::principal::{Principal, RequestContext};
use super::AuthError;

/// Predicate deciding whether a principal may continue.
pub trait Guard: Send + Sync {
    fn check(&self, principal: &Principal) -> bool;
}

impl<F> Guard for F
where
    F: Fn(&Principal) -> bool + Send + Sync,
{
    fn check(&self, principal: &Principal) -> bool {
        self(principal)
    }
}

/// Wrap a closure as a guard.
pub fn guard_fn<F>(f: F) -> Arc<dyn Guard>
where
    F: Fn(&Principal) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Allows authenticated principals only.
pub fn authenticated() -> Arc<dyn Guard> {
    guard_fn(Principal::is_authenticated)
}

/// Allows authenticated principals whose claim `name` equals `value`.
pub fn claim_equals(name: impl Into<String>, value: impl Into<Value>) -> Arc<dyn Guard> {
    let name = name.into();
    let value = value.into();
    guard_fn(move |principal: &Principal| {
        principal
            .claims()
            .and_then(|claims| claims.get(&name))
            .is_some_and(|actual| actual == value)
    })
}

/// Ordered guards, all of which must pass.
#[derive(Clone)]
pub struct GuardChain {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardChain {
    pub fn new(first: Arc<dyn Guard>) -> Self {
        Self {
            guards: vec![first],
        }
    }

    pub fn then(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    /// Run the guards in order, stopping at the first rejection.
    pub fn check(&self, principal: &Principal) -> bool {
        self.guards.iter().all(|guard| guard.check(principal))
    }

    /// Authorize the principal held by `ctx`.
    pub fn authorize<C: RequestContext>(&self, ctx: &C) -> Result<(), AuthError> {
        let principal = ctx.principal().ok_or(AuthError::NoPrincipalInContext)?;
        if self.check(principal) {
            Ok(())
        } else {
            Err(AuthError::PrincipalNotAuthenticated)
        }
    }
}

/// Middleware applying a [`GuardChain`].
///
/// Rejections answer 401. A missing principal means the derivation layer
/// is not mounted in front of this one and answers 500.
pub async fn enforce(
    State(chain): State<Arc<GuardChain>>,
    request: Request,
    next: Next,
) -> Response {
    match chain.authorize(request.extensions()) {
        Ok(()) => next.run(request).await,
        Err(AuthError::NoPrincipalInContext) => {
            error!(
                path = %request.uri().path(),
                "Guard mounted without principal derivation"
            );
            AuthError::NoPrincipalInContext.into_response()
        }
        Err(e) => {
            debug!(path = %request.uri().path(), "Guard rejected request");
            e.into_response()
        }
    }
}
