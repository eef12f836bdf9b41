// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the derived principal.
//!
//! Both extractors read what [`derive_principal`](super::derive_principal)
//! published. They never verify tokens themselves.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(claims): Auth) -> impl IntoResponse {
//!     // claims.sub is the caller's user ID
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use super::{AuthError, Claims, Principal, RequestContext};

/// Extractor for authenticated callers.
///
/// Rejects anonymous requests with 401 and requests that never went
/// through derivation with 500.
pub struct Auth(pub Claims);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.principal() {
            Some(Principal::Authenticated(claims)) => Ok(Auth(claims.clone())),
            Some(Principal::Anonymous) => Err(AuthError::PrincipalNotAuthenticated),
            None => Err(AuthError::NoPrincipalInContext),
        }
    }
}

/// Optional authentication extractor.
///
/// Returns `None` for anonymous callers instead of rejecting.
pub struct OptionalAuth(pub Option<Claims>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .principal()
            .ok_or(AuthError::NoPrincipalInContext)?;
        Ok(OptionalAuth(principal.claims().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(principal: Option<Principal>) -> Parts {
        let mut parts = Request::builder()
            .uri("/test")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        if let Some(principal) = principal {
            parts.extensions.set_principal(principal).unwrap();
        }
        parts
    }

    #[tokio::test]
    async fn auth_extractor_requires_authenticated_principal() {
        let mut anonymous = parts(Some(Principal::Anonymous));
        let result = Auth::from_request_parts(&mut anonymous, &()).await;
        assert!(matches!(result, Err(AuthError::PrincipalNotAuthenticated)));

        let claims = Claims::access("user_123", 0);
        let mut authed = parts(Some(Principal::Authenticated(claims.clone())));
        let Auth(extracted) = Auth::from_request_parts(&mut authed, &()).await.unwrap();
        assert_eq!(extracted, claims);
    }

    #[tokio::test]
    async fn extractors_need_derivation() {
        let result = Auth::from_request_parts(&mut parts(None), &()).await;
        assert!(matches!(result, Err(AuthError::NoPrincipalInContext)));

        let result = OptionalAuth::from_request_parts(&mut parts(None), &()).await;
        assert!(matches!(result, Err(AuthError::NoPrincipalInContext)));
    }

    #[tokio::test]
    async fn optional_auth_allows_anonymous() {
        let mut anonymous = parts(Some(Principal::Anonymous));
        let OptionalAuth(claims) = OptionalAuth::from_request_parts(&mut anonymous, &())
            .await
            .unwrap();
        assert!(claims.is_none());
    }
}
