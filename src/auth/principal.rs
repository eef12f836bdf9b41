// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The per-request principal and the request context it lives in.

use axum::http::Extensions;

use super::{AuthError, Claims};

/// Identity derived from a request's credentials.
///
/// Exactly one principal is set per request by the derivation step; guards
/// only read it.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// No token, or a token that failed verification
    Anonymous,
    /// Verified access token
    Authenticated(Claims),
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::Authenticated(_))
    }

    pub fn claims(&self) -> Option<&Claims> {
        match self {
            Principal::Authenticated(claims) => Some(claims),
            Principal::Anonymous => None,
        }
    }

    /// Subject of an authenticated principal.
    pub fn subject(&self) -> Option<&str> {
        self.claims().and_then(|c| c.sub.as_deref())
    }
}

/// Request-scoped store the principal is published to.
pub trait RequestContext {
    fn principal(&self) -> Option<&Principal>;

    /// Publish the principal. Fails if one was already set.
    fn set_principal(&mut self, principal: Principal) -> Result<(), AuthError>;
}

impl RequestContext for Extensions {
    fn principal(&self) -> Option<&Principal> {
        self.get::<Principal>()
    }

    fn set_principal(&mut self, principal: Principal) -> Result<(), AuthError> {
        if self.get::<Principal>().is_some() {
            return Err(AuthError::Internal(
                "principal already derived for this request".to_string(),
            ));
        }
        self.insert(principal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_is_set_at_most_once() {
        let mut extensions = Extensions::new();
        assert!(extensions.principal().is_none());

        extensions.set_principal(Principal::Anonymous).unwrap();
        let second = extensions.set_principal(Principal::Authenticated(Claims::default()));

        assert!(matches!(second, Err(AuthError::Internal(_))));
        assert_eq!(extensions.principal(), Some(&Principal::Anonymous));
    }

    #[test]
    fn subject_only_for_authenticated() {
        let claims = Claims::access("user_123", 0);
        assert_eq!(Principal::Authenticated(claims).subject(), Some("user_123"));
        assert_eq!(Principal::Anonymous.subject(), None);
    }
}
