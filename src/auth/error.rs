// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::storage::StorageError;

/// Error type shared by key custody, signing, verification and guards.
///
/// Verification failures are kept as distinct variants so callers can tell
/// an expired token from a tampered one. The type is `Clone` because a
/// failed key generation is memoized and handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No registered secret backend matches the reference prefix
    #[error("No secret backend registered for reference '{0}'")]
    UnsupportedProtocol(String),
    /// The backend answered but returned nothing
    #[error("Secret '{0}' not found or empty")]
    SecretNotFound(String),
    /// The backend call itself failed
    #[error("Secret backend failure: {0}")]
    KeySource(String),
    /// JWKS URI scheme or key type that cannot be used
    #[error("Unsupported key format: {0}")]
    UnsupportedKeyFormat(String),
    /// Provider used before its key material was loaded
    #[error("Provider is not initialized")]
    NotInitialized,
    /// Key material was disabled by configuration
    #[error("Token verification is unavailable")]
    VerificationUnavailable,
    /// Key pair or secret generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
    /// Token is malformed
    #[error("Token is malformed")]
    MalformedToken,
    /// Token signature is invalid
    #[error("Token signature is invalid")]
    SignatureInvalid,
    /// Token has expired
    #[error("Token has expired")]
    TokenExpired,
    /// Token is not yet valid
    #[error("Token is not yet valid")]
    TokenNotYetValid,
    /// Token audience does not match
    #[error("Token audience is invalid")]
    AudienceMismatch,
    /// Token issuer does not match
    #[error("Token issuer is invalid")]
    IssuerMismatch,
    /// Correctly signed, but issued for another use (e.g. a refresh token)
    #[error("Token use is invalid")]
    TokenUseMismatch,
    /// A guard ran without a principal in the request context
    #[error("No principal in request context; authentication derivation is not mounted")]
    NoPrincipalInContext,
    /// A guard rejected the principal
    #[error("Principal is not authenticated")]
    PrincipalNotAuthenticated,
    /// JWKS cache storage failure
    #[error("Key cache storage error: {0}")]
    Storage(String),
    /// Internal error
    #[error("Internal authentication error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: ErrorDetail,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::UnsupportedProtocol(_) => "unsupported_protocol",
            AuthError::SecretNotFound(_) => "secret_not_found",
            AuthError::KeySource(_) => "key_source_error",
            AuthError::UnsupportedKeyFormat(_) => "unsupported_key_format",
            AuthError::NotInitialized => "not_initialized",
            AuthError::VerificationUnavailable => "verification_unavailable",
            AuthError::KeyGeneration(_) => "key_generation_failed",
            AuthError::MalformedToken => "malformed_token",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::TokenUseMismatch => "token_use_mismatch",
            AuthError::NoPrincipalInContext => "no_principal_in_context",
            AuthError::PrincipalNotAuthenticated => "PrincipalNotAuthenticated",
            AuthError::Storage(_) => "storage_error",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    ///
    /// Token outcomes are 401; anything pointing at misconfiguration or a
    /// broken backend is a 5xx.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MalformedToken
            | AuthError::SignatureInvalid
            | AuthError::TokenExpired
            | AuthError::TokenNotYetValid
            | AuthError::AudienceMismatch
            | AuthError::IssuerMismatch
            | AuthError::TokenUseMismatch
            | AuthError::VerificationUnavailable
            | AuthError::PrincipalNotAuthenticated => StatusCode::UNAUTHORIZED,
            AuthError::UnsupportedProtocol(_)
            | AuthError::SecretNotFound(_)
            | AuthError::KeySource(_)
            | AuthError::UnsupportedKeyFormat(_)
            | AuthError::NotInitialized
            | AuthError::KeyGeneration(_)
            | AuthError::NoPrincipalInContext
            | AuthError::Storage(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is an outcome of checking a token (as opposed to a
    /// custody or configuration failure).
    pub fn is_token_rejection(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }
}

impl From<StorageError> for AuthError {
    fn from(e: StorageError) -> Self {
        AuthError::Storage(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                AuthError::SignatureInvalid
            }
            ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
            ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                AuthError::UnsupportedKeyFormat(e.to_string())
            }
            _ => AuthError::MalformedToken,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: ErrorDetail {
                code: self.error_code(),
            },
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn rejection_body_has_stable_code() {
        let response = AuthError::PrincipalNotAuthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":{"code":"PrincipalNotAuthenticated"}}"#);
    }

    #[tokio::test]
    async fn missing_principal_is_server_error() {
        let response = AuthError::NoPrincipalInContext.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn verification_errors_stay_distinct() {
        let codes = [
            AuthError::SignatureInvalid.error_code(),
            AuthError::TokenExpired.error_code(),
            AuthError::AudienceMismatch.error_code(),
            AuthError::IssuerMismatch.error_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(AuthError::TokenExpired.is_token_rejection());
        assert!(!AuthError::Storage("disk".into()).is_token_rejection());
    }

    #[test]
    fn jsonwebtoken_kinds_map_to_taxonomy() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        let expired: Error = ErrorKind::ExpiredSignature.into();
        assert_eq!(AuthError::from(expired), AuthError::TokenExpired);

        let aud: Error = ErrorKind::InvalidAudience.into();
        assert_eq!(AuthError::from(aud), AuthError::AudienceMismatch);

        let iss: Error = ErrorKind::InvalidIssuer.into();
        assert_eq!(AuthError::from(iss), AuthError::IssuerMismatch);

        let sig: Error = ErrorKind::InvalidSignature.into();
        assert_eq!(AuthError::from(sig), AuthError::SignatureInvalid);
    }
}
