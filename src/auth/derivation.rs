// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-request principal derivation.
//!
//! ```text
//! no Authorization header        → Anonymous
//! Bearer token → verify → ok     → token_use == "access"? → Authenticated
//!                       → error  → Anonymous
//! ```
//!
//! Verification failures never fail the request. The reason is only
//! logged, and failures are always logged. Verified payloads are logged
//! at a sampled rate.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::Value;
use tracing::{debug, error};

use super::claims::{Claims, ACCESS_TOKEN_USE, DEFAULT_AUDIENCE};
use super::principal::{Principal, RequestContext};
use super::verification::VerificationProvider;
use super::AuthError;

/// Default share of verified payloads logged at debug level.
pub const DEFAULT_LOG_SAMPLE_RATE: f64 = 0.2;

/// Whether a draw in `[0, 1)` falls under `rate`.
pub fn sample(draw: f64, rate: f64) -> bool {
    draw < rate
}

/// Volume control for payload debug logs.
#[derive(Debug)]
pub struct LogSampler {
    rate: f64,
    rng: SystemRandom,
}

impl LogSampler {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            rng: SystemRandom::new(),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    fn draw(&self) -> f64 {
        let mut bytes = [0u8; 4];
        if self.rng.fill(&mut bytes).is_err() {
            return 1.0;
        }
        f64::from(u32::from_le_bytes(bytes)) / (f64::from(u32::MAX) + 1.0)
    }

    /// Sampled decision; `failed` always logs.
    pub fn should_log(&self, failed: bool) -> bool {
        failed || sample(self.draw(), self.rate)
    }
}

impl Default for LogSampler {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_SAMPLE_RATE)
    }
}

/// Bearer token of the `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Turns request credentials into a [`Principal`].
pub struct Authenticator {
    verifier: Arc<VerificationProvider>,
    audience: String,
    token_use: String,
    sampler: LogSampler,
}

impl Authenticator {
    pub fn new(verifier: Arc<VerificationProvider>) -> Self {
        Self {
            verifier,
            audience: DEFAULT_AUDIENCE.to_string(),
            token_use: ACCESS_TOKEN_USE.to_string(),
            sampler: LogSampler::default(),
        }
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn with_sampler(mut self, sampler: LogSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Derive the principal for a request's headers.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Principal {
        let Some(token) = bearer_token(headers) else {
            return Principal::Anonymous;
        };

        let outcome = self.verify_bearer(token).await;

        let failed = outcome.is_err();
        if self.sampler.should_log(failed) {
            self.log_payload(token, outcome.as_ref().err());
        }

        match outcome {
            Ok(claims) => Principal::Authenticated(claims),
            Err(_) => Principal::Anonymous,
        }
    }

    /// Verify `token` and check it was issued as an access token.
    pub async fn verify_bearer(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.verifier.verify(token, &self.audience).await?;
        if claims.has_token_use(&self.token_use) {
            Ok(claims)
        } else {
            Err(AuthError::TokenUseMismatch)
        }
    }

    fn log_payload(&self, token: &str, failure: Option<&AuthError>) {
        let reason = failure.map(AuthError::error_code);
        match jsonwebtoken::dangerous::insecure_decode::<Value>(token) {
            Ok(data) => debug!(
                payload = %data.claims,
                reason,
                "Bearer token payload"
            ),
            Err(e) => debug!(
                token_len = token.len(),
                error = %e,
                reason,
                "Bearer token is unparseable"
            ),
        }
    }

    /// Derive the principal and publish it onto `ctx`.
    pub async fn derive<C: RequestContext>(
        &self,
        ctx: &mut C,
        headers: &HeaderMap,
    ) -> Result<Principal, AuthError> {
        let principal = self.authenticate(headers).await;
        ctx.set_principal(principal.clone())?;
        Ok(principal)
    }
}

/// Middleware deriving the principal of every request.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/v1/session", get(session))
///     .layer(axum::middleware::from_fn_with_state(authenticator, derive_principal));
/// ```
pub async fn derive_principal(
    State(authenticator): State<Arc<Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    if let Err(e) = authenticator
        .derive(&mut parts.extensions, &parts.headers)
        .await
    {
        error!(error = %e, "Failed to publish request principal");
        return e.into_response();
    }
    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::signature::{JwtSigner, SigningKeySource};
    use crate::auth::verification::{JwtVerifier, VerificationKeySource};
    use crate::auth::Claims;
    use crate::keys::{JwkCache, KeyGenerationMutex, KeyringSettings, SecretRegistry, SigningAlgorithm};
    use axum::http::{Extensions, HeaderValue};
    use std::time::Duration;

    async fn setup() -> (JwtSigner, Authenticator) {
        let custody = Arc::new(KeyGenerationMutex::new(
            KeyringSettings {
                keyring: "derivation".to_string(),
                algorithm: SigningAlgorithm::Es256,
                secret_ref: None,
                disabled: false,
            },
            SecretRegistry::new(),
            Arc::new(JwkCache::in_memory(Duration::from_secs(60))),
        ));
        let signer = JwtSigner::new(SigningKeySource::Custody(Arc::clone(&custody)));
        signer.initialize().await.unwrap();
        let verifier = VerificationProvider::Jwt(JwtVerifier::new(VerificationKeySource::Custody(
            custody,
        )));
        let authenticator =
            Authenticator::new(Arc::new(verifier)).with_sampler(LogSampler::new(1.0));
        (signer, authenticator)
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn exp() -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap() + 600
    }

    #[test]
    fn sampling_is_a_pure_threshold() {
        assert!(sample(0.1, 0.2));
        assert!(!sample(0.2, 0.2));
        assert!(!sample(0.0, 0.0));
        assert!(LogSampler::new(0.0).should_log(true));
        assert!(!LogSampler::new(0.0).should_log(false));
        assert!(LogSampler::new(1.0).should_log(false));
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token(&bearer("abc")), Some("abc"));
        assert_eq!(bearer_token(&HeaderMap::new()), None);

        let mut basic = HeaderMap::new();
        basic.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&basic), None);

        let mut lower = HeaderMap::new();
        lower.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&lower), Some("xyz"));
    }

    #[tokio::test]
    async fn valid_access_token_authenticates() {
        let (signer, authenticator) = setup().await;
        let token = signer.sign(&Claims::access("user_123", exp())).unwrap();

        let principal = authenticator.authenticate(&bearer(&token)).await;
        assert_eq!(principal.subject(), Some("user_123"));
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_anonymous() {
        let (signer, authenticator) = setup().await;
        assert_eq!(
            authenticator.authenticate(&HeaderMap::new()).await,
            Principal::Anonymous
        );
        assert_eq!(
            authenticator.authenticate(&bearer("garbage")).await,
            Principal::Anonymous
        );

        let mut refresh = Claims::access("user_123", exp());
        refresh.token_use = Some("refresh".to_string());
        let token = signer.sign(&refresh).unwrap();
        assert_eq!(
            authenticator.authenticate(&bearer(&token)).await,
            Principal::Anonymous
        );
    }

    #[tokio::test]
    async fn wrong_token_use_has_its_own_reason() {
        let (signer, authenticator) = setup().await;
        let mut refresh = Claims::access("user_123", exp());
        refresh.token_use = Some("refresh".to_string());
        let token = signer.sign(&refresh).unwrap();

        let failure = authenticator.verify_bearer(&token).await.unwrap_err();
        assert_eq!(failure, AuthError::TokenUseMismatch);
        assert_eq!(failure.error_code(), "token_use_mismatch");

        let (signed, signature) = token.rsplit_once('.').unwrap();
        let flipped = if signature.starts_with('A') { "B" } else { "A" };
        let tampered = format!("{signed}.{flipped}{}", &signature[1..]);
        assert_eq!(
            authenticator.verify_bearer(&tampered).await,
            Err(AuthError::SignatureInvalid)
        );
    }

    #[tokio::test]
    async fn derive_publishes_exactly_once() {
        let (signer, authenticator) = setup().await;
        let token = signer.sign(&Claims::access("user_123", exp())).unwrap();
        let headers = bearer(&token);

        let mut extensions = Extensions::new();
        let principal = authenticator.derive(&mut extensions, &headers).await.unwrap();
        assert!(principal.is_authenticated());
        assert_eq!(extensions.principal(), Some(&principal));

        let again = authenticator.derive(&mut extensions, &headers).await;
        assert!(matches!(again, Err(AuthError::Internal(_))));
    }

    #[tokio::test]
    async fn disabled_verifier_yields_anonymous() {
        let authenticator = Authenticator::new(Arc::new(VerificationProvider::Disabled));
        assert_eq!(
            authenticator.authenticate(&bearer("a.b.c")).await,
            Principal::Anonymous
        );
    }
}
