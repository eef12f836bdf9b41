// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Token issuance, verification and request-time authorization.
//!
//! ## Request Flow
//!
//! 1. Client sends `Authorization: Bearer <token>`
//! 2. [`derive_principal`] middleware:
//!    - Verifies signature, expiry, issuer and audience
//!    - Requires `token_use == "access"`
//!    - Publishes exactly one [`Principal`] into request extensions
//! 3. [`enforce`] middleware runs a [`GuardChain`] over the principal
//!    (401 on rejection, 500 if step 2 never ran)
//! 4. Handlers read claims with [`Auth`] / [`OptionalAuth`]
//!
//! ## Security
//!
//! - Verification failures degrade to `Anonymous`; the reason is logged
//! - Signing and verification share key material through `crate::keys`
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod derivation;
pub mod error;
pub mod extractor;
pub mod guard;
pub mod principal;
pub mod signature;
pub mod verification;

pub use claims::{Audience, Claims};
pub use derivation::{derive_principal, Authenticator, LogSampler};
pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth};
pub use guard::{authenticated, claim_equals, enforce, guard_fn, Guard, GuardChain};
pub use principal::{Principal, RequestContext};
pub use signature::{JwtSigner, SignatureProvider, SigningKeySource, TokenBuilder};
pub use verification::{JwtVerifier, VerificationKeySource, VerificationProvider};
