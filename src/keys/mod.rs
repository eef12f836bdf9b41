// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Custody
//!
//! Acquisition, generation and caching of token signing material.
//!
//! ```text
//! signer / verifier
//!   → JwkCache (read)
//!   → miss or expired? → KeyGenerationMutex (single-flight provision)
//!                          → SecretRegistry (HMAC secret reference)
//!                          → JwkCache (write, under the publish permit)
//! ```
//!
//! A configured `file://` JWKS URI bypasses all of this; the process is
//! then a pure reader.

pub mod cache;
pub mod generation;
pub mod jwks_uri;
pub mod material;
pub mod source;

pub use cache::{FsJwkStore, JwkCache, JwkStore, JwksCacheEntry, MemoryJwkStore};
pub use generation::{KeyGenerationMutex, KeyringSettings};
pub use material::{Curve, SigningAlgorithm, SigningKey};
pub use source::{
    EnvSecretBackend, KeyMaterial, KeyReference, SecretBackend, SecretRegistry,
    VaultSecretBackend,
};
