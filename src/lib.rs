// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Authn - JWT Credential Lifecycle
//!
//! Key custody, token issuance, token verification and request-time
//! authorization for Axum services.
//!
//! ## Modules
//!
//! - `api` - HTTP endpoints (health, JWKS, session)
//! - `auth` - Signing, verification, principal derivation and guards
//! - `keys` - Secret backends, JWKS cache and single-flight key generation
//! - `storage` - Crash-safe JSON documents on disk

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod keys;
pub mod state;
pub mod storage;
