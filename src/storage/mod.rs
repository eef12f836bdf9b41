// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistence used by the JWKS cache when it is filesystem-backed.
//!
//! ## Storage Layout
//!
//! ```text
//! <AUTH_CACHE_DIR>/
//!   {keyring}.json    # Serialized JWKS cache entry (keys + updated_at_epoch_ms)
//! ```

pub mod file_store;

pub use file_store::{FileStore, StorageError, StorageResult};
