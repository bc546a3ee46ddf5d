// Copyright (c) 2025 prefsync Contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # prefsync
//!
//! Preferences synchronization core for an AT Protocol social client.
//!
//! A [`LocalStore`](store::LocalStore) holds the canonical, validated
//! settings and fans changes out to dependent consumers synchronously.
//! Account-scoped settings are pushed to the remote preferences service by
//! the [`RemoteSyncEngine`](sync::RemoteSyncEngine) with retry and
//! conflict handling, and everything is written behind to a durable cache.
//! [`PreferencesManager`] ties these together per session.

pub mod config;
pub mod database;
pub mod derived;
pub mod error;
pub mod manager;
pub mod notifier;
pub mod schema;
pub mod store;
pub mod sync;
pub mod types;

pub use config::PreferencesConfig;
pub use error::{Error, Result};
pub use manager::PreferencesManager;
pub use schema::{keys, Schema, Scope};
pub use types::*;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
