// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution backends.
//!
//! - `local`: in-process worker pool driven by a [`JobHandler`]
//! - `mock`: scripted backend for tests and dry runs

pub mod local;
pub mod mock;
mod traits;

pub use local::{LocalBackend, LocalBackendConfig, LocalBackendStats};
pub use mock::MockBackend;
pub use traits::*;
