// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Checkpoint persistence.
//!
//! - `store`: reading, writing and resetting the checkpoint file
//! - `writer`: background task that keeps the file in step with the backend

pub mod store;
pub mod writer;

pub use store::{CheckpointStore, STATE_FORMAT_VERSION};
pub use writer::{CheckpointWriter, WriterHandle, WriterReport};
