// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Name server interface
//!
//! The name server owns shard topology and busy-state. Jobs look shards up
//! through it on every increment and record migration progress by writing
//! the destination's busy-state.

use async_trait::async_trait;
use thiserror::Error;

use shard_migration_types::{BusyState, ShardId, ShardInfo};

/// Name server errors
#[derive(Debug, Error)]
pub enum NameServerError {
    #[error("Shard not found: {0}")]
    NotFound(ShardId),

    #[error("Name server unavailable: {0}")]
    Unavailable(String),
}

impl NameServerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NameServerError::NotFound(_))
    }
}

/// Shard metadata and routing, keyed by [`ShardId`].
///
/// `S` is the routing node type: a handle through which rows of one shard
/// replica are read and written. The copy job never looks inside it.
#[async_trait]
pub trait NameServer<S>: Send + Sync {
    /// Current metadata for a shard.
    async fn get_shard(&self, id: &ShardId) -> Result<ShardInfo, NameServerError>;

    /// Resolve a routing node for a shard.
    async fn find_shard_by_id(&self, id: &ShardId) -> Result<S, NameServerError>;

    /// Overwrite a shard's busy-state. Last writer wins.
    async fn mark_shard_busy(&self, id: &ShardId, busy: BusyState) -> Result<(), NameServerError>;
}
