// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2020 Joyent, Inc.
// Copyright 2026 Edgecast Cloud LLC.

//! Shared types for shard metadata and shard-migration jobs.
//!
//! This crate contains the value types exchanged between the name server
//! (which owns shard topology and busy-state), the job queue (which persists
//! and dispatches jobs) and operator tooling (which inspects job payloads).

pub mod payload;

pub use payload::{CopyJobPayload, JobPayload, PayloadError};

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, VariantNames};
use thiserror::Error;

// ============================================================================
// Shard Identity
// ============================================================================

/// Identifies one replica of one logical shard.
///
/// Displayed and parsed as `hostname/table_prefix`.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct ShardId {
    /// Host holding the replica (e.g., "3.db.example.com")
    pub hostname: String,
    /// Prefix of the tables backing the shard on that host
    pub table_prefix: String,
}

impl ShardId {
    pub fn new(hostname: impl Into<String>, table_prefix: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            table_prefix: table_prefix.into(),
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hostname, self.table_prefix)
    }
}

/// Error returned when a `hostname/table_prefix` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid shard id '{0}': expected HOSTNAME/TABLE_PREFIX")]
pub struct ShardIdParseError(pub String);

impl FromStr for ShardId {
    type Err = ShardIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Host names never contain '/', table prefixes might.
        match s.split_once('/') {
            Some((host, prefix)) if !host.is_empty() && !prefix.is_empty() => {
                Ok(ShardId::new(host, prefix))
            }
            _ => Err(ShardIdParseError(s.to_string())),
        }
    }
}

// ============================================================================
// Busy State
// ============================================================================

/// Eligibility of a shard for traffic and migration.
///
/// Only `Normal` and `Busy` shards may have a copy advanced. `Cancelled` is
/// set out of band by an operator and halts a migration chain. `Error` is
/// written by a copy job that gave up and needs operator intervention.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    VariantNames,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BusyState {
    /// In service
    #[default]
    Normal,
    /// Mid-migration, unsafe for normal traffic
    Busy,
    /// A migration failed and was abandoned
    Error,
    /// An operator halted the migration
    Cancelled,
}

impl BusyState {
    /// Numeric code used by metadata stores that persist the state as an
    /// integer column.
    pub fn code(self) -> i32 {
        match self {
            BusyState::Normal => 0,
            BusyState::Busy => 1,
            BusyState::Error => 2,
            BusyState::Cancelled => 3,
        }
    }

    /// Inverse of [`BusyState::code`].
    pub fn from_code(code: i32) -> Option<BusyState> {
        match code {
            0 => Some(BusyState::Normal),
            1 => Some(BusyState::Busy),
            2 => Some(BusyState::Error),
            3 => Some(BusyState::Cancelled),
            _ => None,
        }
    }

    /// Whether a copy may still be advanced on a destination in this state.
    pub fn is_migratable(self) -> bool {
        matches!(self, BusyState::Normal | BusyState::Busy)
    }
}

// ============================================================================
// Shard Info
// ============================================================================

/// Operational description of a shard as recorded by the name server.
///
/// Jobs never hold on to a `ShardInfo` across increments; busy-state changes
/// go through the name server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ShardInfo {
    pub id: ShardId,
    /// Implementation class of the shard (e.g., "SqlShard")
    pub class_name: String,
    /// Row type read from the shard
    #[serde(default)]
    pub source_type: String,
    /// Row type written to the shard
    #[serde(default)]
    pub destination_type: String,
    #[serde(default)]
    pub busy: BusyState,
}

impl ShardInfo {
    pub fn new(id: ShardId, class_name: impl Into<String>) -> Self {
        Self {
            id,
            class_name: class_name.into(),
            source_type: String::new(),
            destination_type: String::new(),
            busy: BusyState::Normal,
        }
    }

    pub fn with_busy(mut self, busy: BusyState) -> Self {
        self.busy = busy;
        self
    }
}

// ============================================================================
// Arbitrary
// ============================================================================

#[cfg(feature = "quickcheck")]
mod arbitrary {
    use super::{BusyState, ShardId, ShardInfo};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_helpers::random;

    impl Arbitrary for ShardId {
        fn arbitrary(g: &mut Gen) -> ShardId {
            ShardId {
                hostname: random::hostname(g),
                table_prefix: random::table_prefix(g),
            }
        }
    }

    impl Arbitrary for BusyState {
        fn arbitrary(g: &mut Gen) -> BusyState {
            *g.choose(&[
                BusyState::Normal,
                BusyState::Busy,
                BusyState::Error,
                BusyState::Cancelled,
            ])
            .unwrap_or(&BusyState::Normal)
        }
    }

    impl Arbitrary for ShardInfo {
        fn arbitrary(g: &mut Gen) -> ShardInfo {
            let len = random::len(g, 24);
            ShardInfo {
                id: ShardId::arbitrary(g),
                class_name: random::string(g, len),
                source_type: random::string(g, len),
                destination_type: random::string(g, len),
                busy: BusyState::arbitrary(g),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
