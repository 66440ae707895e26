// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Persisted forms of shard-migration jobs.
//!
//! A copy job has two projections:
//!
//! - the flat map projection ([`CopyJobPayload`]), whose fixed keys name the
//!   shard pair and batch size and whose remaining keys are the job's opaque
//!   cursor state, and
//! - the structured-text projection ([`JobPayload`]), which tags the map
//!   with the job name so a queue can store heterogeneous jobs as text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ShardId;

pub const SOURCE_SHARD_HOSTNAME: &str = "source_shard_hostname";
pub const SOURCE_SHARD_TABLE_PREFIX: &str = "source_shard_table_prefix";
pub const DESTINATION_SHARD_HOSTNAME: &str = "destination_shard_hostname";
pub const DESTINATION_SHARD_TABLE_PREFIX: &str = "destination_shard_table_prefix";
pub const COUNT: &str = "count";

/// Keys owned by the map projection. Cursor state must not use them.
pub const RESERVED_KEYS: [&str; 5] = [
    SOURCE_SHARD_HOSTNAME,
    SOURCE_SHARD_TABLE_PREFIX,
    DESTINATION_SHARD_HOSTNAME,
    DESTINATION_SHARD_TABLE_PREFIX,
    COUNT,
];

/// Errors decoding a job payload
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Cursor state must be a JSON object, got: {0}")]
    CursorNotObject(String),

    #[error("Cursor state uses reserved payload key: {0}")]
    ReservedCursorKey(String),

    #[error("Malformed job payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Map projection of a copy job.
///
/// Serializes to a single flat JSON object; the cursor's entries sit next to
/// the fixed keys. Such a collision cannot be decoded back, so producers
/// call [`CopyJobPayload::check_cursor`] first; the encoding itself lets the
/// fixed key win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct CopyJobPayload {
    pub source_shard_id: ShardId,
    pub destination_shard_id: ShardId,
    /// Requested batch size for the next increment
    pub count: usize,
    /// Opaque, job-specific cursor state
    pub cursor: Map<String, Value>,
}

impl CopyJobPayload {
    /// Cursor keys that clash with the fixed keys of the map projection.
    pub fn colliding_cursor_keys(&self) -> Vec<&str> {
        self.cursor
            .keys()
            .map(String::as_str)
            .filter(|k| RESERVED_KEYS.contains(k))
            .collect()
    }

    /// Reject cursor state that the map projection could not carry intact.
    pub fn check_cursor(&self) -> Result<(), PayloadError> {
        match self.colliding_cursor_keys().first() {
            Some(key) => Err(PayloadError::ReservedCursorKey(key.to_string())),
            None => Ok(()),
        }
    }

    /// Flat map projection.
    pub fn to_map(&self) -> Map<String, Value> {
        Map::from(self.clone())
    }

    /// Rebuild from a flat map projection.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, PayloadError> {
        Self::try_from(map)
    }
}

impl From<CopyJobPayload> for Map<String, Value> {
    fn from(payload: CopyJobPayload) -> Self {
        let mut map = payload.cursor;
        map.insert(
            SOURCE_SHARD_HOSTNAME.to_string(),
            Value::String(payload.source_shard_id.hostname),
        );
        map.insert(
            SOURCE_SHARD_TABLE_PREFIX.to_string(),
            Value::String(payload.source_shard_id.table_prefix),
        );
        map.insert(
            DESTINATION_SHARD_HOSTNAME.to_string(),
            Value::String(payload.destination_shard_id.hostname),
        );
        map.insert(
            DESTINATION_SHARD_TABLE_PREFIX.to_string(),
            Value::String(payload.destination_shard_id.table_prefix),
        );
        map.insert(COUNT.to_string(), Value::from(payload.count as u64));
        map
    }
}

impl TryFrom<Map<String, Value>> for CopyJobPayload {
    type Error = PayloadError;

    fn try_from(mut map: Map<String, Value>) -> Result<Self, PayloadError> {
        let source_shard_id = ShardId {
            hostname: take_string(&mut map, SOURCE_SHARD_HOSTNAME)?,
            table_prefix: take_string(&mut map, SOURCE_SHARD_TABLE_PREFIX)?,
        };
        let destination_shard_id = ShardId {
            hostname: take_string(&mut map, DESTINATION_SHARD_HOSTNAME)?,
            table_prefix: take_string(&mut map, DESTINATION_SHARD_TABLE_PREFIX)?,
        };

        let count = match map.remove(COUNT) {
            None => return Err(PayloadError::MissingField(COUNT)),
            Some(v) => v
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| PayloadError::InvalidField {
                    field: COUNT,
                    reason: format!("expected an unsigned integer, got {}", v),
                })?,
        };
        if count == 0 {
            return Err(PayloadError::InvalidField {
                field: COUNT,
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(CopyJobPayload {
            source_shard_id,
            destination_shard_id,
            count,
            cursor: map,
        })
    }
}

fn take_string(map: &mut Map<String, Value>, field: &'static str) -> Result<String, PayloadError> {
    match map.remove(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) => Err(PayloadError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        }),
        Some(other) => Err(PayloadError::InvalidField {
            field,
            reason: format!("expected a string, got {}", other),
        }),
        None => Err(PayloadError::MissingField(field)),
    }
}

/// Structured-text projection of a job, tagged by job name.
///
/// ```text
/// {"Copy": {"source_shard_hostname": "...", ..., "count": 1000, "cursor": 42}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobPayload {
    /// One increment of a shard-to-shard copy
    Copy(CopyJobPayload),
}

impl JobPayload {
    /// Tag under which the job is encoded.
    pub fn name(&self) -> &'static str {
        match self {
            JobPayload::Copy(_) => "Copy",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            JobPayload::Copy(copy) => {
                let mut tagged = Map::new();
                tagged.insert(self.name().to_string(), Value::Object(copy.to_map()));
                Value::Object(tagged)
            }
        }
    }

    pub fn to_json_string(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(value: Value) -> Result<Self, PayloadError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, PayloadError> {
        Ok(serde_json::from_str(s)?)
    }
}
