// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2020 Joyent, Inc.
// Copyright 2026 Edgecast Cloud LLC.

//! Jobs executed by the shard-migration job queue
//!
//! A job is a single unit of work. It runs once, and continues a longer
//! operation only by putting a successor job on the queue. Currently the
//! only job type is the copy job, which migrates a shard one batch at a
//! time.

pub mod copy;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use shard_migration_types::PayloadError;

use crate::nameserver::NameServerError;
use copy::CopyError;

/// Job execution errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Name server error: {0}")]
    NameServer(#[from] NameServerError),

    #[error("Copy failed: {0}")]
    Copy(#[from] CopyError),

    #[error("Invalid job payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("Job queue is closed")]
    QueueClosed,
}

/// A unit of work for the job queue.
///
/// `apply` consumes the job, so an instance can only ever run once.
#[async_trait]
pub trait Job: Send + fmt::Debug {
    /// Tag of the job in its structured-text projection.
    fn name(&self) -> &'static str;

    /// Structured-text projection, used for persistence and inspection.
    fn to_json(&self) -> Result<Value, PayloadError>;

    /// Run the job to completion.
    async fn apply(self: Box<Self>) -> Result<(), JobError>;
}
