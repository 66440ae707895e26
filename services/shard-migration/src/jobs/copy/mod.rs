// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2020 Joyent, Inc.
// Copyright 2026 Edgecast Cloud LLC.

//! Copy job implementation
//!
//! A copy job migrates rows from a source shard to a destination shard one
//! bounded batch at a time. Each increment:
//!
//! 1. Re-reads the destination's metadata, stopping if the shard is gone or
//!    an operator cancelled the migration
//! 2. Resolves routing nodes for both shards, stopping if the source is gone
//! 3. Marks the destination busy so traffic stays away from it
//! 4. Copies up to `count` rows from the job's cursor onward
//! 5. Queues a successor for the rest, or returns the destination to service
//!
//! Timeouts shrink the batch size and requeue; any other failure marks the
//! destination errored and is returned to the job queue.


use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use shard_migration_types::{BusyState, CopyJobPayload, JobPayload, PayloadError, ShardId};

use super::{Job, JobError};
use crate::metrics::{self, CopyOutcome};
use crate::nameserver::{NameServer, NameServerError};
use crate::scheduler::JobScheduler;

/// Smallest batch size a shard timeout may shrink to before the migration
/// is given up.
pub const MIN_COPY: usize = 500;

/// Failures reported by a copy primitive
#[derive(Debug, Error)]
pub enum CopyError {
    /// The source shard was too slow to answer for this batch size
    #[error("Shard timed out: {0}")]
    ShardTimeout(String),

    /// The connection to a shard's database timed out
    #[error("Database connection timed out: {0}")]
    ConnectionTimeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The per-shard copy primitive together with its position in the copy.
///
/// The cursor is opaque to the copy job: it is carried between increments
/// and through the job's map projection, where it must serialize to a JSON
/// object whose keys avoid the fixed payload keys.
#[async_trait]
pub trait CopyCursor<S>:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
where
    S: Send + Sync,
{
    /// Copy up to `count` rows from `source` to `destination`, starting at
    /// this cursor. Returns the cursor to continue from, or `None` when
    /// there is nothing left to copy.
    async fn copy_page(
        &self,
        source: &S,
        destination: &S,
        count: usize,
    ) -> Result<Option<Self>, CopyError>;
}

/// Batch size after a timeout: floor(count * 0.9), at least 1.
pub fn backoff_count(count: usize) -> usize {
    // Split to avoid overflowing `count * 9`.
    ((count / 10) * 9 + (count % 10) * 9 / 10).max(1)
}

/// One increment of a shard-to-shard copy.
///
/// Two copy jobs are equal when they migrate the same shard pair; batch
/// size and cursor are ignored.
pub struct CopyJob<S, C> {
    source_shard_id: ShardId,
    destination_shard_id: ShardId,
    count: usize,
    cursor: C,
    min_copy: usize,
    name_server: Arc<dyn NameServer<S>>,
    scheduler: Arc<dyn JobScheduler>,
}

impl<S, C> CopyJob<S, C>
where
    S: Send + Sync + 'static,
    C: CopyCursor<S>,
{
    pub fn new(
        source_shard_id: ShardId,
        destination_shard_id: ShardId,
        count: usize,
        cursor: C,
        name_server: Arc<dyn NameServer<S>>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        Self {
            source_shard_id,
            destination_shard_id,
            count: count.max(1),
            cursor,
            min_copy: MIN_COPY,
            name_server,
            scheduler,
        }
    }

    /// Override the shard-timeout floor. Successors inherit it.
    pub fn with_min_copy(mut self, min_copy: usize) -> Self {
        self.min_copy = min_copy;
        self
    }

    pub fn source_shard_id(&self) -> &ShardId {
        &self.source_shard_id
    }

    pub fn destination_shard_id(&self) -> &ShardId {
        &self.destination_shard_id
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn cursor(&self) -> &C {
        &self.cursor
    }

    pub fn min_copy(&self) -> usize {
        self.min_copy
    }

    /// Next increment of the same migration.
    fn successor(&self, cursor: C, count: usize) -> Self {
        Self {
            source_shard_id: self.source_shard_id.clone(),
            destination_shard_id: self.destination_shard_id.clone(),
            count,
            cursor,
            min_copy: self.min_copy,
            name_server: Arc::clone(&self.name_server),
            scheduler: Arc::clone(&self.scheduler),
        }
    }

    /// Persistable form of this job.
    pub fn to_payload(&self) -> Result<CopyJobPayload, PayloadError> {
        let cursor = match serde_json::to_value(&self.cursor)? {
            Value::Object(map) => map,
            other => return Err(PayloadError::CursorNotObject(other.to_string())),
        };

        let payload = CopyJobPayload {
            source_shard_id: self.source_shard_id.clone(),
            destination_shard_id: self.destination_shard_id.clone(),
            count: self.count,
            cursor,
        };

        payload.check_cursor()?;
        Ok(payload)
    }

    /// Flat map projection: shard pair, count and cursor entries.
    pub fn to_map(&self) -> Result<Map<String, Value>, PayloadError> {
        Ok(self.to_payload()?.to_map())
    }

    /// Run one increment.
    pub async fn run(self) -> Result<(), JobError> {
        let destination_info = match self
            .name_server
            .get_shard(&self.destination_shard_id)
            .await
        {
            Ok(info) => info,
            Err(NameServerError::NotFound(id)) => {
                info!(
                    shard = %id,
                    "Destination shard no longer exists, abandoning copy"
                );
                metrics::record_copy_outcome(CopyOutcome::Abandoned);
                return Ok(());
            }
            Err(e) => {
                // The destination's state is unknown here; writing Error
                // could clobber an operator's Cancelled.
                error!(
                    source = %self.source_shard_id,
                    destination = %self.destination_shard_id,
                    error = %e,
                    "Failed to read destination shard, leaving its state untouched"
                );
                metrics::record_copy_outcome(CopyOutcome::Failed);
                return Err(e.into());
            }
        };

        if destination_info.busy == BusyState::Cancelled {
            info!(
                source = %self.source_shard_id,
                destination = %self.destination_shard_id,
                "Copy cancelled by operator"
            );
            metrics::record_copy_outcome(CopyOutcome::Cancelled);
            return Ok(());
        }

        let source = match self
            .name_server
            .find_shard_by_id(&self.source_shard_id)
            .await
        {
            Ok(node) => node,
            Err(NameServerError::NotFound(id)) => {
                info!(
                    shard = %id,
                    "Source shard no longer exists, abandoning copy"
                );
                metrics::record_copy_outcome(CopyOutcome::Abandoned);
                return Ok(());
            }
            Err(e) => return self.fail(e.into()).await,
        };

        // The destination was just seen in step one; losing it now is a
        // topology change mid-copy and needs an operator.
        let destination = match self
            .name_server
            .find_shard_by_id(&self.destination_shard_id)
            .await
        {
            Ok(node) => node,
            Err(e) => return self.fail(e.into()).await,
        };

        if let Err(e) = self
            .name_server
            .mark_shard_busy(&self.destination_shard_id, BusyState::Busy)
            .await
        {
            return self.fail(e.into()).await;
        }

        debug!(
            source = %self.source_shard_id,
            destination = %self.destination_shard_id,
            count = self.count,
            cursor = ?self.cursor,
            "Copying page"
        );

        let outcome = self
            .cursor
            .copy_page(&source, &destination, self.count)
            .await;

        match outcome {
            Ok(Some(next)) => {
                let successor = self.successor(next, self.count);
                if let Err(e) = self.scheduler.put(Box::new(successor)).await {
                    return self.fail(e).await;
                }
                metrics::record_copy_outcome(CopyOutcome::Requeued);
                Ok(())
            }
            Ok(None) => {
                if let Err(e) = self
                    .name_server
                    .mark_shard_busy(&self.destination_shard_id, BusyState::Normal)
                    .await
                {
                    return self.fail(e.into()).await;
                }
                info!(
                    source = %self.source_shard_id,
                    destination = %self.destination_shard_id,
                    "Copy finished"
                );
                metrics::record_copy_outcome(CopyOutcome::Complete);
                Ok(())
            }
            Err(CopyError::ShardTimeout(reason)) if self.count >= self.min_copy => {
                self.requeue_smaller(CopyOutcome::ShardTimeout, &reason)
                    .await
            }
            Err(CopyError::ConnectionTimeout(reason)) => {
                self.requeue_smaller(CopyOutcome::ConnectionTimeout, &reason)
                    .await
            }
            Err(e @ CopyError::ShardTimeout(_)) => {
                error!(
                    source = %self.source_shard_id,
                    destination = %self.destination_shard_id,
                    count = self.count,
                    min_copy = self.min_copy,
                    "Shard timeout with batch size below minimum, giving up"
                );
                self.fail(e.into()).await
            }
            Err(e) => self.fail(e.into()).await,
        }
    }

    /// Queue a successor with a smaller batch and the same cursor.
    async fn requeue_smaller(&self, outcome: CopyOutcome, reason: &str) -> Result<(), JobError> {
        let count = backoff_count(self.count);
        warn!(
            source = %self.source_shard_id,
            destination = %self.destination_shard_id,
            reason = %reason,
            from = self.count,
            to = count,
            "Copy timed out, retrying with smaller batch"
        );

        let successor = self.successor(self.cursor.clone(), count);
        if let Err(e) = self.scheduler.put(Box::new(successor)).await {
            return self.fail(e).await;
        }
        metrics::record_copy_outcome(outcome);
        Ok(())
    }

    /// Mark the destination errored and hand the failure back.
    async fn fail(&self, err: JobError) -> Result<(), JobError> {
        error!(
            source = %self.source_shard_id,
            destination = %self.destination_shard_id,
            error = %err,
            "Copy failed, marking destination shard as errored"
        );
        metrics::record_copy_outcome(CopyOutcome::Failed);

        if let Err(e) = self
            .name_server
            .mark_shard_busy(&self.destination_shard_id, BusyState::Error)
            .await
        {
            error!(
                destination = %self.destination_shard_id,
                error = %e,
                "Failed to mark destination shard as errored"
            );
        }

        Err(err)
    }
}

#[async_trait]
impl<S, C> Job for CopyJob<S, C>
where
    S: Send + Sync + 'static,
    C: CopyCursor<S>,
{
    fn name(&self) -> &'static str {
        "Copy"
    }

    fn to_json(&self) -> Result<Value, PayloadError> {
        Ok(JobPayload::Copy(self.to_payload()?).to_json())
    }

    async fn apply(self: Box<Self>) -> Result<(), JobError> {
        (*self).run().await
    }
}

impl<S, C> PartialEq for CopyJob<S, C> {
    fn eq(&self, other: &Self) -> bool {
        self.source_shard_id == other.source_shard_id
            && self.destination_shard_id == other.destination_shard_id
    }
}

impl<S, C> Eq for CopyJob<S, C> {}

impl<S, C: fmt::Debug> fmt::Debug for CopyJob<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyJob")
            .field("source_shard_id", &self.source_shard_id)
            .field("destination_shard_id", &self.destination_shard_id)
            .field("count", &self.count)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

/// Rebuilds live copy jobs from their persisted projections.
///
/// The parser supplies what a payload cannot carry: the name server, the
/// job queue and the shard-timeout floor.
pub struct CopyJobParser<S, C> {
    name_server: Arc<dyn NameServer<S>>,
    scheduler: Arc<dyn JobScheduler>,
    min_copy: usize,
    _cursor: PhantomData<fn() -> C>,
}

impl<S, C> CopyJobParser<S, C>
where
    S: Send + Sync + 'static,
    C: CopyCursor<S>,
{
    pub fn new(name_server: Arc<dyn NameServer<S>>, scheduler: Arc<dyn JobScheduler>) -> Self {
        Self {
            name_server,
            scheduler,
            min_copy: MIN_COPY,
            _cursor: PhantomData,
        }
    }

    pub fn with_min_copy(mut self, min_copy: usize) -> Self {
        self.min_copy = min_copy;
        self
    }

    /// Build a job from its map projection.
    pub fn from_payload(&self, payload: CopyJobPayload) -> Result<CopyJob<S, C>, JobError> {
        let cursor: C = serde_json::from_value(Value::Object(payload.cursor))
            .map_err(PayloadError::from)?;

        Ok(CopyJob::new(
            payload.source_shard_id,
            payload.destination_shard_id,
            payload.count,
            cursor,
            Arc::clone(&self.name_server),
            Arc::clone(&self.scheduler),
        )
        .with_min_copy(self.min_copy))
    }

    /// Build a job from its flat map projection.
    pub fn from_map(&self, map: Map<String, Value>) -> Result<CopyJob<S, C>, JobError> {
        self.from_payload(CopyJobPayload::from_map(map)?)
    }

    /// Build a job from its structured-text projection.
    pub fn parse(&self, payload: JobPayload) -> Result<CopyJob<S, C>, JobError> {
        match payload {
            JobPayload::Copy(copy) => self.from_payload(copy),
        }
    }

    pub fn parse_str(&self, text: &str) -> Result<CopyJob<S, C>, JobError> {
        self.parse(JobPayload::from_json_str(text)?)
    }
}
