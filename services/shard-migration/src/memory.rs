// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! In-memory name server and shard tables
//!
//! [`MemoryNameServer`] keeps shard metadata and routing nodes in maps
//! guarded by `RwLock`s. [`MemoryShard`] is a routing node over an ordered
//! in-memory table, and [`TableCursor`] copies such tables page by page.
//! Used by the worker binary and the tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use shard_migration_types::{BusyState, ShardId, ShardInfo};

use crate::jobs::copy::{CopyCursor, CopyError};
use crate::nameserver::{NameServer, NameServerError};

/// Name server backed by in-process maps.
pub struct MemoryNameServer<S> {
    shards: RwLock<HashMap<ShardId, ShardInfo>>,
    nodes: RwLock<HashMap<ShardId, S>>,
}

impl<S: Clone + Send + Sync> Default for MemoryNameServer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone + Send + Sync> MemoryNameServer<S> {
    pub fn new() -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a shard and its routing node, replacing any previous entry.
    pub async fn add_shard(&self, info: ShardInfo, node: S) {
        let id = info.id.clone();
        self.shards.write().await.insert(id.clone(), info);
        self.nodes.write().await.insert(id, node);
    }

    /// Drop a shard from the topology.
    pub async fn remove_shard(&self, id: &ShardId) {
        self.shards.write().await.remove(id);
        self.nodes.write().await.remove(id);
    }

    /// Register metadata without a routing node; lookups of the node fail
    /// with not-found.
    pub async fn add_shard_info(&self, info: ShardInfo) {
        self.shards.write().await.insert(info.id.clone(), info);
    }

    /// Operator override of a shard's busy-state, e.g. to cancel a copy.
    /// Returns false if the shard is unknown.
    pub async fn set_busy(&self, id: &ShardId, busy: BusyState) -> bool {
        match self.shards.write().await.get_mut(id) {
            Some(info) => {
                info.busy = busy;
                true
            }
            None => false,
        }
    }

    /// Busy-state of a shard, if it exists.
    pub async fn shard_busy(&self, id: &ShardId) -> Option<BusyState> {
        self.shards.read().await.get(id).map(|info| info.busy)
    }

    /// All shard metadata, sorted by id.
    pub async fn list_shards(&self) -> Vec<ShardInfo> {
        let mut shards: Vec<ShardInfo> = self.shards.read().await.values().cloned().collect();
        shards.sort_by(|a, b| a.id.cmp(&b.id));
        shards
    }
}

#[async_trait]
impl<S: Clone + Send + Sync> NameServer<S> for MemoryNameServer<S> {
    async fn get_shard(&self, id: &ShardId) -> Result<ShardInfo, NameServerError> {
        self.shards
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| NameServerError::NotFound(id.clone()))
    }

    async fn find_shard_by_id(&self, id: &ShardId) -> Result<S, NameServerError> {
        self.nodes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| NameServerError::NotFound(id.clone()))
    }

    async fn mark_shard_busy(&self, id: &ShardId, busy: BusyState) -> Result<(), NameServerError> {
        let mut shards = self.shards.write().await;
        let info = shards
            .get_mut(id)
            .ok_or_else(|| NameServerError::NotFound(id.clone()))?;
        debug!(shard = %id, from = %info.busy, to = %busy, "Busy-state change");
        info.busy = busy;
        Ok(())
    }
}

/// Failure a [`MemoryShard`] reports on its next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardFault {
    ShardTimeout,
    ConnectionTimeout,
    Other,
}

impl ShardFault {
    fn into_error(self, shard: &str) -> CopyError {
        match self {
            ShardFault::ShardTimeout => CopyError::ShardTimeout(format!("{} timed out", shard)),
            ShardFault::ConnectionTimeout => {
                CopyError::ConnectionTimeout(format!("connection to {} timed out", shard))
            }
            ShardFault::Other => CopyError::Other(anyhow::anyhow!("{} failed", shard)),
        }
    }
}

#[derive(Default)]
struct ShardState {
    rows: BTreeMap<u64, Value>,
    faults: VecDeque<ShardFault>,
    /// Reads of more rows than this time out
    slow_above: Option<usize>,
}

/// Routing node for an in-memory table of rows keyed by `u64`.
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct MemoryShard {
    name: String,
    state: Arc<Mutex<ShardState>>,
}

impl std::fmt::Debug for MemoryShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryShard")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl MemoryShard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ShardState::default())),
        }
    }

    /// Table with rows keyed 1, 2, 3, ... in order.
    pub fn with_rows(name: impl Into<String>, rows: impl IntoIterator<Item = Value>) -> Self {
        let state = ShardState {
            rows: (1u64..).zip(rows).collect(),
            ..ShardState::default()
        };
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Make every read of more than `limit` rows time out.
    pub async fn set_slow_above(&self, limit: Option<usize>) {
        self.state.lock().await.slow_above = limit;
    }

    /// Queue a failure for the next read.
    pub async fn inject_fault(&self, fault: ShardFault) {
        self.state.lock().await.faults.push_back(fault);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn rows(&self) -> BTreeMap<u64, Value> {
        self.state.lock().await.rows.clone()
    }

    /// Up to `count` rows with keys strictly after `after`.
    pub async fn read_page(
        &self,
        after: Option<u64>,
        count: usize,
    ) -> Result<Vec<(u64, Value)>, CopyError> {
        let mut state = self.state.lock().await;

        if let Some(fault) = state.faults.pop_front() {
            return Err(fault.into_error(&self.name));
        }
        if state.slow_above.is_some_and(|limit| count > limit) {
            return Err(ShardFault::ShardTimeout.into_error(&self.name));
        }

        let start = after.map_or(0, |k| k.saturating_add(1));
        Ok(state
            .rows
            .range(start..)
            .take(count)
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    /// Insert or overwrite rows.
    pub async fn write_page(&self, rows: Vec<(u64, Value)>) {
        self.state.lock().await.rows.extend(rows);
    }
}

/// Cursor over a [`MemoryShard`] table: the last key copied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCursor {
    /// `None` before the first page
    #[serde(default)]
    pub cursor: Option<u64>,
}

impl TableCursor {
    pub fn start() -> Self {
        Self { cursor: None }
    }
}

#[async_trait]
impl CopyCursor<MemoryShard> for TableCursor {
    async fn copy_page(
        &self,
        source: &MemoryShard,
        destination: &MemoryShard,
        count: usize,
    ) -> Result<Option<Self>, CopyError> {
        let page = source.read_page(self.cursor, count).await?;
        let copied = page.len();
        let last = page.last().map(|(k, _)| *k);

        destination.write_page(page).await;

        // A short page means the table is exhausted.
        if copied < count {
            return Ok(None);
        }
        Ok(Some(TableCursor {
            cursor: last.or(self.cursor),
        }))
    }
}

// ============================================================================
// Topology files
// ============================================================================

/// A shard described in a topology file.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyShard {
    #[serde(flatten)]
    pub info: ShardInfo,
    /// Initial table contents
    #[serde(default)]
    pub rows: Vec<Value>,
    /// Reads of more rows than this time out
    #[serde(default)]
    pub slow_above: Option<usize>,
}

/// Shards to load into a [`MemoryNameServer`].
///
/// ```json
/// {"shards": [{"id": {"hostname": "db1", "table_prefix": "t"},
///              "class_name": "MemoryShard", "rows": [1, 2, 3]}]}
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Topology {
    pub shards: Vec<TopologyShard>,
}

impl Topology {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read topology file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse topology file: {}", path.display()))
    }

    /// Build a name server holding every shard of this topology.
    pub async fn into_name_server(self) -> MemoryNameServer<MemoryShard> {
        let name_server = MemoryNameServer::new();
        for shard in self.shards {
            let node = MemoryShard::with_rows(shard.info.id.to_string(), shard.rows);
            node.set_slow_above(shard.slow_above).await;
            name_server.add_shard(shard.info, node).await;
        }
        name_server
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn info(host: &str) -> ShardInfo {
        ShardInfo::new(ShardId::new(host, "t0"), "MemoryShard")
    }

    #[tokio::test]
    async fn test_name_server_lookup_and_mark() {
        let ns = MemoryNameServer::new();
        let shard = MemoryShard::new("db1");
        ns.add_shard(info("db1"), shard).await;

        let id = ShardId::new("db1", "t0");
        assert_eq!(ns.get_shard(&id).await.unwrap().busy, BusyState::Normal);
        assert!(ns.find_shard_by_id(&id).await.is_ok());

        ns.mark_shard_busy(&id, BusyState::Busy).await.unwrap();
        assert_eq!(ns.shard_busy(&id).await, Some(BusyState::Busy));
    }

    #[tokio::test]
    async fn test_name_server_not_found() {
        let ns: MemoryNameServer<MemoryShard> = MemoryNameServer::new();
        let id = ShardId::new("nowhere", "t0");

        assert!(ns.get_shard(&id).await.unwrap_err().is_not_found());
        assert!(ns.find_shard_by_id(&id).await.unwrap_err().is_not_found());
        assert!(
            ns.mark_shard_busy(&id, BusyState::Busy)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_info_without_node() {
        let ns: MemoryNameServer<MemoryShard> = MemoryNameServer::new();
        ns.add_shard_info(info("db2")).await;
        let id = ShardId::new("db2", "t0");

        assert!(ns.get_shard(&id).await.is_ok());
        assert!(ns.find_shard_by_id(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_read_page_honors_cursor() {
        let shard = MemoryShard::with_rows("db1", (0..5).map(|n| json!(n)));
        let page = shard.read_page(None, 2).await.unwrap();
        assert_eq!(page, vec![(1, json!(0)), (2, json!(1))]);

        let page = shard.read_page(Some(2), 10).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].0, 3);
    }

    #[tokio::test]
    async fn test_table_cursor_copies_in_pages() {
        let source = MemoryShard::with_rows("src", (0..5).map(|n| json!({ "n": n })));
        let destination = MemoryShard::new("dst");

        let next = TableCursor::start()
            .copy_page(&source, &destination, 3)
            .await
            .unwrap();
        assert_eq!(next, Some(TableCursor { cursor: Some(3) }));
        assert_eq!(destination.len().await, 3);

        let next = next
            .unwrap()
            .copy_page(&source, &destination, 3)
            .await
            .unwrap();
        assert_eq!(next, None);
        assert_eq!(destination.rows().await, source.rows().await);
    }

    #[tokio::test]
    async fn test_faults_are_reported_once() {
        let source = MemoryShard::with_rows("src", vec![json!(1)]);
        let destination = MemoryShard::new("dst");
        source.inject_fault(ShardFault::ConnectionTimeout).await;

        let err = TableCursor::start()
            .copy_page(&source, &destination, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::ConnectionTimeout(_)));
        assert!(destination.is_empty().await);

        assert_eq!(
            TableCursor::start()
                .copy_page(&source, &destination, 10)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_slow_shard_times_out_large_batches() {
        let source = MemoryShard::with_rows("src", vec![json!(1)]);
        source.set_slow_above(Some(100)).await;

        assert!(matches!(
            source.read_page(None, 101).await,
            Err(CopyError::ShardTimeout(_))
        ));
        assert!(source.read_page(None, 100).await.is_ok());
    }

    #[test]
    fn test_table_cursor_serializes_as_object() {
        let value = serde_json::to_value(TableCursor { cursor: Some(42) }).unwrap();
        assert_eq!(value, json!({ "cursor": 42 }));

        let start: TableCursor = serde_json::from_value(json!({})).unwrap();
        assert_eq!(start, TableCursor::start());
    }

    #[tokio::test]
    async fn test_topology_builds_name_server() {
        let topology: Topology = serde_json::from_value(json!({
            "shards": [
                {
                    "id": { "hostname": "db1", "table_prefix": "t0" },
                    "class_name": "MemoryShard",
                    "rows": [1, 2, 3],
                    "slow_above": 50
                },
                {
                    "id": { "hostname": "db2", "table_prefix": "t0" },
                    "class_name": "MemoryShard",
                    "busy": "cancelled"
                }
            ]
        }))
        .unwrap();

        let ns = topology.into_name_server().await;
        let shards = ns.list_shards().await;
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[1].busy, BusyState::Cancelled);

        let db1 = ns.find_shard_by_id(&ShardId::new("db1", "t0")).await.unwrap();
        assert_eq!(db1.len().await, 3);
    }
}
