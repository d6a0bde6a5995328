//! History repository port.
//!
//! Durable, indexed storage for completed uploads. The queue is ephemeral;
//! this store outlives it and is only ever appended to or updated from the
//! queue's perspective.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{HistoryItem, ItemId, ServiceId};
use crate::errors::StorageError;

/// Default page size for history listing.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// A page request. Pages are 1-based; ordering is timestamp descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    /// Rows per page.
    pub page_size: u32,
    /// Restrict to rows whose primary service matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_filter: Option<ServiceId>,
}

impl PageRequest {
    /// First page with the default size.
    #[must_use]
    pub const fn first() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            service_filter: None,
        }
    }

    /// Row offset of this page.
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first()
    }
}

/// A case-insensitive filename search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Substring matched against the lower-cased filename.
    pub keyword: String,
    /// Restrict to rows whose primary service matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_filter: Option<ServiceId>,
    /// Maximum rows to return.
    pub limit: u32,
    /// Rows to skip.
    pub offset: u32,
}

impl SearchRequest {
    /// Search with default paging.
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            service_filter: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// One page of history rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// Rows of this page, timestamp descending.
    pub items: Vec<HistoryItem>,
    /// Total rows matching the filter.
    pub total: u64,
    /// Whether more pages follow.
    pub has_more: bool,
}

/// Conflict policy for [`HistoryRepository::import_json`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStrategy {
    /// Truncate, then bulk-insert the incoming records.
    Replace,
    /// Upsert each incoming record unless an existing record with the same
    /// id has an equal-or-newer timestamp (last-writer-wins by record
    /// timestamp).
    Merge,
}

/// Durable history store.
///
/// Implementations index by id, timestamp (descending), primary service,
/// lower-cased filename and file path.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Insert a new row. Fails if the id already exists.
    async fn insert(&self, item: &HistoryItem) -> Result<(), StorageError>;

    /// Update an existing row in full.
    async fn update(&self, item: &HistoryItem) -> Result<(), StorageError>;

    /// Insert or replace a row.
    async fn upsert(&self, item: &HistoryItem) -> Result<(), StorageError>;

    /// Delete one row. Deleting a missing id is not an error.
    async fn delete(&self, id: &ItemId) -> Result<(), StorageError>;

    /// Delete many rows; returns how many existed.
    async fn delete_many(&self, ids: &[ItemId]) -> Result<u32, StorageError>;

    /// Remove every row.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Fetch one row by id.
    async fn get_by_id(&self, id: &ItemId) -> Result<Option<HistoryItem>, StorageError>;

    /// Fetch the most recent row for a local file path.
    async fn get_by_file_path(&self, path: &str) -> Result<Option<HistoryItem>, StorageError>;

    /// Total row count.
    async fn count(&self) -> Result<u64, StorageError>;

    /// Fetch one page, timestamp descending.
    async fn get_page(&self, request: &PageRequest) -> Result<HistoryPage, StorageError>;

    /// Case-insensitive filename substring search.
    async fn search(&self, request: &SearchRequest) -> Result<HistoryPage, StorageError>;

    /// Fetch one raw batch for full-table scans, timestamp descending.
    ///
    /// Used through [`HistoryScan`]; callers should not need this directly.
    async fn batch(&self, offset: u64, limit: u32) -> Result<Vec<HistoryItem>, StorageError>;

    /// Export every row as a pretty-printed JSON array.
    async fn export_json(&self) -> Result<String, StorageError>;

    /// Import rows from a JSON array; returns how many rows were applied.
    async fn import_json(
        &self,
        json: &str,
        strategy: ImportStrategy,
    ) -> Result<u32, StorageError>;
}

/// Lazy, restartable batched scan over the whole history table.
///
/// Never materializes the table in memory at once; terminates when a batch
/// comes back shorter than `batch_size`.
pub struct HistoryScan {
    repo: Arc<dyn HistoryRepository>,
    batch_size: u32,
    offset: u64,
    done: bool,
}

impl HistoryScan {
    /// Start a scan from the beginning of the table.
    #[must_use]
    pub fn new(repo: Arc<dyn HistoryRepository>, batch_size: u32) -> Self {
        Self {
            repo,
            batch_size: batch_size.max(1),
            offset: 0,
            done: false,
        }
    }

    /// Fetch the next batch; `None` once the table is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<HistoryItem>>, StorageError> {
        if self.done {
            return Ok(None);
        }

        let batch = self.repo.batch(self.offset, self.batch_size).await?;
        if batch.is_empty() {
            self.done = true;
            return Ok(None);
        }

        self.offset += batch.len() as u64;
        if (batch.len() as u32) < self.batch_size {
            self.done = true;
        }
        Ok(Some(batch))
    }

    /// Restart the scan from the beginning.
    pub const fn reset(&mut self) {
        self.offset = 0;
        self.done = false;
    }
}
