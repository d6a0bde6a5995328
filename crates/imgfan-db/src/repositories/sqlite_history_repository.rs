//! `SQLite` implementation of the `HistoryRepository` trait.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use imgfan_core::domain::{
    HistoryItem, ItemId, LinkCheckStatus, LinkCheckSummary, ServiceId, ServiceResult,
};
use imgfan_core::errors::StorageError;
use imgfan_core::ports::{
    HistoryPage, HistoryRepository, ImportStrategy, PageRequest, SearchRequest,
};

/// `SQLite` implementation of the `HistoryRepository` trait.
///
/// One row per completed upload; `results` and the link-check columns hold
/// serialized JSON. Reads order by `(timestamp DESC, id ASC)` so pages are
/// stable even when timestamps collide.
pub struct SqliteHistoryRepository {
    pool: SqlitePool,
}

impl SqliteHistoryRepository {
    /// Create a new `SQLite` history repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing only).
    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_item(row: &SqliteRow) -> Result<HistoryItem, StorageError> {
    let id_str: String = row.get("id");
    let id = ItemId::from_str(&id_str)
        .map_err(|e| StorageError::read(format!("bad history id '{id_str}': {e}")))?;

    let primary: String = row.get("primary_service");

    let results_json: String = row.get("results");
    let results: Vec<ServiceResult> = serde_json::from_str(&results_json)
        .map_err(|e| StorageError::read(format!("bad results column for {id_str}: {e}")))?;

    let link_check_status: Option<LinkCheckStatus> = row
        .get::<Option<String>, _>("link_check_status")
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| StorageError::read(format!("bad link_check_status for {id_str}: {e}")))?;

    let link_check_summary: Option<LinkCheckSummary> = row
        .get::<Option<String>, _>("link_check_summary")
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| StorageError::read(format!("bad link_check_summary for {id_str}: {e}")))?;

    Ok(HistoryItem {
        id,
        timestamp: row.get("timestamp"),
        local_file_name: row.get("local_file_name"),
        file_path: row.get("file_path"),
        primary_service: ServiceId::new(primary),
        results,
        generated_link: row.get("generated_link"),
        link_check_status,
        link_check_summary,
        width: row.get::<Option<i64>, _>("width").map(|w| w as u32),
        height: row.get::<Option<i64>, _>("height").map(|h| h as u32),
    })
}

/// Serialize the JSON-backed columns of one item.
fn json_columns(
    item: &HistoryItem,
) -> Result<(String, Option<String>, Option<String>), StorageError> {
    let results = serde_json::to_string(&item.results).map_err(StorageError::write)?;
    let status = item
        .link_check_status
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StorageError::write)?;
    let summary = item
        .link_check_summary
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StorageError::write)?;
    Ok((results, status, summary))
}

/// Escape LIKE wildcards so a keyword containing `%` or `_` matches
/// literally.
fn escape_like(keyword: &str) -> String {
    keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

const SELECT_COLUMNS: &str = "id, timestamp, local_file_name, local_file_name_lower, file_path, \
     primary_service, results, generated_link, link_check_status, link_check_summary, \
     width, height";

#[async_trait]
impl HistoryRepository for SqliteHistoryRepository {
    async fn insert(&self, item: &HistoryItem) -> Result<(), StorageError> {
        let (results, status, summary) = json_columns(item)?;

        sqlx::query(
            r#"
            INSERT INTO upload_history (
                id, timestamp, local_file_name, local_file_name_lower, file_path,
                primary_service, results, generated_link, link_check_status,
                link_check_summary, width, height
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.timestamp)
        .bind(&item.local_file_name)
        .bind(item.local_file_name.to_lowercase())
        .bind(&item.file_path)
        .bind(item.primary_service.as_str())
        .bind(&results)
        .bind(&item.generated_link)
        .bind(&status)
        .bind(&summary)
        .bind(item.width.map(i64::from))
        .bind(item.height.map(i64::from))
        .execute(&self.pool)
        .await
        .map_err(StorageError::write)?;

        debug!(id = %item.id, "history row inserted");
        Ok(())
    }

    async fn update(&self, item: &HistoryItem) -> Result<(), StorageError> {
        let (results, status, summary) = json_columns(item)?;

        let result = sqlx::query(
            r#"
            UPDATE upload_history SET
                timestamp = ?,
                local_file_name = ?,
                local_file_name_lower = ?,
                file_path = ?,
                primary_service = ?,
                results = ?,
                generated_link = ?,
                link_check_status = ?,
                link_check_summary = ?,
                width = ?,
                height = ?
            WHERE id = ?
            "#,
        )
        .bind(item.timestamp)
        .bind(&item.local_file_name)
        .bind(item.local_file_name.to_lowercase())
        .bind(&item.file_path)
        .bind(item.primary_service.as_str())
        .bind(&results)
        .bind(&item.generated_link)
        .bind(&status)
        .bind(&summary)
        .bind(item.width.map(i64::from))
        .bind(item.height.map(i64::from))
        .bind(item.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StorageError::write)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::write(format!(
                "history row '{}' not found",
                item.id
            )));
        }
        Ok(())
    }

    async fn upsert(&self, item: &HistoryItem) -> Result<(), StorageError> {
        let (results, status, summary) = json_columns(item)?;

        sqlx::query(
            r#"
            INSERT INTO upload_history (
                id, timestamp, local_file_name, local_file_name_lower, file_path,
                primary_service, results, generated_link, link_check_status,
                link_check_summary, width, height
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                timestamp = excluded.timestamp,
                local_file_name = excluded.local_file_name,
                local_file_name_lower = excluded.local_file_name_lower,
                file_path = excluded.file_path,
                primary_service = excluded.primary_service,
                results = excluded.results,
                generated_link = excluded.generated_link,
                link_check_status = excluded.link_check_status,
                link_check_summary = excluded.link_check_summary,
                width = excluded.width,
                height = excluded.height
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.timestamp)
        .bind(&item.local_file_name)
        .bind(item.local_file_name.to_lowercase())
        .bind(&item.file_path)
        .bind(item.primary_service.as_str())
        .bind(&results)
        .bind(&item.generated_link)
        .bind(&status)
        .bind(&summary)
        .bind(item.width.map(i64::from))
        .bind(item.height.map(i64::from))
        .execute(&self.pool)
        .await
        .map_err(StorageError::write)?;

        Ok(())
    }

    async fn delete(&self, id: &ItemId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM upload_history WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::write)?;
        Ok(())
    }

    async fn delete_many(&self, ids: &[ItemId]) -> Result<u32, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::write)?;
        let mut removed = 0u32;
        for id in ids {
            let result = sqlx::query("DELETE FROM upload_history WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(StorageError::write)?;
            removed += result.rows_affected() as u32;
        }
        tx.commit().await.map_err(StorageError::write)?;

        debug!(removed, "history rows deleted");
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM upload_history")
            .execute(&self.pool)
            .await
            .map_err(StorageError::clear)?;
        info!("history store cleared");
        Ok(())
    }

    async fn get_by_id(&self, id: &ItemId) -> Result<Option<HistoryItem>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM upload_history WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::read)?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn get_by_file_path(&self, path: &str) -> Result<Option<HistoryItem>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM upload_history
             WHERE file_path = ? ORDER BY timestamp DESC, id ASC LIMIT 1"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::read)?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM upload_history")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::read)?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn get_page(&self, request: &PageRequest) -> Result<HistoryPage, StorageError> {
        let offset = i64::from(request.offset());
        let limit = i64::from(request.page_size);

        let (total, rows) = match request.service_filter {
            Some(ref service) => {
                let total = sqlx::query(
                    "SELECT COUNT(*) AS n FROM upload_history WHERE primary_service = ?",
                )
                .bind(service.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::read)?
                .get::<i64, _>("n");

                let rows = sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM upload_history
                     WHERE primary_service = ?
                     ORDER BY timestamp DESC, id ASC LIMIT ? OFFSET ?"
                ))
                .bind(service.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::read)?;

                (total, rows)
            }
            None => {
                let total = sqlx::query("SELECT COUNT(*) AS n FROM upload_history")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(StorageError::read)?
                    .get::<i64, _>("n");

                let rows = sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM upload_history
                     ORDER BY timestamp DESC, id ASC LIMIT ? OFFSET ?"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::read)?;

                (total, rows)
            }
        };

        let items: Vec<HistoryItem> =
            rows.iter().map(row_to_item).collect::<Result<_, _>>()?;
        let total = total as u64;
        let has_more = (offset as u64) + (items.len() as u64) < total;

        Ok(HistoryPage {
            items,
            total,
            has_more,
        })
    }

    async fn search(&self, request: &SearchRequest) -> Result<HistoryPage, StorageError> {
        let pattern = format!("%{}%", escape_like(&request.keyword.to_lowercase()));
        let limit = i64::from(request.limit);
        let offset = i64::from(request.offset);

        let (total, rows) = match request.service_filter {
            Some(ref service) => {
                let total = sqlx::query(
                    "SELECT COUNT(*) AS n FROM upload_history
                     WHERE local_file_name_lower LIKE ? ESCAPE '\\'
                       AND primary_service = ?",
                )
                .bind(&pattern)
                .bind(service.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::read)?
                .get::<i64, _>("n");

                let rows = sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM upload_history
                     WHERE local_file_name_lower LIKE ? ESCAPE '\\'
                       AND primary_service = ?
                     ORDER BY timestamp DESC, id ASC LIMIT ? OFFSET ?"
                ))
                .bind(&pattern)
                .bind(service.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::read)?;

                (total, rows)
            }
            None => {
                let total = sqlx::query(
                    "SELECT COUNT(*) AS n FROM upload_history
                     WHERE local_file_name_lower LIKE ? ESCAPE '\\'",
                )
                .bind(&pattern)
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::read)?
                .get::<i64, _>("n");

                let rows = sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM upload_history
                     WHERE local_file_name_lower LIKE ? ESCAPE '\\'
                     ORDER BY timestamp DESC, id ASC LIMIT ? OFFSET ?"
                ))
                .bind(&pattern)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::read)?;

                (total, rows)
            }
        };

        let items: Vec<HistoryItem> =
            rows.iter().map(row_to_item).collect::<Result<_, _>>()?;
        let total = total as u64;
        let has_more = (offset as u64) + (items.len() as u64) < total;

        Ok(HistoryPage {
            items,
            total,
            has_more,
        })
    }

    async fn batch(&self, offset: u64, limit: u32) -> Result<Vec<HistoryItem>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM upload_history
             ORDER BY timestamp DESC, id ASC LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(limit))
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::read)?;

        rows.iter().map(row_to_item).collect()
    }

    async fn export_json(&self) -> Result<String, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM upload_history ORDER BY timestamp DESC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::read)?;

        let items: Vec<HistoryItem> =
            rows.iter().map(row_to_item).collect::<Result<_, _>>()?;
        serde_json::to_string_pretty(&items).map_err(StorageError::read)
    }

    async fn import_json(
        &self,
        json: &str,
        strategy: ImportStrategy,
    ) -> Result<u32, StorageError> {
        let incoming: Vec<HistoryItem> = serde_json::from_str(json)
            .map_err(|e| StorageError::write(format!("import parse failed: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(StorageError::write)?;
        let mut applied = 0u32;

        if strategy == ImportStrategy::Replace {
            sqlx::query("DELETE FROM upload_history")
                .execute(&mut *tx)
                .await
                .map_err(StorageError::write)?;
        }

        for item in &incoming {
            if strategy == ImportStrategy::Merge {
                let existing = sqlx::query(
                    "SELECT timestamp FROM upload_history WHERE id = ?",
                )
                .bind(item.id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(StorageError::write)?;

                // Last-writer-wins by record timestamp, not import time.
                if let Some(row) = existing {
                    if row.get::<i64, _>("timestamp") >= item.timestamp {
                        continue;
                    }
                }
            }

            let (results, status, summary) = json_columns(item)?;
            sqlx::query(
                r#"
                INSERT INTO upload_history (
                    id, timestamp, local_file_name, local_file_name_lower, file_path,
                    primary_service, results, generated_link, link_check_status,
                    link_check_summary, width, height
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    local_file_name = excluded.local_file_name,
                    local_file_name_lower = excluded.local_file_name_lower,
                    file_path = excluded.file_path,
                    primary_service = excluded.primary_service,
                    results = excluded.results,
                    generated_link = excluded.generated_link,
                    link_check_status = excluded.link_check_status,
                    link_check_summary = excluded.link_check_summary,
                    width = excluded.width,
                    height = excluded.height
                "#,
            )
            .bind(item.id.to_string())
            .bind(item.timestamp)
            .bind(&item.local_file_name)
            .bind(item.local_file_name.to_lowercase())
            .bind(&item.file_path)
            .bind(item.primary_service.as_str())
            .bind(&results)
            .bind(&item.generated_link)
            .bind(&status)
            .bind(&summary)
            .bind(item.width.map(i64::from))
            .bind(item.height.map(i64::from))
            .execute(&mut *tx)
            .await
            .map_err(StorageError::write)?;

            applied += 1;
        }

        tx.commit().await.map_err(StorageError::write)?;
        info!(applied, total = incoming.len(), ?strategy, "history import finished");
        Ok(applied)
    }
}
