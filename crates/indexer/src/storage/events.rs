//! Raw event storage operations.

use super::types::{address_from_db, address_to_db, hash_from_db, hash_to_db};
use super::{NewRawEvent, RawEvent, SavedEvent, Storage};
use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use sqlx::Row;

const RAW_EVENT_COLUMNS: &str = r#"
    id, contract_address, event_type, block_number, tx_hash, log_index,
    block_timestamp, payload, processed, failure_count, created_at, processed_at
"#;

impl Storage {
    /// Insert a raw event unless its dedup key is already present.
    ///
    /// The dedup key is `(contract_address, block_number, tx_hash, event_type)`.
    /// A repeated insert leaves the existing row untouched and returns it.
    pub async fn insert_raw_event(&self, event: &NewRawEvent) -> Result<SavedEvent> {
        let now = chrono::Utc::now().timestamp();
        let contract = address_to_db(&event.contract_address);
        let tx_hash = hash_to_db(&event.tx_hash);

        let result = sqlx::query(
            r#"
            INSERT INTO raw_events (
                contract_address, event_type, block_number, tx_hash, log_index,
                block_timestamp, payload, processed, failure_count, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            ON CONFLICT(contract_address, block_number, tx_hash, event_type) DO NOTHING
            "#,
        )
        .bind(&contract)
        .bind(event.kind.as_str())
        .bind(event.block_number as i64)
        .bind(&tx_hash)
        .bind(event.log_index as i64)
        .bind(event.block_timestamp as i64)
        .bind(&event.payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert raw event")?;

        let inserted = result.rows_affected() > 0;
        let id = if inserted {
            result.last_insert_rowid()
        } else {
            sqlx::query_scalar(
                r#"
                SELECT id
                FROM raw_events
                WHERE contract_address = ?
                  AND block_number = ?
                  AND tx_hash = ?
                  AND event_type = ?
                "#,
            )
            .bind(&contract)
            .bind(event.block_number as i64)
            .bind(&tx_hash)
            .bind(event.kind.as_str())
            .fetch_one(&self.pool)
            .await
            .context("Failed to fetch existing raw event id")?
        };

        let stored = self
            .get_raw_event(id)
            .await?
            .with_context(|| format!("Raw event {} vanished after insert", id))?;

        Ok(SavedEvent {
            event: stored,
            inserted,
        })
    }

    /// Get a raw event by row id.
    pub async fn get_raw_event(&self, id: i64) -> Result<Option<RawEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {RAW_EVENT_COLUMNS} FROM raw_events WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch raw event")?;

        row.map(Self::row_to_raw_event).transpose()
    }

    /// Whether an event with this dedup key is stored.
    pub async fn raw_event_exists(
        &self,
        contract_address: &Address,
        block_number: u64,
        tx_hash: &B256,
        event_type: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM raw_events
            WHERE contract_address = ?
              AND block_number = ?
              AND tx_hash = ?
              AND event_type = ?
            "#,
        )
        .bind(address_to_db(contract_address))
        .bind(block_number as i64)
        .bind(hash_to_db(tx_hash))
        .bind(event_type)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check raw event existence")?;

        Ok(count > 0)
    }

    /// Unprocessed events, least-failed first and then in chain order,
    /// `limit` rows starting at `offset`.
    pub async fn find_unprocessed_raw_events(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<RawEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RAW_EVENT_COLUMNS}
            FROM raw_events
            WHERE processed = 0
            ORDER BY failure_count ASC, block_number ASC, log_index ASC, id ASC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch unprocessed raw events")?;

        rows.into_iter().map(Self::row_to_raw_event).collect()
    }

    /// All events emitted by one transaction, in log order.
    pub async fn find_raw_events_by_tx_hash(&self, tx_hash: &B256) -> Result<Vec<RawEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RAW_EVENT_COLUMNS}
            FROM raw_events
            WHERE tx_hash = ?
            ORDER BY log_index ASC
            "#
        ))
        .bind(hash_to_db(tx_hash))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch raw events by tx hash")?;

        rows.into_iter().map(Self::row_to_raw_event).collect()
    }

    /// Mark an event processed and clear its failure count.
    ///
    /// Returns the number of rows touched (0 if the id is unknown).
    pub async fn mark_raw_event_processed(&self, id: i64) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE raw_events
            SET processed = 1,
                failure_count = 0,
                processed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark raw event processed")?;

        Ok(result.rows_affected())
    }

    /// Add one to an event's failure count.
    ///
    /// Returns the number of rows touched (0 if the id is unknown).
    pub async fn increment_raw_event_failure(&self, id: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE raw_events SET failure_count = failure_count + 1 WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to increment raw event failure count")?;

        Ok(result.rows_affected())
    }

    /// Current failure count of an event.
    pub async fn raw_event_failure_count(&self, id: i64) -> Result<Option<u32>> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT failure_count FROM raw_events WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch raw event failure count")?;

        Ok(count.map(|c| c as u32))
    }

    /// Count unprocessed events, optionally for one event type.
    pub async fn count_unprocessed_raw_events(&self, event_type: Option<&str>) -> Result<u64> {
        let count: i64 = match event_type {
            Some(event_type) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM raw_events WHERE processed = 0 AND event_type = ?",
            )
            .bind(event_type)
            .fetch_one(&self.pool)
            .await,
            None => sqlx::query_scalar("SELECT COUNT(*) FROM raw_events WHERE processed = 0")
                .fetch_one(&self.pool)
                .await,
        }
        .context("Failed to count unprocessed raw events")?;

        Ok(count as u64)
    }

    /// Delete events created before `timestamp` (unix seconds).
    pub async fn delete_raw_events_older_than(&self, timestamp: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM raw_events WHERE created_at < ?")
            .bind(timestamp)
            .execute(&self.pool)
            .await
            .context("Failed to delete old raw events")?;

        Ok(result.rows_affected())
    }

    /// Delete events from blocks strictly below `block_number`.
    pub async fn delete_raw_events_before_block(&self, block_number: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM raw_events WHERE block_number < ?")
            .bind(block_number as i64)
            .execute(&self.pool)
            .await
            .context("Failed to delete raw events before block")?;

        Ok(result.rows_affected())
    }

    fn row_to_raw_event(row: sqlx::sqlite::SqliteRow) -> Result<RawEvent> {
        Ok(RawEvent {
            id: row.get("id"),
            contract_address: address_from_db(row.get("contract_address"))?,
            event_type: row.get("event_type"),
            block_number: row.get::<i64, _>("block_number") as u64,
            tx_hash: hash_from_db(row.get("tx_hash"))?,
            log_index: row.get::<i64, _>("log_index") as u64,
            block_timestamp: row.get::<i64, _>("block_timestamp") as u64,
            payload: row.get("payload"),
            processed: row.get::<i64, _>("processed") != 0,
            failure_count: row.get::<i64, _>("failure_count") as u32,
            created_at: row.get("created_at"),
            processed_at: row.get("processed_at"),
        })
    }
}
