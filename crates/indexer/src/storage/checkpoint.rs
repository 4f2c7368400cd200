//! Sync checkpoint storage operations.

use super::types::{address_from_db, address_to_db};
use super::{CheckpointRecord, Storage};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use evidence_core::CheckpointStatus;
use sqlx::Row;

impl Storage {
    /// Get the checkpoint for a contract.
    pub async fn get_checkpoint(&self, contract_address: &Address) -> Result<Option<CheckpointRecord>> {
        let row = sqlx::query(
            r#"
            SELECT contract_address, last_block_number, status, last_sync_at,
                   error_message, retry_count
            FROM sync_checkpoints
            WHERE contract_address = ?
            "#,
        )
        .bind(address_to_db(contract_address))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch sync checkpoint")?;

        row.map(Self::row_to_checkpoint).transpose()
    }

    /// Get the checkpoint for a contract, creating it at block 0 if missing.
    pub async fn get_or_create_checkpoint(&self, contract_address: &Address) -> Result<CheckpointRecord> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO sync_checkpoints (
                contract_address, last_block_number, status, last_sync_at, retry_count
            )
            VALUES (?, 0, ?, ?, 0)
            "#,
        )
        .bind(address_to_db(contract_address))
        .bind(CheckpointStatus::Synced.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create sync checkpoint")?;

        self.get_checkpoint(contract_address)
            .await?
            .context("Sync checkpoint missing after create")
    }

    /// Move the checkpoint forward to `block_number`.
    ///
    /// The stored block never decreases here; a lower value only refreshes
    /// the status. Error state is cleared.
    pub async fn advance_checkpoint(
        &self,
        contract_address: &Address,
        block_number: u64,
    ) -> Result<CheckpointRecord> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (
                contract_address, last_block_number, status, last_sync_at, retry_count
            )
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(contract_address) DO UPDATE SET
                last_block_number = MAX(last_block_number, excluded.last_block_number),
                status = excluded.status,
                last_sync_at = excluded.last_sync_at,
                error_message = NULL,
                retry_count = 0
            "#,
        )
        .bind(address_to_db(contract_address))
        .bind(block_number as i64)
        .bind(CheckpointStatus::Synced.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to advance sync checkpoint")?;

        self.get_checkpoint(contract_address)
            .await?
            .context("Sync checkpoint missing after advance")
    }

    /// Set the checkpoint to `block_number`, moving backwards if needed.
    pub async fn reset_checkpoint(
        &self,
        contract_address: &Address,
        block_number: u64,
    ) -> Result<CheckpointRecord> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (
                contract_address, last_block_number, status, last_sync_at, retry_count
            )
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(contract_address) DO UPDATE SET
                last_block_number = excluded.last_block_number,
                status = excluded.status,
                last_sync_at = excluded.last_sync_at,
                error_message = NULL,
                retry_count = 0
            "#,
        )
        .bind(address_to_db(contract_address))
        .bind(block_number as i64)
        .bind(CheckpointStatus::Reset.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to reset sync checkpoint")?;

        self.get_checkpoint(contract_address)
            .await?
            .context("Sync checkpoint missing after reset")
    }

    /// Record a failure against the checkpoint without moving it.
    pub async fn mark_checkpoint_error(
        &self,
        contract_address: &Address,
        message: &str,
    ) -> Result<CheckpointRecord> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (
                contract_address, last_block_number, status, last_sync_at,
                error_message, retry_count
            )
            VALUES (?, 0, ?, ?, ?, 1)
            ON CONFLICT(contract_address) DO UPDATE SET
                status = excluded.status,
                last_sync_at = excluded.last_sync_at,
                error_message = excluded.error_message,
                retry_count = retry_count + 1
            "#,
        )
        .bind(address_to_db(contract_address))
        .bind(CheckpointStatus::Error.as_str())
        .bind(now)
        .bind(message)
        .execute(&self.pool)
        .await
        .context("Failed to mark sync checkpoint error")?;

        self.get_checkpoint(contract_address)
            .await?
            .context("Sync checkpoint missing after error")
    }

    fn row_to_checkpoint(row: sqlx::sqlite::SqliteRow) -> Result<CheckpointRecord> {
        let status: String = row.get("status");
        Ok(CheckpointRecord {
            contract_address: address_from_db(row.get("contract_address"))?,
            last_block_number: row.get::<i64, _>("last_block_number") as u64,
            status: status
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid stored checkpoint status: {}", e))?,
            last_sync_at: row.get("last_sync_at"),
            error_message: row.get("error_message"),
            retry_count: row.get::<i64, _>("retry_count") as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_storage;

    #[tokio::test]
    async fn test_get_or_create_starts_at_zero() {
        let (storage, _temp_db) = temp_storage().await;
        let contract = Address::repeat_byte(0xee);

        assert!(storage.get_checkpoint(&contract).await.unwrap().is_none());

        let checkpoint = storage.get_or_create_checkpoint(&contract).await.unwrap();
        assert_eq!(checkpoint.last_block_number, 0);
        assert_eq!(checkpoint.status, CheckpointStatus::Synced);

        storage.advance_checkpoint(&contract, 7).await.unwrap();
        let again = storage.get_or_create_checkpoint(&contract).await.unwrap();
        assert_eq!(again.last_block_number, 7);
    }

    #[tokio::test]
    async fn test_advance_never_moves_backwards() {
        let (storage, _temp_db) = temp_storage().await;
        let contract = Address::repeat_byte(0xee);

        storage.advance_checkpoint(&contract, 500).await.unwrap();
        let checkpoint = storage.advance_checkpoint(&contract, 300).await.unwrap();
        assert_eq!(checkpoint.last_block_number, 500);
    }

    #[tokio::test]
    async fn test_reset_rewinds() {
        let (storage, _temp_db) = temp_storage().await;
        let contract = Address::repeat_byte(0xee);

        storage.advance_checkpoint(&contract, 500).await.unwrap();
        let checkpoint = storage.reset_checkpoint(&contract, 100).await.unwrap();
        assert_eq!(checkpoint.last_block_number, 100);
        assert_eq!(checkpoint.status, CheckpointStatus::Reset);
    }

    #[tokio::test]
    async fn test_error_then_advance_clears_error() {
        let (storage, _temp_db) = temp_storage().await;
        let contract = Address::repeat_byte(0xee);

        storage.advance_checkpoint(&contract, 42).await.unwrap();
        storage.mark_checkpoint_error(&contract, "rpc down").await.unwrap();
        let failed = storage.mark_checkpoint_error(&contract, "still down").await.unwrap();

        assert_eq!(failed.status, CheckpointStatus::Error);
        assert_eq!(failed.retry_count, 2);
        assert_eq!(failed.last_block_number, 42);
        assert_eq!(failed.error_message.as_deref(), Some("still down"));

        let recovered = storage.advance_checkpoint(&contract, 43).await.unwrap();
        assert_eq!(recovered.status, CheckpointStatus::Synced);
        assert_eq!(recovered.retry_count, 0);
        assert!(recovered.error_message.is_none());
    }

    #[tokio::test]
    async fn test_checkpoints_are_per_contract() {
        let (storage, _temp_db) = temp_storage().await;
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);

        storage.advance_checkpoint(&a, 10).await.unwrap();
        storage.advance_checkpoint(&b, 20).await.unwrap();

        assert_eq!(storage.get_checkpoint(&a).await.unwrap().unwrap().last_block_number, 10);
        assert_eq!(storage.get_checkpoint(&b).await.unwrap().unwrap().last_block_number, 20);
    }
}
