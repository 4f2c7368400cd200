//! Resume point of the sync engine for one contract.

use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{info, warn};

use crate::error::Result;
use crate::ledger::LedgerClient;
use crate::retry::RetryExecutor;
use crate::storage::{CheckpointRecord, Storage};

/// Checkpoint service bound to one contract address.
#[derive(Clone)]
pub struct SyncCheckpoint {
    storage: Storage,
    ledger: Arc<dyn LedgerClient>,
    retry: RetryExecutor,
    contract: Address,
    historical_sync_threshold: u64,
    max_blocks_behind: u64,
}

impl SyncCheckpoint {
    /// Create the service. `retry` should be shared with the [`EventStore`]
    /// so writes to both serialize.
    ///
    /// [`EventStore`]: crate::event_store::EventStore
    pub fn new(
        storage: Storage,
        ledger: Arc<dyn LedgerClient>,
        retry: RetryExecutor,
        contract: Address,
    ) -> Self {
        Self {
            storage,
            ledger,
            retry,
            contract,
            historical_sync_threshold: evidence_core::DEFAULT_HISTORICAL_SYNC_THRESHOLD,
            max_blocks_behind: 100,
        }
    }

    /// Blocks behind the head above which a historical sync is needed.
    pub fn with_historical_sync_threshold(mut self, threshold: u64) -> Self {
        self.historical_sync_threshold = threshold;
        self
    }

    /// Blocks behind the head above which the projection is considered stale.
    pub fn with_max_blocks_behind(mut self, max_blocks_behind: u64) -> Self {
        self.max_blocks_behind = max_blocks_behind;
        self
    }

    /// Contract this checkpoint tracks.
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Current checkpoint, created at block 0 on first access.
    pub async fn get_or_create(&self) -> Result<CheckpointRecord> {
        self.retry
            .execute_locked("get_or_create_checkpoint", || {
                self.storage.get_or_create_checkpoint(&self.contract)
            })
            .await
    }

    /// Last fully scanned block.
    pub async fn last_synced(&self) -> Result<u64> {
        Ok(self.get_or_create().await?.last_block_number)
    }

    /// Record that every block up to `block_number` has been scanned.
    pub async fn advance(&self, block_number: u64) -> Result<CheckpointRecord> {
        let record = self
            .retry
            .execute_locked("advance_checkpoint", || {
                self.storage.advance_checkpoint(&self.contract, block_number)
            })
            .await?;

        if record.last_block_number > block_number {
            warn!(
                requested = block_number,
                current = record.last_block_number,
                "Checkpoint already past requested block, not moving backwards"
            );
        }
        Ok(record)
    }

    /// Overwrite the checkpoint, rewinding if `block_number` is lower.
    pub async fn reset(&self, block_number: u64) -> Result<CheckpointRecord> {
        info!(contract = %self.contract, block = block_number, "Resetting sync checkpoint");
        self.retry
            .execute_locked("reset_checkpoint", || {
                self.storage.reset_checkpoint(&self.contract, block_number)
            })
            .await
    }

    /// Record a failure without moving the checkpoint.
    pub async fn mark_error(&self, message: &str) -> Result<CheckpointRecord> {
        self.retry
            .execute_locked("mark_checkpoint_error", || {
                self.storage.mark_checkpoint_error(&self.contract, message)
            })
            .await
    }

    /// Chain head minus the last synced block, floored at 0.
    pub async fn blocks_behind(&self) -> Result<u64> {
        let head = self.ledger.current_block_height().await?;
        let last = self.last_synced().await?;
        Ok(head.saturating_sub(last))
    }

    /// Whether the gap to the head is wide enough for a batch replay.
    pub async fn needs_historical_sync(&self) -> Result<bool> {
        Ok(self.blocks_behind().await? > self.historical_sync_threshold)
    }

    /// Share of the chain covered, in `[0, 100]`.
    pub async fn sync_progress_percentage(&self) -> Result<f64> {
        let head = self.ledger.current_block_height().await?;
        let last = self.last_synced().await?;
        Ok(progress_percentage(last, head))
    }

    /// `false` when the checkpoint lags the head by more than the configured
    /// maximum.
    pub async fn validate_consistency(&self) -> Result<bool> {
        let behind = self.blocks_behind().await?;
        if behind > self.max_blocks_behind {
            warn!(
                blocks_behind = behind,
                max_blocks_behind = self.max_blocks_behind,
                "Sync checkpoint is lagging"
            );
            return Ok(false);
        }
        Ok(true)
    }
}

impl std::fmt::Debug for SyncCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCheckpoint")
            .field("contract", &self.contract)
            .field("historical_sync_threshold", &self.historical_sync_threshold)
            .field("max_blocks_behind", &self.max_blocks_behind)
            .finish()
    }
}

pub(crate) fn progress_percentage(last_synced: u64, head: u64) -> f64 {
    if head == 0 {
        return 0.0;
    }
    (last_synced as f64 / head as f64 * 100.0).clamp(0.0, 100.0)
}
