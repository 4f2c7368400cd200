//! Deduplicating store for raw contract events.
//!
//! Every write goes through the shared locked [`RetryExecutor`], so writers
//! from the historical sync, the live streams and the sweep never interleave
//! inside a retry loop.

use alloy::primitives::{Address, B256};
use tracing::debug;

use crate::error::{IngestionError, Result};
use crate::ledger::LedgerEvent;
use crate::retry::RetryExecutor;
use crate::storage::{NewRawEvent, RawEvent, SavedEvent, Storage};

/// Raw event persistence with processing state.
#[derive(Debug, Clone)]
pub struct EventStore {
    storage: Storage,
    retry: RetryExecutor,
}

impl EventStore {
    /// Create a store. `retry` should be shared with the checkpoint service
    /// so their writes serialize on the same lock.
    pub fn new(storage: Storage, retry: RetryExecutor) -> Self {
        Self { storage, retry }
    }

    /// Underlying storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Persist an event, or return the existing row for its dedup key.
    pub async fn save(&self, event: &NewRawEvent) -> Result<SavedEvent> {
        let saved = self
            .retry
            .execute_locked("save_event", || self.storage.insert_raw_event(event))
            .await?;

        if saved.inserted {
            debug!(
                id = saved.event.id,
                event_type = %event.kind,
                block = event.block_number,
                "Stored raw event"
            );
        } else {
            debug!(
                id = saved.event.id,
                event_type = %event.kind,
                block = event.block_number,
                "Raw event already stored"
            );
        }
        Ok(saved)
    }

    /// Build the storage row for a decoded ledger event and save it.
    pub async fn save_ledger_event(
        &self,
        event: &LedgerEvent,
        block_timestamp: u64,
    ) -> Result<SavedEvent> {
        let payload = event.payload.encode().map_err(IngestionError::store)?;
        self.save(&NewRawEvent {
            contract_address: event.contract_address,
            kind: event.kind(),
            block_number: event.block_number,
            tx_hash: event.tx_hash,
            log_index: event.log_index,
            block_timestamp,
            payload,
        })
        .await
    }

    /// One page of unprocessed events, least-failed first, then chain order.
    pub async fn find_unprocessed(&self, limit: u32, offset: u32) -> Result<Vec<RawEvent>> {
        self.storage
            .find_unprocessed_raw_events(limit, offset)
            .await
            .map_err(IngestionError::store)
    }

    /// Flag an event processed and clear its failure count.
    pub async fn mark_processed(&self, id: i64) -> Result<()> {
        let rows = self
            .retry
            .execute_locked("mark_processed", || self.storage.mark_raw_event_processed(id))
            .await?;
        if rows == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    /// Record one failed processing attempt.
    pub async fn increment_failure(&self, id: i64) -> Result<()> {
        let rows = self
            .retry
            .execute_locked("increment_failure", || {
                self.storage.increment_raw_event_failure(id)
            })
            .await?;
        if rows == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    /// Unprocessed events, optionally of one type.
    pub async fn count_unprocessed(&self, event_type: Option<&str>) -> Result<u64> {
        self.storage
            .count_unprocessed_raw_events(event_type)
            .await
            .map_err(IngestionError::store)
    }

    /// Remove events stored before `timestamp` (unix seconds).
    pub async fn delete_older_than(&self, timestamp: i64) -> Result<u64> {
        self.retry
            .execute_locked("delete_older_than", || {
                self.storage.delete_raw_events_older_than(timestamp)
            })
            .await
    }

    /// Remove events from blocks below `block_number`.
    pub async fn delete_before_block(&self, block_number: u64) -> Result<u64> {
        self.retry
            .execute_locked("delete_before_block", || {
                self.storage.delete_raw_events_before_block(block_number)
            })
            .await
    }

    /// Events emitted by one transaction.
    pub async fn find_by_tx_hash(&self, tx_hash: &B256) -> Result<Vec<RawEvent>> {
        self.storage
            .find_raw_events_by_tx_hash(tx_hash)
            .await
            .map_err(IngestionError::store)
    }

    /// Whether the dedup key is already stored.
    pub async fn event_exists(
        &self,
        contract_address: &Address,
        block_number: u64,
        tx_hash: &B256,
        event_type: &str,
    ) -> Result<bool> {
        self.storage
            .raw_event_exists(contract_address, block_number, tx_hash, event_type)
            .await
            .map_err(IngestionError::store)
    }

    /// Failure count of an event.
    pub async fn failure_count(&self, id: i64) -> Result<u32> {
        self.storage
            .raw_event_failure_count(id)
            .await
            .map_err(IngestionError::store)?
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: i64) -> IngestionError {
    IngestionError::NotFound {
        entity: "raw event",
        id: id.to_string(),
    }
}
