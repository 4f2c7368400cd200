//! The single ingestion path shared by historical sync, live streams and the
//! unprocessed sweep.
//!
//! ```text
//! ledger log ──► EventStore::save (dedup) ──► ProcessorRegistry::dispatch ──► evidence
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};
use crate::event_store::EventStore;
use crate::ledger::{LedgerClient, LedgerEvent};
use crate::processor::{DispatchOutcome, ProcessorRegistry};

/// What happened to one event on its way through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored (or found unprocessed) and processed.
    Processed,
    /// Stored, processing failed; the sweep will retry it.
    Failed,
    /// Already stored and processed.
    Duplicate,
    /// Stored, no processor for its type.
    Unhandled,
}

/// Counters for a block range or a sweep page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Events handed to the pipeline
    pub events: u64,
    /// Events processed successfully
    pub processed: u64,
    /// Events whose processing failed
    pub failed: u64,
    /// Events already stored and processed
    pub duplicates: u64,
    /// Events without a processor
    pub unhandled: u64,
}

impl IngestReport {
    fn record(&mut self, outcome: IngestOutcome) {
        self.events += 1;
        match outcome {
            IngestOutcome::Processed => self.processed += 1,
            IngestOutcome::Failed => self.failed += 1,
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::Unhandled => self.unhandled += 1,
        }
    }

    /// Add another report's counters to this one.
    pub fn merge(&mut self, other: &IngestReport) {
        self.events += other.events;
        self.processed += other.processed;
        self.failed += other.failed;
        self.duplicates += other.duplicates;
        self.unhandled += other.unhandled;
    }
}

/// Ingestion pipeline for one contract.
#[derive(Clone)]
pub struct IngestPipeline {
    ledger: Arc<dyn LedgerClient>,
    store: EventStore,
    registry: Arc<ProcessorRegistry>,
    contract: Address,
}

impl IngestPipeline {
    /// Assemble the pipeline.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: EventStore,
        registry: Arc<ProcessorRegistry>,
        contract: Address,
    ) -> Self {
        Self {
            ledger,
            store,
            registry,
            contract,
        }
    }

    /// Processor registry.
    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    /// Event store.
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Contract whose events are ingested.
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Ingest every contract event in `[from_block, to_block]`.
    ///
    /// Logs found in the range are expanded to every event of interest in
    /// their transaction's receipt, then handled in `(block, log index)`
    /// order. Ledger and store failures abort the range so the caller can
    /// retry it; processing failures are only counted.
    pub async fn ingest_range(&self, from_block: u64, to_block: u64) -> Result<IngestReport> {
        let logs = self
            .ledger
            .logs_in_range(self.contract, None, from_block, to_block)
            .await?;

        let mut report = IngestReport::default();
        if logs.is_empty() {
            return Ok(report);
        }

        let events = self.expand_receipts(&logs).await?;
        debug!(
            from_block,
            to_block,
            logs = logs.len(),
            events = events.len(),
            "Resolved receipts for range"
        );

        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        for event in &events {
            let timestamp = match timestamps.get(&event.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self.ledger.block_timestamp(event.block_number).await?;
                    timestamps.insert(event.block_number, ts);
                    ts
                }
            };
            let outcome = self.ingest_event(event, timestamp).await?;
            report.record(outcome);
        }

        Ok(report)
    }

    /// Ingest one event delivered by a live stream.
    pub async fn ingest_live(&self, event: &LedgerEvent) -> Result<IngestOutcome> {
        let timestamp = self.ledger.block_timestamp(event.block_number).await?;
        self.ingest_event(event, timestamp).await
    }

    /// Store `event` and, unless it was already processed, dispatch it.
    pub async fn ingest_event(&self, event: &LedgerEvent, block_timestamp: u64) -> Result<IngestOutcome> {
        let saved = self.store.save_ledger_event(event, block_timestamp).await?;
        if !saved.inserted && saved.event.processed {
            return Ok(IngestOutcome::Duplicate);
        }

        match self.registry.dispatch(&saved.event).await {
            Ok(DispatchOutcome::Processed) => Ok(IngestOutcome::Processed),
            Ok(DispatchOutcome::AlreadyProcessed) => Ok(IngestOutcome::Duplicate),
            Ok(DispatchOutcome::Unhandled) => Ok(IngestOutcome::Unhandled),
            Err(DispatchError::Processing(_)) => Ok(IngestOutcome::Failed),
            Err(DispatchError::Ingestion(err)) => Err(err),
        }
    }

    /// Dispatch up to `page_size` stored unprocessed events, least-failed
    /// first so events that keep failing do not starve newer ones.
    pub async fn process_unprocessed(&self, page_size: u32) -> Result<IngestReport> {
        let events = self.store.find_unprocessed(page_size, 0).await?;
        let mut report = IngestReport::default();

        for event in &events {
            let outcome = match self.registry.dispatch(event).await {
                Ok(DispatchOutcome::Processed) => IngestOutcome::Processed,
                Ok(DispatchOutcome::AlreadyProcessed) => IngestOutcome::Duplicate,
                Ok(DispatchOutcome::Unhandled) => IngestOutcome::Unhandled,
                Err(DispatchError::Processing(_)) => IngestOutcome::Failed,
                Err(DispatchError::Ingestion(err)) => {
                    warn!(id = event.id, error = %err, "Failed to record dispatch outcome");
                    IngestOutcome::Failed
                }
            };
            report.record(outcome);
        }

        if report.events > 0 {
            info!(
                events = report.events,
                processed = report.processed,
                failed = report.failed,
                "Processed stored unprocessed events"
            );
        }
        Ok(report)
    }

    /// Every event of interest in the receipts of the transactions behind
    /// `logs`, in chain order without repeats.
    async fn expand_receipts(&self, logs: &[LedgerEvent]) -> Result<Vec<LedgerEvent>> {
        let mut seen_tx: HashSet<B256> = HashSet::new();
        let mut seen_position: HashSet<(B256, u64)> = HashSet::new();
        let mut events = Vec::with_capacity(logs.len());

        for log in logs {
            if !seen_tx.insert(log.tx_hash) {
                continue;
            }
            for event in self.ledger.receipt_events(self.contract, log.tx_hash).await? {
                if seen_position.insert((event.tx_hash, event.log_index)) {
                    events.push(event);
                }
            }
        }

        events.sort_by_key(LedgerEvent::position);
        Ok(events)
    }
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("contract", &self.contract)
            .field("registry", &self.registry)
            .finish()
    }
}
