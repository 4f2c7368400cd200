//! In-memory ledger with scripted failures.
//!
//! Behaves like a node that has already mined every event it was given:
//! range queries, receipts and evidence lookups are answered from memory.
//! Each call family can be told to fail its next `n` invocations, which is
//! how the retry and resubscribe paths are exercised without a network.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use evidence_core::EventKind;

use super::contract::CanonicalEvidence;
use super::events::LedgerEvent;
use super::{LedgerClient, LedgerResult};
use crate::error::LedgerError;

/// Base timestamp for blocks without an explicit one.
const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

#[derive(Debug, Default)]
struct Failures {
    height: u32,
    logs: u32,
    receipts: u32,
    evidence: u32,
}

#[derive(Debug, Default)]
struct State {
    height: u64,
    events: Vec<LedgerEvent>,
    evidence: HashMap<String, CanonicalEvidence>,
    timestamps: HashMap<u64, u64>,
    failures: Failures,
    log_calls: Vec<(Option<EventKind>, u64, u64)>,
    receipt_calls: u64,
}

/// Scripted [`LedgerClient`].
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    /// Empty chain at height 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move the chain head.
    pub fn set_height(&self, height: u64) {
        self.state().height = height;
    }

    /// Append an event. The head moves up to its block if needed.
    pub fn push_event(&self, event: LedgerEvent) {
        let mut state = self.state();
        state.height = state.height.max(event.block_number);
        state.events.push(event);
    }

    /// Make `get_evidence` return this record.
    pub fn put_evidence(&self, evidence: CanonicalEvidence) {
        self.state()
            .evidence
            .insert(evidence.evidence_id.clone(), evidence);
    }

    /// Override a block's timestamp.
    pub fn set_block_timestamp(&self, block_number: u64, timestamp: u64) {
        self.state().timestamps.insert(block_number, timestamp);
    }

    /// Fail the next `n` height queries.
    pub fn fail_next_height(&self, n: u32) {
        self.state().failures.height = n;
    }

    /// Fail the next `n` range queries.
    pub fn fail_next_logs(&self, n: u32) {
        self.state().failures.logs = n;
    }

    /// Fail the next `n` receipt lookups.
    pub fn fail_next_receipts(&self, n: u32) {
        self.state().failures.receipts = n;
    }

    /// Fail the next `n` evidence lookups.
    pub fn fail_next_evidence(&self, n: u32) {
        self.state().failures.evidence = n;
    }

    /// Every `(kind, from, to)` passed to `logs_in_range`, in call order.
    pub fn log_calls(&self) -> Vec<(Option<EventKind>, u64, u64)> {
        self.state().log_calls.clone()
    }

    /// Number of receipt lookups served.
    pub fn receipt_calls(&self) -> u64 {
        self.state().receipt_calls
    }
}

fn take_failure(counter: &mut u32, what: &str) -> LedgerResult<()> {
    if *counter > 0 {
        *counter -= 1;
        return Err(LedgerError::Rpc(format!("scripted {what} failure")));
    }
    Ok(())
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn current_block_height(&self) -> LedgerResult<u64> {
        let mut state = self.state();
        take_failure(&mut state.failures.height, "height")?;
        Ok(state.height)
    }

    async fn logs_in_range(
        &self,
        contract: Address,
        kind: Option<EventKind>,
        from_block: u64,
        to_block: u64,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        let mut state = self.state();
        state.log_calls.push((kind, from_block, to_block));
        take_failure(&mut state.failures.logs, "logs")?;

        let mut events: Vec<LedgerEvent> = state
            .events
            .iter()
            .filter(|e| e.contract_address == contract)
            .filter(|e| (from_block..=to_block).contains(&e.block_number))
            .filter(|e| kind.map_or(true, |k| e.kind() == k))
            .cloned()
            .collect();
        events.sort_by_key(LedgerEvent::position);
        Ok(events)
    }

    async fn receipt_events(
        &self,
        contract: Address,
        tx_hash: B256,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        let mut state = self.state();
        state.receipt_calls += 1;
        take_failure(&mut state.failures.receipts, "receipt")?;

        let mut events: Vec<LedgerEvent> = state
            .events
            .iter()
            .filter(|e| e.tx_hash == tx_hash && e.contract_address == contract)
            .cloned()
            .collect();
        if events.is_empty() && !state.events.iter().any(|e| e.tx_hash == tx_hash) {
            return Err(LedgerError::ReceiptNotFound(format!("{tx_hash:#x}")));
        }
        events.sort_by_key(LedgerEvent::position);
        Ok(events)
    }

    async fn block_timestamp(&self, block_number: u64) -> LedgerResult<u64> {
        let state = self.state();
        if block_number > state.height {
            return Err(LedgerError::BlockNotFound(block_number));
        }
        Ok(state
            .timestamps
            .get(&block_number)
            .copied()
            .unwrap_or(GENESIS_TIMESTAMP + block_number * 12))
    }

    async fn get_evidence(
        &self,
        _contract: Address,
        evidence_id: &str,
    ) -> LedgerResult<Option<CanonicalEvidence>> {
        let mut state = self.state();
        take_failure(&mut state.failures.evidence, "evidence")?;
        Ok(state.evidence.get(evidence_id).cloned())
    }
}
