//! Event processors and the dispatch registry.
//!
//! A processor turns one stored raw event into a mutation of the evidence
//! projection. The registry holds one processor per [`EventKind`], ordered by
//! priority, and owns the bookkeeping around a processing attempt: success
//! marks the row processed, failure bumps its failure count.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use evidence_core::EventKind;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, EventProcessingError};
use crate::event_store::EventStore;
use crate::ledger::{EventPayload, LedgerClient};
use crate::retry::RetryExecutor;
use crate::storage::{RawEvent, Storage};

pub mod revoked;
pub mod status_changed;
pub mod submitted;

pub use revoked::RevokedProcessor;
pub use status_changed::StatusChangedProcessor;
pub use submitted::SubmittedProcessor;

/// Handles every stored event of one kind.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Event kind handled.
    fn kind(&self) -> EventKind;

    /// Dispatch priority; lower runs first.
    fn priority(&self) -> u8 {
        self.kind().priority()
    }

    /// One-line description for logs and status output.
    fn description(&self) -> &'static str;

    /// Whether this processor accepts `event`.
    fn can_process(&self, event: &RawEvent) -> bool {
        event.event_type == self.kind().as_str()
    }

    /// Apply the event to the evidence projection.
    async fn process(&self, event: &RawEvent) -> Result<(), EventProcessingError>;

    /// Called once before the first event.
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the coordinator stops.
    async fn shutdown(&self) {}

    /// Liveness as seen by the health check.
    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Dependencies shared by the built-in processors.
#[derive(Clone)]
pub struct ProcessorContext {
    /// Evidence projection store
    pub storage: Storage,
    /// Source of canonical evidence data
    pub ledger: Arc<dyn LedgerClient>,
    /// Executor for transactional writes
    pub retry: RetryExecutor,
    /// Evidence contract
    pub contract: Address,
}

/// Decode a stored payload, checking it carries the expected kind.
pub(crate) fn decode_payload(
    kind: EventKind,
    event: &RawEvent,
) -> Result<EventPayload, EventProcessingError> {
    let payload = EventPayload::decode(&event.payload).map_err(|e| {
        EventProcessingError::permanent(kind, "", format!("event {}: {}", event.id, e))
    })?;

    if payload.kind() != kind {
        return Err(EventProcessingError::permanent(
            kind,
            payload.evidence_id(),
            format!(
                "event {} is stored as {} but carries a {} payload",
                event.id,
                event.event_type,
                payload.kind()
            ),
        ));
    }
    Ok(payload)
}

pub(crate) fn unexpected_payload(payload: &EventPayload) -> EventProcessingError {
    EventProcessingError::permanent(
        payload.kind(),
        payload.evidence_id(),
        "payload does not match the processor",
    )
}

/// What [`ProcessorRegistry::dispatch`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Processed and marked.
    Processed,
    /// Already marked processed, left alone.
    AlreadyProcessed,
    /// No processor is registered for the event type.
    Unhandled,
}

/// Counters kept by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events processed successfully
    pub processed: u64,
    /// Failed processing attempts
    pub failed: u64,
    /// Unix time of the last successful dispatch
    pub last_processed_at: Option<i64>,
}

/// Routes stored events to their processor.
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn EventProcessor>>,
    store: EventStore,
    processed: AtomicU64,
    failed: AtomicU64,
    last_processed_at: AtomicI64,
}

impl ProcessorRegistry {
    /// Empty registry.
    pub fn new(store: EventStore) -> Self {
        Self {
            processors: Vec::new(),
            store,
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_processed_at: AtomicI64::new(0),
        }
    }

    /// Registry with the submitted, status-changed and revoked processors.
    pub fn with_default_processors(store: EventStore, ctx: ProcessorContext) -> Self {
        let mut registry = Self::new(store);
        registry.register(Arc::new(SubmittedProcessor::new(ctx.clone())));
        registry.register(Arc::new(StatusChangedProcessor::new(ctx.clone())));
        registry.register(Arc::new(RevokedProcessor::new(ctx)));
        registry
    }

    /// Add a processor, replacing any previous one for the same kind.
    pub fn register(&mut self, processor: Arc<dyn EventProcessor>) {
        let kind = processor.kind();
        if let Some(pos) = self.processors.iter().position(|p| p.kind() == kind) {
            warn!(event_type = %kind, "Replacing registered processor");
            self.processors.remove(pos);
        }
        self.processors.push(processor);
        self.processors.sort_by_key(|p| p.priority());
    }

    /// Registered processors in priority order.
    pub fn processors(&self) -> &[Arc<dyn EventProcessor>] {
        &self.processors
    }

    /// Store used for bookkeeping.
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Processor accepting `event`, if any.
    pub fn find(&self, event: &RawEvent) -> Option<&Arc<dyn EventProcessor>> {
        self.processors.iter().find(|p| p.can_process(event))
    }

    /// Process one stored event and record the outcome on its row.
    ///
    /// A processing failure increments the failure count and is returned; the
    /// caller decides whether to carry on.
    pub async fn dispatch(&self, event: &RawEvent) -> Result<DispatchOutcome, DispatchError> {
        if event.processed {
            return Ok(DispatchOutcome::AlreadyProcessed);
        }

        let Some(processor) = self.find(event) else {
            warn!(
                id = event.id,
                event_type = %event.event_type,
                "No processor registered for event type"
            );
            return Ok(DispatchOutcome::Unhandled);
        };

        match processor.process(event).await {
            Ok(()) => {
                self.store.mark_processed(event.id).await?;
                self.processed.fetch_add(1, Ordering::Relaxed);
                self.last_processed_at
                    .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
                debug!(id = event.id, event_type = %event.event_type, "Event processed");
                Ok(DispatchOutcome::Processed)
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                if err.retryable {
                    warn!(id = event.id, error = %err, "Event processing failed, will retry");
                } else {
                    error!(id = event.id, error = %err, "Event processing failed");
                }
                self.store.increment_failure(event.id).await?;
                Err(err.into())
            }
        }
    }

    /// Run every processor's `initialize` hook.
    pub async fn initialize_all(&self) -> anyhow::Result<()> {
        for processor in &self.processors {
            processor.initialize().await?;
            info!(
                event_type = %processor.kind(),
                priority = processor.priority(),
                "{}",
                processor.description()
            );
        }
        Ok(())
    }

    /// Run every processor's `shutdown` hook.
    pub async fn shutdown_all(&self) {
        for processor in &self.processors {
            processor.shutdown().await;
        }
    }

    /// Health of each processor.
    pub async fn health(&self) -> Vec<(EventKind, bool)> {
        let mut health = Vec::with_capacity(self.processors.len());
        for processor in &self.processors {
            health.push((processor.kind(), processor.is_healthy().await));
        }
        health
    }

    /// Counters since start.
    pub fn stats(&self) -> DispatchStats {
        let last = self.last_processed_at.load(Ordering::Relaxed);
        DispatchStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_processed_at: (last != 0).then_some(last),
        }
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<EventKind> = self.processors.iter().map(|p| p.kind()).collect();
        f.debug_struct("ProcessorRegistry")
            .field("processors", &kinds)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::ledger::events::RevokedPayload;
    use crate::ledger::LedgerEvent;
    use crate::storage::test_support::temp_storage;
    use alloy::primitives::B256;
    use std::sync::atomic::AtomicU32;

    struct Scripted {
        kind: EventKind,
        fail: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventProcessor for Scripted {
        fn kind(&self) -> EventKind {
            self.kind
        }

        fn description(&self) -> &'static str {
            "scripted"
        }

        async fn process(&self, _event: &RawEvent) -> Result<(), EventProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EventProcessingError::permanent(self.kind, "EVID-1", "nope"));
            }
            Ok(())
        }
    }

    fn scripted(kind: EventKind, fail: bool) -> Arc<Scripted> {
        Arc::new(Scripted {
            kind,
            fail,
            calls: AtomicU32::new(0),
        })
    }

    async fn stored_revoked(store: &EventStore) -> RawEvent {
        let event = LedgerEvent {
            contract_address: Address::repeat_byte(0xee),
            block_number: 4,
            tx_hash: B256::repeat_byte(0x04),
            log_index: 0,
            payload: EventPayload::EvidenceRevoked(RevokedPayload {
                evidence_id: "EVID-1".to_string(),
                revoker: "0x1111111111111111111111111111111111111111".to_string(),
                timestamp: 0,
            }),
        };
        store.save_ledger_event(&event, 0).await.unwrap().event
    }

    #[tokio::test]
    async fn test_success_marks_processed() {
        let (storage, _temp_db) = temp_storage().await;
        let store = EventStore::new(storage, RetryExecutor::new(RetryConfig::default()));
        let processor = scripted(EventKind::EvidenceRevoked, false);
        let mut registry = ProcessorRegistry::new(store.clone());
        registry.register(processor.clone());

        let event = stored_revoked(&store).await;
        let outcome = registry.dispatch(&event).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Processed);
        assert_eq!(store.count_unprocessed(None).await.unwrap(), 0);
        assert_eq!(registry.stats().processed, 1);
        assert!(registry.stats().last_processed_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_increments_and_propagates() {
        let (storage, _temp_db) = temp_storage().await;
        let store = EventStore::new(storage, RetryExecutor::new(RetryConfig::default()));
        let mut registry = ProcessorRegistry::new(store.clone());
        registry.register(scripted(EventKind::EvidenceRevoked, true));

        let event = stored_revoked(&store).await;
        let err = registry.dispatch(&event).await.unwrap_err();

        assert!(matches!(err, DispatchError::Processing(ref e) if !e.retryable));
        assert_eq!(store.failure_count(event.id).await.unwrap(), 1);
        assert_eq!(store.count_unprocessed(None).await.unwrap(), 1);
        assert_eq!(registry.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_unhandled_type_is_skipped() {
        let (storage, _temp_db) = temp_storage().await;
        let store = EventStore::new(storage, RetryExecutor::new(RetryConfig::default()));
        let submitted = scripted(EventKind::EvidenceSubmitted, false);
        let mut registry = ProcessorRegistry::new(store.clone());
        registry.register(submitted.clone());

        let event = stored_revoked(&store).await;
        assert_eq!(
            registry.dispatch(&event).await.unwrap(),
            DispatchOutcome::Unhandled
        );
        assert_eq!(submitted.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.failure_count(event.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_orders_by_priority_and_replaces() {
        let (storage, _temp_db) = temp_storage().await;
        let store = EventStore::new(storage, RetryExecutor::new(RetryConfig::default()));
        let mut registry = ProcessorRegistry::new(store);

        registry.register(scripted(EventKind::EvidenceRevoked, false));
        registry.register(scripted(EventKind::EvidenceSubmitted, false));
        registry.register(scripted(EventKind::EvidenceStatusChanged, false));
        registry.register(scripted(EventKind::EvidenceSubmitted, true));

        let kinds: Vec<EventKind> = registry.processors().iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, EventKind::ALL.to_vec());
    }

    #[test]
    fn test_decode_payload_rejects_kind_mismatch() {
        let payload = EventPayload::EvidenceRevoked(RevokedPayload {
            evidence_id: "EVID-9".to_string(),
            revoker: "0x1111111111111111111111111111111111111111".to_string(),
            timestamp: 0,
        });
        let event = RawEvent {
            id: 1,
            contract_address: Address::ZERO,
            event_type: "EvidenceSubmitted".to_string(),
            block_number: 0,
            tx_hash: B256::ZERO,
            log_index: 0,
            block_timestamp: 0,
            payload: payload.encode().unwrap(),
            processed: false,
            failure_count: 0,
            created_at: 0,
            processed_at: None,
        };

        let err = decode_payload(EventKind::EvidenceSubmitted, &event).unwrap_err();
        assert!(!err.retryable);
        assert_eq!(err.evidence_id, "EVID-9");

        let garbage = RawEvent {
            payload: "not json".to_string(),
            ..event
        };
        assert!(decode_payload(EventKind::EvidenceSubmitted, &garbage).is_err());
    }
}
