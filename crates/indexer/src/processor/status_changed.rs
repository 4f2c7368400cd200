//! `EvidenceStatusChanged` processor.

use async_trait::async_trait;
use evidence_core::{EventKind, EvidenceStatus};
use tracing::{debug, info};

use super::{decode_payload, unexpected_payload, EventProcessor, ProcessorContext};
use crate::error::EventProcessingError;
use crate::ledger::events::StatusChangedPayload;
use crate::ledger::EventPayload;
use crate::storage::evidence::{fetch_evidence, update_evidence_status};
use crate::storage::{RawEvent, StatusUpdate};

const KIND: EventKind = EventKind::EvidenceStatusChanged;

enum Applied {
    Updated { previous: EvidenceStatus },
    AlreadyRevoked,
    Missing,
}

/// Applies contract-side status transitions to evidence rows.
pub struct StatusChangedProcessor {
    ctx: ProcessorContext,
}

impl StatusChangedProcessor {
    /// Create the processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }
}

/// Parse and check the old/new status pair.
fn validate(
    payload: &StatusChangedPayload,
) -> Result<(EvidenceStatus, EvidenceStatus), EventProcessingError> {
    let id = payload.evidence_id.as_str();
    if id.is_empty() {
        return Err(EventProcessingError::permanent(KIND, id, "empty evidence identifier"));
    }

    let old: EvidenceStatus = payload.old_status.parse().map_err(|_| {
        EventProcessingError::permanent(
            KIND,
            id,
            format!("invalid old status '{}'", payload.old_status),
        )
    })?;
    let new: EvidenceStatus = payload.new_status.parse().map_err(|_| {
        EventProcessingError::permanent(
            KIND,
            id,
            format!("invalid new status '{}'", payload.new_status),
        )
    })?;

    if old == new {
        return Err(EventProcessingError::permanent(
            KIND,
            id,
            format!("old and new status are both '{old}'"),
        ));
    }
    Ok((old, new))
}

#[async_trait]
impl EventProcessor for StatusChangedProcessor {
    fn kind(&self) -> EventKind {
        KIND
    }

    fn description(&self) -> &'static str {
        "Applies EvidenceStatusChanged events to evidence status"
    }

    async fn process(&self, event: &RawEvent) -> Result<(), EventProcessingError> {
        let payload = match decode_payload(KIND, event)? {
            EventPayload::EvidenceStatusChanged(payload) => payload,
            other => return Err(unexpected_payload(&other)),
        };
        let (old, new) = validate(&payload)?;
        let evidence_id = payload.evidence_id.clone();

        let update = StatusUpdate {
            status: new,
            revocation: (new == EvidenceStatus::Revoked)
                .then(|| (chrono::Utc::now().timestamp(), payload.user)),
        };

        let id = evidence_id.clone();
        let applied = self
            .ctx
            .retry
            .execute_transactional(self.ctx.storage.pool(), "update_evidence_status", move |conn| {
                let id = id.clone();
                let update = update.clone();
                Box::pin(async move {
                    let Some(existing) = fetch_evidence(&mut *conn, &id).await? else {
                        return Ok(Applied::Missing);
                    };
                    // The first revocation stamp is kept.
                    if existing.status == EvidenceStatus::Revoked && update.status == EvidenceStatus::Revoked {
                        return Ok(Applied::AlreadyRevoked);
                    }
                    update_evidence_status(&mut *conn, &id, &update).await?;
                    Ok(Applied::Updated {
                        previous: existing.status,
                    })
                })
            })
            .await
            .map_err(|e| EventProcessingError::retryable(KIND, &evidence_id, e.to_string()))?;

        match applied {
            Applied::Missing => Err(EventProcessingError::permanent(
                KIND,
                &evidence_id,
                "evidence not found",
            )),
            Applied::AlreadyRevoked => {
                debug!(evidence_id = %evidence_id, "Evidence already revoked, skipping");
                Ok(())
            }
            Applied::Updated { previous } => {
                if previous != old {
                    info!(
                        evidence_id = %evidence_id,
                        stored = %previous,
                        event_old = %old,
                        "Stored status differs from event's old status"
                    );
                }
                info!(
                    evidence_id = %evidence_id,
                    from = %previous,
                    to = %new,
                    "Evidence status updated"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::event_store::EventStore;
    use crate::ledger::{InMemoryLedger, LedgerEvent};
    use crate::retry::RetryExecutor;
    use crate::storage::evidence::insert_evidence;
    use crate::storage::test_support::temp_storage;
    use crate::storage::{NewEvidence, Storage};
    use alloy::primitives::{Address, B256};
    use std::sync::Arc;

    async fn setup() -> (StatusChangedProcessor, EventStore, Storage, tempfile::NamedTempFile) {
        let (storage, temp_db) = temp_storage().await;
        let retry = RetryExecutor::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        });
        let ctx = ProcessorContext {
            storage: storage.clone(),
            ledger: Arc::new(InMemoryLedger::new()),
            retry: retry.clone(),
            contract: Address::repeat_byte(0xee),
        };
        let store = EventStore::new(storage.clone(), retry);
        (StatusChangedProcessor::new(ctx), store, storage, temp_db)
    }

    async fn seed(storage: &Storage, id: &str, status: EvidenceStatus) {
        let mut conn = storage.pool().acquire().await.unwrap();
        insert_evidence(
            &mut conn,
            &NewEvidence {
                evidence_id: id.to_string(),
                owner: Address::repeat_byte(0x11),
                file_name: "a.txt".to_string(),
                mime_type: "text/plain".to_string(),
                file_size: 1,
                file_created_at: 0,
                hash_algorithm: "SHA256".to_string(),
                hash_value: B256::repeat_byte(0x01),
                status,
                block_number: 1,
                tx_hash: B256::repeat_byte(0x01),
                block_timestamp: 0,
                memo: String::new(),
            },
        )
        .await
        .unwrap();
    }

    async fn stored(
        store: &EventStore,
        id: &str,
        old: &str,
        new: &str,
        user: Option<Address>,
    ) -> RawEvent {
        let event = LedgerEvent {
            contract_address: Address::repeat_byte(0xee),
            block_number: 7,
            tx_hash: B256::repeat_byte(0x07),
            log_index: 1,
            payload: EventPayload::EvidenceStatusChanged(StatusChangedPayload {
                evidence_id: id.to_string(),
                old_status: old.to_string(),
                new_status: new.to_string(),
                user,
            }),
        };
        store.save_ledger_event(&event, 0).await.unwrap().event
    }

    #[tokio::test]
    async fn test_applies_new_status() {
        let (processor, store, storage, _temp_db) = setup().await;
        seed(&storage, "EVID-1", EvidenceStatus::Pending).await;
        let event = stored(&store, "EVID-1", "pending", "effective", None).await;

        processor.process(&event).await.unwrap();

        let record = storage.find_evidence("EVID-1").await.unwrap().unwrap();
        assert_eq!(record.status, EvidenceStatus::Effective);
        assert!(record.revoked_at.is_none());
    }

    #[tokio::test]
    async fn test_revoked_status_stamps_revocation() {
        let (processor, store, storage, _temp_db) = setup().await;
        seed(&storage, "EVID-1", EvidenceStatus::Effective).await;
        let actor = Address::repeat_byte(0x33);
        let event = stored(&store, "EVID-1", "effective", "revoked", Some(actor)).await;

        processor.process(&event).await.unwrap();

        let record = storage.find_evidence("EVID-1").await.unwrap().unwrap();
        assert_eq!(record.status, EvidenceStatus::Revoked);
        assert!(record.revoked_at.is_some());
        assert_eq!(record.revoker, Some(actor));
    }

    #[tokio::test]
    async fn test_revoked_status_on_revoked_evidence_keeps_first_stamp() {
        let (processor, store, storage, _temp_db) = setup().await;
        seed(&storage, "EVID-1", EvidenceStatus::Effective).await;
        let first_actor = Address::repeat_byte(0x33);
        let event = stored(&store, "EVID-1", "effective", "revoked", Some(first_actor)).await;
        processor.process(&event).await.unwrap();
        let first = storage.find_evidence("EVID-1").await.unwrap().unwrap();

        let replay = stored(&store, "EVID-1", "effective", "revoked", Some(Address::repeat_byte(0x44))).await;
        processor.process(&replay).await.unwrap();

        let record = storage.find_evidence("EVID-1").await.unwrap().unwrap();
        assert_eq!(record.status, EvidenceStatus::Revoked);
        assert_eq!(record.revoker, Some(first_actor));
        assert_eq!(record.revoked_at, first.revoked_at);
        assert_eq!(record.updated_at, first.updated_at);
    }

    #[tokio::test]
    async fn test_same_status_is_rejected() {
        let (processor, store, storage, _temp_db) = setup().await;
        seed(&storage, "EVID-1", EvidenceStatus::Pending).await;
        let event = stored(&store, "EVID-1", "pending", "pending", None).await;

        let err = processor.process(&event).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(
            storage.find_evidence("EVID-1").await.unwrap().unwrap().status,
            EvidenceStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_unknown_status_is_rejected() {
        let (processor, store, _storage, _temp_db) = setup().await;
        let event = stored(&store, "EVID-1", "pending", "archived", None).await;

        let err = processor.process(&event).await.unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("archived"));
    }

    #[tokio::test]
    async fn test_missing_evidence_is_permanent() {
        let (processor, store, _storage, _temp_db) = setup().await;
        let event = stored(&store, "EVID-404", "pending", "effective", None).await;

        let err = processor.process(&event).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(err.evidence_id, "EVID-404");
    }
}
