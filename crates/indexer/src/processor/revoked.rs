//! `EvidenceRevoked` processor.

use async_trait::async_trait;
use evidence_core::{parse_address, EventKind, EvidenceStatus};
use tracing::{debug, info};

use super::{decode_payload, unexpected_payload, EventProcessor, ProcessorContext};
use crate::error::EventProcessingError;
use crate::ledger::EventPayload;
use crate::storage::evidence::{fetch_evidence, update_evidence_status};
use crate::storage::{RawEvent, StatusUpdate};

const KIND: EventKind = EventKind::EvidenceRevoked;

enum Applied {
    Revoked { previous: EvidenceStatus },
    AlreadyRevoked,
    Missing,
}

/// Marks evidence revoked. A second revocation keeps the first one's stamp.
pub struct RevokedProcessor {
    ctx: ProcessorContext,
}

impl RevokedProcessor {
    /// Create the processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl EventProcessor for RevokedProcessor {
    fn kind(&self) -> EventKind {
        KIND
    }

    fn description(&self) -> &'static str {
        "Revokes evidence records on EvidenceRevoked events"
    }

    async fn process(&self, event: &RawEvent) -> Result<(), EventProcessingError> {
        let payload = match decode_payload(KIND, event)? {
            EventPayload::EvidenceRevoked(payload) => payload,
            other => return Err(unexpected_payload(&other)),
        };
        let evidence_id = payload.evidence_id;
        if evidence_id.is_empty() {
            return Err(EventProcessingError::permanent(KIND, "", "empty evidence identifier"));
        }
        let revoker = parse_address(&payload.revoker).map_err(|e| {
            EventProcessingError::permanent(KIND, &evidence_id, format!("invalid revoker: {e}"))
        })?;

        let id = evidence_id.clone();
        let applied = self
            .ctx
            .retry
            .execute_transactional(self.ctx.storage.pool(), "revoke_evidence", move |conn| {
                let id = id.clone();
                Box::pin(async move {
                    let Some(existing) = fetch_evidence(&mut *conn, &id).await? else {
                        return Ok(Applied::Missing);
                    };
                    if existing.status == EvidenceStatus::Revoked {
                        return Ok(Applied::AlreadyRevoked);
                    }
                    let update = StatusUpdate {
                        status: EvidenceStatus::Revoked,
                        revocation: Some((chrono::Utc::now().timestamp(), Some(revoker))),
                    };
                    update_evidence_status(&mut *conn, &id, &update).await?;
                    Ok(Applied::Revoked {
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
            Applied::Revoked { previous } => {
                info!(
                    evidence_id = %evidence_id,
                    revoker = %revoker,
                    previous = %previous,
                    "Evidence revoked"
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
    use crate::ledger::events::RevokedPayload;
    use crate::ledger::{InMemoryLedger, LedgerEvent};
    use crate::retry::RetryExecutor;
    use crate::storage::evidence::insert_evidence;
    use crate::storage::test_support::temp_storage;
    use crate::storage::{NewEvidence, Storage};
    use alloy::primitives::{Address, B256};
    use std::sync::Arc;

    const FIRST: &str = "0x1111111111111111111111111111111111111111";
    const SECOND: &str = "0x2222222222222222222222222222222222222222";

    async fn setup() -> (RevokedProcessor, EventStore, Storage, tempfile::NamedTempFile) {
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
        (RevokedProcessor::new(ctx), store, storage, temp_db)
    }

    async fn seed(storage: &Storage, id: &str) {
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
                status: EvidenceStatus::Effective,
                block_number: 1,
                tx_hash: B256::repeat_byte(0x01),
                block_timestamp: 0,
                memo: String::new(),
            },
        )
        .await
        .unwrap();
    }

    async fn stored(store: &EventStore, id: &str, revoker: &str, tx: u8) -> RawEvent {
        let event = LedgerEvent {
            contract_address: Address::repeat_byte(0xee),
            block_number: 9,
            tx_hash: B256::repeat_byte(tx),
            log_index: 0,
            payload: EventPayload::EvidenceRevoked(RevokedPayload {
                evidence_id: id.to_string(),
                revoker: revoker.to_string(),
                timestamp: 1_700_000_000,
            }),
        };
        store.save_ledger_event(&event, 0).await.unwrap().event
    }

    #[tokio::test]
    async fn test_revokes_effective_evidence() {
        let (processor, store, storage, _temp_db) = setup().await;
        seed(&storage, "EVID-1").await;
        let event = stored(&store, "EVID-1", FIRST, 0x01).await;

        processor.process(&event).await.unwrap();

        let record = storage.find_evidence("EVID-1").await.unwrap().unwrap();
        assert_eq!(record.status, EvidenceStatus::Revoked);
        assert_eq!(record.revoker, Some(FIRST.parse().unwrap()));
        assert!(record.revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_second_revocation_keeps_first_stamp() {
        let (processor, store, storage, _temp_db) = setup().await;
        seed(&storage, "EVID-1").await;

        processor
            .process(&stored(&store, "EVID-1", FIRST, 0x01).await)
            .await
            .unwrap();
        let first = storage.find_evidence("EVID-1").await.unwrap().unwrap();

        processor
            .process(&stored(&store, "EVID-1", SECOND, 0x02).await)
            .await
            .unwrap();
        let second = storage.find_evidence("EVID-1").await.unwrap().unwrap();

        assert_eq!(second.revoker, first.revoker);
        assert_eq!(second.revoked_at, first.revoked_at);
    }

    #[tokio::test]
    async fn test_zero_or_malformed_revoker_is_rejected() {
        let (processor, store, storage, _temp_db) = setup().await;
        seed(&storage, "EVID-1").await;

        let zero = stored(&store, "EVID-1", evidence_core::ZERO_ADDRESS, 0x01).await;
        assert!(!processor.process(&zero).await.unwrap_err().retryable);

        let short = stored(&store, "EVID-1", "0x1234", 0x02).await;
        assert!(!processor.process(&short).await.unwrap_err().retryable);

        assert_eq!(
            storage.find_evidence("EVID-1").await.unwrap().unwrap().status,
            EvidenceStatus::Effective
        );
    }

    #[tokio::test]
    async fn test_missing_evidence_is_permanent() {
        let (processor, store, _storage, _temp_db) = setup().await;
        let event = stored(&store, "EVID-404", FIRST, 0x01).await;

        let err = processor.process(&event).await.unwrap_err();
        assert!(!err.retryable);
    }
}
