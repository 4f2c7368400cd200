//! `EvidenceSubmitted` processor.
//!
//! The log only carries the identifier, owner and digest; the full record is
//! read back from the contract before anything is written.

use async_trait::async_trait;
use evidence_core::{EventKind, EvidenceStatus};
use tracing::{debug, info};

use super::{decode_payload, unexpected_payload, EventProcessor, ProcessorContext};
use crate::error::EventProcessingError;
use crate::ledger::EventPayload;
use crate::storage::evidence::{fetch_evidence, insert_evidence};
use crate::storage::{NewEvidence, RawEvent};

const KIND: EventKind = EventKind::EvidenceSubmitted;

/// Creates evidence rows from canonical contract data.
pub struct SubmittedProcessor {
    ctx: ProcessorContext,
}

impl SubmittedProcessor {
    /// Create the processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl EventProcessor for SubmittedProcessor {
    fn kind(&self) -> EventKind {
        KIND
    }

    fn description(&self) -> &'static str {
        "Creates evidence records from EvidenceSubmitted events using contract data"
    }

    async fn process(&self, event: &RawEvent) -> Result<(), EventProcessingError> {
        let evidence_id = match decode_payload(KIND, event)? {
            EventPayload::EvidenceSubmitted(payload) => payload.evidence_id,
            other => return Err(unexpected_payload(&other)),
        };

        let mut conn = self.ctx.storage.pool().acquire().await.map_err(|e| {
            EventProcessingError::retryable(KIND, &evidence_id, format!("store unavailable: {e}"))
        })?;
        let existing = fetch_evidence(&mut conn, &evidence_id)
            .await
            .map_err(|e| EventProcessingError::retryable(KIND, &evidence_id, e.to_string()))?;
        drop(conn);
        if existing.is_some() {
            debug!(evidence_id = %evidence_id, "Evidence already exists, skipping");
            return Ok(());
        }

        let canonical = self
            .ctx
            .ledger
            .get_evidence(self.ctx.contract, &evidence_id)
            .await
            .map_err(|e| {
                EventProcessingError::retryable(
                    KIND,
                    &evidence_id,
                    format!("failed to fetch evidence from contract: {e}"),
                )
            })?
            .ok_or_else(|| {
                EventProcessingError::retryable(
                    KIND,
                    &evidence_id,
                    "contract has no evidence with this identifier yet",
                )
            })?;

        let record = NewEvidence {
            evidence_id: canonical.evidence_id.clone(),
            owner: canonical.owner,
            file_name: canonical.file_name,
            mime_type: canonical.mime_type,
            file_size: canonical.size,
            file_created_at: canonical.creation_time,
            hash_algorithm: canonical.hash_algorithm,
            hash_value: canonical.hash_value,
            status: EvidenceStatus::Effective,
            block_number: event.block_number,
            tx_hash: event.tx_hash,
            block_timestamp: event.block_timestamp,
            memo: canonical.memo,
        };

        let inserted = self
            .ctx
            .retry
            .execute_transactional(self.ctx.storage.pool(), "insert_evidence", move |conn| {
                let record = record.clone();
                Box::pin(async move { insert_evidence(conn, &record).await })
            })
            .await
            .map_err(|e| EventProcessingError::retryable(KIND, &evidence_id, e.to_string()))?;

        if inserted {
            info!(evidence_id = %evidence_id, block = event.block_number, "Evidence created");
        } else {
            debug!(evidence_id = %evidence_id, "Evidence inserted concurrently, skipping");
        }
        Ok(())
    }
}
