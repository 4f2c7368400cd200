//! JSON-RPC ledger client.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use async_trait::async_trait;
use evidence_core::EventKind;
use tracing::warn;

use super::contract::{CanonicalEvidence, EvidenceStorage};
use super::events::{signature_hash, LedgerEvent};
use super::{LedgerClient, LedgerResult};
use crate::error::LedgerError;

/// HTTP RPC client for the evidence contract's chain.
#[derive(Clone)]
pub struct RpcLedgerClient {
    provider: RootProvider<Http<Client>>,
}

impl RpcLedgerClient {
    /// Create a client for `rpc_url`.
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self { provider })
    }

    fn decode_logs(logs: &[Log], contract: Address) -> Vec<LedgerEvent> {
        let mut events = Vec::with_capacity(logs.len());
        for log in logs.iter().filter(|log| log.address() == contract) {
            match LedgerEvent::from_log(log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    // One bad log must not hide the rest of the range
                    warn!(
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        "Failed to decode evidence event: {}",
                        e
                    );
                }
            }
        }
        events.sort_by_key(LedgerEvent::position);
        events
    }
}

fn rpc_error(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Rpc(err.to_string())
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn current_block_height(&self) -> LedgerResult<u64> {
        self.provider.get_block_number().await.map_err(rpc_error)
    }

    async fn logs_in_range(
        &self,
        contract: Address,
        kind: Option<EventKind>,
        from_block: u64,
        to_block: u64,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        let signatures: Vec<B256> = match kind {
            Some(kind) => vec![signature_hash(kind)],
            None => EventKind::ALL.into_iter().map(signature_hash).collect(),
        };

        let filter = Filter::new()
            .address(contract)
            .event_signature(signatures)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await.map_err(rpc_error)?;

        Ok(Self::decode_logs(&logs, contract))
    }

    async fn receipt_events(
        &self,
        contract: Address,
        tx_hash: B256,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| LedgerError::ReceiptNotFound(format!("{tx_hash:#x}")))?;

        Ok(Self::decode_logs(receipt.inner.logs(), contract))
    }

    async fn block_timestamp(&self, block_number: u64) -> LedgerResult<u64> {
        let block = self
            .provider
            .get_block_by_number(
                BlockNumberOrTag::Number(block_number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .map_err(rpc_error)?
            .ok_or(LedgerError::BlockNotFound(block_number))?;

        Ok(block.header.timestamp)
    }

    async fn get_evidence(
        &self,
        contract: Address,
        evidence_id: &str,
    ) -> LedgerResult<Option<CanonicalEvidence>> {
        let instance = EvidenceStorage::new(contract, &self.provider);
        let result = instance
            .getEvidence(evidence_id.to_string())
            .call()
            .await
            .map_err(rpc_error)?;

        Ok(CanonicalEvidence::from_abi(result._0))
    }
}
