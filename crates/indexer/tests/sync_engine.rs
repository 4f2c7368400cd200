use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use evidence_indexer::config::Config;
use evidence_indexer::ledger::events::{EventPayload, SubmittedPayload};
use evidence_indexer::ledger::{CanonicalEvidence, InMemoryLedger, LedgerEvent};
use evidence_indexer::shutdown::Shutdown;
use evidence_indexer::storage::Storage;
use evidence_indexer::{EvidenceStatus, IndexerService};
use tempfile::TempDir;

const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
const OWNER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

fn contract() -> Address {
    CONTRACT.parse().unwrap()
}

fn config() -> Config {
    let mut config = Config::from_toml_str(&format!(
        r#"
        [network]
        rpc_url = "http://localhost:8545"
        chain_id = 31337

        [contract]
        address = "{CONTRACT}"

        [database]
        url = "sqlite::memory:"

        [sync]
        batch_size = 100
        delay_between_batches_ms = 0
        retry_delay_ms = 0
        poll_interval_ms = 10
        resubscribe_delay_ms = 10
        "#
    ))
    .unwrap();
    config.listener.startup_delay_secs = 0;
    config
}

async fn storage(dir: &TempDir) -> Storage {
    let storage = Storage::new_with_path(dir.path().join("evidence.db")).await.unwrap();
    storage.run_migrations().await.unwrap();
    storage
}

fn submitted(ledger: &InMemoryLedger, evidence_id: &str, block_number: u64, tx_byte: u8) {
    let owner: Address = OWNER.parse().unwrap();
    let hash_value = B256::repeat_byte(tx_byte);
    ledger.put_evidence(CanonicalEvidence {
        evidence_id: evidence_id.to_string(),
        owner,
        file_name: format!("{evidence_id}.pdf"),
        mime_type: "application/pdf".to_string(),
        size: 2048,
        creation_time: 1_700_000_000,
        hash_algorithm: "SHA256".to_string(),
        hash_value,
        timestamp: 1_700_000_100,
        block_height: block_number,
        memo: String::new(),
    });
    ledger.push_event(LedgerEvent {
        contract_address: contract(),
        block_number,
        tx_hash: B256::repeat_byte(tx_byte),
        log_index: 0,
        payload: EventPayload::EvidenceSubmitted(SubmittedPayload {
            evidence_id: evidence_id.to_string(),
            user: owner,
            hash_value,
            timestamp: 1_700_000_100,
        }),
    });
}

#[tokio::test]
async fn sync_range_splits_into_batches_and_checkpoints_the_end() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_height(400);
    let service = IndexerService::new(config(), storage(&dir).await, ledger.clone(), Shutdown::new().signal());

    let report = service.sync_range(100, 250).await.unwrap();

    let ranges: Vec<(u64, u64)> = ledger.log_calls().iter().map(|(_, from, to)| (*from, *to)).collect();
    assert_eq!(ranges, vec![(100, 199), (200, 250)]);
    assert_eq!(report.batches, 2);

    let status = service.status().await.unwrap();
    assert_eq!(status.checkpoint.last_block_number, 250);
}

#[tokio::test]
async fn submitted_event_creates_effective_record_from_ledger_data() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    submitted(&ledger, "EVID-A", 42, 0xa1);
    ledger.set_block_timestamp(42, 1_700_000_420);
    let storage = storage(&dir).await;
    let service = IndexerService::new(config(), storage.clone(), ledger, Shutdown::new().signal());

    let report = service.sync_range(0, 99).await.unwrap();
    assert_eq!(report.events.processed, 1);

    let record = storage.find_evidence("EVID-A").await.unwrap().unwrap();
    assert_eq!(record.status, EvidenceStatus::Effective);
    assert_eq!(record.file_name, "EVID-A.pdf");
    assert_eq!(record.file_size, 2048);
    assert_eq!(record.block_number, 42);
    assert_eq!(record.tx_hash, B256::repeat_byte(0xa1));
    assert_eq!(record.block_timestamp, 1_700_000_420);
}

#[tokio::test]
async fn overlapping_syncs_do_not_duplicate_raw_events() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    submitted(&ledger, "EVID-1", 10, 0x01);
    submitted(&ledger, "EVID-2", 120, 0x02);
    ledger.set_height(200);
    let storage = storage(&dir).await;
    let service = IndexerService::new(config(), storage.clone(), ledger, Shutdown::new().signal());

    service.sync_range(0, 149).await.unwrap();
    let report = service.sync_range(100, 200).await.unwrap();

    assert_eq!(report.events.duplicates, 1);
    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.raw_event_count, 2);
    assert_eq!(stats.evidence_count, 2);
    assert_eq!(service.status().await.unwrap().checkpoint.last_block_number, 200);
}

#[tokio::test]
async fn startup_resumes_from_the_block_after_the_checkpoint() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    submitted(&ledger, "EVID-1", 50, 0x01);
    submitted(&ledger, "EVID-2", 180, 0x02);
    ledger.set_height(300);
    let storage = storage(&dir).await;
    let service = IndexerService::new(config(), storage.clone(), ledger.clone(), Shutdown::new().signal());

    service.sync_range(0, 149).await.unwrap();
    let calls_before = ledger.log_calls().len();

    service.start_listening().await.unwrap();
    service.stop_listening().await;

    let (_, first_from, _) = ledger.log_calls()[calls_before];
    assert_eq!(first_from, 150);

    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.raw_event_count, 2);
    assert_eq!(stats.unprocessed_count, 0);
}

#[tokio::test]
async fn live_streams_deliver_new_events() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_height(5);
    let storage = storage(&dir).await;
    let service = IndexerService::new(config(), storage.clone(), ledger.clone(), Shutdown::new().signal());

    service.start_listening().await.unwrap();
    assert!(service.is_listening().await);
    submitted(&ledger, "EVID-LIVE", 7, 0x07);

    let mut found = None;
    for _ in 0..300 {
        found = storage.find_evidence("EVID-LIVE").await.unwrap();
        if found.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    service.stop_listening().await;

    let record = found.expect("live event was not processed");
    assert_eq!(record.block_number, 7);
    assert!(!service.is_listening().await);
}

#[tokio::test]
async fn restart_reopens_the_streams() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_height(5);
    let service = IndexerService::new(config(), storage(&dir).await, ledger, Shutdown::new().signal());

    service.start_listening().await.unwrap();
    service.restart_listening().await.unwrap();
    assert!(service.is_listening().await);

    let status = service.status().await.unwrap();
    assert!(status.uptime.is_some());
    service.stop_listening().await;
}
