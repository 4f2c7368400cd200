//! Listener coordinator.
//!
//! [`IndexerService`] owns the whole ingestion stack and the listening state
//! machine:
//!
//! ```text
//! Stopped ──start──► Starting ──ok──► Running ──stop──► Stopping ──► Stopped
//!                       │
//!                       └──startup failure──► Stopped (checkpoint marked ERROR)
//! ```
//!
//! Starting runs the startup sequence: resolve the contract, check that the
//! ledger answers, catch up historically when the checkpoint lags, then open
//! the live streams. While running, two background tasks sweep unprocessed
//! events and log health warnings.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use anyhow::{Context, Result};
use evidence_core::EventKind;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{progress_percentage, SyncCheckpoint};
use crate::config::{Config, ListenerConfig};
use crate::contracts::contract_address_from_config;
use crate::event_store::EventStore;
use crate::ledger::LedgerClient;
use crate::listener::{HistoricalSync, LiveSubscriptionManager, SubscriptionState, SyncReport};
use crate::pipeline::{IngestPipeline, IngestReport};
use crate::processor::{ProcessorContext, ProcessorRegistry};
use crate::retry::RetryExecutor;
use crate::shutdown::{Shutdown, ShutdownSignal};
use crate::storage::{CheckpointRecord, Storage};

/// Pause between stop and start in [`IndexerService::restart_listening`].
const RESTART_PAUSE: Duration = Duration::from_secs(1);

/// Listening state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Nothing running.
    Stopped,
    /// Startup sequence in progress.
    Starting,
    /// Live streams and background tasks running.
    Running,
    /// Tearing down.
    Stopping,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListenerState::Stopped => "stopped",
            ListenerState::Starting => "starting",
            ListenerState::Running => "running",
            ListenerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by [`IndexerService::status`].
#[derive(Debug, Clone)]
pub struct ListenerStatus {
    /// Listening state
    pub state: ListenerState,
    /// Contract being indexed
    pub contract: Address,
    /// Time since listening started
    pub uptime: Option<Duration>,
    /// Persisted checkpoint
    pub checkpoint: CheckpointRecord,
    /// Ledger head, `None` if the ledger did not answer
    pub current_block: Option<u64>,
    /// Blocks between the checkpoint and the head
    pub blocks_behind: Option<u64>,
    /// Checkpoint position relative to the head, 0 to 100
    pub progress_percentage: Option<f64>,
    /// Events processed since this process started
    pub processed: u64,
    /// Failed processing attempts since this process started
    pub failed: u64,
    /// Unix time of the last successful dispatch
    pub last_processed_at: Option<i64>,
    /// Stored events still awaiting processing
    pub unprocessed: u64,
    /// Evidence rows in the projection
    pub evidence_count: u64,
    /// A historical sync is running
    pub syncing: bool,
    /// Live stream states
    pub streams: Vec<(EventKind, SubscriptionState)>,
}

/// Everything bound to one resolved contract address.
struct Engine {
    contract: Address,
    checkpoint: SyncCheckpoint,
    pipeline: IngestPipeline,
    historical: HistoricalSync,
    live: LiveSubscriptionManager,
}

impl Engine {
    fn build(
        config: &Config,
        storage: Storage,
        ledger: Arc<dyn LedgerClient>,
        contract: Address,
        shutdown: ShutdownSignal,
    ) -> Self {
        let retry = RetryExecutor::new(config.retry.clone()).with_shutdown(shutdown);
        let store = EventStore::new(storage.clone(), retry.clone());
        let checkpoint = SyncCheckpoint::new(storage.clone(), ledger.clone(), retry.clone(), contract)
            .with_historical_sync_threshold(config.sync.historical_sync_threshold)
            .with_max_blocks_behind(config.listener.max_blocks_behind);

        let ctx = ProcessorContext {
            storage,
            ledger: ledger.clone(),
            retry,
            contract,
        };
        let registry = Arc::new(ProcessorRegistry::with_default_processors(store.clone(), ctx));
        let pipeline = IngestPipeline::new(ledger.clone(), store, registry, contract);

        let historical = HistoricalSync::new(pipeline.clone(), checkpoint.clone(), config.sync.clone());
        let live = LiveSubscriptionManager::new(ledger, pipeline.clone(), checkpoint.clone(), config.sync.clone());

        Self {
            contract,
            checkpoint,
            pipeline,
            historical,
            live,
        }
    }

    fn registry(&self) -> &ProcessorRegistry {
        self.pipeline.registry()
    }
}

#[derive(Default)]
struct Active {
    shutdown: Option<Shutdown>,
    tasks: Vec<JoinHandle<()>>,
}

/// The indexer: one coordinator per process, shared by handle.
pub struct IndexerService {
    config: Config,
    storage: Storage,
    ledger: Arc<dyn LedgerClient>,
    shutdown: ShutdownSignal,
    engine: OnceCell<Arc<Engine>>,
    state: Arc<RwLock<ListenerState>>,
    started_at: RwLock<Option<Instant>>,
    active: Mutex<Active>,
}

impl IndexerService {
    /// Create a stopped service.
    ///
    /// `shutdown` is the process-wide stop signal; it interrupts
    /// [`run`](Self::run) and [`sync_range`](Self::sync_range).
    pub fn new(
        config: Config,
        storage: Storage,
        ledger: Arc<dyn LedgerClient>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            config,
            storage,
            ledger,
            shutdown,
            engine: OnceCell::new(),
            state: Arc::new(RwLock::new(ListenerState::Stopped)),
            started_at: RwLock::new(None),
            active: Mutex::new(Active::default()),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Storage handle.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Resolve the contract on first use and build the stack around it.
    async fn engine(&self) -> Result<Arc<Engine>> {
        let engine = self
            .engine
            .get_or_try_init(|| async {
                let contract = contract_address_from_config(&self.config)
                    .context("Failed to resolve evidence contract address")?;
                info!(contract = %contract, "Indexing evidence contract");
                Ok::<_, anyhow::Error>(Arc::new(Engine::build(
                    &self.config,
                    self.storage.clone(),
                    self.ledger.clone(),
                    contract,
                    self.shutdown.clone(),
                )))
            })
            .await?;
        Ok(engine.clone())
    }

    /// Resolved contract address.
    pub async fn contract(&self) -> Result<Address> {
        Ok(self.engine().await?.contract)
    }

    /// Run until the shutdown signal fires.
    ///
    /// Waits `startup_delay_secs`, then attempts startup, retrying every
    /// `startup_retry_secs` until it succeeds. Stops listening on shutdown.
    pub async fn run(&self) -> Result<()> {
        let startup_delay = Duration::from_secs(self.config.listener.startup_delay_secs);
        let retry_delay = Duration::from_secs(self.config.listener.startup_retry_secs);

        if !startup_delay.is_zero() {
            info!("Starting listener in {}s", startup_delay.as_secs());
        }
        if self.shutdown.sleep(startup_delay).await {
            loop {
                match self.start_listening().await {
                    Ok(()) => break,
                    Err(e) => {
                        error!("Listener startup failed: {e:#}");
                        info!("Retrying startup in {}s", retry_delay.as_secs());
                        if !self.shutdown.sleep(retry_delay).await {
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown.cancelled().await;
        info!("Shutdown requested");
        self.stop_listening().await;
        Ok(())
    }

    /// Run the startup sequence and begin listening. No-op when already
    /// starting or running.
    ///
    /// On failure the checkpoint is marked with the error (when the contract
    /// is known) and the state returns to stopped.
    pub async fn start_listening(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                ListenerState::Starting | ListenerState::Running => {
                    debug!(state = %*state, "Listener already active");
                    return Ok(());
                }
                ListenerState::Stopping => {
                    anyhow::bail!("Listener is stopping");
                }
                ListenerState::Stopped => *state = ListenerState::Starting,
            }
        }

        let run = Shutdown::new();
        let signal = run.signal();
        self.active.lock().await.shutdown = Some(run);

        match self.startup(&signal).await {
            Ok(engine) => {
                if signal.is_triggered() {
                    engine.live.stop().await;
                    info!("Listener stopped during startup");
                    return Ok(());
                }

                let tasks = vec![
                    tokio::spawn(sweep_loop(
                        engine.clone(),
                        self.ledger.clone(),
                        self.config.listener.clone(),
                        signal.clone(),
                    )),
                    tokio::spawn(health_loop(
                        engine,
                        self.storage.clone(),
                        self.state.clone(),
                        self.config.listener.health_check_interval_secs,
                        signal,
                    )),
                ];
                self.active.lock().await.tasks = tasks;
                *self.started_at.write().await = Some(Instant::now());
                *self.state.write().await = ListenerState::Running;
                info!("Listener running");
                Ok(())
            }
            Err(e) => {
                if let Some(engine) = self.engine.get() {
                    engine.live.stop().await;
                    if let Err(mark_err) = engine.checkpoint.mark_error(&format!("{e:#}")).await {
                        warn!(error = %mark_err, "Failed to record startup error on checkpoint");
                    }
                }
                self.active.lock().await.shutdown = None;
                *self.state.write().await = ListenerState::Stopped;
                Err(e)
            }
        }
    }

    async fn startup(&self, signal: &ShutdownSignal) -> Result<Arc<Engine>> {
        let engine = self.engine().await?;

        let head = self
            .ledger
            .current_block_height()
            .await
            .context("Ledger is unreachable")?;
        info!(head, "Connected to ledger");

        engine
            .registry()
            .initialize_all()
            .await
            .context("Failed to initialize event processors")?;

        let checkpoint = engine.checkpoint.get_or_create().await?;
        if engine.checkpoint.needs_historical_sync().await? {
            let from = checkpoint.last_block_number + 1;
            info!(from, to = head, "Checkpoint is behind, running historical catch-up");
            engine.historical.sync_range(from, head, signal).await?;
        }

        if !signal.is_triggered() {
            engine.live.start().await?;
        }
        Ok(engine)
    }

    /// Stop streams and background tasks, waiting for in-flight work.
    /// Safe to call when already stopped.
    pub async fn stop_listening(&self) {
        {
            let mut state = self.state.write().await;
            if *state == ListenerState::Stopped {
                return;
            }
            *state = ListenerState::Stopping;
        }
        info!("Stopping listener");

        let (shutdown, tasks) = {
            let mut active = self.active.lock().await;
            (active.shutdown.take(), std::mem::take(&mut active.tasks))
        };
        if let Some(shutdown) = shutdown {
            shutdown.trigger();
        }
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Background task panicked");
                }
            }
        }

        if let Some(engine) = self.engine.get() {
            engine.live.stop().await;
            engine.registry().shutdown_all().await;
        }

        *self.started_at.write().await = None;
        *self.state.write().await = ListenerState::Stopped;
        info!("Listener stopped");
    }

    /// Stop, pause briefly, start again.
    pub async fn restart_listening(&self) -> Result<()> {
        info!("Restarting listener");
        self.stop_listening().await;
        if !self.shutdown.sleep(RESTART_PAUSE).await {
            return Ok(());
        }
        self.start_listening().await
    }

    /// Whether the listener is running.
    pub async fn is_listening(&self) -> bool {
        *self.state.read().await == ListenerState::Running
    }

    /// Current listening state.
    pub async fn state(&self) -> ListenerState {
        *self.state.read().await
    }

    /// Collect status. Ledger failures leave the head-derived fields empty.
    pub async fn status(&self) -> Result<ListenerStatus> {
        let engine = self.engine().await?;
        let checkpoint = engine.checkpoint.get_or_create().await?;
        let current_block = match self.ledger.current_block_height().await {
            Ok(head) => Some(head),
            Err(e) => {
                warn!(error = %e, "Failed to read ledger height for status");
                None
            }
        };
        let last = checkpoint.last_block_number;
        let stats = engine.registry().stats();

        Ok(ListenerStatus {
            state: self.state().await,
            contract: engine.contract,
            uptime: self.started_at.read().await.map(|at| at.elapsed()),
            current_block,
            blocks_behind: current_block.map(|head| head.saturating_sub(last)),
            progress_percentage: current_block.map(|head| progress_percentage(last, head)),
            processed: stats.processed,
            failed: stats.failed,
            last_processed_at: stats.last_processed_at,
            unprocessed: engine.pipeline.store().count_unprocessed(None).await?,
            evidence_count: self.storage.count_evidence(None).await?,
            syncing: engine.historical.is_syncing(),
            streams: engine.live.states().await,
            checkpoint,
        })
    }

    /// Replay `[start, end]` and advance the checkpoint.
    pub async fn sync_range(&self, start: u64, end: u64) -> Result<SyncReport> {
        let engine = self.engine().await?;
        Ok(engine.historical.sync_range(start, end, &self.shutdown).await?)
    }

    /// Move the checkpoint to `block_number`, backwards included.
    ///
    /// Open live streams are closed before the reset and reopened from
    /// `block_number + 1`, so the rewound range is scanned again.
    pub async fn reset_checkpoint(&self, block_number: u64) -> Result<CheckpointRecord> {
        let engine = self.engine().await?;
        if engine.historical.is_syncing() {
            warn!(block_number, "Resetting checkpoint while a historical sync is running");
        }

        let streaming = engine.live.is_running().await;
        if streaming {
            engine.live.stop().await;
        }
        let record = engine.checkpoint.reset(block_number).await?;
        if streaming {
            engine.live.start_from(Some(block_number + 1)).await?;
            info!(from_block = block_number + 1, "Live subscriptions reopened after reset");
        }
        Ok(record)
    }

    /// One pass of the unprocessed sweep.
    pub async fn process_unprocessed(&self) -> Result<IngestReport> {
        let engine = self.engine().await?;
        Ok(engine
            .pipeline
            .process_unprocessed(self.config.listener.unprocessed_page_size)
            .await?)
    }
}

impl fmt::Debug for IndexerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexerService")
            .field("network", &self.config.network.name)
            .field("contract", &self.engine.get().map(|e| e.contract))
            .finish()
    }
}

async fn sweep_loop(
    engine: Arc<Engine>,
    ledger: Arc<dyn LedgerClient>,
    listener: ListenerConfig,
    shutdown: ShutdownSignal,
) {
    let mut periodic = tokio::time::interval(Duration::from_secs(listener.unprocessed_interval_secs));
    periodic.tick().await; // First tick completes immediately

    loop {
        tokio::select! {
            _ = periodic.tick() => {}
            _ = shutdown.cancelled() => break,
        }

        match engine
            .pipeline
            .process_unprocessed(listener.unprocessed_page_size)
            .await
        {
            Ok(report) if report.events == 0 => debug!("No unprocessed events"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Unprocessed event sweep failed"),
        }

        if let Some(retention) = listener.retention_blocks {
            prune(&engine, ledger.as_ref(), retention).await;
        }
    }
    debug!("Unprocessed sweep stopped");
}

async fn prune(engine: &Engine, ledger: &dyn LedgerClient, retention: u64) {
    let head = match ledger.current_block_height().await {
        Ok(head) => head,
        Err(e) => {
            warn!(error = %e, "Skipping retention sweep, ledger height unavailable");
            return;
        }
    };
    let cutoff = head.saturating_sub(retention);
    match engine.pipeline.store().delete_before_block(cutoff).await {
        Ok(0) => {}
        Ok(deleted) => info!(deleted, cutoff, "Pruned raw events"),
        Err(e) => warn!(error = %e, "Retention sweep failed"),
    }
}

/// Result of one health tick.
#[derive(Debug, Default)]
struct HealthReport {
    listener_running: bool,
    database_healthy: bool,
    falling_behind: bool,
    progress: Option<f64>,
    unhealthy_processors: Vec<EventKind>,
}

async fn health_loop(
    engine: Arc<Engine>,
    storage: Storage,
    state: Arc<RwLock<ListenerState>>,
    interval_secs: u64,
    shutdown: ShutdownSignal,
) {
    let mut periodic = tokio::time::interval(Duration::from_secs(interval_secs));
    periodic.tick().await;

    loop {
        tokio::select! {
            _ = periodic.tick() => {}
            _ = shutdown.cancelled() => break,
        }

        let current = *state.read().await;
        check_health(&engine, &storage, current).await;
    }
    debug!("Health check stopped");
}

async fn check_health(engine: &Engine, storage: &Storage, state: ListenerState) -> HealthReport {
    let mut report = HealthReport {
        listener_running: state == ListenerState::Running,
        ..HealthReport::default()
    };
    if !report.listener_running {
        warn!(state = %state, "Listener is not running");
    }

    match storage.health_check().await {
        Ok(()) => report.database_healthy = true,
        Err(e) => warn!("Database is unhealthy: {e:#}"),
    }

    match engine.checkpoint.validate_consistency().await {
        Ok(true) => {}
        Ok(false) => {
            report.falling_behind = true;
            report.progress = engine.checkpoint.sync_progress_percentage().await.ok();
            let behind = engine.checkpoint.blocks_behind().await.ok();
            warn!(
                blocks_behind = ?behind,
                progress = ?report.progress,
                "Indexer is falling behind the ledger"
            );
        }
        Err(e) => warn!(error = %e, "Consistency check failed"),
    }

    for (kind, healthy) in engine.registry().health().await {
        if !healthy {
            warn!(event_type = %kind, "Event processor reports unhealthy");
            report.unhealthy_processors.push(kind);
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::events::{EventPayload, StatusChangedPayload};
    use crate::ledger::{InMemoryLedger, LedgerEvent};
    use crate::storage::test_support::temp_storage;
    use alloy::primitives::B256;
    use evidence_core::CheckpointStatus;

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn test_config() -> Config {
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

    async fn service(
        ledger: Arc<InMemoryLedger>,
        config: Config,
    ) -> (IndexerService, Shutdown, tempfile::NamedTempFile) {
        let (storage, temp_db) = temp_storage().await;
        let shutdown = Shutdown::new();
        let service = IndexerService::new(config, storage, ledger, shutdown.signal());
        (service, shutdown, temp_db)
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_height(5);
        let (service, _shutdown, _temp_db) = service(ledger, test_config()).await;

        assert_eq!(service.state().await, ListenerState::Stopped);
        service.start_listening().await.unwrap();
        service.start_listening().await.unwrap();
        assert!(service.is_listening().await);

        service.stop_listening().await;
        service.stop_listening().await;
        assert!(!service.is_listening().await);
        assert_eq!(service.state().await, ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_startup_catches_up_when_behind() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_height(250);
        let (service, _shutdown, _temp_db) = service(ledger.clone(), test_config()).await;

        service.start_listening().await.unwrap();
        let status = service.status().await.unwrap();
        service.stop_listening().await;

        assert!(status.checkpoint.last_block_number >= 250);
        assert_eq!(ledger.log_calls()[0], (None, 1, 100));
    }

    #[tokio::test]
    async fn test_unreachable_ledger_marks_checkpoint_error() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.fail_next_height(1);
        let (service, _shutdown, _temp_db) = service(ledger, test_config()).await;

        let err = service.start_listening().await.unwrap_err();
        assert!(format!("{err:#}").contains("unreachable"));
        assert_eq!(service.state().await, ListenerState::Stopped);

        let status = service.status().await.unwrap();
        assert_eq!(status.checkpoint.status, CheckpointStatus::Error);
        assert_eq!(status.checkpoint.retry_count, 1);
    }

    #[tokio::test]
    async fn test_unresolved_contract_fails_startup() {
        let mut config = test_config();
        config.contract.address = None;
        config.contract.deployments_dir = "/nonexistent".into();
        let (service, _shutdown, _temp_db) = service(Arc::new(InMemoryLedger::new()), config).await;

        assert!(service.start_listening().await.is_err());
        assert!(!service.is_listening().await);
    }

    #[tokio::test]
    async fn test_run_retries_startup_until_ledger_answers() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.fail_next_height(1);
        let mut config = test_config();
        config.listener.startup_retry_secs = 0;
        let (service, shutdown, _temp_db) = service(ledger, config).await;
        let service = Arc::new(service);

        let runner = {
            let service = service.clone();
            tokio::spawn(async move { service.run().await })
        };
        for _ in 0..200 {
            if service.is_listening().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(service.is_listening().await);

        shutdown.trigger();
        runner.await.unwrap().unwrap();
        assert!(!service.is_listening().await);
    }

    #[tokio::test]
    async fn test_status_reports_counters() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_height(40);
        ledger.push_event(LedgerEvent {
            contract_address: CONTRACT.parse().unwrap(),
            block_number: 10,
            tx_hash: B256::repeat_byte(0x10),
            log_index: 0,
            payload: EventPayload::EvidenceStatusChanged(StatusChangedPayload {
                evidence_id: "EVID-404".to_string(),
                old_status: "pending".to_string(),
                new_status: "effective".to_string(),
                user: None,
            }),
        });
        let (service, _shutdown, _temp_db) = service(ledger, test_config()).await;

        let report = service.sync_range(0, 39).await.unwrap();
        assert_eq!(report.events.failed, 1);

        let status = service.status().await.unwrap();
        assert_eq!(status.state, ListenerState::Stopped);
        assert_eq!(status.unprocessed, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.blocks_behind, Some(1));
        assert!(status.uptime.is_none());
    }

    #[tokio::test]
    async fn test_reset_checkpoint_rewinds() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_height(300);
        let (service, _shutdown, _temp_db) = service(ledger, test_config()).await;

        service.sync_range(0, 299).await.unwrap();
        let record = service.reset_checkpoint(50).await.unwrap();

        assert_eq!(record.last_block_number, 50);
        assert_eq!(record.status, CheckpointStatus::Reset);
    }

    #[tokio::test]
    async fn test_health_check_reports_lag_and_database_state() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_height(1000);
        let (service, _shutdown, _temp_db) = service(ledger, test_config()).await;
        let engine = service.engine().await.unwrap();

        let report = check_health(&engine, &service.storage, ListenerState::Stopped).await;
        assert!(!report.listener_running);
        assert!(report.database_healthy);
        assert!(report.falling_behind);
        assert_eq!(report.progress, Some(0.0));
        assert!(report.unhealthy_processors.is_empty());

        service.storage.close().await;
        let report = check_health(&engine, &service.storage, ListenerState::Running).await;
        assert!(report.listener_running);
        assert!(!report.database_healthy);
    }

    #[tokio::test]
    async fn test_reset_while_listening_rescans_rewound_range() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_height(300);
        let (service, _shutdown, _temp_db) = service(ledger.clone(), test_config()).await;

        service.start_listening().await.unwrap();
        let calls_before = ledger.log_calls().len();
        service.reset_checkpoint(50).await.unwrap();
        ledger.set_height(301);

        let rescanned = |calls: &[(Option<EventKind>, u64, u64)]| {
            EventKind::ALL
                .into_iter()
                .all(|kind| calls.iter().any(|(k, from, _)| *k == Some(kind) && *from == 51))
        };
        for _ in 0..200 {
            if rescanned(&ledger.log_calls()[calls_before..]) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rescanned(&ledger.log_calls()[calls_before..]));
        assert!(service.is_listening().await);

        service.stop_listening().await;
    }
}
