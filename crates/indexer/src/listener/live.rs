//! Live event streams, one per event kind.
//!
//! Each kind runs its own task:
//!
//! ```text
//! Stopped ──start──► Starting ──► Running ──stream error──► Restarting ──delay──► Running
//!    ▲                                                           │
//!    └───────────────────────────── stop ────────────────────────┘
//! ```
//!
//! Streams report the highest block they have fully delivered. The checkpoint
//! only moves to the lowest of those heights, so a restart never skips an
//! event that one stream has not delivered yet.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy::primitives::Address;
use evidence_core::EventKind;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::checkpoint::SyncCheckpoint;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::ledger::{LedgerClient, LogSubscription, SubscriptionItem};
use crate::pipeline::IngestPipeline;
use crate::shutdown::{Shutdown, ShutdownSignal};

/// State of one event kind's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// No task.
    Stopped,
    /// Opening the first subscription.
    Starting,
    /// Delivering events.
    Running,
    /// Waiting to resubscribe after a stream error.
    Restarting,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionState::Stopped => "stopped",
            SubscriptionState::Starting => "starting",
            SubscriptionState::Running => "running",
            SubscriptionState::Restarting => "restarting",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct Active {
    shutdown: Option<Shutdown>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
struct StreamContext {
    ledger: Arc<dyn LedgerClient>,
    pipeline: IngestPipeline,
    checkpoint: SyncCheckpoint,
    config: SyncConfig,
    contract: Address,
    states: Arc<RwLock<HashMap<EventKind, SubscriptionState>>>,
    scanned: Arc<Mutex<HashMap<EventKind, u64>>>,
}

impl StreamContext {
    async fn set_state(&self, kind: EventKind, state: SubscriptionState) {
        self.states.write().await.insert(kind, state);
    }

    /// Record a stream's scanned height and move the checkpoint to the
    /// lowest height reported by all streams.
    async fn record_scanned(&self, kind: EventKind, height: u64) {
        let low_water = {
            let mut scanned = self.scanned.lock().await;
            scanned.insert(kind, height);
            if scanned.len() < EventKind::ALL.len() {
                return;
            }
            scanned.values().copied().min()
        };

        if let Some(block) = low_water {
            if let Err(e) = self.checkpoint.advance(block).await {
                warn!(block, error = %e, "Failed to advance checkpoint from live stream");
            }
        }
    }

    async fn resume_block(&self, kind: EventKind, fallback: Option<u64>) -> Option<u64> {
        match self.checkpoint.last_synced().await {
            Ok(last) => Some(last + 1),
            Err(e) => {
                warn!(event_type = %kind, error = %e, "Failed to read checkpoint for resubscribe");
                fallback
            }
        }
    }
}

/// Owner of the live streams.
pub struct LiveSubscriptionManager {
    ctx: StreamContext,
    active: Mutex<Active>,
}

impl LiveSubscriptionManager {
    /// Create a stopped manager.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        pipeline: IngestPipeline,
        checkpoint: SyncCheckpoint,
        config: SyncConfig,
    ) -> Self {
        let contract = pipeline.contract();
        let states = EventKind::ALL
            .into_iter()
            .map(|kind| (kind, SubscriptionState::Stopped))
            .collect();

        Self {
            ctx: StreamContext {
                ledger,
                pipeline,
                checkpoint,
                config,
                contract,
                states: Arc::new(RwLock::new(states)),
                scanned: Arc::new(Mutex::new(HashMap::new())),
            },
            active: Mutex::new(Active::default()),
        }
    }

    /// Open one stream per event kind from `checkpoint + 1`, or from the
    /// head when the checkpoint is still at genesis. No-op when running.
    pub async fn start(&self) -> Result<()> {
        let last = self.ctx.checkpoint.last_synced().await?;
        self.start_from((last > 0).then_some(last + 1)).await
    }

    /// Open one stream per event kind from `from_block`, or from the head
    /// when `None`. No-op when running.
    pub async fn start_from(&self, from_block: Option<u64>) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.shutdown.is_some() {
            debug!("Live subscriptions already running");
            return Ok(());
        }
        self.ctx.scanned.lock().await.clear();

        let shutdown = Shutdown::new();
        for kind in EventKind::ALL {
            self.ctx.set_state(kind, SubscriptionState::Starting).await;
            let ctx = self.ctx.clone();
            let signal = shutdown.signal();
            active
                .tasks
                .push(tokio::spawn(run_stream(ctx, kind, from_block, signal)));
        }
        active.shutdown = Some(shutdown);

        info!(
            from_block = ?from_block,
            streams = EventKind::ALL.len(),
            "Live subscriptions started"
        );
        Ok(())
    }

    /// Dispose every stream and wait for in-flight events to finish.
    /// Safe to call when already stopped.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(shutdown) = active.shutdown.take() else {
            return;
        };
        shutdown.trigger();

        for task in active.tasks.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Live stream task panicked");
                }
            }
        }
        for kind in EventKind::ALL {
            self.ctx.set_state(kind, SubscriptionState::Stopped).await;
        }
        info!("Live subscriptions stopped");
    }

    /// Whether streams are open.
    pub async fn is_running(&self) -> bool {
        self.active.lock().await.shutdown.is_some()
    }

    /// State of every stream.
    pub async fn states(&self) -> Vec<(EventKind, SubscriptionState)> {
        let states = self.ctx.states.read().await;
        EventKind::ALL
            .into_iter()
            .map(|kind| {
                let state = states.get(&kind).copied().unwrap_or(SubscriptionState::Stopped);
                (kind, state)
            })
            .collect()
    }
}

impl fmt::Debug for LiveSubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSubscriptionManager")
            .field("contract", &self.ctx.contract)
            .finish()
    }
}

async fn run_stream(
    ctx: StreamContext,
    kind: EventKind,
    initial_block: Option<u64>,
    shutdown: ShutdownSignal,
) {
    let mut from_block = initial_block;

    loop {
        let mut subscription = LogSubscription::open(
            ctx.ledger.clone(),
            ctx.contract,
            kind,
            from_block,
            ctx.config.poll_interval(),
        );
        ctx.set_state(kind, SubscriptionState::Running).await;
        debug!(event_type = %kind, from_block = ?from_block, "Subscribed");

        let mut last_scanned = None;
        let reason = loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => {
                    subscription.dispose();
                    ctx.set_state(kind, SubscriptionState::Stopped).await;
                    return;
                }
                item = subscription.next() => item,
            };

            match item {
                Some(Ok(SubscriptionItem::Event(event))) => {
                    if let Err(e) = ctx.pipeline.ingest_live(&event).await {
                        break format!("failed to ingest event at block {}: {}", event.block_number, e);
                    }
                }
                Some(Ok(SubscriptionItem::Scanned(height))) => {
                    last_scanned = Some(height);
                    ctx.record_scanned(kind, height).await;
                }
                Some(Err(e)) => break e.to_string(),
                None => break "stream closed".to_string(),
            }
        };
        subscription.dispose();

        warn!(
            event_type = %kind,
            reason = %reason,
            delay_ms = ctx.config.resubscribe_delay_ms,
            "Live subscription failed, resubscribing after delay"
        );
        ctx.set_state(kind, SubscriptionState::Restarting).await;

        if !shutdown.sleep(ctx.config.resubscribe_delay()).await {
            ctx.set_state(kind, SubscriptionState::Stopped).await;
            return;
        }

        let fallback = last_scanned.map(|h| h + 1).or(from_block);
        from_block = ctx.resume_block(kind, fallback).await;
    }
}
