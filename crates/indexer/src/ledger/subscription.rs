//! Per-event-type live log subscription.
//!
//! A subscription is a background task polling [`LedgerClient::logs_in_range`]
//! from a start block up to the moving head. Items arrive on a channel in
//! chain order; after each scanned range a [`SubscriptionItem::Scanned`]
//! marker reports the highest block fully covered. The first error ends the
//! stream, and the consumer decides whether to resubscribe.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use evidence_core::EventKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::events::LedgerEvent;
use super::{LedgerClient, LedgerResult};

const CHANNEL_CAPACITY: usize = 256;

/// One element of a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionItem {
    /// A new event.
    Event(LedgerEvent),
    /// Every block up to and including this one has been delivered.
    Scanned(u64),
}

/// Handle on a running subscription.
pub struct LogSubscription {
    kind: EventKind,
    rx: mpsc::Receiver<LedgerResult<SubscriptionItem>>,
    handle: Option<JoinHandle<()>>,
}

impl LogSubscription {
    /// Start streaming `kind` events emitted by `contract`.
    ///
    /// With `from_block = None` the stream starts at the head at the time of
    /// the call.
    pub fn open(
        client: Arc<dyn LedgerClient>,
        contract: Address,
        kind: EventKind,
        from_block: Option<u64>,
        poll_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(poll_loop(
            client,
            contract,
            kind,
            from_block,
            poll_interval,
            tx,
        ));

        Self {
            kind,
            rx,
            handle: Some(handle),
        }
    }

    /// Event kind this subscription carries.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next item, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<LedgerResult<SubscriptionItem>> {
        self.rx.recv().await
    }

    /// Whether the polling task is still attached.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the polling task. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(kind = %self.kind, "Disposing subscription");
            handle.abort();
        }
        self.rx.close();
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn poll_loop(
    client: Arc<dyn LedgerClient>,
    contract: Address,
    kind: EventKind,
    from_block: Option<u64>,
    poll_interval: Duration,
    tx: mpsc::Sender<LedgerResult<SubscriptionItem>>,
) {
    let mut next_block = match from_block {
        Some(block) => block,
        None => match client.current_block_height().await {
            Ok(head) => head,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        },
    };

    loop {
        let head = match client.current_block_height().await {
            Ok(head) => head,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        if head >= next_block {
            let events = match client
                .logs_in_range(contract, Some(kind), next_block, head)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            for event in events {
                if tx.send(Ok(SubscriptionItem::Event(event))).await.is_err() {
                    return;
                }
            }
            if tx.send(Ok(SubscriptionItem::Scanned(head))).await.is_err() {
                return;
            }
            next_block = head + 1;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = tx.closed() => return,
        }
    }
}
