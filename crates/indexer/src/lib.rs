//! Evidence contract event ingestion.
//!
//! This crate provides:
//! - Historical replay of closed block ranges in checkpointed batches
//! - Live subscriptions, one stream per event kind
//! - Idempotent storage of raw contract events
//! - Type processors that maintain the evidence projection
//! - A coordinator with startup retry, unprocessed sweeps and health checks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  evidence-indexer                           │
//! │                                             │
//! │  ┌────────────────┐   ┌────────────────┐    │
//! │  │ HistoricalSync │   │ LiveSubscription│ ← Ledger RPC
//! │  │  (batches)     │   │  (3 streams)    │   EvidenceSubmitted
//! │  └───────┬────────┘   └───────┬─────────┘   EvidenceStatusChanged
//! │          └─────────┬──────────┘             EvidenceRevoked
//! │               ┌────▼──────────┐             │
//! │               │ IngestPipeline│             │
//! │               └────┬──────────┘             │
//! │          ┌─────────┴──────────┐             │
//! │     ┌────▼──────┐      ┌──────▼──────────┐  │
//! │     │EventStore │      │ProcessorRegistry│  │
//! │     │(raw_events)│     │ submitted       │  │
//! │     └────┬──────┘      │ status_changed  │  │
//! │          │             │ revoked         │  │
//! │          │             └──────┬──────────┘  │
//! │          ▼                    ▼             │
//! │        SQLite ◄──── evidence, checkpoints   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every store write goes through a [`retry::RetryExecutor`]; waits observe
//! a [`shutdown::ShutdownSignal`] so `stop_listening` returns promptly.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod config;
pub mod contracts;
pub mod error;
pub mod event_store;
pub mod ledger;
pub mod listener;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod service;
pub mod shutdown;
pub mod storage;

pub use error::{DispatchError, EventProcessingError, IngestionError, LedgerError};
pub use service::{IndexerService, ListenerState, ListenerStatus};

// Re-export common types
pub use evidence_core::{types::*, *};
