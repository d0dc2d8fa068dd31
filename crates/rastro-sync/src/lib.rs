//! # Tracking Sync Orchestrator
//!
//! Batch driver for carrier tracking: reads trackable orders from an
//! [`OrderStore`], routes each through the carrier dispatcher, reconciles the
//! result against the stored order, and persists the diff. Strictly
//! sequential with configurable pacing, because carriers rate-limit and
//! browser portals cannot run concurrently.
//!
//! Two entry points:
//!
//! - [`SyncOrchestrator::run_sync`] - full tracking pass over active orders
//! - [`SyncOrchestrator::run_backfill`] - date-only pass over orders missing
//!   ship/ETA dates, skipping carriers that never report dates

pub mod orchestrator;
pub mod store;

pub use orchestrator::{SyncConfig, SyncOrchestrator, SyncReport};
pub use store::{OrderSelection, OrderStore, StoreError, TrackableOrder};
