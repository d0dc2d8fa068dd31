//! # Tracking Core
//!
//! Canonical shipment-status model shared by every carrier adapter, plus the
//! pure logic that is easy to get silently wrong: text classification and
//! order reconciliation.
//!
//! Carriers disagree about everything: date formats, zero padding, event
//! vocabularies, even whether a history exists. This crate owns the single
//! vocabulary they are all mapped into:
//!
//! - [`types`] - `TrackingResult`, `TrackingEvent`, `OrderStatus`, and the
//!   `MutationSet` emitted by reconciliation
//! - [`error`] - `CarrierError` with transient/permanent classification
//! - [`text`] - locale date parsing, diacritic-insensitive keyword matching,
//!   status classification, occurrence detection
//! - [`reconcile`] - the policy deciding how a fresh result updates a
//!   persisted order without clobbering trustworthy data
//!
//! Everything here is pure: no I/O, no clocks (callers inject `now`), no
//! global state.

pub mod error;
pub mod reconcile;
pub mod text;
pub mod types;

pub use error::{CarrierError, CarrierResult};
pub use reconcile::{reconcile, EventsMutation, MutationSet, StatusChange};
pub use types::{OrderSnapshot, OrderStatus, TrackingEvent, TrackingResult};
