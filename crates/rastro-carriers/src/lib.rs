//! # Carrier Adapters
//!
//! One adapter per third-party tracking backend, each speaking that carrier's
//! protocol, REST/JSON in two incompatible shapes, HTML table scrapes with a
//! CSV side channel, session-cookie APIs, signed-token APIs, plain Basic-auth
//! endpoints, and a CAPTCHA-protected portal driven through a browser: all
//! mapped into the canonical [`rastro_tracking::TrackingResult`].
//!
//! ## Architecture
//!
//! - [`adapter`] - the [`CarrierTracker`] capability trait and [`TrackQuery`]
//! - [`http`] - shared client construction and 429 retry/backoff
//! - [`ssw`], [`senior`], [`atual`], [`rodonaves`], [`sao_miguel`],
//!   [`braspress`], [`portal`] - the adapters
//! - [`dispatch`] - maps a carrier's configured tracking system to an adapter,
//!   enforcing per-kind preconditions before invocation
//!
//! Every adapter is independently testable against a mocked transport: the
//! REST adapters take their endpoint URLs from config (pointed at a wiremock
//! server in tests), and the portal adapter drives a [`portal::BrowserSession`]
//! trait object.

pub mod adapter;
pub mod atual;
pub mod braspress;
pub mod dispatch;
pub mod http;
pub mod portal;
pub mod rodonaves;
pub mod sao_miguel;
pub mod senior;
pub mod ssw;

pub use adapter::{CarrierTracker, LookupSide, TrackQuery};
pub use dispatch::{
    CarrierRoute, DispatchOutcome, DispatchTracking, Dispatcher, SkipReason, TrackingSystem,
};

// Re-export async_trait for adapter implementors
pub use async_trait::async_trait;
