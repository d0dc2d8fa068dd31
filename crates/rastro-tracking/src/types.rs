//! Canonical tracking types.
//!
//! Every adapter, whatever its wire protocol, maps into [`TrackingResult`].
//! The status is always derived from event *text* (or an adapter's explicit
//! code table) by this crate's classifier vocabulary, never passed through
//! verbatim from a carrier, so downstream code sees one status enum
//! regardless of source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical order status.
///
/// No total "progress" order is assumed: transitions are driven by
/// classification, and a carrier can jump straight from `Pending` to
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Terminal statuses are not re-polled by the sync loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::InTransit => write!(f, "IN_TRANSIT"),
            OrderStatus::Delivered => write!(f, "DELIVERED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// One carrier-reported occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Event timestamp, when the carrier exposes one.
    pub date: Option<DateTime<Utc>>,
    /// Human-readable description, as reported.
    pub description: String,
}

impl TrackingEvent {
    pub fn new(date: Option<DateTime<Utc>>, description: impl Into<String>) -> Self {
        Self {
            date,
            description: description.into(),
        }
    }
}

/// Normalized output of one adapter call. Ephemeral: never persisted as-is;
/// the reconciliation engine decides what actually reaches the order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingResult {
    /// Canonical status inferred from the latest event; `None` when the text
    /// is ambiguous or unrecognized.
    pub status: Option<OrderStatus>,
    /// Description of the latest occurrence.
    pub last_event: Option<String>,
    /// Carrier-reported collection/dispatch date.
    pub shipped_at: Option<DateTime<Utc>>,
    /// Carrier-reported delivery ETA.
    pub estimated_delivery: Option<DateTime<Utc>>,
    /// True if any event matches a delivery-problem signature.
    #[serde(default)]
    pub has_occurrence: bool,
    /// Full history, most-recent-first, when the carrier exposes one.
    /// `None` when only a single latest-event string is available.
    pub events: Option<Vec<TrackingEvent>>,
    /// Raw payload kept for diagnostics, never interpreted downstream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl TrackingResult {
    /// A result carrying no tracking data at all (carrier had nothing yet).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The benign "not located" outcome. Distinct from a transport error:
    /// callers must treat this as a normal no-op result.
    pub fn not_located(detail: impl Into<String>) -> Self {
        Self {
            last_event: Some(format!("Não localizado ({})", detail.into())),
            ..Self::default()
        }
    }

    /// Whether the carrier reported anything usable.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.last_event.is_none()
            && self.shipped_at.is_none()
            && self.estimated_delivery.is_none()
            && self.events.as_ref().map_or(true, |e| e.is_empty())
    }
}

/// Read view of a persisted order, as the reconciliation engine sees it.
///
/// The order's lifecycle is owned by the order-management collaborator; the
/// core only reads these fields to decide a minimal mutation set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub status: OrderStatus,
    pub shipped_at: Option<DateTime<Utc>>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Latest tracking description previously recorded.
    pub last_tracking: Option<String>,
    /// Stored event log, most-recent-first.
    #[serde(default)]
    pub tracking_events: Vec<TrackingEvent>,
}

impl OrderSnapshot {
    /// Snapshot of a freshly created order with no tracking data.
    pub fn new(status: OrderStatus) -> Self {
        Self {
            status,
            shipped_at: None,
            estimated_delivery: None,
            delivered_at: None,
            last_tracking: None,
            tracking_events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::InTransit.is_terminal());
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serde_uses_wire_names() {
        let json = serde_json::to_string(&OrderStatus::InTransit).unwrap();
        assert_eq!(json, "\"IN_TRANSIT\"");
        let back: OrderStatus = serde_json::from_str("\"DELIVERED\"").unwrap();
        assert_eq!(back, OrderStatus::Delivered);
    }

    #[test]
    fn not_located_is_benign() {
        let result = TrackingResult::not_located("NF 9089");
        assert!(result.status.is_none());
        assert_eq!(result.last_event.as_deref(), Some("Não localizado (NF 9089)"));
        assert!(!result.is_empty()); // it does carry a last_event
    }

    #[test]
    fn empty_result() {
        assert!(TrackingResult::empty().is_empty());
    }
}
