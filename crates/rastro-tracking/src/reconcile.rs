//! Reconciliation engine.
//!
//! Given a persisted order and a freshly fetched [`TrackingResult`], compute
//! the minimal mutation set to persist. Pure and deterministic: the clock is
//! injected, and reconciliation itself never fails: a well-formed result
//! always yields a (possibly empty) [`MutationSet`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OrderSnapshot, OrderStatus, TrackingEvent, TrackingResult};

/// How the stored event log changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventsMutation {
    /// The adapter returned a full history: replace the stored list wholesale.
    Replace(Vec<TrackingEvent>),
    /// The adapter returned only the current event: prepend it to the
    /// append-only log.
    Prepend(TrackingEvent),
}

/// A status-history record to append alongside an accepted status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    /// Note referencing the triggering tracking event.
    pub note: String,
}

/// The diff to persist. Only fields that actually need to change are set.
///
/// `last_tracking_at` is poll-freshness bookkeeping: it is refreshed on every
/// poll that produced an event and is deliberately excluded from
/// [`MutationSet::is_empty`], so re-applying an unchanged result reads as a
/// no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationSet {
    pub status: Option<OrderStatus>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_tracking: Option<String>,
    pub last_tracking_at: Option<DateTime<Utc>>,
    pub events: Option<EventsMutation>,
    /// Present if and only if `status` is present.
    pub status_change: Option<StatusChange>,
}

impl MutationSet {
    /// True when nothing substantive changed. The freshness stamp
    /// (`last_tracking_at`) does not count.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.shipped_at.is_none()
            && self.estimated_delivery.is_none()
            && self.delivered_at.is_none()
            && self.last_tracking.is_none()
            && self.events.is_none()
            && self.status_change.is_none()
    }

    /// Restrict to date-fill fields, for backfill mode: no status transition,
    /// no event or history writes.
    pub fn retain_dates_only(self) -> Self {
        Self {
            shipped_at: self.shipped_at,
            estimated_delivery: self.estimated_delivery,
            ..Self::default()
        }
    }
}

/// Compute the mutation set for one fresh tracking result.
///
/// Rules, in order:
///
/// 1. `shipped_at` fills only when currently unset: a manually entered or
///    previously fetched ship date is never overwritten.
/// 2. `estimated_delivery` always takes the carrier's latest value, even
///    overwriting; ETAs legitimately change over time, so rule 1's
///    fill-only guard does not apply here.
/// 3. `last_tracking`/`last_tracking_at` refresh whenever the result carries
///    an event (the description only when it actually changed).
/// 4. A full history replaces the stored log; a lone event is prepended only
///    if its description differs from the newest stored entry. The dedup is
///    description-only against that single head entry: a same-text event
///    with a changed date is dropped, and a recurring text after an
///    unrelated event is re-added. Observed policy, kept as-is.
/// 5. `status` changes only when classified and different, whether or not the
///    result carries event text; a transition to DELIVERED stamps
///    `delivered_at = now`; every accepted change carries exactly one
///    status-history record.
pub fn reconcile(order: &OrderSnapshot, result: &TrackingResult, now: DateTime<Utc>) -> MutationSet {
    let mut mutation = MutationSet::default();

    // Rule 1: shipped_at fill, never overwrite.
    if order.shipped_at.is_none() {
        mutation.shipped_at = result.shipped_at;
    }

    // Rule 2: latest carrier ETA always wins.
    if let Some(eta) = result.estimated_delivery {
        if order.estimated_delivery != Some(eta) {
            mutation.estimated_delivery = Some(eta);
        }
    }

    if let Some(last_event) = result.last_event.as_deref() {
        // Rule 3: freshness stamp on every poll that produced an event.
        mutation.last_tracking_at = Some(now);
        if order.last_tracking.as_deref() != Some(last_event) {
            mutation.last_tracking = Some(last_event.to_string());
        }

        // Rule 4: event-log merge.
        mutation.events = merge_events(order, result, now);
    } else if let Some(events) = result.events.as_ref().filter(|e| !e.is_empty()) {
        // Full history without a last-event string still replaces the log.
        if order.tracking_events != *events {
            mutation.events = Some(EventsMutation::Replace(events.clone()));
        }
    }

    // Rule 5: status transition. Independent of the event text; some carriers
    // classify without reporting one.
    if let Some(new_status) = result.status {
        if new_status != order.status {
            mutation.status = Some(new_status);
            if new_status == OrderStatus::Delivered {
                mutation.delivered_at = Some(now);
            }
            let note = match result.last_event.as_deref() {
                Some(last_event) => {
                    format!("Atualizado automaticamente via rastreamento: {last_event}")
                }
                None => "Atualizado automaticamente via rastreamento".to_string(),
            };
            mutation.status_change = Some(StatusChange {
                status: new_status,
                note,
            });
        }
    }

    mutation
}

fn merge_events(
    order: &OrderSnapshot,
    result: &TrackingResult,
    now: DateTime<Utc>,
) -> Option<EventsMutation> {
    match result.events.as_ref().filter(|e| !e.is_empty()) {
        Some(full_history) => {
            if order.tracking_events == *full_history {
                None
            } else {
                Some(EventsMutation::Replace(full_history.clone()))
            }
        }
        None => {
            let description = result.last_event.as_deref()?;
            let head = order.tracking_events.first();
            if head.map(|e| e.description.as_str()) == Some(description) {
                return None;
            }
            Some(EventsMutation::Prepend(TrackingEvent::new(Some(now), description)))
        }
    }
}
