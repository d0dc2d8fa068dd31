//! Order persistence seam.
//!
//! The sync loop never owns orders; it reads trackable ones from an
//! [`OrderStore`] and writes back minimal diffs. The store is whatever the
//! host application persists orders in.

use async_trait::async_trait;
use thiserror::Error;

use rastro_carriers::{CarrierRoute, LookupSide};
use rastro_tracking::{MutationSet, OrderSnapshot, StatusChange};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The order vanished between the query and the write. Per-order, never
    /// fatal to a batch.
    #[error("order {order_id} not found")]
    NotFound { order_id: String },

    #[error("store backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    pub fn not_found(order_id: impl Into<String>) -> Self {
        StoreError::NotFound {
            order_id: order_id.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StoreError::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Which orders a sync run works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSelection {
    /// Orders still in motion: not delivered, not cancelled.
    ActiveTracking,
    /// Orders missing a ship date or ETA, regardless of status.
    MissingDates,
}

/// One order as the sync loop sees it.
#[derive(Debug, Clone)]
pub struct TrackableOrder {
    pub id: String,
    pub order_number: String,
    pub sender_document: String,
    pub invoice_number: String,
    pub recipient_document: Option<String>,
    /// Which document the carrier wants the lookup keyed by.
    pub lookup_side: LookupSide,
    pub route: CarrierRoute,
    pub snapshot: OrderSnapshot,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_trackable(
        &self,
        selection: OrderSelection,
    ) -> Result<Vec<TrackableOrder>, StoreError>;

    /// Persist a mutation set. Applying an empty set must be a no-op.
    async fn apply(&self, order_id: &str, mutation: &MutationSet) -> Result<(), StoreError>;

    /// Append one status-history record.
    async fn append_status_history(
        &self,
        order_id: &str,
        change: &StatusChange,
    ) -> Result<(), StoreError>;
}
