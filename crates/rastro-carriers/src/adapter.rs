//! Carrier adapter contract.

use async_trait::async_trait;

use rastro_tracking::text::{normalize_invoice_number, only_digits};
use rastro_tracking::{CarrierResult, TrackingResult};

/// Which party's document number the carrier should be queried by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupSide {
    #[default]
    Sender,
    Recipient,
}

/// One "order, carrier" lookup.
///
/// Documents and invoice numbers arrive in whatever shape the order store
/// holds them (punctuated CNPJs, zero-padded invoice numbers); the accessors
/// normalize them the way every carrier expects.
#[derive(Debug, Clone)]
pub struct TrackQuery {
    pub sender_document: String,
    pub invoice_number: String,
    pub recipient_document: Option<String>,
    pub lookup_side: LookupSide,
    /// Per-carrier opaque parameter from the carrier config: SSW network
    /// code, Senior tenant name, or portal code.
    pub carrier_param: Option<String>,
}

impl TrackQuery {
    pub fn new(sender_document: impl Into<String>, invoice_number: impl Into<String>) -> Self {
        Self {
            sender_document: sender_document.into(),
            invoice_number: invoice_number.into(),
            recipient_document: None,
            lookup_side: LookupSide::Sender,
            carrier_param: None,
        }
    }

    pub fn with_recipient(mut self, document: impl Into<String>) -> Self {
        self.recipient_document = Some(document.into());
        self
    }

    pub fn with_lookup_side(mut self, side: LookupSide) -> Self {
        self.lookup_side = side;
        self
    }

    pub fn with_carrier_param(mut self, param: Option<String>) -> Self {
        self.carrier_param = param;
        self
    }

    /// Sender document, digits only.
    pub fn sender_digits(&self) -> String {
        only_digits(&self.sender_document)
    }

    /// The document to query by, honoring [`LookupSide`]. Falls back to the
    /// sender when no recipient document is known.
    pub fn lookup_digits(&self) -> String {
        match self.lookup_side {
            LookupSide::Sender => self.sender_digits(),
            LookupSide::Recipient => self
                .recipient_document
                .as_deref()
                .map(only_digits)
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| self.sender_digits()),
        }
    }

    /// Invoice number with non-digits and leading zeros stripped.
    pub fn invoice(&self) -> String {
        normalize_invoice_number(&self.invoice_number)
    }
}

/// Capability trait implemented by every carrier adapter.
///
/// `track` either returns a normalized [`TrackingResult`]: including the
/// benign "not located" result: or fails with a transport/credential error.
/// Callers must distinguish the two: an error counts against the order, an
/// empty result is a normal no-op.
#[async_trait]
pub trait CarrierTracker: Send + Sync {
    /// Short name used in logs.
    fn carrier_name(&self) -> &'static str;

    /// Whether this backend exposes ship/ETA dates. Adapters that never do
    /// are excluded from date backfill runs.
    fn supports_date_extraction(&self) -> bool {
        true
    }

    async fn track(&self, query: &TrackQuery) -> CarrierResult<TrackingResult>;
}
