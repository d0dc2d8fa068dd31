//! Adapter dispatcher.
//!
//! Maps a carrier's configured tracking system to the adapter that speaks it,
//! checking per-kind preconditions first: a carrier misconfigured for
//! tracking is a skip, not an error, and must never cost a network call or a
//! browser launch.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use rastro_tracking::{CarrierResult, TrackingResult};

use crate::adapter::{CarrierTracker, TrackQuery};
use crate::portal::is_supported_portal_code;

/// Which tracking backend a carrier is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingSystem {
    Ssw,
    Senior,
    AtualCargas,
    Rodonaves,
    SaoMiguel,
    Braspress,
    /// Browser-automated portal; the route identifier selects which.
    Portal,
    /// Carrier has no tracking integration.
    #[default]
    None,
}

impl TrackingSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingSystem::Ssw => "SSW",
            TrackingSystem::Senior => "SENIOR",
            TrackingSystem::AtualCargas => "ATUAL_CARGAS",
            TrackingSystem::Rodonaves => "RODONAVES",
            TrackingSystem::SaoMiguel => "SAO_MIGUEL",
            TrackingSystem::Braspress => "BRASPRESS",
            TrackingSystem::Portal => "PORTAL",
            TrackingSystem::None => "NONE",
        }
    }
}

impl std::fmt::Display for TrackingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A carrier's tracking configuration as stored on the carrier record.
#[derive(Debug, Clone, Default)]
pub struct CarrierRoute {
    pub system: TrackingSystem,
    /// System-specific parameter: SSW network code, Senior tenant, portal
    /// code.
    pub identifier: Option<String>,
}

impl CarrierRoute {
    pub fn new(system: TrackingSystem) -> Self {
        Self {
            system,
            identifier: None,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    fn identifier_trimmed(&self) -> Option<&str> {
        self.identifier.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Why a route was skipped instead of tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// `TrackingSystem::None` or a system with no adapter wired in.
    NoIntegration,
    /// Senior without a tenant identifier.
    MissingIdentifier,
    /// Portal code with no automation behind it.
    UnsupportedPortal { code: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoIntegration => f.write_str("no tracking integration configured"),
            SkipReason::MissingIdentifier => f.write_str("tracking system requires an identifier"),
            SkipReason::UnsupportedPortal { code } => {
                write!(f, "no portal automation for code {code}")
            }
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Tracked(TrackingResult),
    Skipped(SkipReason),
}

/// Dispatch seam for the sync orchestrator; tests substitute a fake.
#[async_trait]
pub trait DispatchTracking: Send + Sync {
    async fn track(&self, route: &CarrierRoute, query: &TrackQuery)
        -> CarrierResult<DispatchOutcome>;

    /// Whether the routed system can produce ship/ETA dates; backfill runs
    /// skip the ones that cannot.
    fn supports_date_backfill(&self, system: TrackingSystem) -> bool;
}

/// Production dispatcher owning one adapter instance per system.
///
/// Adapters are optional so a deployment without, say, Braspress credentials
/// still tracks every other carrier; routes to an absent adapter skip.
#[derive(Default)]
pub struct Dispatcher {
    ssw: Option<Arc<dyn CarrierTracker>>,
    senior: Option<Arc<dyn CarrierTracker>>,
    atual: Option<Arc<dyn CarrierTracker>>,
    rodonaves: Option<Arc<dyn CarrierTracker>>,
    sao_miguel: Option<Arc<dyn CarrierTracker>>,
    braspress: Option<Arc<dyn CarrierTracker>>,
    portal: Option<Arc<dyn CarrierTracker>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ssw(mut self, adapter: Arc<dyn CarrierTracker>) -> Self {
        self.ssw = Some(adapter);
        self
    }

    pub fn with_senior(mut self, adapter: Arc<dyn CarrierTracker>) -> Self {
        self.senior = Some(adapter);
        self
    }

    pub fn with_atual(mut self, adapter: Arc<dyn CarrierTracker>) -> Self {
        self.atual = Some(adapter);
        self
    }

    pub fn with_rodonaves(mut self, adapter: Arc<dyn CarrierTracker>) -> Self {
        self.rodonaves = Some(adapter);
        self
    }

    pub fn with_sao_miguel(mut self, adapter: Arc<dyn CarrierTracker>) -> Self {
        self.sao_miguel = Some(adapter);
        self
    }

    pub fn with_braspress(mut self, adapter: Arc<dyn CarrierTracker>) -> Self {
        self.braspress = Some(adapter);
        self
    }

    pub fn with_portal(mut self, adapter: Arc<dyn CarrierTracker>) -> Self {
        self.portal = Some(adapter);
        self
    }

    fn adapter_for(&self, system: TrackingSystem) -> Option<&Arc<dyn CarrierTracker>> {
        match system {
            TrackingSystem::Ssw => self.ssw.as_ref(),
            TrackingSystem::Senior => self.senior.as_ref(),
            TrackingSystem::AtualCargas => self.atual.as_ref(),
            TrackingSystem::Rodonaves => self.rodonaves.as_ref(),
            TrackingSystem::SaoMiguel => self.sao_miguel.as_ref(),
            TrackingSystem::Braspress => self.braspress.as_ref(),
            TrackingSystem::Portal => self.portal.as_ref(),
            TrackingSystem::None => None,
        }
    }

    /// Precondition check, run before any adapter work.
    fn check_route(&self, route: &CarrierRoute) -> Option<SkipReason> {
        match route.system {
            TrackingSystem::None => Some(SkipReason::NoIntegration),
            TrackingSystem::Senior if route.identifier_trimmed().is_none() => {
                Some(SkipReason::MissingIdentifier)
            }
            TrackingSystem::Portal => match route.identifier_trimmed() {
                None => Some(SkipReason::UnsupportedPortal {
                    code: String::new(),
                }),
                Some(code) if !is_supported_portal_code(code) => {
                    Some(SkipReason::UnsupportedPortal {
                        code: code.to_string(),
                    })
                }
                Some(_) => None,
            },
            _ => None,
        }
    }
}

#[async_trait]
impl DispatchTracking for Dispatcher {
    #[instrument(skip(self, query), fields(system = %route.system, invoice = %query.invoice()))]
    async fn track(
        &self,
        route: &CarrierRoute,
        query: &TrackQuery,
    ) -> CarrierResult<DispatchOutcome> {
        if let Some(reason) = self.check_route(route) {
            debug!(reason = %reason, "route skipped");
            return Ok(DispatchOutcome::Skipped(reason));
        }

        let Some(adapter) = self.adapter_for(route.system) else {
            debug!("no adapter wired for system, skipping");
            return Ok(DispatchOutcome::Skipped(SkipReason::NoIntegration));
        };

        let query = query
            .clone()
            .with_carrier_param(route.identifier_trimmed().map(str::to_string));
        let result = adapter.track(&query).await?;
        Ok(DispatchOutcome::Tracked(result))
    }

    fn supports_date_backfill(&self, system: TrackingSystem) -> bool {
        match system {
            TrackingSystem::Braspress | TrackingSystem::Portal | TrackingSystem::None => false,
            _ => self
                .adapter_for(system)
                .map_or(false, |a| a.supports_date_extraction()),
        }
    }
}
