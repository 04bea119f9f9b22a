//! Request boundary: the operations the HTTP layer (or any other caller) uses.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::gateway::{
    CrowdSubmission, DangerReport, EventSubmission, HazardIngestionGateway, Receipt, Rejection,
};
use crate::geo_point::GeoPoint;
use crate::hazard::{CrowdReport, EventRecord, HazardId, HazardModel, HazardZone};
use crate::provider::{DirectionsProvider, DirectionsRequest, TravelMode};
use crate::ranker::{RankedRoutes, RankingMode, RouteRanker};
use crate::route::{RawRoute, RouteNormalizer};
use crate::scorer::SafetyScorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardCounts {
    pub danger_zones: usize,
    pub active_danger_zones: usize,
    pub crowd_reports: usize,
    pub events: usize,
}

pub struct SafeRouteService<P> {
    config: Arc<EngineConfig>,
    hazards: Arc<HazardModel>,
    gateway: HazardIngestionGateway,
    provider: P,
    normalizer: RouteNormalizer,
    scorer: SafetyScorer,
    ranker: RouteRanker,
}

impl<P: DirectionsProvider> SafeRouteService<P> {
    pub fn new(hazards: Arc<HazardModel>, provider: P) -> Self {
        let config = Arc::new(hazards.config().clone());
        Self {
            gateway: HazardIngestionGateway::new(Arc::clone(&hazards)),
            normalizer: RouteNormalizer::new(&config),
            scorer: SafetyScorer::new(&config),
            ranker: RouteRanker::new(&config),
            config,
            hazards,
            provider,
        }
    }

    pub fn hazards(&self) -> &Arc<HazardModel> {
        &self.hazards
    }

    /// Fetches alternatives from the provider, then scores and ranks them.
    pub async fn score_and_rank_routes(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        mode: RankingMode,
    ) -> Result<RankedRoutes> {
        self.plan(
            DirectionsRequest {
                origin,
                destination,
                travel_mode: TravelMode::Walking,
            },
            mode,
        )
        .await
    }

    pub async fn plan(&self, request: DirectionsRequest, mode: RankingMode) -> Result<RankedRoutes> {
        request
            .origin
            .validate()
            .map_err(|_| Error::validation("origin", "origin is outside valid bounds"))?;
        request
            .destination
            .validate()
            .map_err(|_| Error::validation("destination", "destination is outside valid bounds"))?;

        let timeout = Duration::from_secs(self.config.provider_timeout_secs);
        let raw = match tokio::time::timeout(timeout, self.provider.directions(&request)).await {
            Ok(Ok(routes)) => routes,
            Ok(Err(e)) => {
                log::warn!("Directions provider failed: {e}");
                return Err(match e {
                    Error::ProviderUnavailable(_) => e,
                    other => Error::ProviderUnavailable(other.to_string()),
                });
            }
            Err(_) => {
                log::warn!("Directions provider timed out after {timeout:?}");
                return Err(Error::ProviderUnavailable(format!(
                    "no response within {}s",
                    timeout.as_secs()
                )));
            }
        };

        log::info!(
            "Provider returned {} {} alternatives",
            raw.len(),
            request.travel_mode
        );
        self.rank_alternatives(&raw, mode, Utc::now())
    }

    /// Scores and ranks alternatives the caller already has, against one hazard snapshot.
    pub fn rank_alternatives(
        &self,
        raw: &[RawRoute],
        mode: RankingMode,
        now: DateTime<Utc>,
    ) -> Result<RankedRoutes> {
        if raw.is_empty() {
            return Err(Error::NoCandidates);
        }
        let candidates = self.normalizer.normalize(raw)?;
        let snapshot = self.hazards.snapshot();
        let scored = self.scorer.score_all(&candidates, &snapshot, now)?;
        let ranked = self.ranker.rank(scored, mode)?;

        if let Some(best) = ranked.best() {
            log::info!(
                "Ranked {} routes ({mode}); best is route {} with safety score {:.1}",
                ranked.routes.len(),
                best.scored.route.id,
                best.scored.safety_score
            );
        }
        Ok(ranked)
    }

    pub fn report_danger(&self, report: DangerReport) -> std::result::Result<Receipt, Rejection> {
        self.gateway.report_danger(report)
    }

    pub fn report_crowd(&self, report: CrowdSubmission) -> std::result::Result<Receipt, Rejection> {
        self.gateway.report_crowd(report)
    }

    pub fn add_event(&self, event: EventSubmission) -> std::result::Result<Receipt, Rejection> {
        self.gateway.add_event(event)
    }

    pub fn expire_danger_zone(&self, id: HazardId) -> std::result::Result<(), Rejection> {
        self.gateway.expire_danger_zone(id)
    }

    pub fn query_today_events(&self) -> Vec<EventRecord> {
        self.events_on(Utc::now().date_naive())
    }

    /// Events on `date` (UTC), earliest first.
    pub fn events_on(&self, date: NaiveDate) -> Vec<EventRecord> {
        let mut events: Vec<EventRecord> = self
            .hazards
            .snapshot()
            .events()
            .iter()
            .filter(|e| e.time.date_naive() == date)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.time, e.id));
        events
    }

    pub fn list_events(&self) -> Vec<EventRecord> {
        self.hazards.snapshot().events().to_vec()
    }

    pub fn list_danger_zones(&self, now: DateTime<Utc>) -> Vec<HazardZone> {
        self.hazards.snapshot().active_zones(now).cloned().collect()
    }

    pub fn list_crowd_reports(&self, now: DateTime<Utc>) -> Vec<CrowdReport> {
        self.hazards.snapshot().active_crowds(now).cloned().collect()
    }

    pub fn counts(&self, now: DateTime<Utc>) -> HazardCounts {
        let snapshot = self.hazards.snapshot();
        HazardCounts {
            danger_zones: snapshot.zone_count(),
            active_danger_zones: snapshot.active_zones(now).count(),
            crowd_reports: snapshot.crowd_count(),
            events: snapshot.event_count(),
        }
    }
}
