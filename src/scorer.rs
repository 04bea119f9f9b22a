//! Safety Scorer: integrates each candidate route against a hazard snapshot.
//!
//! A segment's exposure to a zone is `severity * overlap * length`, where
//! `overlap` is the share of the segment that actually lies inside the
//! zone. Grazing a boundary therefore costs far less than cutting through
//! the middle. Nearby crowd signals shave a fraction off the result.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::hazard::{HazardId, HazardSnapshot, HazardZone};
use crate::route::{CandidateRoute, RouteSegment};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentContribution {
    pub segment_index: usize,
    /// Exposure after the crowd discount; this is what the route score sums.
    pub hazard_contribution: f64,
    pub raw_contribution: f64,
    /// Fraction removed by crowd signals, in [0, 1].
    pub crowd_discount: f64,
    pub zone_ids: Vec<HazardId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredRoute {
    #[serde(flatten)]
    pub route: CandidateRoute,
    /// Lower is safer; zero means no hazard overlap at all.
    pub safety_score: f64,
    /// Only segments with non-zero exposure are listed.
    pub breakdown: Vec<SegmentContribution>,
}

impl ScoredRoute {
    /// Orders by safety score, then by provider rank.
    pub fn cmp_safety(&self, other: &Self) -> Ordering {
        self.safety_score
            .total_cmp(&other.safety_score)
            .then(self.route.provider_rank.cmp(&other.route.provider_rank))
    }
}

#[derive(Debug, Clone)]
pub struct SafetyScorer {
    buffer_meters: f64,
    max_zones_per_segment: usize,
    crowd_radius_meters: f64,
    crowd_discount_fraction: f64,
}

impl SafetyScorer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            buffer_meters: config.hazard_buffer_meters,
            max_zones_per_segment: config.max_zones_per_segment,
            crowd_radius_meters: config.crowd_sensing_radius_meters,
            crowd_discount_fraction: config.crowd_discount_fraction,
        }
    }

    pub fn score(
        &self,
        route: &CandidateRoute,
        hazards: &HazardSnapshot,
        now: DateTime<Utc>,
    ) -> Result<ScoredRoute> {
        if route.segments.is_empty() {
            return Err(Error::EmptyRoute { route: route.id });
        }

        let mut breakdown = Vec::new();
        let mut total = 0.0;

        for (index, segment) in route.segments.iter().enumerate() {
            let Some(contribution) = self.score_segment(index, segment, hazards, now) else {
                continue;
            };
            total += contribution.hazard_contribution;
            breakdown.push(contribution);
        }

        log::debug!(
            "Route {} scored {total:.2} across {} exposed segments",
            route.id,
            breakdown.len()
        );

        Ok(ScoredRoute {
            route: route.clone(),
            safety_score: total,
            breakdown,
        })
    }

    /// Scores every candidate against the same snapshot, keeping input order.
    pub fn score_all(
        &self,
        routes: &[CandidateRoute],
        hazards: &HazardSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredRoute>> {
        routes.iter().map(|r| self.score(r, hazards, now)).collect()
    }

    fn score_segment(
        &self,
        index: usize,
        segment: &RouteSegment,
        hazards: &HazardSnapshot,
        now: DateTime<Utc>,
    ) -> Option<SegmentContribution> {
        let midpoint = segment.midpoint();
        // Half the segment on top of the buffer so zones touching either end are still found.
        let reach = self.buffer_meters + segment.distance_meters / 2.0;
        let zones = hazards.zones_near(&midpoint, reach, self.max_zones_per_segment, now);

        let mut raw = 0.0;
        let mut zone_ids = Vec::new();
        for zone in zones {
            let overlap = overlap_fraction(segment, zone);
            if overlap <= 0.0 {
                continue;
            }
            raw += f64::from(zone.severity) * overlap * segment.distance_meters;
            zone_ids.push(zone.id);
        }
        if raw <= 0.0 {
            return None;
        }

        let crowd_weight: f64 = hazards
            .crowd_signals_near(&midpoint, self.crowd_radius_meters, now)
            .iter()
            .map(|s| s.weight)
            .sum();
        let crowd_discount = (self.crowd_discount_fraction * crowd_weight).clamp(0.0, 1.0);

        Some(SegmentContribution {
            segment_index: index,
            hazard_contribution: raw * (1.0 - crowd_discount),
            raw_contribution: raw,
            crowd_discount,
            zone_ids,
        })
    }
}

/// Fraction of `segment` that lies inside the zone's circle.
///
/// Works in a local metric plane centred on the zone and intersects the
/// segment's parametric line with the circle.
pub fn overlap_fraction(segment: &RouteSegment, zone: &HazardZone) -> f64 {
    let (ax, ay) = segment.start.local_meters(&zone.center);
    let (bx, by) = segment.end.local_meters(&zone.center);
    let (dx, dy) = (bx - ax, by - ay);
    let r2 = zone.radius_meters * zone.radius_meters;

    let a = dx * dx + dy * dy;
    let c = ax * ax + ay * ay - r2;
    if a <= f64::EPSILON {
        return if c <= 0.0 { 1.0 } else { 0.0 };
    }
    let b = 2.0 * (ax * dx + ay * dy);
    let discriminant = b * b - 4.0 * a * c;
    if discriminant <= 0.0 {
        return 0.0;
    }

    let root = discriminant.sqrt();
    let enter = ((-b - root) / (2.0 * a)).max(0.0);
    let exit = ((-b + root) / (2.0 * a)).min(1.0);
    (exit - enter).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::geo_point::{GeoPoint, offset_meters};
    use crate::hazard::{HazardModel, HazardSource, NewCrowdReport, NewDangerZone};
    use crate::route::{RawRoute, RouteNormalizer};

    const ORIGIN: GeoPoint = GeoPoint {
        latitude: 30.3398,
        longitude: 76.3869,
    };

    fn straight_route(length: f64) -> CandidateRoute {
        let end = offset_meters(&ORIGIN, 0.0, length);
        RouteNormalizer::new(&EngineConfig::default())
            .normalize(&[RawRoute::from_polyline(vec![ORIGIN, end])])
            .unwrap()
            .remove(0)
    }

    fn model_with_zone(north: f64, east: f64, radius: f64, severity: i64) -> HazardModel {
        let model = HazardModel::new(Arc::new(EngineConfig::default())).unwrap();
        model
            .add_danger_zone(NewDangerZone {
                center: offset_meters(&ORIGIN, north, east),
                radius_meters: radius,
                severity,
                source: HazardSource::UserReport,
                created_at: None,
                reporter_location: None,
            })
            .unwrap();
        model
    }

    fn scorer() -> SafetyScorer {
        SafetyScorer::new(&EngineConfig::default())
    }

    fn zone_at(north: f64, east: f64, radius: f64) -> HazardZone {
        HazardZone {
            id: 1,
            center: offset_meters(&ORIGIN, north, east),
            radius_meters: radius,
            severity: 5,
            created_at: Utc::now(),
            source: HazardSource::Curated,
            reporter_location: None,
        }
    }

    fn segment(east_from: f64, east_to: f64) -> RouteSegment {
        let start = offset_meters(&ORIGIN, 0.0, east_from);
        let end = offset_meters(&ORIGIN, 0.0, east_to);
        RouteSegment {
            start,
            end,
            distance_meters: start.distance_meters(&end),
            duration_seconds: 0.0,
            offset_meters: 0.0,
        }
    }

    #[test]
    fn overlap_covers_inside_partial_and_outside() {
        let zone = zone_at(0.0, 100.0, 50.0);
        assert!((overlap_fraction(&segment(60.0, 140.0), &zone) - 1.0).abs() < 1e-3);
        assert!((overlap_fraction(&segment(0.0, 100.0), &zone) - 0.5).abs() < 1e-3);
        assert_eq!(overlap_fraction(&segment(0.0, 40.0), &zone), 0.0);
        // Passing 45m north of centre clips only a short chord.
        let grazing = zone_at(45.0, 100.0, 50.0);
        let chord = overlap_fraction(&segment(0.0, 200.0), &grazing);
        assert!(chord > 0.0 && chord < 0.25, "chord {chord}");
    }

    #[test]
    fn no_overlap_scores_zero() {
        let model = model_with_zone(300.0, 200.0, 50.0, 9);
        let scored = scorer()
            .score(&straight_route(400.0), &model.snapshot(), Utc::now())
            .unwrap();
        assert_eq!(scored.safety_score, 0.0);
        assert!(scored.breakdown.is_empty());
    }

    #[test]
    fn crossing_a_zone_costs_severity_times_length_inside() {
        let model = model_with_zone(0.0, 200.0, 50.0, 10);
        let scored = scorer()
            .score(&straight_route(400.0), &model.snapshot(), Utc::now())
            .unwrap();
        // 100m inside a severity 10 zone.
        assert!((scored.safety_score - 1_000.0).abs() < 10.0, "{}", scored.safety_score);
        assert!(scored.breakdown.iter().all(|c| c.zone_ids == vec![1]));
    }

    #[test]
    fn grazing_costs_less_than_cutting_through() {
        let now = Utc::now();
        let route = straight_route(400.0);
        let through = scorer()
            .score(&route, &model_with_zone(0.0, 200.0, 50.0, 8).snapshot(), now)
            .unwrap();
        let graze = scorer()
            .score(&route, &model_with_zone(45.0, 200.0, 50.0, 8).snapshot(), now)
            .unwrap();
        assert!(graze.safety_score > 0.0);
        assert!(graze.safety_score < through.safety_score / 2.0);
    }

    #[test]
    fn severity_is_monotonic() {
        let route = straight_route(400.0);
        let now = Utc::now();
        let mut last = 0.0;
        for severity in 1..=10 {
            let model = model_with_zone(10.0, 150.0, 60.0, severity);
            let score = scorer().score(&route, &model.snapshot(), now).unwrap().safety_score;
            assert!(score >= last);
            last = score;
        }
    }

    #[test]
    fn crowds_discount_but_never_below_zero() {
        let now = Utc::now();
        let route = straight_route(400.0);
        let model = model_with_zone(0.0, 200.0, 50.0, 10);
        let baseline = scorer().score(&route, &model.snapshot(), now).unwrap().safety_score;

        let center = offset_meters(&ORIGIN, 0.0, 200.0);
        model
            .add_crowd_report(NewCrowdReport {
                location: center,
                reporter_location: center,
                timestamp: Some(now),
            })
            .unwrap();
        let discounted = scorer().score(&route, &model.snapshot(), now).unwrap().safety_score;
        assert!(discounted < baseline);
        assert!(discounted >= baseline * 0.89);

        for _ in 0..20 {
            model
                .add_crowd_report(NewCrowdReport {
                    location: center,
                    reporter_location: center,
                    timestamp: Some(now),
                })
                .unwrap();
        }
        let crowded = scorer().score(&route, &model.snapshot(), now).unwrap();
        assert!(crowded.safety_score >= 0.0);
        assert!(crowded.breakdown.iter().all(|c| c.crowd_discount <= 1.0));

        let later = now + Duration::hours(3);
        let stale = scorer().score(&route, &model.snapshot(), later).unwrap().safety_score;
        assert!((stale - baseline).abs() < 1e-6);
    }

    #[test]
    fn empty_route_is_rejected() {
        let model = HazardModel::new(Arc::new(EngineConfig::default())).unwrap();
        let route = RouteNormalizer::new(&EngineConfig::default())
            .normalize(&[RawRoute::from_polyline(vec![ORIGIN])])
            .unwrap()
            .remove(0);
        assert!(matches!(
            scorer().score(&route, &model.snapshot(), Utc::now()),
            Err(Error::EmptyRoute { route: 0 })
        ));
    }

    #[test]
    fn ties_fall_back_to_provider_rank() {
        let model = HazardModel::new(Arc::new(EngineConfig::default())).unwrap();
        let mut a = straight_route(100.0);
        let mut b = straight_route(100.0);
        a.provider_rank = 1;
        b.provider_rank = 0;
        let scored = scorer().score_all(&[a, b], &model.snapshot(), Utc::now()).unwrap();
        assert_eq!(scored[1].cmp_safety(&scored[0]), Ordering::Less);
    }
}
