//! Candidate Route Normalizer.
//!
//! Directions providers hand back steps at whatever granularity they like.
//! Everything downstream wants short, uniform segments, so long steps are
//! cut into pieces of at most `max_segment_meters` along the great circle.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::geo_point::GeoPoint;

/// One step as a provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStep {
    pub polyline: Vec<GeoPoint>,
    /// Seconds the provider expects the step to take. Derived from walking speed when absent.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Provider travel mode ("WALK", "TRANSIT", ...); informational only.
    #[serde(default)]
    pub travel_mode: Option<String>,
}

/// One alternative as a provider reports it: a list of steps, or a bare polyline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRoute {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub steps: Vec<RawStep>,
    #[serde(default)]
    pub polyline: Vec<GeoPoint>,
}

impl RawRoute {
    pub fn from_polyline(points: Vec<GeoPoint>) -> Self {
        Self {
            polyline: points,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegment {
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    /// Distance along the route at `start`.
    pub offset_meters: f64,
}

impl RouteSegment {
    pub fn midpoint(&self) -> GeoPoint {
        self.start.midpoint(&self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRoute {
    pub id: usize,
    pub summary: Option<String>,
    pub segments: Vec<RouteSegment>,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    /// Position in the provider's own ordering.
    pub provider_rank: usize,
}

impl CandidateRoute {
    /// `[lng, lat]` pairs, ready for a GeoJSON `LineString`.
    pub fn coordinates(&self) -> Vec<[f64; 2]> {
        let mut coords = Vec::with_capacity(self.segments.len() + 1);
        if let Some(first) = self.segments.first() {
            coords.push(first.start.lng_lat());
        }
        coords.extend(self.segments.iter().map(|s| s.end.lng_lat()));
        coords
    }
}

#[derive(Debug, Clone)]
pub struct RouteNormalizer {
    max_segment_meters: f64,
    walking_speed_mps: f64,
}

impl RouteNormalizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_segment_meters: config.max_segment_meters,
            walking_speed_mps: config.walking_speed_mps(),
        }
    }

    pub fn with_max_segment(mut self, meters: f64) -> Result<Self> {
        self.max_segment_meters = meters;
        self.check_limits()?;
        Ok(self)
    }

    /// Segment length and walking speed must be positive and finite, or subdivision never ends.
    fn check_limits(&self) -> Result<()> {
        if !(self.max_segment_meters.is_finite() && self.max_segment_meters > 0.0) {
            return Err(Error::Config(format!(
                "max segment length {}m must be positive",
                self.max_segment_meters
            )));
        }
        if !(self.walking_speed_mps.is_finite() && self.walking_speed_mps > 0.0) {
            return Err(Error::Config(format!(
                "walking speed {}m/s must be positive",
                self.walking_speed_mps
            )));
        }
        Ok(())
    }

    /// Normalizes every alternative, preserving input order as `provider_rank`.
    pub fn normalize(&self, raw_routes: &[RawRoute]) -> Result<Vec<CandidateRoute>> {
        self.check_limits()?;
        raw_routes
            .iter()
            .enumerate()
            .map(|(rank, raw)| self.normalize_one(rank, raw))
            .collect()
    }

    fn normalize_one(&self, rank: usize, raw: &RawRoute) -> Result<CandidateRoute> {
        // Steps win over the overview polyline when a provider sends both.
        let bare;
        let steps: &[RawStep] = if raw.steps.is_empty() {
            bare = [RawStep {
                polyline: raw.polyline.clone(),
                duration_seconds: None,
                travel_mode: None,
            }];
            &bare
        } else {
            &raw.steps
        };
        if steps.iter().all(|s| s.polyline.is_empty()) {
            return Err(Error::MalformedRoute {
                route: rank,
                reason: "route has no coordinates".into(),
            });
        }

        for point in steps.iter().flat_map(|s| s.polyline.iter()) {
            if !point.is_valid() {
                return Err(Error::MalformedRoute {
                    route: rank,
                    reason: format!(
                        "coordinate ({}, {}) outside valid bounds",
                        point.latitude, point.longitude
                    ),
                });
            }
        }

        let mut builder = SegmentBuilder::default();
        let mut previous: Option<GeoPoint> = None;

        for step in steps {
            let Some(first) = step.polyline.first() else {
                continue;
            };
            if let Some(prev) = previous {
                // Bridge gaps between steps on foot.
                let gap = prev.distance_meters(first);
                self.emit(&mut builder, prev, *first, gap / self.walking_speed_mps);
            }

            let length: f64 = step
                .polyline
                .windows(2)
                .map(|w| w[0].distance_meters(&w[1]))
                .sum();
            let duration = step
                .duration_seconds
                .filter(|d| d.is_finite() && *d >= 0.0)
                .unwrap_or(length / self.walking_speed_mps);

            for pair in step.polyline.windows(2) {
                let piece = pair[0].distance_meters(&pair[1]);
                let share = if length > 0.0 { duration * piece / length } else { 0.0 };
                self.emit(&mut builder, pair[0], pair[1], share);
            }
            previous = step.polyline.last().copied();
        }

        log::debug!(
            "Route {rank} normalized into {} segments ({:.0}m)",
            builder.segments.len(),
            builder.distance
        );

        Ok(CandidateRoute {
            id: rank,
            summary: raw.summary.clone(),
            total_distance_meters: builder.distance,
            total_duration_seconds: builder.duration,
            segments: builder.segments,
            provider_rank: rank,
        })
    }

    /// Cuts `start -> end` into equal pieces no longer than the segment cap.
    fn emit(&self, builder: &mut SegmentBuilder, start: GeoPoint, end: GeoPoint, duration: f64) {
        let length = start.distance_meters(&end);
        if length <= f64::EPSILON {
            return;
        }
        let pieces = (length / self.max_segment_meters).ceil().max(1.0) as usize;
        let mut from = start;
        for i in 1..=pieces {
            let to = if i == pieces {
                end
            } else {
                start.intermediate(&end, i as f64 / pieces as f64)
            };
            let distance = from.distance_meters(&to);
            builder.push(RouteSegment {
                start: from,
                end: to,
                distance_meters: distance,
                duration_seconds: duration * distance / length,
                offset_meters: builder.distance,
            });
            from = to;
        }
    }
}

#[derive(Default)]
struct SegmentBuilder {
    segments: Vec<RouteSegment>,
    distance: f64,
    duration: f64,
}

impl SegmentBuilder {
    fn push(&mut self, segment: RouteSegment) {
        self.distance += segment.distance_meters;
        self.duration += segment.duration_seconds;
        self.segments.push(segment);
    }
}
