//! Route Ranker: blends distance, duration and safety into one ordering.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::scorer::ScoredRoute;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RankingMode {
    #[default]
    PreferSafe,
    /// Same blend, heavier on safety, and drops routes above the danger ceiling.
    StrictSafety,
}

impl RankingMode {
    pub const fn weights(self) -> RankingWeights {
        match self {
            Self::PreferSafe => RankingWeights {
                distance: 0.25,
                duration: 0.25,
                safety: 0.50,
            },
            Self::StrictSafety => RankingWeights {
                distance: 0.05,
                duration: 0.05,
                safety: 0.90,
            },
        }
    }

    const fn filters_by_ceiling(self) -> bool {
        matches!(self, Self::StrictSafety)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingWeights {
    pub distance: f64,
    pub duration: f64,
    pub safety: f64,
}

/// Each term divided by its maximum over the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedTerms {
    pub distance: f64,
    pub duration: f64,
    pub safety: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRoute {
    #[serde(flatten)]
    pub scored: ScoredRoute,
    pub blended: f64,
    pub normalized: NormalizedTerms,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedRoute {
    pub id: usize,
    pub safety_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum RankingWarning {
    /// Every candidate exceeded the strict-safety ceiling; the least unsafe one was kept anyway.
    AllCandidatesExceedCeiling { ceiling: f64, kept_route: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRoutes {
    pub mode: Option<RankingMode>,
    pub weights: RankingWeights,
    /// Best first.
    pub routes: Vec<RankedRoute>,
    pub excluded: Vec<ExcludedRoute>,
    pub ceiling: Option<f64>,
    pub warning: Option<RankingWarning>,
}

impl RankedRoutes {
    pub fn best(&self) -> Option<&RankedRoute> {
        self.routes.first()
    }
}

#[derive(Debug, Clone)]
pub struct RouteRanker {
    ceiling_factor: f64,
    ceiling_absolute: Option<f64>,
}

impl RouteRanker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ceiling_factor: config.strict_ceiling_factor,
            ceiling_absolute: config.strict_ceiling_absolute,
        }
    }

    pub fn rank(&self, candidates: Vec<ScoredRoute>, mode: RankingMode) -> Result<RankedRoutes> {
        let mut ranked = self.rank_inner(candidates, mode.weights(), mode.filters_by_ceiling())?;
        ranked.mode = Some(mode);
        Ok(ranked)
    }

    /// Ranks with caller-supplied weights and no ceiling filter.
    pub fn rank_with_weights(
        &self,
        candidates: Vec<ScoredRoute>,
        weights: RankingWeights,
    ) -> Result<RankedRoutes> {
        self.rank_inner(candidates, weights, false)
    }

    fn rank_inner(
        &self,
        candidates: Vec<ScoredRoute>,
        weights: RankingWeights,
        strict: bool,
    ) -> Result<RankedRoutes> {
        if candidates.is_empty() {
            return Err(Error::NoCandidates);
        }

        let single = candidates.len() == 1;
        let max_distance = degenerate_max(candidates.iter().map(|c| c.route.total_distance_meters));
        let max_duration = degenerate_max(candidates.iter().map(|c| c.route.total_duration_seconds));
        let max_safety = degenerate_max(candidates.iter().map(|c| c.safety_score));

        let ceiling = strict.then(|| self.ceiling(&candidates));
        let mut excluded = Vec::new();
        let mut warning = None;

        let kept: Vec<ScoredRoute> = match ceiling {
            Some(limit) => {
                let (keep, mut over): (Vec<_>, Vec<_>) = candidates
                    .into_iter()
                    .partition(|c| c.safety_score <= limit);
                if keep.is_empty() {
                    over.sort_by(ScoredRoute::cmp_safety);
                    let least_unsafe = over.remove(0);
                    log::warn!(
                        "All {} candidates exceed strict-safety ceiling {limit:.2}; keeping route {}",
                        over.len() + 1,
                        least_unsafe.route.id
                    );
                    warning = Some(RankingWarning::AllCandidatesExceedCeiling {
                        ceiling: limit,
                        kept_route: least_unsafe.route.id,
                    });
                    excluded.extend(over.iter().map(excluded_route));
                    vec![least_unsafe]
                } else {
                    excluded.extend(over.iter().map(excluded_route));
                    keep
                }
            }
            None => candidates,
        };

        let routes = kept
            .into_iter()
            .map(|scored| {
                let normalized = if single {
                    NormalizedTerms {
                        distance: 0.0,
                        duration: 0.0,
                        safety: 0.0,
                    }
                } else {
                    NormalizedTerms {
                        distance: scored.route.total_distance_meters / max_distance,
                        duration: scored.route.total_duration_seconds / max_duration,
                        safety: scored.safety_score / max_safety,
                    }
                };
                let blended = weights.distance * normalized.distance
                    + weights.duration * normalized.duration
                    + weights.safety * normalized.safety;
                RankedRoute {
                    scored,
                    blended,
                    normalized,
                }
            })
            .sorted_by(|a, b| {
                a.blended.total_cmp(&b.blended).then_with(|| {
                    a.scored
                        .route
                        .provider_rank
                        .cmp(&b.scored.route.provider_rank)
                })
            })
            .collect();

        Ok(RankedRoutes {
            mode: None,
            weights,
            routes,
            excluded,
            ceiling,
            warning,
        })
    }

    fn ceiling(&self, candidates: &[ScoredRoute]) -> f64 {
        self.ceiling_absolute
            .unwrap_or_else(|| median(candidates.iter().map(|c| c.safety_score)) * self.ceiling_factor)
    }
}

fn excluded_route(route: &ScoredRoute) -> ExcludedRoute {
    ExcludedRoute {
        id: route.route.id,
        safety_score: route.safety_score,
    }
}

/// Maximum of `values`, with a non-positive maximum treated as 1.
fn degenerate_max(values: impl Iterator<Item = f64>) -> f64 {
    let max = values.fold(0.0, f64::max);
    if max > 0.0 { max } else { 1.0 }
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let sorted: Vec<f64> = values.sorted_by(f64::total_cmp).collect();
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}
