//! Safety-aware route selection.
//!
//! Candidate routes from a directions provider are cut into short segments,
//! scored against reported danger zones (softened by nearby crowds and
//! events), and ranked by a blend of distance, duration and safety.

pub mod config;
pub mod error;
pub mod gateway;
pub mod geo_point;
pub mod hazard;
pub mod provider;
pub mod ranker;
pub mod route;
pub mod scorer;
pub mod service;
pub mod store;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use geo_point::GeoPoint;
pub use hazard::{HazardModel, HazardSnapshot};
pub use provider::{DirectionsProvider, DirectionsRequest, FixtureDirections, TravelMode};
pub use ranker::{RankedRoutes, RankingMode, RankingWeights, RouteRanker};
pub use route::{CandidateRoute, RawRoute, RawStep, RouteNormalizer, RouteSegment};
pub use scorer::{SafetyScorer, ScoredRoute};
pub use service::SafeRouteService;
