//! Directions provider seam.
//!
//! The engine never talks to a maps API itself; it is handed something that
//! implements [`DirectionsProvider`]. [`FixtureDirections`] serves canned
//! alternatives from memory or a JSON file, for tests and local runs.

use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{Error, Result};
use crate::geo_point::GeoPoint;
use crate::route::RawRoute;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TravelMode {
    #[default]
    Walking,
    Transit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionsRequest {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    #[serde(default)]
    pub travel_mode: TravelMode,
}

pub trait DirectionsProvider: Send + Sync {
    /// Zero or more alternatives, in the provider's preferred order.
    fn directions(
        &self,
        request: &DirectionsRequest,
    ) -> impl Future<Output = Result<Vec<RawRoute>>> + Send;
}

/// Canned alternatives for one origin/destination pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureEntry {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub routes: Vec<RawRoute>,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureDirections {
    entries: Vec<FixtureEntry>,
    /// How far a request endpoint may be from a fixture endpoint and still match.
    tolerance_meters: f64,
}

impl FixtureDirections {
    pub fn new(entries: Vec<FixtureEntry>) -> Self {
        Self {
            entries,
            tolerance_meters: 250.0,
        }
    }

    pub fn single(origin: GeoPoint, destination: GeoPoint, routes: Vec<RawRoute>) -> Self {
        Self::new(vec![FixtureEntry {
            origin,
            destination,
            routes,
        }])
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let entries: Vec<FixtureEntry> = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        log::info!("Loaded {} directions fixtures from {}", entries.len(), path.display());
        Ok(Self::new(entries))
    }
}

impl DirectionsProvider for FixtureDirections {
    async fn directions(&self, request: &DirectionsRequest) -> Result<Vec<RawRoute>> {
        if self.entries.is_empty() {
            return Err(Error::ProviderUnavailable("no directions fixtures loaded".into()));
        }
        Ok(self
            .entries
            .iter()
            .filter(|e| {
                e.origin.distance_meters(&request.origin) <= self.tolerance_meters
                    && e.destination.distance_meters(&request.destination) <= self.tolerance_meters
            })
            .min_by(|a, b| {
                let da = a.origin.distance_meters(&request.origin)
                    + a.destination.distance_meters(&request.destination);
                let db = b.origin.distance_meters(&request.origin)
                    + b.destination.distance_meters(&request.destination);
                da.total_cmp(&db)
            })
            .map(|e| e.routes.clone())
            .unwrap_or_default())
    }
}
