use geo::{HaversineDistance, HaversineIntermediate, Point};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean earth radius used by `geo`'s haversine algorithms.
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Immutable WGS84 coordinate. Serialized as `{lat, lng}` like the map client sends it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "lat", alias = "latitude")]
    pub latitude: f64,
    #[serde(rename = "lng", alias = "longitude", alias = "lon")]
    pub longitude: f64,
}

impl GeoPoint {
    /// Builds a point, rejecting coordinates outside [-90,90] / [-180,180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let point = Self {
            latitude,
            longitude,
        };
        point.validate()?;
        Ok(point)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::validation(
                "location",
                format!(
                    "coordinate ({}, {}) is outside valid latitude/longitude bounds",
                    self.latitude, self.longitude
                ),
            ))
        }
    }

    fn as_point(self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        self.as_point().haversine_distance(&other.as_point())
    }

    /// Point at fraction `f` along the great circle from `self` to `other`.
    pub fn intermediate(&self, other: &GeoPoint, f: f64) -> GeoPoint {
        let p = self.as_point().haversine_intermediate(&other.as_point(), f);
        GeoPoint {
            latitude: p.y(),
            longitude: p.x(),
        }
    }

    pub fn midpoint(&self, other: &GeoPoint) -> GeoPoint {
        self.intermediate(other, 0.5)
    }

    /// Equirectangular projection into meters around `origin`.
    ///
    /// Accurate to well under a meter at the few-hundred-meter scale hazard zones live at.
    pub(crate) fn local_meters(&self, origin: &GeoPoint) -> (f64, f64) {
        let lat0 = origin.latitude.to_radians();
        let x = (self.longitude - origin.longitude).to_radians() * lat0.cos() * EARTH_RADIUS_METERS;
        let y = (self.latitude - origin.latitude).to_radians() * EARTH_RADIUS_METERS;
        (x, y)
    }

    /// `[lng, lat]`, the coordinate order used by GeoJSON and the R-tree.
    pub(crate) fn lng_lat(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

/// Moves `origin` by `meters` due north and east. Handy for building fixtures.
pub fn offset_meters(origin: &GeoPoint, north: f64, east: f64) -> GeoPoint {
    let dlat = (north / EARTH_RADIUS_METERS).to_degrees();
    let dlon = (east / (EARTH_RADIUS_METERS * origin.latitude.to_radians().cos())).to_degrees();
    GeoPoint {
        latitude: origin.latitude + dlat,
        longitude: origin.longitude + dlon,
    }
}
