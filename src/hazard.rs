//! Hazard Model: the authoritative store of danger zones, crowd reports and events.
//!
//! Readers never see the live collections. They take a [`HazardSnapshot`]
//! (an `Arc` clone) and work on that for the whole request, while writers
//! build a fresh snapshot and swap it in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use h3o::{CellIndex, LatLng, Resolution};
use itertools::Itertools;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::geo_point::GeoPoint;
use crate::store::HazardStore;

/// Resolution used to bucket crowd signals. Cells are ~175m across.
const CROWD_CELL_RESOLUTION: Resolution = Resolution::Nine;
/// Apothem of a resolution 9 cell, rounded down.
const CROWD_CELL_APOTHEM_METERS: f64 = 150.0;
/// Meters per degree of latitude, for sizing R-tree search windows.
const METERS_PER_DEGREE: f64 = 111_320.0;

pub type HazardId = u64;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HazardSource {
    UserReport,
    Curated,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventKind {
    Concert,
    Festival,
    Sports,
    Market,
    Exhibition,
    Parade,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardZone {
    pub id: HazardId,
    pub center: GeoPoint,
    pub radius_meters: f64,
    /// 1 (minor) through 10 (avoid at all costs).
    pub severity: u8,
    pub created_at: DateTime<Utc>,
    pub source: HazardSource,
    /// Where the submitter stood, for user reports that sent it.
    #[serde(default)]
    pub reporter_location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrowdReport {
    pub id: HazardId,
    pub location: GeoPoint,
    pub timestamp: DateTime<Utc>,
    pub reporter_location: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: HazardId,
    pub name: String,
    pub location: GeoPoint,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub time: DateTime<Utc>,
    pub notes: Option<String>,
    pub reporter_location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDangerZone {
    pub center: GeoPoint,
    pub radius_meters: f64,
    pub severity: i64,
    pub source: HazardSource,
    pub created_at: Option<DateTime<Utc>>,
    pub reporter_location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCrowdReport {
    pub location: GeoPoint,
    pub reporter_location: GeoPoint,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub name: String,
    pub location: GeoPoint,
    pub kind: EventKind,
    pub time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub reporter_location: Option<GeoPoint>,
}

/// One entry of the append-only hazard log. Replaying the log rebuilds the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HazardRecord {
    DangerZone(HazardZone),
    Crowd(CrowdReport),
    Event(EventRecord),
    ZoneExpired { id: HazardId, at: DateTime<Utc> },
}

impl HazardRecord {
    pub fn id(&self) -> HazardId {
        match self {
            Self::DangerZone(z) => z.id,
            Self::Crowd(c) => c.id,
            Self::Event(e) => e.id,
            Self::ZoneExpired { id, .. } => *id,
        }
    }

    /// Location used for approximate range queries; expiry markers have none.
    pub fn location(&self) -> Option<GeoPoint> {
        match self {
            Self::DangerZone(z) => Some(z.center),
            Self::Crowd(c) => Some(c.location),
            Self::Event(e) => Some(e.location),
            Self::ZoneExpired { .. } => None,
        }
    }
}

/// A "well-trafficked" signal near a point: a crowd report or a live event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrowdSignal {
    pub location: GeoPoint,
    /// 1.0 when fresh, falling linearly to 0.0 at the edge of the decay window.
    pub weight: f64,
}

/// Result of [`HazardSnapshot::query_near`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyHazards {
    pub zones: Vec<HazardZone>,
    pub crowds: Vec<CrowdReport>,
    pub events: Vec<EventRecord>,
}

type ZoneEntry = GeomWithData<[f64; 2], usize>;

#[derive(Debug, Clone, Copy)]
enum SignalRef {
    Crowd(usize),
    Event(usize),
}

/// Immutable, indexed view of the hazard collections at one instant.
pub struct HazardSnapshot {
    zones: Vec<HazardZone>,
    crowds: Vec<CrowdReport>,
    events: Vec<EventRecord>,
    expired: HashMap<HazardId, DateTime<Utc>>,
    zone_tree: RTree<ZoneEntry>,
    max_zone_radius: f64,
    signal_cells: HashMap<CellIndex, Vec<SignalRef>>,
    crowd_decay: Duration,
    crowd_sensing_radius: f64,
    zone_max_age: Option<Duration>,
}

impl HazardSnapshot {
    fn build(
        zones: Vec<HazardZone>,
        crowds: Vec<CrowdReport>,
        events: Vec<EventRecord>,
        expired: HashMap<HazardId, DateTime<Utc>>,
        config: &EngineConfig,
    ) -> Self {
        let zone_tree = RTree::bulk_load(
            zones
                .iter()
                .enumerate()
                .map(|(idx, z)| ZoneEntry::new(z.center.lng_lat(), idx))
                .collect(),
        );
        let max_zone_radius = zones.iter().map(|z| z.radius_meters).fold(0.0, f64::max);

        let mut signal_cells: HashMap<CellIndex, Vec<SignalRef>> = HashMap::new();
        for (idx, crowd) in crowds.iter().enumerate() {
            if let Some(cell) = cell_of(&crowd.location) {
                signal_cells.entry(cell).or_default().push(SignalRef::Crowd(idx));
            }
        }
        for (idx, event) in events.iter().enumerate() {
            if let Some(cell) = cell_of(&event.location) {
                signal_cells.entry(cell).or_default().push(SignalRef::Event(idx));
            }
        }

        Self {
            zones,
            crowds,
            events,
            expired,
            zone_tree,
            max_zone_radius,
            signal_cells,
            crowd_decay: config.crowd_decay(),
            crowd_sensing_radius: config.crowd_sensing_radius_meters,
            zone_max_age: config.zone_max_age(),
        }
    }

    pub fn empty(config: &EngineConfig) -> Self {
        Self::build(Vec::new(), Vec::new(), Vec::new(), HashMap::new(), config)
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn crowd_count(&self) -> usize {
        self.crowds.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Whether a zone still participates in queries at `now`.
    pub fn zone_is_active(&self, zone: &HazardZone, now: DateTime<Utc>) -> bool {
        if self.expired.get(&zone.id).is_some_and(|at| *at <= now) {
            return false;
        }
        match self.zone_max_age {
            Some(max_age) => now - zone.created_at <= max_age,
            None => true,
        }
    }

    pub fn active_zones(&self, now: DateTime<Utc>) -> impl Iterator<Item = &HazardZone> {
        self.zones.iter().filter(move |z| self.zone_is_active(z, now))
    }

    pub fn active_crowds(&self, now: DateTime<Utc>) -> impl Iterator<Item = &CrowdReport> {
        self.crowds
            .iter()
            .filter(move |c| self.decay_weight(c.timestamp, now) > 0.0)
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Linear decay: 1.0 at `at`, 0.0 once `crowd_decay` has elapsed. Future timestamps count as fresh.
    pub fn decay_weight(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let window = self.crowd_decay.num_milliseconds() as f64;
        if window <= 0.0 {
            return 0.0;
        }
        let age = (now - at).num_milliseconds().max(0) as f64;
        (1.0 - age / window).max(0.0)
    }

    /// Event foot traffic counts on both sides of the event time.
    fn event_weight(&self, event: &EventRecord, now: DateTime<Utc>) -> f64 {
        let window = self.crowd_decay.num_milliseconds() as f64;
        if window <= 0.0 {
            return 0.0;
        }
        let offset = (now - event.time).num_milliseconds().abs() as f64;
        (1.0 - offset / window).max(0.0)
    }

    /// Active zones whose influence circle reaches within `extra_meters` of `point`,
    /// nearest first, at most `limit` of them.
    pub fn zones_near(
        &self,
        point: &GeoPoint,
        extra_meters: f64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<&HazardZone> {
        if self.zones.is_empty() || limit == 0 {
            return Vec::new();
        }

        let reach = self.max_zone_radius + extra_meters.max(0.0);
        let cos_lat = point.latitude.to_radians().cos().abs().max(0.01);
        let window_degrees = reach / (METERS_PER_DEGREE * cos_lat) * 1.1;

        // The tree lives in plain degree space; look across the antimeridian as well.
        let [lng, lat] = point.lng_lat();
        let mut centers = vec![[lng, lat]];
        if lng + window_degrees > 180.0 {
            centers.push([lng - 360.0, lat]);
        }
        if lng - window_degrees < -180.0 {
            centers.push([lng + 360.0, lat]);
        }

        let mut hits: Vec<(f64, &HazardZone)> = centers
            .into_iter()
            .flat_map(|center| {
                self.zone_tree
                    .locate_within_distance(center, window_degrees * window_degrees)
            })
            .map(|entry| entry.data)
            .unique()
            .map(|idx| &self.zones[idx])
            .filter(|zone| self.zone_is_active(zone, now))
            .filter_map(|zone| {
                let d = point.distance_meters(&zone.center);
                (d <= zone.radius_meters + extra_meters).then_some((d, zone))
            })
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
        hits.truncate(limit);
        hits.into_iter().map(|(_, zone)| zone).collect()
    }

    /// Crowd reports and live events within `radius` of `point` with non-zero weight.
    pub fn crowd_signals_near(
        &self,
        point: &GeoPoint,
        radius: f64,
        now: DateTime<Utc>,
    ) -> Vec<CrowdSignal> {
        let mut out = Vec::new();
        for signal in self.signals_in_reach(point, radius) {
            let (location, weight) = match signal {
                SignalRef::Crowd(idx) => {
                    let crowd = &self.crowds[idx];
                    (crowd.location, self.decay_weight(crowd.timestamp, now))
                }
                SignalRef::Event(idx) => {
                    let event = &self.events[idx];
                    (event.location, self.event_weight(event, now))
                }
            };
            if weight > 0.0 && point.distance_meters(&location) <= radius {
                out.push(CrowdSignal { location, weight });
            }
        }
        out
    }

    fn signals_in_reach(&self, point: &GeoPoint, radius: f64) -> Vec<SignalRef> {
        let Some(center) = cell_of(point) else {
            return Vec::new();
        };
        let k = (radius.max(0.0) / CROWD_CELL_APOTHEM_METERS).ceil() as u32 + 1;
        center
            .grid_disk::<Vec<_>>(k)
            .into_iter()
            .filter_map(|cell| self.signal_cells.get(&cell))
            .flatten()
            .copied()
            .collect()
    }

    /// Everything whose influence circle intersects the query circle.
    ///
    /// Zones reach `radius_meters`; crowd reports and events reach the crowd sensing radius.
    pub fn query_near(&self, point: &GeoPoint, radius_meters: f64, now: DateTime<Utc>) -> NearbyHazards {
        let zones = self
            .zones_near(point, radius_meters, usize::MAX, now)
            .into_iter()
            .cloned()
            .collect();

        let reach = radius_meters + self.crowd_sensing_radius;
        let crowds = self
            .active_crowds(now)
            .filter(|c| point.distance_meters(&c.location) <= reach)
            .cloned()
            .collect();
        let events = self
            .events
            .iter()
            .filter(|e| point.distance_meters(&e.location) <= reach)
            .cloned()
            .collect();

        NearbyHazards {
            zones,
            crowds,
            events,
        }
    }
}

impl std::fmt::Debug for HazardSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardSnapshot")
            .field("zones", &self.zones.len())
            .field("crowds", &self.crowds.len())
            .field("events", &self.events.len())
            .field("expired", &self.expired.len())
            .finish_non_exhaustive()
    }
}

fn cell_of(point: &GeoPoint) -> Option<CellIndex> {
    LatLng::new(point.latitude, point.longitude)
        .ok()
        .map(|ll| ll.to_cell(CROWD_CELL_RESOLUTION))
}

/// Owner of the hazard collections. Cheap to share behind an `Arc`.
pub struct HazardModel {
    config: Arc<EngineConfig>,
    current: RwLock<Arc<HazardSnapshot>>,
    next_id: AtomicU64,
    store: Option<Arc<dyn HazardStore>>,
}

impl HazardModel {
    /// Fails with [`Error::Config`] when `config` does not validate.
    pub fn new(config: Arc<EngineConfig>) -> Result<Self> {
        config.validate()?;
        let empty = HazardSnapshot::empty(&config);
        Ok(Self {
            config,
            current: RwLock::new(Arc::new(empty)),
            next_id: AtomicU64::new(1),
            store: None,
        })
    }

    /// Rebuilds the model by replaying every record in `store`; later writes are appended to it.
    pub fn restore(config: Arc<EngineConfig>, store: Arc<dyn HazardStore>) -> Result<Self> {
        let model = Self {
            store: Some(Arc::clone(&store)),
            ..Self::new(config)?
        };
        let records = store.load_all()?;

        let max_id = records.iter().map(HazardRecord::id).max().unwrap_or(0);
        model.next_id.store(max_id + 1, Ordering::SeqCst);
        let count = records.len();
        model.apply(records);

        log::info!("Restored {count} hazard records from store");
        Ok(model)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Consistent read view for one request.
    pub fn snapshot(&self) -> Arc<HazardSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn add_danger_zone(&self, zone: NewDangerZone) -> Result<HazardId> {
        zone.center.validate()?;
        if !(1..=10).contains(&zone.severity) {
            return Err(Error::validation(
                "severity",
                format!("severity {} is outside 1-10", zone.severity),
            ));
        }
        if !(zone.radius_meters.is_finite() && zone.radius_meters > 0.0) {
            return Err(Error::validation("radius", "radius must be a positive number"));
        }
        if let Some(reporter) = &zone.reporter_location {
            reporter.validate().map_err(|_| {
                Error::validation("userLocation", "reporter location is outside valid bounds")
            })?;
        }
        if zone.source == HazardSource::UserReport {
            let (min, max) = (self.config.min_user_radius_meters, self.config.max_user_radius_meters);
            if !(min..=max).contains(&zone.radius_meters) {
                return Err(Error::validation(
                    "radius",
                    format!("radius {}m is outside {min}-{max}m", zone.radius_meters),
                ));
            }
        }

        let record = HazardZone {
            id: self.allocate_id(),
            center: zone.center,
            radius_meters: zone.radius_meters,
            severity: zone.severity as u8,
            created_at: zone.created_at.unwrap_or_else(Utc::now),
            source: zone.source,
            reporter_location: zone.reporter_location,
        };
        log::info!(
            "Danger zone {} added: severity {} radius {}m",
            record.id,
            record.severity,
            record.radius_meters
        );
        self.commit(HazardRecord::DangerZone(record))
    }

    pub fn add_crowd_report(&self, report: NewCrowdReport) -> Result<HazardId> {
        report.location.validate()?;
        report.reporter_location.validate().map_err(|_| {
            Error::validation("reporterLocation", "reporter location is outside valid bounds")
        })?;
        let distance = report.location.distance_meters(&report.reporter_location);
        let max = self.config.max_reporter_distance_meters;
        if distance > max {
            return Err(Error::validation(
                "reporterLocation",
                format!("reporter is {distance:.0}m from the reported crowd (limit {max:.0}m)"),
            ));
        }

        let record = CrowdReport {
            id: self.allocate_id(),
            location: report.location,
            timestamp: report.timestamp.unwrap_or_else(Utc::now),
            reporter_location: report.reporter_location,
        };
        log::info!("Crowd report {} added", record.id);
        self.commit(HazardRecord::Crowd(record))
    }

    pub fn add_event(&self, event: NewEvent) -> Result<HazardId> {
        let name = event.name.trim();
        if name.is_empty() {
            return Err(Error::validation("name", "event name must not be empty"));
        }
        let Some(time) = event.time else {
            return Err(Error::validation("time", "event time is required"));
        };
        event.location.validate()?;
        if let Some(reporter) = &event.reporter_location {
            reporter.validate().map_err(|_| {
                Error::validation("userLocation", "reporter location is outside valid bounds")
            })?;
        }

        let record = EventRecord {
            id: self.allocate_id(),
            name: name.to_string(),
            location: event.location,
            kind: event.kind,
            time,
            notes: event.notes.filter(|n| !n.trim().is_empty()),
            reporter_location: event.reporter_location,
        };
        log::info!("Event {} added: {} ({})", record.id, record.name, record.kind);
        self.commit(HazardRecord::Event(record))
    }

    /// Excludes a zone from queries from `at` on. The zone itself stays in history.
    pub fn expire_danger_zone(&self, id: HazardId, at: DateTime<Utc>) -> Result<()> {
        let snapshot = self.snapshot();
        if !snapshot.zones.iter().any(|z| z.id == id) {
            return Err(Error::validation("id", format!("no danger zone with id {id}")));
        }
        log::info!("Danger zone {id} expired");
        self.commit(HazardRecord::ZoneExpired { id, at }).map(|_| ())
    }

    pub fn query_near(&self, point: &GeoPoint, radius_meters: f64, now: DateTime<Utc>) -> NearbyHazards {
        self.snapshot().query_near(point, radius_meters, now)
    }

    fn allocate_id(&self) -> HazardId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn commit(&self, record: HazardRecord) -> Result<HazardId> {
        if let Some(store) = &self.store {
            store.append(&record)?;
        }
        let id = record.id();
        self.apply(vec![record]);
        Ok(id)
    }

    fn apply(&self, records: Vec<HazardRecord>) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut zones = guard.zones.clone();
        let mut crowds = guard.crowds.clone();
        let mut events = guard.events.clone();
        let mut expired = guard.expired.clone();

        for record in records {
            match record {
                HazardRecord::DangerZone(z) => zones.push(z),
                HazardRecord::Crowd(c) => crowds.push(c),
                HazardRecord::Event(e) => events.push(e),
                HazardRecord::ZoneExpired { id, at } => {
                    expired.insert(id, at);
                }
            }
        }

        *guard = Arc::new(HazardSnapshot::build(
            zones, crowds, events, expired, &self.config,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_point::offset_meters;
    use crate::store::MemoryStore;

    const ORIGIN: GeoPoint = GeoPoint {
        latitude: 30.3398,
        longitude: 76.3869,
    };

    fn model() -> HazardModel {
        HazardModel::new(Arc::new(EngineConfig::default())).unwrap()
    }

    fn zone(center: GeoPoint, radius: f64, severity: i64) -> NewDangerZone {
        NewDangerZone {
            center,
            radius_meters: radius,
            severity,
            source: HazardSource::UserReport,
            created_at: None,
            reporter_location: None,
        }
    }

    #[test]
    fn danger_zone_bounds_are_enforced() {
        let m = model();
        assert!(matches!(
            m.add_danger_zone(zone(ORIGIN, 200.0, 5)),
            Err(Error::Validation { field: "radius", .. })
        ));
        assert!(m.add_danger_zone(zone(ORIGIN, 20.0, 5)).is_err());
        assert!(matches!(
            m.add_danger_zone(zone(ORIGIN, 50.0, 11)),
            Err(Error::Validation { field: "severity", .. })
        ));
        assert!(m.add_danger_zone(zone(ORIGIN, 50.0, 0)).is_err());
        assert_eq!(m.snapshot().zone_count(), 0);
    }

    #[test]
    fn curated_zones_may_exceed_user_radius() {
        let m = model();
        let mut big = zone(ORIGIN, 400.0, 3);
        big.source = HazardSource::Curated;
        assert!(m.add_danger_zone(big).is_ok());
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let m = model();
        let a = m.add_danger_zone(zone(ORIGIN, 50.0, 5)).unwrap();
        let b = m
            .add_crowd_report(NewCrowdReport {
                location: ORIGIN,
                reporter_location: ORIGIN,
                timestamp: None,
            })
            .unwrap();
        assert!(b > a);
    }

    #[test]
    fn crowd_reporter_must_be_near() {
        let m = model();
        let far = offset_meters(&ORIGIN, 150.0, 0.0);
        let err = m
            .add_crowd_report(NewCrowdReport {
                location: ORIGIN,
                reporter_location: far,
                timestamp: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "reporterLocation", .. }));

        let near = offset_meters(&ORIGIN, 60.0, 0.0);
        assert!(
            m.add_crowd_report(NewCrowdReport {
                location: ORIGIN,
                reporter_location: near,
                timestamp: None,
            })
            .is_ok()
        );
    }

    #[test]
    fn events_need_name_and_time() {
        let m = model();
        let base = NewEvent {
            name: "  ".into(),
            location: ORIGIN,
            kind: EventKind::Market,
            time: Some(Utc::now()),
            notes: None,
            reporter_location: None,
        };
        assert!(matches!(
            m.add_event(base.clone()),
            Err(Error::Validation { field: "name", .. })
        ));
        let untimed = NewEvent {
            name: "Night market".into(),
            time: None,
            ..base.clone()
        };
        assert!(matches!(
            m.add_event(untimed),
            Err(Error::Validation { field: "time", .. })
        ));
        let ok = NewEvent {
            name: "Night market".into(),
            ..base
        };
        assert!(m.add_event(ok).is_ok());
    }

    #[test]
    fn query_near_uses_zone_radius_plus_query_radius() {
        let m = model();
        m.add_danger_zone(zone(offset_meters(&ORIGIN, 120.0, 0.0), 50.0, 4))
            .unwrap();
        let now = Utc::now();
        assert!(m.query_near(&ORIGIN, 60.0, now).zones.is_empty());
        assert_eq!(m.query_near(&ORIGIN, 80.0, now).zones.len(), 1);
    }

    #[test]
    fn query_near_returns_crowds_and_events_within_sensing_reach() {
        let m = model();
        let now = Utc::now();
        let crowd_at = |north: f64, age_minutes: i64| {
            let location = offset_meters(&ORIGIN, north, 0.0);
            m.add_crowd_report(NewCrowdReport {
                location,
                reporter_location: location,
                timestamp: Some(now - Duration::minutes(age_minutes)),
            })
            .unwrap()
        };
        let inside = crowd_at(140.0, 0);
        crowd_at(160.0, 0);
        crowd_at(20.0, 180);

        let event_at = |east: f64, name: &str| {
            m.add_event(NewEvent {
                name: name.into(),
                location: offset_meters(&ORIGIN, 0.0, east),
                kind: EventKind::Concert,
                time: Some(now),
                notes: None,
                reporter_location: None,
            })
            .unwrap()
        };
        let near_event = event_at(145.0, "Open air gig");
        event_at(170.0, "Stadium gig");

        // 50m query plus the 100m crowd sensing radius.
        let nearby = m.query_near(&ORIGIN, 50.0, now);
        let crowd_ids: Vec<HazardId> = nearby.crowds.iter().map(|c| c.id).collect();
        let event_ids: Vec<HazardId> = nearby.events.iter().map(|e| e.id).collect();
        assert_eq!(crowd_ids, vec![inside]);
        assert_eq!(event_ids, vec![near_event]);
        assert!(nearby.zones.is_empty());
    }

    #[test]
    fn zones_are_found_across_the_antimeridian() {
        let m = model();
        let east_edge = GeoPoint::new(10.0, 179.9999).unwrap();
        let west_edge = GeoPoint::new(10.0, -179.9999).unwrap();
        assert!(east_edge.distance_meters(&west_edge) < 25.0);

        let mut z = zone(west_edge, 50.0, 10);
        z.created_at = Some(Utc::now());
        let id = m.add_danger_zone(z).unwrap();
        let snap = m.snapshot();
        let near = snap.zones_near(&east_edge, 10.0, 5, Utc::now());
        assert_eq!(near.iter().map(|z| z.id).collect::<Vec<_>>(), vec![id]);
    }

    #[test]
    fn danger_zones_keep_a_valid_reporter_location() {
        let m = model();
        let mut bad = zone(ORIGIN, 50.0, 5);
        bad.reporter_location = Some(GeoPoint {
            latitude: 95.0,
            longitude: 0.0,
        });
        assert!(matches!(
            m.add_danger_zone(bad),
            Err(Error::Validation { field: "userLocation", .. })
        ));

        let reporter = offset_meters(&ORIGIN, 30.0, 0.0);
        let mut ok = zone(ORIGIN, 50.0, 5);
        ok.reporter_location = Some(reporter);
        m.add_danger_zone(ok).unwrap();
        let listed: Vec<_> = m.snapshot().active_zones(Utc::now()).cloned().collect();
        assert_eq!(listed[0].reporter_location, Some(reporter));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = EngineConfig {
            max_segment_meters: 0.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            HazardModel::new(Arc::new(config)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn snapshots_do_not_see_later_writes() {
        let m = model();
        m.add_danger_zone(zone(ORIGIN, 50.0, 4)).unwrap();
        let before = m.snapshot();
        m.add_danger_zone(zone(ORIGIN, 60.0, 7)).unwrap();
        assert_eq!(before.zone_count(), 1);
        assert_eq!(m.snapshot().zone_count(), 2);
    }

    #[test]
    fn zones_near_caps_and_orders_by_distance() {
        let m = model();
        for i in 0..5_i32 {
            m.add_danger_zone(zone(offset_meters(&ORIGIN, f64::from(i) * 10.0, 0.0), 100.0, 2))
                .unwrap();
        }
        let snap = m.snapshot();
        let near = snap.zones_near(&ORIGIN, 10.0, 3, Utc::now());
        assert_eq!(near.len(), 3);
        assert_eq!(near[0].center, ORIGIN);
    }

    #[test]
    fn expired_zones_are_hidden_but_kept() {
        let m = model();
        let id = m.add_danger_zone(zone(ORIGIN, 50.0, 4)).unwrap();
        let now = Utc::now();
        m.expire_danger_zone(id, now).unwrap();
        let snap = m.snapshot();
        assert_eq!(snap.zone_count(), 1);
        assert!(snap.zones_near(&ORIGIN, 0.0, 10, now).is_empty());
        assert!(m.expire_danger_zone(999, now).is_err());
    }

    #[test]
    fn max_age_excludes_old_zones() {
        let config = EngineConfig {
            zone_max_age_hours: Some(24),
            ..EngineConfig::default()
        };
        let m = HazardModel::new(Arc::new(config)).unwrap();
        let now = Utc::now();
        let mut old = zone(ORIGIN, 50.0, 4);
        old.created_at = Some(now - Duration::hours(30));
        m.add_danger_zone(old).unwrap();
        assert!(m.query_near(&ORIGIN, 10.0, now).zones.is_empty());
    }

    #[test]
    fn crowd_weight_decays_linearly() {
        let m = model();
        let now = Utc::now();
        m.add_crowd_report(NewCrowdReport {
            location: ORIGIN,
            reporter_location: ORIGIN,
            timestamp: Some(now - Duration::minutes(60)),
        })
        .unwrap();
        let snap = m.snapshot();
        let signals = snap.crowd_signals_near(&ORIGIN, 100.0, now);
        assert_eq!(signals.len(), 1);
        assert!((signals[0].weight - 0.5).abs() < 1e-6);
        assert!(snap.crowd_signals_near(&ORIGIN, 100.0, now + Duration::hours(2)).is_empty());
    }

    #[test]
    fn events_count_as_crowds_around_their_time() {
        let m = model();
        let now = Utc::now();
        m.add_event(NewEvent {
            name: "Parade".into(),
            location: offset_meters(&ORIGIN, 40.0, 0.0),
            kind: EventKind::Parade,
            time: Some(now + Duration::minutes(30)),
            notes: None,
            reporter_location: None,
        })
        .unwrap();
        let snap = m.snapshot();
        let signals = snap.crowd_signals_near(&ORIGIN, 100.0, now);
        assert_eq!(signals.len(), 1);
        assert!((signals[0].weight - 0.75).abs() < 1e-6);
    }

    #[test]
    fn restore_replays_store_and_continues_ids() {
        let store: Arc<dyn HazardStore> = Arc::new(MemoryStore::default());
        let config = Arc::new(EngineConfig::default());
        let first = HazardModel::restore(Arc::clone(&config), Arc::clone(&store)).unwrap();
        let a = first.add_danger_zone(zone(ORIGIN, 50.0, 4)).unwrap();
        first.expire_danger_zone(a, Utc::now()).unwrap();
        let b = first.add_danger_zone(zone(ORIGIN, 70.0, 6)).unwrap();

        let second = HazardModel::restore(config, store).unwrap();
        let snap = second.snapshot();
        assert_eq!(snap.zone_count(), 2);
        assert_eq!(snap.active_zones(Utc::now()).count(), 1);
        let c = second.add_danger_zone(zone(ORIGIN, 30.0, 2)).unwrap();
        assert!(c > b);
    }
}
