//! Hazard Ingestion Gateway.
//!
//! Accepts reports in the shape the map client sends them, turns them into
//! Hazard Model inputs, and turns model errors into [`Rejection`]s the HTTP
//! layer can show to a user.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::geo_point::GeoPoint;
use crate::hazard::{
    EventKind, HazardId, HazardModel, HazardSource, NewCrowdReport, NewDangerZone, NewEvent,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DangerReport {
    pub location: GeoPoint,
    pub radius: f64,
    #[serde(alias = "severity")]
    pub danger_level: i64,
    #[serde(default)]
    pub user_location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrowdSubmission {
    pub location: GeoPoint,
    #[serde(alias = "reporterLocation")]
    pub user_location: GeoPoint,
}

/// Name and time are optional here so a missing one becomes a validation
/// error rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubmission {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub location: GeoPoint,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub user_location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub id: HazardId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionKind {
    /// The submitter sent something we refuse to record.
    Invalid,
    /// We failed to record something valid.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
    pub message: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<Error> for Rejection {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation { field, message } => Self {
                kind: RejectionKind::Invalid,
                field: Some(field),
                message,
            },
            other => Self {
                kind: RejectionKind::Internal,
                field: None,
                message: other.to_string(),
            },
        }
    }
}

pub struct HazardIngestionGateway {
    model: Arc<HazardModel>,
}

impl HazardIngestionGateway {
    pub fn new(model: Arc<HazardModel>) -> Self {
        Self { model }
    }

    pub fn report_danger(&self, report: DangerReport) -> Result<Receipt, Rejection> {
        let zone = NewDangerZone {
            center: report.location,
            radius_meters: report.radius,
            severity: report.danger_level,
            source: HazardSource::UserReport,
            created_at: None,
            reporter_location: report.user_location,
        };
        self.record("danger", self.model.add_danger_zone(zone))
    }

    pub fn report_crowd(&self, report: CrowdSubmission) -> Result<Receipt, Rejection> {
        let crowd = NewCrowdReport {
            location: report.location,
            reporter_location: report.user_location,
            timestamp: None,
        };
        self.record("crowd", self.model.add_crowd_report(crowd))
    }

    pub fn add_event(&self, event: EventSubmission) -> Result<Receipt, Rejection> {
        let time = match event.time.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(raw) => Some(parse_event_time(raw).ok_or_else(|| Rejection {
                kind: RejectionKind::Invalid,
                field: Some("time"),
                message: format!("unrecognised event time {raw:?}"),
            })?),
            None => None,
        };
        let kind = event
            .kind
            .as_deref()
            .and_then(|k| k.trim().parse().ok())
            .unwrap_or(EventKind::Other);

        let new_event = NewEvent {
            name: event.name.unwrap_or_default(),
            location: event.location,
            kind,
            time,
            notes: event.notes,
            reporter_location: event.user_location,
        };
        self.record("event", self.model.add_event(new_event))
    }

    pub fn expire_danger_zone(&self, id: HazardId) -> Result<(), Rejection> {
        self.model.expire_danger_zone(id, Utc::now()).map_err(|e| {
            log::warn!("Rejected expiry of zone {id}: {e}");
            Rejection::from(e)
        })
    }

    fn record(
        &self,
        what: &str,
        outcome: crate::error::Result<HazardId>,
    ) -> Result<Receipt, Rejection> {
        match outcome {
            Ok(id) => Ok(Receipt { id }),
            Err(e) => {
                log::warn!("Rejected {what} report: {e}");
                Err(Rejection::from(e))
            }
        }
    }
}

/// RFC 3339, or the zone-less `YYYY-MM-DDTHH:MM[:SS]` an HTML datetime input produces (taken as UTC).
fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
