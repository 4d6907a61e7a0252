use crate::{
    error::{Error, Result},
    link::LinkId,
    store::key,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One probe result for one link.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub link: LinkId,
    pub observed_at: DateTime<Utc>,
    pub up: bool,
    pub latency: Duration,
}

impl Observation {
    pub fn new(link: LinkId, up: bool, latency: Duration, observed_at: DateTime<Utc>) -> Result<Self> {
        if !key::is_encodable(&observed_at) {
            return Err(Error::InvalidInput(format!(
                "timestamp {observed_at} is outside the storable range"
            )));
        }

        Ok(Self {
            link,
            observed_at,
            up,
            latency,
        })
    }

    pub fn latency_secs(&self) -> f64 {
        self.latency.as_secs_f64()
    }
}

/// Observation as submitted by a probe agent: form fields, all strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub link: String,
    pub status: String,
    pub latency: String,
    pub time: String,
}

impl TryFrom<&RawObservation> for Observation {
    type Error = Error;

    fn try_from(raw: &RawObservation) -> Result<Self> {
        let link = raw.link.parse::<LinkId>()?;
        let up = parse_status(&raw.status)?;
        let latency = parse_latency(&raw.latency)?;
        let observed_at = parse_time(&raw.time)?;
        Observation::new(link, up, latency, observed_at)
    }
}

fn parse_status(s: &str) -> Result<bool> {
    match s.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(Error::InvalidInput(format!("unparseable status '{s}'"))),
    }
}

/// Accepts humantime durations ("12ms", "1s 250ms") or decimal seconds ("0.0123").
fn parse_latency(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Ok(latency) = humantime::parse_duration(s) {
        return Ok(latency);
    }

    s.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| Error::InvalidInput(format!("unparseable latency '{s}'")))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("unparseable time '{s}': {e}")))
}
