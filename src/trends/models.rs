//! Sub-query descriptions, decoded rows, and the wire shapes of Trends responses.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which Trends widget a sub-query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Interest by country (`GEO_MAP` widget).
    InterestByRegion,
    /// Interest over time (`TIMESERIES` widget).
    InterestOverTime,
}

/// Geographic restriction of a sub-query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "name")]
pub enum Scope {
    Worldwide,
    /// A country by display name; resolved to an ISO code when issued.
    Country(String),
}

/// One upstream request within a refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubQuery {
    pub kind: QueryKind,
    /// Search terms compared in a single request (the upstream allows at most five).
    pub keywords: Vec<String>,
    pub scope: Scope,
    /// Label used when aggregating (series name for timelines).
    pub label: String,
}

impl fmt::Display for SubQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Worldwide => write!(f, "{} [{}]", self.label, self.keywords.join(", ")),
            Scope::Country(name) => {
                write!(f, "{} @ {name} [{}]", self.label, self.keywords.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRow {
    pub country: String,
    pub interest: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelinePoint {
    pub date: NaiveDate,
    pub interest: u64,
}

/// Rows returned by one successful sub-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubQueryRows {
    Region(Vec<RegionRow>),
    Timeline {
        label: String,
        points: Vec<TimelinePoint>,
    },
}

impl SubQueryRows {
    pub fn is_empty(&self) -> bool {
        match self {
            SubQueryRows::Region(rows) => rows.is_empty(),
            SubQueryRows::Timeline { points, .. } => points.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SubQueryRows::Region(rows) => rows.len(),
            SubQueryRows::Timeline { points, .. } => points.len(),
        }
    }
}

// -- Wire shapes --

#[derive(Debug, Deserialize)]
pub(crate) struct ExploreResponse {
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Widget {
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub request: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WidgetEnvelope<T> {
    pub default: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeoMapData {
    #[serde(default)]
    pub geo_map_data: Vec<GeoMapEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeoMapEntry {
    pub geo_name: String,
    #[serde(default)]
    pub value: Vec<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimelineData {
    #[serde(default)]
    pub timeline_data: Vec<TimelineEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimelineEntry {
    /// Unix seconds, as a string.
    pub time: String,
    #[serde(default)]
    pub value: Vec<u64>,
}

impl GeoMapData {
    /// Countries with non-zero interest, summing across compared keywords.
    pub fn into_rows(self) -> Vec<RegionRow> {
        self.geo_map_data
            .into_iter()
            .map(|entry| RegionRow {
                interest: entry.value.iter().sum(),
                country: entry.geo_name,
            })
            .filter(|row| row.interest > 0)
            .collect()
    }
}

impl TimelineData {
    /// Dated points, summing across compared keywords. Empty when every point is zero.
    pub fn into_points(self) -> Vec<TimelinePoint> {
        let points: Vec<TimelinePoint> = self
            .timeline_data
            .into_iter()
            .filter_map(|entry| {
                let secs: i64 = entry.time.parse().ok()?;
                let date = DateTime::from_timestamp(secs, 0)?.date_naive();
                Some(TimelinePoint {
                    date,
                    interest: entry.value.iter().sum(),
                })
            })
            .collect();

        if points.iter().all(|p| p.interest == 0) {
            Vec::new()
        } else {
            points
        }
    }
}
