//! Payload shapes published in snapshots.
//!
//! The leaderboard serializes to the Geckoboard leaderboard widget format
//! (`{"items": [{"label", "value"}]}`), which existing dashboards poll directly.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardItem {
    pub label: String,
    pub value: u64,
}

impl LeaderboardItem {
    pub fn new(label: impl Into<String>, value: u64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    pub items: Vec<LeaderboardItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub label: String,
    /// One value per entry in [`Timeseries::dates`].
    pub values: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeseries {
    /// ISO-8601 dates (`YYYY-MM-DD`), ascending.
    pub dates: Vec<String>,
    pub series: Vec<Series>,
}

/// Dataset-specific published value. Immutable once wrapped in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Leaderboard(Leaderboard),
    Timeseries(Timeseries),
}

impl Payload {
    /// True when the payload carries nothing a dashboard could render.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Leaderboard(board) => board.items.is_empty(),
            Payload::Timeseries(ts) => ts.dates.is_empty() || ts.series.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaderboard_serializes_to_widget_format() {
        let payload = Payload::Leaderboard(Leaderboard {
            items: vec![LeaderboardItem::new("Belgium", 200)],
        });
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({ "items": [{ "label": "Belgium", "value": 200 }] })
        );
    }

    #[test]
    fn timeseries_serializes_flat() {
        let payload = Payload::Timeseries(Timeseries {
            dates: vec!["2025-01-06".into()],
            series: vec![Series {
                label: "France".into(),
                values: vec![12],
            }],
        });
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "dates": ["2025-01-06"],
                "series": [{ "label": "France", "values": [12] }]
            })
        );
    }
}
