//! Pure reductions from accumulated sub-query rows to published payloads.

use crate::data::{DatasetId, Leaderboard, LeaderboardItem, Payload, Series, Timeseries};
use crate::trends::models::SubQueryRows;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How a dataset's rows are reduced to its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Sum interest per country, keep the `top_n` highest.
    Leaderboard { top_n: usize },
    /// Align every series on the union of observed dates.
    Timeseries,
}

impl Aggregation {
    pub fn for_dataset(dataset: DatasetId, top_n: usize) -> Self {
        match dataset {
            DatasetId::Leaderboard => Aggregation::Leaderboard { top_n },
            DatasetId::Timeseries => Aggregation::Timeseries,
        }
    }

    pub fn aggregate(&self, rows: Vec<SubQueryRows>) -> Payload {
        match *self {
            Aggregation::Leaderboard { top_n } => Payload::Leaderboard(leaderboard(rows, top_n)),
            Aggregation::Timeseries => Payload::Timeseries(timeseries(rows)),
        }
    }
}

fn leaderboard(batches: Vec<SubQueryRows>, top_n: usize) -> Leaderboard {
    let mut totals: HashMap<String, u64> = HashMap::new();
    for batch in batches {
        let SubQueryRows::Region(rows) = batch else {
            continue;
        };
        for row in rows {
            let total = totals.entry(row.country).or_default();
            *total = total.saturating_add(row.interest);
        }
    }

    let mut items: Vec<LeaderboardItem> = totals
        .into_iter()
        .filter(|&(_, value)| value > 0)
        .map(|(label, value)| LeaderboardItem { label, value })
        .collect();
    items.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    items.truncate(top_n);

    Leaderboard { items }
}

fn timeseries(batches: Vec<SubQueryRows>) -> Timeseries {
    let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
    // Plan order is preserved; a repeated label folds into its first position.
    let mut series: Vec<(String, BTreeMap<NaiveDate, u64>)> = Vec::new();

    for batch in batches {
        let SubQueryRows::Timeline { label, points } = batch else {
            continue;
        };
        let idx = match series.iter().position(|(existing, _)| *existing == label) {
            Some(idx) => idx,
            None => {
                series.push((label, BTreeMap::new()));
                series.len() - 1
            }
        };
        let values = &mut series[idx].1;
        for point in points {
            dates.insert(point.date);
            let value = values.entry(point.date).or_default();
            *value = value.saturating_add(point.interest);
        }
    }

    Timeseries {
        dates: dates
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect(),
        series: series
            .into_iter()
            .map(|(label, values)| Series {
                label,
                values: dates
                    .iter()
                    .map(|d| values.get(d).copied().unwrap_or(0))
                    .collect(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trends::models::{RegionRow, TimelinePoint};

    fn region(rows: &[(&str, u64)]) -> SubQueryRows {
        SubQueryRows::Region(
            rows.iter()
                .map(|&(country, interest)| RegionRow {
                    country: country.into(),
                    interest,
                })
                .collect(),
        )
    }

    fn timeline(label: &str, points: &[(u32, u64)]) -> SubQueryRows {
        SubQueryRows::Timeline {
            label: label.into(),
            points: points
                .iter()
                .map(|&(day, interest)| TimelinePoint {
                    date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
                    interest,
                })
                .collect(),
        }
    }

    fn items(payload: Payload) -> Vec<(String, u64)> {
        let Payload::Leaderboard(board) = payload else {
            panic!("expected leaderboard");
        };
        board.items.into_iter().map(|i| (i.label, i.value)).collect()
    }

    #[test]
    fn leaderboard_sums_across_sub_queries() {
        let agg = Aggregation::for_dataset(DatasetId::Leaderboard, 10);
        let payload = agg.aggregate(vec![
            region(&[("Belgium", 100), ("France", 40)]),
            region(&[("Belgium", 60), ("France", 75)]),
        ]);
        assert_eq!(
            items(payload),
            vec![("Belgium".into(), 160), ("France".into(), 115)]
        );
    }

    #[test]
    fn leaderboard_truncates_and_breaks_ties_by_label() {
        let agg = Aggregation::Leaderboard { top_n: 2 };
        let payload = agg.aggregate(vec![region(&[
            ("Norway", 10),
            ("Denmark", 50),
            ("Austria", 50),
            ("Zero", 0),
        ])]);
        assert_eq!(
            items(payload),
            vec![("Austria".into(), 50), ("Denmark".into(), 50)]
        );
    }

    #[test]
    fn leaderboard_ignores_timeline_rows() {
        let agg = Aggregation::Leaderboard { top_n: 10 };
        let payload = agg.aggregate(vec![timeline("Belgium", &[(5, 3)])]);
        assert!(payload.is_empty());
    }

    #[test]
    fn timeseries_aligns_on_union_of_dates() {
        let payload = Aggregation::Timeseries.aggregate(vec![
            timeline("Belgium", &[(5, 10), (12, 20)]),
            timeline("France", &[(12, 7), (19, 9)]),
        ]);
        let Payload::Timeseries(ts) = payload else {
            panic!("expected timeseries");
        };
        assert_eq!(ts.dates, vec!["2025-01-05", "2025-01-12", "2025-01-19"]);
        assert_eq!(ts.series[0].label, "Belgium");
        assert_eq!(ts.series[0].values, vec![10, 20, 0]);
        assert_eq!(ts.series[1].values, vec![0, 7, 9]);
    }

    #[test]
    fn timeseries_folds_repeated_labels() {
        let payload = Aggregation::Timeseries.aggregate(vec![
            timeline("Belgium", &[(5, 10)]),
            timeline("Belgium", &[(5, 4)]),
        ]);
        let Payload::Timeseries(ts) = payload else {
            panic!("expected timeseries");
        };
        assert_eq!(ts.series.len(), 1);
        assert_eq!(ts.series[0].values, vec![14]);
    }
}
