//! Built-in payloads served until the first successful refresh.

use super::{DatasetId, Leaderboard, LeaderboardItem, Payload, Series, Timeseries};

const LEADERBOARD: &[(&str, u64)] = &[
    ("Belgium", 200),
    ("United Kingdom", 150),
    ("Netherlands", 120),
    ("France", 95),
    ("Germany", 80),
    ("Denmark", 60),
    ("Norway", 45),
    ("Sweden", 40),
    ("Australia", 30),
    ("Singapore", 25),
];

const TIMESERIES_DATES: &[&str] = &[
    "2025-01-05",
    "2025-01-12",
    "2025-01-19",
    "2025-01-26",
    "2025-02-02",
    "2025-02-09",
];

const TIMESERIES: &[(&str, [u64; 6])] = &[
    ("Belgium", [62, 70, 66, 81, 77, 90]),
    ("France", [40, 38, 45, 51, 49, 55]),
    ("Germany", [33, 35, 31, 39, 42, 44]),
];

/// The compiled-in fallback payload for a dataset. Never empty.
pub fn payload(dataset: DatasetId) -> Payload {
    match dataset {
        DatasetId::Leaderboard => Payload::Leaderboard(Leaderboard {
            items: LEADERBOARD
                .iter()
                .map(|&(label, value)| LeaderboardItem::new(label, value))
                .collect(),
        }),
        DatasetId::Timeseries => Payload::Timeseries(Timeseries {
            dates: TIMESERIES_DATES.iter().map(|d| d.to_string()).collect(),
            series: TIMESERIES
                .iter()
                .map(|(label, values)| Series {
                    label: label.to_string(),
                    values: values.to_vec(),
                })
                .collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallbacks_are_never_empty() {
        for id in DatasetId::ALL {
            assert!(!payload(id).is_empty(), "{id} fallback is empty");
        }
    }

    #[test]
    fn timeseries_fallback_is_aligned() {
        let Payload::Timeseries(ts) = payload(DatasetId::Timeseries) else {
            panic!("wrong payload kind");
        };
        for series in &ts.series {
            assert_eq!(series.values.len(), ts.dates.len());
        }
    }
}
