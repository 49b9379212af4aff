//! Turns configuration into the ordered sub-queries of each dataset's cycle.

use crate::config::TrendsConfig;
use crate::data::DatasetId;
use crate::trends::models::{QueryKind, Scope, SubQuery};

/// The upstream compares at most this many terms in one request.
pub const MAX_COMPARED_TERMS: usize = 5;

pub fn sub_queries(dataset: DatasetId, config: &TrendsConfig) -> Vec<SubQuery> {
    match dataset {
        DatasetId::Leaderboard => leaderboard(config),
        DatasetId::Timeseries => timeseries(config),
    }
}

/// One worldwide interest-by-country request per keyword.
fn leaderboard(config: &TrendsConfig) -> Vec<SubQuery> {
    config
        .keywords
        .iter()
        .map(|keyword| SubQuery {
            kind: QueryKind::InterestByRegion,
            keywords: vec![keyword.clone()],
            scope: Scope::Worldwide,
            label: keyword.clone(),
        })
        .collect()
}

/// One interest-over-time request per tracked country, using its localized
/// terms when configured.
fn timeseries(config: &TrendsConfig) -> Vec<SubQuery> {
    config
        .countries
        .iter()
        .map(|country| {
            let terms = if country.terms.is_empty() {
                &config.keywords
            } else {
                &country.terms
            };
            SubQuery {
                kind: QueryKind::InterestOverTime,
                keywords: terms.iter().take(MAX_COMPARED_TERMS).cloned().collect(),
                scope: Scope::Country(country.name.clone()),
                label: country.name.clone(),
            }
        })
        .collect()
}
