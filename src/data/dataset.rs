use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named dataset with its own snapshot and refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetId {
    /// Interest summed per country, top N.
    Leaderboard,
    /// Interest over time, one series per tracked country.
    Timeseries,
}

impl DatasetId {
    pub const ALL: [DatasetId; 2] = [DatasetId::Leaderboard, DatasetId::Timeseries];

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetId::Leaderboard => "leaderboard",
            DatasetId::Timeseries => "timeseries",
        }
    }

    /// Dense index for per-dataset slot arrays.
    pub(crate) fn index(self) -> usize {
        match self {
            DatasetId::Leaderboard => 0,
            DatasetId::Timeseries => 1,
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown dataset '{0}'")]
pub struct UnknownDataset(pub String);

impl FromStr for DatasetId {
    type Err = UnknownDataset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "leaderboard" => Ok(DatasetId::Leaderboard),
            "timeseries" => Ok(DatasetId::Timeseries),
            _ => Err(UnknownDataset(s.to_owned())),
        }
    }
}
