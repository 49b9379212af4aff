//! Dataset identifiers and the payload shapes served to dashboards.

pub mod dataset;
pub mod fallback;
pub mod payload;

pub use dataset::DatasetId;
pub use payload::{Leaderboard, LeaderboardItem, Payload, Series, Timeseries};
