//! HTTP surface: snapshot reads, manual refresh, and status.

pub mod datasets;
pub mod error;
pub mod middleware;
pub mod refresh;
pub mod routes;
pub mod status;

pub use routes::*;
