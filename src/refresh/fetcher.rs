//! Executes one refresh cycle: the paced sequence of sub-queries of a dataset.

use crate::config::RefreshConfig;
use crate::data::{DatasetId, Payload};
use crate::trends::aggregate::Aggregation;
use crate::trends::{SubQuery, SubQueryRows, TrendsError, TrendsSource};
use crate::utils::fmt_duration;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything needed to run one dataset's cycle.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub dataset: DatasetId,
    /// Issued in order.
    pub sub_queries: Vec<SubQuery>,
    pub aggregation: Aggregation,
}

/// Waits between sub-queries and the in-cycle abort threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingConfig {
    pub pacing_min: Duration,
    pub pacing_max: Duration,
    pub rate_limit_penalty: Duration,
    pub transient_penalty: Duration,
    pub abort_threshold: u32,
}

impl PacingConfig {
    pub fn from_config(config: &RefreshConfig) -> Self {
        Self {
            pacing_min: config.pacing_min,
            pacing_max: config.pacing_max,
            rate_limit_penalty: config.rate_limit_penalty,
            transient_penalty: config.transient_penalty,
            abort_threshold: config.abort_threshold.max(1),
        }
    }

    /// Uniformly drawn pacing interval.
    fn jitter(&self) -> Duration {
        if self.pacing_max <= self.pacing_min {
            return self.pacing_min;
        }
        rand::rng().random_range(self.pacing_min..=self.pacing_max)
    }
}

/// Why a cycle produced nothing to publish.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("rate limited on {failures} consecutive sub-queries")]
    RateLimited { failures: u32 },
    #[error("{failures} consecutive sub-queries failed, last: {last_error}")]
    Transient { failures: u32, last_error: String },
    #[error("no sub-query returned data")]
    NoData,
    #[error("cycle exceeded its deadline of {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Short machine-readable name, used in status output.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Transient { .. } => "transient",
            FetchError::NoData => "no_data",
            FetchError::Timeout(_) => "timeout",
        }
    }
}

/// Classified result of one sub-query.
#[derive(Debug)]
pub enum SubQueryOutcome {
    Data(SubQueryRows),
    Empty,
    RateLimited(TrendsError),
    Transient(TrendsError),
    /// The sub-query can never succeed as configured; skipped.
    Configuration(TrendsError),
}

impl SubQueryOutcome {
    pub fn classify(result: Result<SubQueryRows, TrendsError>) -> Self {
        match result {
            Ok(rows) if rows.is_empty() => SubQueryOutcome::Empty,
            Ok(rows) => SubQueryOutcome::Data(rows),
            Err(e) if e.is_configuration() => SubQueryOutcome::Configuration(e),
            Err(e) if e.is_rate_limited() => SubQueryOutcome::RateLimited(e),
            Err(e) => SubQueryOutcome::Transient(e),
        }
    }
}

/// Runs cycles against a [`TrendsSource`].
pub struct Fetcher {
    source: Arc<dyn TrendsSource>,
    pacing: PacingConfig,
}

impl Fetcher {
    pub fn new(source: Arc<dyn TrendsSource>, pacing: PacingConfig) -> Self {
        Self { source, pacing }
    }

    /// Issue every sub-query of `task` in order and aggregate what came back.
    ///
    /// Consecutive failed sub-queries are counted; reaching the abort threshold
    /// ends the cycle early. Any sub-query that returns data resets the count.
    #[tracing::instrument(skip_all, fields(dataset = %task.dataset))]
    pub async fn fetch(&self, task: &TaskSpec) -> Result<Payload, FetchError> {
        let mut accumulated: Vec<SubQueryRows> = Vec::with_capacity(task.sub_queries.len());
        let mut failures: u32 = 0;
        let mut penalty: Option<Duration> = None;

        for (index, query) in task.sub_queries.iter().enumerate() {
            if index > 0 {
                let wait = penalty.take().unwrap_or_else(|| self.pacing.jitter());
                debug!(wait = fmt_duration(wait), "Pausing before next sub-query");
                tokio::time::sleep(wait).await;
            }

            let outcome = SubQueryOutcome::classify(self.source.execute(query).await);
            match outcome {
                SubQueryOutcome::Data(rows) => {
                    debug!(sub_query = %query, rows = rows.len(), "Sub-query returned data");
                    failures = 0;
                    accumulated.push(rows);
                }
                SubQueryOutcome::Empty => {
                    debug!(sub_query = %query, "Sub-query returned no rows");
                }
                SubQueryOutcome::Configuration(error) => {
                    warn!(sub_query = %query, error = %error, "Skipping misconfigured sub-query");
                }
                SubQueryOutcome::RateLimited(error) => {
                    failures += 1;
                    let retry_after = match &error {
                        TrendsError::RateLimited { retry_after } => retry_after.map(fmt_duration),
                        _ => None,
                    };
                    if failures >= self.pacing.abort_threshold {
                        warn!(sub_query = %query, failures, ?retry_after, "Rate limited, aborting cycle");
                        return Err(FetchError::RateLimited { failures });
                    }
                    info!(sub_query = %query, failures, ?retry_after, "Rate limited, backing off before next sub-query");
                    penalty = Some(self.pacing.rate_limit_penalty);
                }
                SubQueryOutcome::Transient(error) => {
                    failures += 1;
                    if failures >= self.pacing.abort_threshold {
                        warn!(sub_query = %query, failures, error = %error, "Sub-query failed, aborting cycle");
                        return Err(FetchError::Transient {
                            failures,
                            last_error: error.to_string(),
                        });
                    }
                    info!(sub_query = %query, failures, error = %error, "Sub-query failed, continuing");
                    penalty = Some(self.pacing.transient_penalty);
                }
            }
        }

        if accumulated.is_empty() {
            return Err(FetchError::NoData);
        }
        let payload = task.aggregation.aggregate(accumulated);
        if payload.is_empty() {
            return Err(FetchError::NoData);
        }
        Ok(payload)
    }
}
