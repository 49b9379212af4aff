#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use trendboard::config::Config;
use trendboard::data::DatasetId;
use trendboard::refresh::{CycleReport, Schedule, ScheduledTask, TaskSpec};
use trendboard::trends::aggregate::Aggregation;
use trendboard::trends::{QueryKind, RegionRow, Scope, SubQuery, SubQueryRows, TrendsError, TrendsSource};

/// One scripted upstream reaction.
pub enum Step {
    Reply(Result<SubQueryRows, TrendsError>),
    /// Never answers; exercises deadlines and cancellation.
    Hang,
}

/// A [`TrendsSource`] that replays scripted steps and records every sub-query
/// it receives. Once the script runs out, it answers with empty results.
#[derive(Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(Instant, SubQuery)>>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> Vec<SubQuery> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, query)| query.clone())
            .collect()
    }

    /// When the first sub-query arrived, on the (possibly paused) tokio clock.
    pub fn first_call_at(&self) -> Option<Instant> {
        self.calls.lock().unwrap().first().map(|&(at, _)| at)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TrendsSource for ScriptedSource {
    async fn execute(&self, query: &SubQuery) -> Result<SubQueryRows, TrendsError> {
        self.calls.lock().unwrap().push((Instant::now(), query.clone()));
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(result)) => result,
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(SubQueryRows::Region(Vec::new())),
        }
    }
}

pub fn rows(items: &[(&str, u64)]) -> Step {
    Step::Reply(Ok(SubQueryRows::Region(
        items
            .iter()
            .map(|&(country, interest)| RegionRow {
                country: country.to_owned(),
                interest,
            })
            .collect(),
    )))
}

pub fn throttled() -> Step {
    Step::Reply(Err(TrendsError::RateLimited { retry_after: None }))
}

/// Defaults with short pacing, so virtual-time tests stay readable.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.refresh.pacing_min = Duration::from_secs(1);
    config.refresh.pacing_max = Duration::from_secs(2);
    config.refresh.force_wait_timeout = Duration::from_secs(120);
    config
}

/// A leaderboard task with one worldwide sub-query per keyword.
pub fn leaderboard_task(keywords: &[&str]) -> ScheduledTask {
    ScheduledTask {
        spec: TaskSpec {
            dataset: DatasetId::Leaderboard,
            sub_queries: keywords
                .iter()
                .map(|keyword| SubQuery {
                    kind: QueryKind::InterestByRegion,
                    keywords: vec![keyword.to_string()],
                    scope: Scope::Worldwide,
                    label: keyword.to_string(),
                })
                .collect(),
            aggregation: Aggregation::Leaderboard { top_n: 10 },
        },
        schedule: Schedule::Interval(Duration::from_secs(6 * 60 * 60)),
    }
}

/// Wait for the next finished cycle reported on `rx`.
pub async fn next_cycle(rx: &mut watch::Receiver<Option<Arc<CycleReport>>>) -> Arc<CycleReport> {
    loop {
        rx.changed().await.expect("scheduler dropped");
        if let Some(report) = rx.borrow_and_update().clone() {
            return report;
        }
    }
}
