//! Small helpers shared by the refresh loop, the services and the HTTP layers.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Render a duration for a log field, scaled to its unit (`1.94ms`, `2.34s`).
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Warn when `what`, started at `started`, ran past `threshold`.
pub fn log_if_slow(started: Instant, threshold: Duration, what: &str) {
    let elapsed = started.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            duration = fmt_duration(elapsed),
            threshold = fmt_duration(threshold),
            "{what} ran longer than expected"
        );
    }
}

/// Wall-clock equivalent of a monotonic instant, for status output.
pub fn wall_time(at: Instant) -> DateTime<Utc> {
    let now = Instant::now();
    let wall = Utc::now();
    let shifted = if at >= now {
        TimeDelta::from_std(at - now)
            .ok()
            .and_then(|delta| wall.checked_add_signed(delta))
    } else {
        TimeDelta::from_std(now - at)
            .ok()
            .and_then(|delta| wall.checked_sub_signed(delta))
    };
    shifted.unwrap_or(wall)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_keep_two_decimals() {
        assert_eq!(fmt_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(fmt_duration(Duration::from_micros(1940)), "1.94ms");
    }

    #[tokio::test(start_paused = true)]
    async fn wall_time_tracks_offset_from_now() {
        let ahead = Instant::now() + Duration::from_secs(90);
        let delta = wall_time(ahead) - Utc::now();
        assert!((89..=90).contains(&delta.num_seconds()), "{delta}");

        tokio::time::advance(Duration::from_secs(30)).await;
        let behind = Instant::now() - Duration::from_secs(10);
        let delta = Utc::now() - wall_time(behind);
        assert!((9..=10).contains(&delta.num_seconds()), "{delta}");
    }
}
