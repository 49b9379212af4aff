//! Application configuration.
//!
//! Loaded from an optional `trendboard.toml`, then the environment. Nested
//! keys use a double underscore (`REFRESH__ABORT_THRESHOLD=3`,
//! `TRENDS__KEYWORDS=[PEPPOL, e-invoicing]`). Durations accept humane strings
//! such as `"90s"` or `"6h"`, or a bare number of seconds.

use anyhow::{Context, bail};
use chrono::NaiveTime;
use chrono_tz::Tz;
use figment::value::UncasedStr;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use fundu::{DurationParser, TimeUnit};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

pub const CONFIG_FILE: &str = "trendboard.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the web server (`PORT`, as most PaaS hosts inject it).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Grace period for services to stop after a shutdown signal.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
    #[serde(default)]
    pub trends: TrendsConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            trends: TrendsConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Upstream query parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrendsConfig {
    pub base_url: String,
    /// Interface language, also determines the cookie priming region.
    pub hl: String,
    /// Timezone offset in minutes, as the upstream expects it.
    pub tz: i32,
    pub timeframe: String,
    pub keywords: Vec<String>,
    pub include_low_volume: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    /// Leaderboard length.
    pub top_n: usize,
    /// Countries charted by the timeseries dataset.
    pub countries: Vec<TrackedCountry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackedCountry {
    pub name: String,
    /// Localized search terms; the global keywords are used when empty.
    #[serde(default)]
    pub terms: Vec<String>,
}

impl TrackedCountry {
    fn new(name: &str, terms: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://trends.google.com/".to_owned(),
            hl: "en-US".to_owned(),
            tz: 360,
            timeframe: "today 1-m".to_owned(),
            keywords: ["e-invoicing", "PEPPOL", "peppol", "E-invoicing"]
                .into_iter()
                .map(String::from)
                .collect(),
            include_low_volume: true,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(25),
            top_n: 10,
            countries: vec![
                TrackedCountry::new("Belgium", &["e-facturatie", "facturation électronique", "PEPPOL"]),
                TrackedCountry::new("France", &["facturation électronique", "PEPPOL"]),
                TrackedCountry::new("Germany", &["E-Rechnung", "PEPPOL"]),
                TrackedCountry::new("Netherlands", &["e-facturatie", "PEPPOL"]),
                TrackedCountry::new("United Kingdom", &[]),
            ],
        }
    }
}

/// Pacing, backoff and scheduling of the background refresh.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Lower bound of the randomized wait between sub-queries.
    #[serde(deserialize_with = "deserialize_duration")]
    pub pacing_min: Duration,
    /// Upper bound of the randomized wait between sub-queries.
    #[serde(deserialize_with = "deserialize_duration")]
    pub pacing_max: Duration,
    /// Wait after a throttled sub-query before issuing the next one.
    #[serde(deserialize_with = "deserialize_duration")]
    pub rate_limit_penalty: Duration,
    /// Wait after any other failed sub-query.
    #[serde(deserialize_with = "deserialize_duration")]
    pub transient_penalty: Duration,
    /// Consecutive failed sub-queries that abort a cycle.
    pub abort_threshold: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_base: Duration,
    pub backoff_factor: f64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_cap: Duration,
    /// Consecutive failed cycles at which manual refreshes are refused.
    pub force_reject_threshold: u32,
    /// How long the force-refresh endpoint waits for the cycle outcome.
    #[serde(deserialize_with = "deserialize_duration")]
    pub force_wait_timeout: Duration,
    /// Hard wall-clock limit for one cycle.
    #[serde(deserialize_with = "deserialize_duration")]
    pub cycle_deadline: Duration,
    /// Minimum spacing between scheduled cycles of different datasets.
    #[serde(deserialize_with = "deserialize_duration")]
    pub inter_cycle_gap: Duration,
    pub refresh_on_startup: bool,
    pub leaderboard: ScheduleConfig,
    pub timeseries: ScheduleConfig,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            pacing_min: Duration::from_secs(3),
            pacing_max: Duration::from_secs(6),
            rate_limit_penalty: Duration::from_secs(30),
            transient_penalty: Duration::from_secs(10),
            abort_threshold: 2,
            backoff_base: Duration::from_secs(5 * 60),
            backoff_factor: 2.0,
            backoff_cap: Duration::from_secs(2 * 60 * 60),
            force_reject_threshold: 3,
            force_wait_timeout: Duration::from_secs(50),
            cycle_deadline: Duration::from_secs(10 * 60),
            inter_cycle_gap: Duration::from_secs(2 * 60),
            refresh_on_startup: true,
            leaderboard: ScheduleConfig::every(Duration::from_secs(6 * 60 * 60)),
            timeseries: ScheduleConfig::every(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

/// When a dataset refreshes: a fixed interval, or daily at a wall-clock time.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub every: Option<Duration>,
    /// When set, takes precedence over `every`.
    /// One of the two must be given.
    #[serde(default, deserialize_with = "deserialize_time_of_day")]
    pub daily_at: Option<NaiveTime>,
    #[serde(default = "default_timezone", deserialize_with = "deserialize_timezone")]
    pub timezone: Tz,
}

impl ScheduleConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            every: Some(interval),
            daily_at: None,
            timezone: default_timezone(),
        }
    }
}

fn default_timezone() -> Tz {
    chrono_tz::UTC
}

impl Config {
    /// Load configuration from the config file (if present) and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(
                Env::raw()
                    .map(|k| {
                        if k == UncasedStr::new("RAILWAY_DEPLOYMENT_DRAINING_SECONDS") {
                            "SHUTDOWN_TIMEOUT".into()
                        } else {
                            k.into()
                        }
                    })
                    .split("__"),
            )
            .extract()
            .context("Failed to load config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the refresh loop cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let refresh = &self.refresh;
        if refresh.pacing_min > refresh.pacing_max {
            bail!(
                "refresh.pacing_min ({:?}) exceeds refresh.pacing_max ({:?})",
                refresh.pacing_min,
                refresh.pacing_max
            );
        }
        if !(refresh.backoff_factor >= 1.0 && refresh.backoff_factor.is_finite()) {
            bail!(
                "refresh.backoff_factor must be a finite number >= 1, got {}",
                refresh.backoff_factor
            );
        }
        if refresh.abort_threshold == 0 {
            bail!("refresh.abort_threshold must be at least 1");
        }
        if refresh.force_reject_threshold == 0 {
            bail!("refresh.force_reject_threshold must be at least 1");
        }
        for (name, schedule) in [
            ("leaderboard", &refresh.leaderboard),
            ("timeseries", &refresh.timeseries),
        ] {
            if schedule.daily_at.is_some() {
                continue;
            }
            match schedule.every {
                None => bail!("refresh.{name} needs either `every` or `daily_at`"),
                Some(every) if every.is_zero() => bail!("refresh.{name}.every must be non-zero"),
                Some(_) => {}
            }
        }
        if self.trends.keywords.is_empty() {
            bail!("trends.keywords must name at least one search term");
        }
        Ok(())
    }
}

/// Parse a humane duration such as `"250ms"`, `"90s"`, `"5m"`, `"6h"`, or `"1d"`.
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    const UNITS: &[TimeUnit] = &[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ];
    let parser = DurationParser::with_time_units(UNITS);
    let parsed = parser
        .parse(input.trim())
        .map_err(|e| format!("invalid duration '{input}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{input}': {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration such as \"90s\" or \"6h\", or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("duration cannot be negative: {v}")))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(v).map_err(|e| E::custom(format!("invalid duration {v}: {e}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            parse_duration(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Humane(#[serde(deserialize_with = "deserialize_duration")] Duration);

    Ok(Option::<Humane>::deserialize(deserializer)?.map(|Humane(d)| d))
}

fn deserialize_time_of_day<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map(Some)
        .map_err(|_| de::Error::custom(format!("invalid time of day '{raw}', expected HH:MM")))
}

fn deserialize_timezone<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim()
        .parse::<Tz>()
        .map_err(|_| de::Error::custom(format!("unknown time zone '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::scheduler::Schedule;
    use figment::providers::Serialized;

    #[test]
    fn parses_humane_durations() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("6h").unwrap(), Duration::from_secs(6 * 3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 30 ").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let config: Config = Figment::new().extract().unwrap();
        config.validate().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.refresh.abort_threshold, 2);
        assert_eq!(config.refresh.backoff_cap, Duration::from_secs(7200));
        assert_eq!(config.trends.keywords.len(), 4);
    }

    #[test]
    fn nested_overrides_accept_strings_and_numbers() {
        let config: Config = Figment::new()
            .merge(Serialized::default("refresh.pacing_min", "1s"))
            .merge(Serialized::default("refresh.pacing_max", 2))
            .merge(Serialized::default("refresh.timeseries.daily_at", "06:30"))
            .merge(Serialized::default("refresh.timeseries.every", "1d"))
            .merge(Serialized::default("refresh.timeseries.timezone", "Europe/Brussels"))
            .extract()
            .unwrap();
        assert_eq!(config.refresh.pacing_min, Duration::from_secs(1));
        assert_eq!(config.refresh.pacing_max, Duration::from_secs(2));
        assert_eq!(
            config.refresh.timeseries.daily_at,
            NaiveTime::from_hms_opt(6, 30, 0)
        );
        assert_eq!(config.refresh.timeseries.timezone, chrono_tz::Europe::Brussels);
    }

    #[test]
    fn rejects_inverted_pacing() {
        let mut config: Config = Figment::new().extract().unwrap();
        config.refresh.pacing_min = Duration::from_secs(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let mut config: Config = Figment::new().extract().unwrap();
        config.refresh.backoff_factor = 0.5;
        assert!(config.validate().is_err());
        config.refresh.backoff_factor = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn daily_schedule_needs_no_interval() {
        let config: Config = Figment::new()
            .merge(Serialized::default("refresh.timeseries.daily_at", "06:30"))
            .extract()
            .unwrap();
        config.validate().unwrap();
        assert_eq!(config.refresh.timeseries.every, None);
        assert!(matches!(
            Schedule::from_config(&config.refresh.timeseries),
            Schedule::Daily { at, .. } if at == NaiveTime::from_hms_opt(6, 30, 0).unwrap()
        ));
    }

    #[test]
    fn rejects_schedule_without_interval_or_time() {
        let mut config: Config = Figment::new().extract().unwrap();
        config.refresh.leaderboard.every = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("refresh.leaderboard"), "{err}");

        config.refresh.leaderboard.every = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_force_reject_threshold() {
        let mut config: Config = Figment::new().extract().unwrap();
        config.refresh.force_reject_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("force_reject_threshold"), "{err}");

        config.refresh.force_reject_threshold = 1;
        config.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_timezone() {
        let result: Result<Config, _> = Figment::new()
            .merge(Serialized::default("refresh.leaderboard.every", "6h"))
            .merge(Serialized::default("refresh.leaderboard.timezone", "Mars/Olympus"))
            .extract();
        assert!(result.is_err());
    }
}
