//! Google Trends client.
//!
//! Speaks the same unofficial endpoints the web UI uses: an `explore` call
//! hands out per-widget tokens, and each widget's data is then fetched with
//! its token. There is no authentication, only a cookie primed from the home
//! page, and the service throttles automated callers with HTTP 429.

pub mod aggregate;
pub mod errors;
pub mod geo;
pub mod json;
pub mod middleware;
pub mod models;
pub mod plan;

pub use errors::TrendsError;
pub use models::{QueryKind, RegionRow, Scope, SubQuery, SubQueryRows, TimelinePoint};

use crate::config::TrendsConfig;
use crate::trends::json::parse_trends_body;
use crate::trends::middleware::TraceMiddleware;
use crate::trends::models::{
    ExploreResponse, GeoMapData, TimelineData, Widget, WidgetEnvelope,
};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (X11; Linux x86_64) trendboard/",
    env!("CARGO_PKG_VERSION")
);

/// Executes single sub-queries against the upstream.
///
/// The refresh cycle only talks to this trait, so pacing and failure
/// classification can be exercised against scripted sources.
#[async_trait]
pub trait TrendsSource: Send + Sync {
    async fn execute(&self, query: &SubQuery) -> Result<SubQueryRows, TrendsError>;
}

struct Endpoints {
    home: Url,
    explore: Url,
    compared_geo: Url,
    multiline: Url,
}

impl Endpoints {
    fn new(base: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base).with_context(|| format!("Invalid trends base URL '{base}'"))?;
        Ok(Self {
            explore: base.join("trends/api/explore")?,
            compared_geo: base.join("trends/api/widgetdata/comparedgeo")?,
            multiline: base.join("trends/api/widgetdata/multiline")?,
            home: base,
        })
    }
}

/// Client for the Trends explore/widget endpoints.
pub struct TrendsClient {
    http: ClientWithMiddleware,
    endpoints: Endpoints,
    hl: String,
    tz: i32,
    timeframe: String,
    include_low_volume: bool,
    cookies_primed: AtomicBool,
}

impl TrendsClient {
    pub fn new(config: &TrendsConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let http = reqwest_middleware::ClientBuilder::new(http)
            .with(TraceMiddleware)
            .build();

        Ok(Self {
            http,
            endpoints: Endpoints::new(&config.base_url)?,
            hl: config.hl.clone(),
            tz: config.tz,
            timeframe: config.timeframe.clone(),
            include_low_volume: config.include_low_volume,
            cookies_primed: AtomicBool::new(false),
        })
    }

    /// Visit the home page once so the session carries the `NID` cookie.
    /// Failure is tolerated; the widget calls will surface any real problem.
    async fn prime_cookies(&self) {
        if self.cookies_primed.load(Ordering::Acquire) {
            return;
        }

        let mut url = self.endpoints.home.clone();
        url.query_pairs_mut()
            .append_pair("geo", geo::locale_country(&self.hl));

        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                self.cookies_primed.store(true, Ordering::Release);
                trace!("Primed Trends session cookies");
            }
            Ok(response) => {
                debug!(
                    status = response.status().as_u16(),
                    "Cookie priming returned non-success status"
                );
            }
            Err(e) => debug!(error = ?e, "Cookie priming failed"),
        }
    }

    /// Send a request and return the decoded body, mapping throttling and
    /// non-success statuses onto typed errors.
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest_middleware::RequestBuilder,
    ) -> Result<T, TrendsError> {
        let response = request.send().await?;
        let status = response.status();
        let url = response.url().to_string();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(TrendsError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(TrendsError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        parse_trends_body(&body).map_err(|source| TrendsError::ParseFailed {
            status: status.as_u16(),
            url,
            source,
        })
    }

    async fn explore(&self, query: &SubQuery, geo: &str) -> Result<Vec<Widget>, TrendsError> {
        let comparison: Vec<Value> = query
            .keywords
            .iter()
            .map(|keyword| json!({ "keyword": keyword, "time": self.timeframe, "geo": geo }))
            .collect();
        let req = json!({ "comparisonItem": comparison, "category": 0, "property": "" });

        let request = self.http.post(self.endpoints.explore.clone()).query(&[
            ("hl", self.hl.clone()),
            ("tz", self.tz.to_string()),
            ("req", req.to_string()),
        ]);

        let explore: ExploreResponse = self.send(request).await?;
        Ok(explore.widgets)
    }

    async fn interest_by_region(
        &self,
        query: &SubQuery,
        geo: &str,
    ) -> Result<Vec<RegionRow>, TrendsError> {
        let widgets = self.explore(query, geo).await?;
        let (token, mut request) = take_widget(widgets, "GEO_MAP")?;
        request.insert(
            "resolution".to_owned(),
            json!(if geo.is_empty() { "COUNTRY" } else { "REGION" }),
        );
        request.insert(
            "includeLowSearchVolumeGeos".to_owned(),
            json!(self.include_low_volume),
        );

        let request = self.http.get(self.endpoints.compared_geo.clone()).query(&[
            ("req", Value::Object(request).to_string()),
            ("token", token),
            ("tz", self.tz.to_string()),
            ("hl", self.hl.clone()),
        ]);

        let data: WidgetEnvelope<GeoMapData> = self.send(request).await?;
        Ok(data.default.into_rows())
    }

    async fn interest_over_time(
        &self,
        query: &SubQuery,
        geo: &str,
    ) -> Result<Vec<TimelinePoint>, TrendsError> {
        let widgets = self.explore(query, geo).await?;
        let (token, request) = take_widget(widgets, "TIMESERIES")?;

        let request = self.http.get(self.endpoints.multiline.clone()).query(&[
            ("req", Value::Object(request).to_string()),
            ("token", token),
            ("tz", self.tz.to_string()),
        ]);

        let data: WidgetEnvelope<TimelineData> = self.send(request).await?;
        Ok(data.default.into_points())
    }
}

/// Extract the token and request object of the first widget with `id`.
fn take_widget(
    widgets: Vec<Widget>,
    id: &'static str,
) -> Result<(String, Map<String, Value>), TrendsError> {
    let widget = widgets
        .into_iter()
        .find(|w| w.id == id)
        .ok_or(TrendsError::MissingWidget(id))?;
    match (widget.token, widget.request) {
        (Some(token), Value::Object(request)) => Ok((token, request)),
        _ => Err(TrendsError::MissingWidget(id)),
    }
}

#[async_trait]
impl TrendsSource for TrendsClient {
    async fn execute(&self, query: &SubQuery) -> Result<SubQueryRows, TrendsError> {
        let geo = match &query.scope {
            Scope::Worldwide => "",
            Scope::Country(name) => {
                geo::code_for(name).ok_or_else(|| TrendsError::UnknownGeo(name.clone()))?
            }
        };

        self.prime_cookies().await;

        match query.kind {
            QueryKind::InterestByRegion => Ok(SubQueryRows::Region(
                self.interest_by_region(query, geo).await?,
            )),
            QueryKind::InterestOverTime => Ok(SubQueryRows::Timeline {
                label: query.label.clone(),
                points: self.interest_over_time(query, geo).await?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget(id: &str, token: Option<&str>, request: Value) -> Widget {
        Widget {
            id: id.to_owned(),
            token: token.map(str::to_owned),
            request,
        }
    }

    #[test]
    fn take_widget_finds_first_match() {
        let widgets = vec![
            widget("TIMESERIES", Some("t1"), json!({ "time": "today 1-m" })),
            widget("GEO_MAP", Some("g1"), json!({ "geo": {} })),
            widget("GEO_MAP_0", Some("g2"), json!({})),
        ];
        let (token, request) = take_widget(widgets, "GEO_MAP").unwrap();
        assert_eq!(token, "g1");
        assert!(request.contains_key("geo"));
    }

    #[test]
    fn take_widget_requires_token_and_object() {
        let missing = take_widget(vec![], "GEO_MAP");
        assert!(matches!(missing, Err(TrendsError::MissingWidget("GEO_MAP"))));

        let tokenless = take_widget(vec![widget("GEO_MAP", None, json!({}))], "GEO_MAP");
        assert!(matches!(tokenless, Err(TrendsError::MissingWidget(_))));

        let scalar = take_widget(vec![widget("TIMESERIES", Some("t"), json!(3))], "TIMESERIES");
        assert!(matches!(scalar, Err(TrendsError::MissingWidget(_))));
    }

    #[test]
    fn endpoints_join_base() {
        let endpoints = Endpoints::new("https://trends.google.com/").unwrap();
        assert_eq!(
            endpoints.compared_geo.as_str(),
            "https://trends.google.com/trends/api/widgetdata/comparedgeo"
        );
        assert!(Endpoints::new("not a url").is_err());
    }

    #[tokio::test]
    async fn unknown_country_fails_before_any_request() {
        let config = TrendsConfig {
            // Unroutable; a request would error differently than UnknownGeo.
            base_url: "http://127.0.0.1:9/".to_owned(),
            ..TrendsConfig::default()
        };
        let client = TrendsClient::new(&config).unwrap();
        let query = SubQuery {
            kind: QueryKind::InterestOverTime,
            keywords: vec!["PEPPOL".into()],
            scope: Scope::Country("Atlantis".into()),
            label: "Atlantis".into(),
        };
        let err = client.execute(&query).await.unwrap_err();
        assert!(err.is_configuration(), "{err:?}");
        assert!(!client.cookies_primed.load(Ordering::Acquire));
    }
}
