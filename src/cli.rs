use clap::{Parser, ValueEnum};

/// Serves Google Trends interest snapshots for dashboards.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format. Defaults to pretty in debug builds, JSON in release.
    #[arg(long, value_enum, default_value_t = TracingFormat::default())]
    pub tracing: TracingFormat,

    /// Services to run (repeat or comma-separate). Runs all when omitted.
    #[arg(long = "service", value_enum, value_delimiter = ',')]
    pub services: Vec<ServiceName>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    Pretty,
    Json,
}

impl Default for TracingFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            TracingFormat::Pretty
        } else {
            TracingFormat::Json
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceName {
    /// HTTP API
    Web,
    /// Background refresh scheduler
    Refresher,
}

impl ServiceName {
    pub fn all() -> Vec<ServiceName> {
        vec![ServiceName::Web, ServiceName::Refresher]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Web => "web",
            ServiceName::Refresher => "refresher",
        }
    }
}
