//! tracing configuration
use anyhow::Result;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

use crate::cli::LogFormat;

/// Installed tracing setup
#[derive(Debug)]
pub struct Config {
    /// formatting applied to logs
    pub log_frmt: LogFormat,
}

impl Config {
    /// Install the global subscriber. `filter` is an `EnvFilter` directive,
    /// an invalid one falls back to `info`
    pub fn parse(filter: &str, log_frmt: LogFormat) -> Result<Self> {
        let filter = EnvFilter::try_new(filter).or_else(|_| EnvFilter::try_new("info"))?;

        match log_frmt {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .event_format(Format::default().pretty().with_source_location(false))
                            .fmt_fields(PrettyFields::new()),
                    )
                    .init();
            }
            LogFormat::Standard => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer())
                    .init();
            }
        }

        Ok(Self { log_frmt })
    }
}
