use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, de};

/// top-level config type
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub session: Session,
}

/// coordination store session settings as they appear on disk
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Session {
    #[serde(default = "default_connect_string")]
    pub connect_string: String,
    #[serde(
        default = "default_session_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub session_timeout: Duration,
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub connect_timeout: Duration,
}

/// connect string used when none is configured
pub const DEFAULT_CONNECT_STRING: &str = "memory://local";
/// session timeout handed to the store
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(5000);
/// how long construction waits for the "connected" event
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn default_connect_string() -> String {
    DEFAULT_CONNECT_STRING.to_owned()
}

pub const fn default_session_timeout() -> Duration {
    DEFAULT_SESSION_TIMEOUT
}

pub const fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

impl Default for Session {
    fn default() -> Self {
        Self {
            connect_string: default_connect_string(),
            session_timeout: default_session_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Parse a duration string with optional time units
/// Accepts: "5000ms", "5", "5s", "1m", "1h"
/// If no unit is specified, assumes seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration string");
    }

    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    // split units
    let (num, unit) = s.split_at(end);
    let num = num.parse::<u64>().context("invalid number")?;

    let millis_per_unit = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        other => anyhow::bail!(
            "unknown time unit '{}', only 'ms', 's', 'm', or 'h' are supported",
            other
        ),
    };

    num.checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .context("duration value overflow")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Seconds(u64),
    String(String),
}

fn deserialize_duration<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match WireDuration::deserialize(de)? {
        WireDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        WireDuration::String(s) => parse_duration(&s).map_err(de::Error::custom),
    }
}

fn serialize_duration<S>(d: &Duration, ser: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    ser.serialize_str(&format!("{}ms", d.as_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    pub static EXAMPLE: &str = r#"
session:
  connect_string: "memory://cluster-a"
  session_timeout: "5s"
  connect_timeout: 2
"#;

    // test we can encode/decode example file
    #[test]
    fn test_example() {
        let cfg: Config = serde_yaml::from_str(EXAMPLE).unwrap();
        assert_eq!(cfg.session.connect_string, "memory://cluster-a");
        assert_eq!(cfg.session.session_timeout, Duration::from_secs(5));
        assert_eq!(cfg.session.connect_timeout, Duration::from_secs(2));
        // back to the yaml
        let s = serde_yaml::to_string(&cfg).unwrap();
        let again: Config = serde_yaml::from_str(&s).unwrap();
        assert_eq!(cfg, again);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());

        let cfg: Config =
            serde_json::from_str(r#"{"session": {"connect_timeout": "750ms"}}"#).unwrap();
        assert_eq!(cfg.session.connect_string, DEFAULT_CONNECT_STRING);
        assert_eq!(cfg.session.session_timeout, DEFAULT_SESSION_TIMEOUT);
        assert_eq!(cfg.session.connect_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5000ms").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("90m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("60d").is_err());
        assert!(parse_duration("60mins").is_err());
        assert!(parse_duration("ms").is_err());
    }
}
