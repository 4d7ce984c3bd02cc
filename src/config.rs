use crate::ingest::referrer::{ReferrerRule, RuleSet};
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// DuckDB database file. If not set, visits live in memory only.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Offset from UTC, in minutes, used to cut visits into calendar days.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// CSV range table (`start,end,region,isp`) for IP geolocation.
    /// If not set or unreadable, region and ISP stay empty.
    #[serde(default)]
    pub geo_ranges_path: Option<PathBuf>,
    /// Search engine rules, checked in priority order.
    #[serde(default = "RuleSet::default_rules")]
    pub referrer_rules: Vec<ReferrerRule>,
    /// Websites registered at startup.
    #[serde(default)]
    pub websites: Vec<WebsiteSeed>,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Days covered by the trend in the system overview (default: 7).
    #[serde(default = "default_trend_days")]
    pub trend_days: u32,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// A `[[websites]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebsiteSeed {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default)]
    pub is_public: bool,
    /// `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`, local time.
    #[serde(default)]
    pub start_time: Option<String>,
}

impl WebsiteSeed {
    /// Parsed start time, `None` if absent or malformed.
    pub fn start_time(&self) -> Option<NaiveDateTime> {
        let raw = self.start_time.as_deref()?.trim();
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_trend_days() -> u32 {
    7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: None,
            utc_offset_minutes: 0,
            geo_ranges_path: None,
            referrer_rules: RuleSet::default_rules(),
            websites: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            trend_days: default_trend_days(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `VISITSTAT_HOST` → host
    /// - `VISITSTAT_PORT` → port
    /// - `VISITSTAT_DATABASE` → database_path
    /// - `VISITSTAT_UTC_OFFSET_MINUTES` → utc_offset_minutes
    /// - `VISITSTAT_GEO_RANGES` → geo_ranges_path
    /// - `VISITSTAT_REQUEST_TIMEOUT` → request_timeout_secs
    /// - `VISITSTAT_TREND_DAYS` → trend_days
    /// - `VISITSTAT_LOG_FORMAT` → log_format
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        // Environment variable overrides
        if let Ok(host) = std::env::var("VISITSTAT_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("VISITSTAT_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(path) = std::env::var("VISITSTAT_DATABASE") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Ok(val) = std::env::var("VISITSTAT_UTC_OFFSET_MINUTES") {
            if let Ok(m) = val.parse() {
                config.utc_offset_minutes = m;
            }
        }
        if let Ok(path) = std::env::var("VISITSTAT_GEO_RANGES") {
            config.geo_ranges_path = Some(PathBuf::from(path));
        }
        if let Ok(val) = std::env::var("VISITSTAT_REQUEST_TIMEOUT") {
            if let Ok(t) = val.parse() {
                config.request_timeout_secs = t;
            }
        }
        if let Ok(val) = std::env::var("VISITSTAT_TREND_DAYS") {
            if let Ok(d) = val.parse() {
                config.trend_days = d;
            }
        }
        if let Ok(val) = std::env::var("VISITSTAT_LOG_FORMAT") {
            match val.parse() {
                Ok(format) => config.log_format = format,
                Err(e) => tracing::warn!("Ignoring VISITSTAT_LOG_FORMAT: {e}"),
            }
        }

        config
    }

    /// The configured offset, or UTC if it is out of range.
    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!(
                    utc_offset_minutes = self.utc_offset_minutes,
                    "UTC offset out of range, using UTC"
                );
                Utc.fix()
            })
    }

    pub fn rule_set(&self) -> RuleSet {
        RuleSet::new(self.referrer_rules.clone())
    }
}
