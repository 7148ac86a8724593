//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap, net::SocketAddr, num::NonZeroUsize, str::FromStr, time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::coherence::Strategy;
use crate::region::DEFAULT_PROPAGATION_DELAYS;

mod cli;

pub use cli::{CliArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "edge";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REGION: &str = "us-east";
const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_ORIGIN_URL: &str = "http://localhost:4000";
const DEFAULT_ORIGIN_TIMEOUT_MS: u64 = 5000;
const DEFAULT_TOPIC: &str = "cache.invalidation";
const DEFAULT_PARTITIONS: usize = 8;
const DEFAULT_BUS_CAPACITY: usize = 1024;
const DEFAULT_BROKER: &str = "localhost:9092";
const DEFAULT_REFRESH_CONCURRENCY: usize = 8;
const DEFAULT_SUMMARY_INTERVAL_SECS: u64 = 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub region: RegionSettings,
    pub cache: CacheSettings,
    pub origin: OriginSettings,
    pub event_bus: EventBusSettings,
    pub refresh: RefreshSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RegionSettings {
    pub name: String,
    pub strategy: Strategy,
    /// Explicit override, else the `default_delays` entry for `name`, else zero.
    pub propagation_delay: Duration,
    pub default_delays: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    /// `None` selects the in-process store.
    pub store_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EventBusSettings {
    pub topic: String,
    pub partitions: NonZeroUsize,
    pub capacity: NonZeroUsize,
    /// Reported at startup only; the bus runs in process.
    pub brokers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub concurrency: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct MetricsSettings {
    pub summary_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("EDGE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("event_bus.brokers")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_serve_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    region: RawRegionSettings,
    cache: RawCacheSettings,
    origin: RawOriginSettings,
    event_bus: RawEventBusSettings,
    refresh: RawRefreshSettings,
    metrics: RawMetricsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(region) = overrides.region.as_ref() {
            self.region.name = Some(region.clone());
        }
        if let Some(strategy) = overrides.strategy {
            self.region.strategy = Some(strategy.to_string());
        }
        if let Some(delay) = overrides.propagation_delay_ms {
            self.region.propagation_delay_ms = Some(delay);
        }
        if let Some(url) = overrides.cache_store_url.as_ref() {
            self.cache.store_url = Some(url.clone());
        }
        if let Some(ttl) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(ttl);
        }
        if let Some(url) = overrides.origin_url.as_ref() {
            self.origin.base_url = Some(url.clone());
        }
        if let Some(timeout) = overrides.origin_timeout_ms {
            self.origin.timeout_ms = Some(timeout);
        }
        if let Some(concurrency) = overrides.refresh_concurrency {
            self.refresh.concurrency = Some(concurrency);
        }
        if let Some(interval) = overrides.metrics_summary_interval_seconds {
            self.metrics.summary_interval_seconds = Some(interval);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            region,
            cache,
            origin,
            event_bus,
            refresh,
            metrics,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            region: build_region_settings(region)?,
            cache: build_cache_settings(cache)?,
            origin: build_origin_settings(origin)?,
            event_bus: build_event_bus_settings(event_bus)?,
            refresh: build_refresh_settings(refresh)?,
            metrics: build_metrics_settings(metrics)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_region_settings(region: RawRegionSettings) -> Result<RegionSettings, LoadError> {
    let name = non_empty(region.name).unwrap_or_else(|| DEFAULT_REGION.to_string());

    let strategy = match region.strategy {
        Some(value) => Strategy::from_str(&value)
            .map_err(|reason| LoadError::invalid("region.strategy", reason))?,
        None => Strategy::default(),
    };

    let mut default_delays: BTreeMap<String, u64> = DEFAULT_PROPAGATION_DELAYS
        .iter()
        .map(|(name, millis)| ((*name).to_string(), *millis))
        .collect();
    default_delays.extend(region.default_delays);

    let delay_ms = region
        .propagation_delay_ms
        .or_else(|| default_delays.get(&name).copied())
        .unwrap_or(0);

    Ok(RegionSettings {
        name,
        strategy,
        propagation_delay: Duration::from_millis(delay_ms),
        default_delays,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_secs = cache.default_ttl_seconds.unwrap_or(DEFAULT_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.default_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        default_ttl: Duration::from_secs(ttl_secs),
        store_url: non_empty(cache.store_url),
    })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let base_url = non_empty(origin.base_url).unwrap_or_else(|| DEFAULT_ORIGIN_URL.to_string());
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(LoadError::invalid(
            "origin.base_url",
            format!("`{base_url}` is not an http(s) URL"),
        ));
    }

    let timeout_ms = origin.timeout_ms.unwrap_or(DEFAULT_ORIGIN_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "origin.timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(OriginSettings {
        base_url: base_url.trim_end_matches('/').to_string(),
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_event_bus_settings(bus: RawEventBusSettings) -> Result<EventBusSettings, LoadError> {
    let topic = non_empty(bus.topic).unwrap_or_else(|| DEFAULT_TOPIC.to_string());
    let partitions = non_zero_usize(
        bus.partitions.unwrap_or(DEFAULT_PARTITIONS),
        "event_bus.partitions",
    )?;
    let capacity = non_zero_usize(
        bus.capacity.unwrap_or(DEFAULT_BUS_CAPACITY),
        "event_bus.capacity",
    )?;
    let brokers = bus
        .brokers
        .filter(|brokers| !brokers.is_empty())
        .unwrap_or_else(|| vec![DEFAULT_BROKER.to_string()]);

    Ok(EventBusSettings {
        topic,
        partitions,
        capacity,
        brokers,
    })
}

fn build_refresh_settings(refresh: RawRefreshSettings) -> Result<RefreshSettings, LoadError> {
    Ok(RefreshSettings {
        concurrency: non_zero_usize(
            refresh.concurrency.unwrap_or(DEFAULT_REFRESH_CONCURRENCY),
            "refresh.concurrency",
        )?,
    })
}

fn build_metrics_settings(metrics: RawMetricsSettings) -> Result<MetricsSettings, LoadError> {
    let interval = metrics
        .summary_interval_seconds
        .unwrap_or(DEFAULT_SUMMARY_INTERVAL_SECS);
    if interval == 0 {
        return Err(LoadError::invalid(
            "metrics.summary_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(MetricsSettings {
        summary_interval: Duration::from_secs(interval),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRegionSettings {
    name: Option<String>,
    strategy: Option<String>,
    propagation_delay_ms: Option<u64>,
    default_delays: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_ttl_seconds: Option<u64>,
    store_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEventBusSettings {
    topic: Option<String>,
    partitions: Option<usize>,
    capacity: Option<usize>,
    brokers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRefreshSettings {
    concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMetricsSettings {
    summary_interval_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
