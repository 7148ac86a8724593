use std::path::PathBuf;

use clap::{Args, Parser, builder::BoolishValueParser};

use crate::coherence::Strategy;

/// Command-line arguments for the edge binary.
#[derive(Debug, Parser)]
#[command(name = "edge-coherence", version, about = "Regional edge cache node")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "EDGE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Region this node serves.
    #[arg(long = "region", env = "REGION", value_name = "NAME")]
    pub region: Option<String>,

    /// Invalidation strategy (eager|lazy).
    #[arg(long = "strategy", env = "INVALIDATION_STRATEGY", value_name = "STRATEGY")]
    pub strategy: Option<Strategy>,

    /// Override the simulated propagation delay.
    #[arg(long = "propagation-delay-ms", value_name = "MS")]
    pub propagation_delay_ms: Option<u64>,

    /// Override the cache store URL (memory:// or redis://).
    #[arg(long = "cache-store-url", env = "REDIS_URL", value_name = "URL")]
    pub cache_store_url: Option<String>,

    /// Override the default entry lifetime.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS")]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Override the origin base URL.
    #[arg(long = "origin-url", env = "ORIGIN_URL", value_name = "URL")]
    pub origin_url: Option<String>,

    /// Override the origin request timeout.
    #[arg(long = "origin-timeout-ms", value_name = "MS")]
    pub origin_timeout_ms: Option<u64>,

    /// Override the background refresh concurrency.
    #[arg(long = "refresh-concurrency", value_name = "COUNT")]
    pub refresh_concurrency: Option<usize>,

    /// Override the metrics summary log interval.
    #[arg(long = "metrics-summary-interval-seconds", value_name = "SECONDS")]
    pub metrics_summary_interval_seconds: Option<u64>,
}
