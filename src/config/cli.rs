use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the shelfcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "shelfcache",
    version,
    about = "Offline-capable caching proxy for web book readers"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SHELFCACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Install, activate and serve the proxy.
    Serve(Box<ServeArgs>),
    /// Drop every cached chapter from the configured store.
    #[command(name = "clear-chapters")]
    ClearChapters(StoreArgs),
    /// Delete namespaces left behind by previous versions and print their names.
    #[command(name = "prune")]
    Prune(StoreArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreArgs {
    #[command(flatten)]
    pub store: StoreOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverride {
    /// Override the cache backend (memory|disk).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the disk cache directory.
    #[arg(long = "cache-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_directory: Option<PathBuf>,

    /// Override the static namespace version tag.
    #[arg(long = "cache-version", value_name = "VERSION")]
    pub cache_version: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverride,

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

    /// Override the upstream reader server.
    #[arg(long = "upstream-base-url", value_name = "URL", value_hint = ValueHint::Url)]
    pub upstream_base_url: Option<String>,

    /// Override the upstream request timeout.
    #[arg(long = "upstream-request-timeout-seconds", value_name = "SECONDS")]
    pub upstream_request_timeout_seconds: Option<u64>,

    /// Override the number of concurrent background revalidations.
    #[arg(long = "revalidation-max-in-flight", value_name = "COUNT")]
    pub revalidation_max_in_flight: Option<usize>,
}
