//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::config::{DEFAULT_DIRECTORY, DEFAULT_MAX_BODY_BYTES, DEFAULT_PRECACHE};
use crate::cache::namespace::{DEFAULT_CHAPTER_NAMESPACE, DEFAULT_STATIC_PREFIX, DEFAULT_VERSION};
use crate::cache::{NamespaceName, Namespaces, StoreBackend};
use crate::domain::classify::{DEFAULT_API_PREFIX, DEFAULT_CHAPTER_MARKER};

mod cli;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides, StoreArgs, StoreOverride};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "shelfcache";
const ENV_PREFIX: &str = "SHELFCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8787;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_UPSTREAM_BASE_URL: &str = "http://127.0.0.1:1122";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONTROL_PATH: &str = "/__shelfcache/message";
const DEFAULT_HEALTH_PATH: &str = "/__shelfcache/health";
const DEFAULT_REVALIDATION_MAX_IN_FLIGHT: u64 = 32;
const DEFAULT_REVALIDATION_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub routing: RoutingSettings,
    pub revalidation: RevalidationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Upper bound on buffered request bodies, proxied or control.
    pub max_request_bytes: NonZeroUsize,
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
pub struct UpstreamSettings {
    pub base_url: Url,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: StoreBackend,
    pub directory: PathBuf,
    pub namespaces: Namespaces,
    pub precache: Vec<String>,
    pub max_body_bytes: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct RoutingSettings {
    pub chapter_marker: String,
    pub api_prefixes: Vec<String>,
    pub control_path: String,
    pub health_path: String,
}

#[derive(Debug, Clone)]
pub struct RevalidationSettings {
    pub max_in_flight: NonZeroUsize,
    pub timeout: Duration,
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
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.precache")
            .with_list_parse_key("routing.api_prefixes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::ClearChapters(args)) | Some(Command::Prune(args)) => {
            raw.apply_store_override(&args.store)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

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
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
    routing: RawRoutingSettings,
    revalidation: RawRevalidationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_store_override(&overrides.store);

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
        if let Some(url) = overrides.upstream_base_url.as_ref() {
            self.upstream.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.upstream_request_timeout_seconds {
            self.upstream.request_timeout_secs = Some(seconds);
        }
        if let Some(count) = overrides.revalidation_max_in_flight {
            self.revalidation.max_in_flight = Some(count as u64);
        }
    }

    fn apply_store_override(&mut self, overrides: &StoreOverride) {
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(version) = overrides.cache_version.as_ref() {
            self.cache.version = Some(version.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            cache,
            routing,
            revalidation,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let upstream = build_upstream_settings(upstream)?;
        let cache = build_cache_settings(cache)?;
        let routing = build_routing_settings(routing)?;
        let revalidation = build_revalidation_settings(revalidation)?;

        Ok(Self {
            server,
            logging,
            upstream,
            cache,
            routing,
            revalidation,
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
    let graceful_shutdown = positive_secs(graceful_secs, "server.graceful_shutdown_seconds")?;

    let max_request_bytes = non_zero_usize(
        server.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES),
        "server.max_request_bytes",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
        max_request_bytes,
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

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let raw_url = upstream
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string());
    let base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("upstream.base_url", format!("`{raw_url}`: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "upstream.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }
    if base_url.query().is_some() || base_url.fragment().is_some() {
        return Err(LoadError::invalid(
            "upstream.base_url",
            "must not carry a query or fragment",
        ));
    }

    let connect_timeout = positive_secs(
        upstream
            .connect_timeout_secs
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        "upstream.connect_timeout_secs",
    )?;
    let request_timeout = positive_secs(
        upstream
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        "upstream.request_timeout_secs",
    )?;

    Ok(UpstreamSettings {
        base_url,
        connect_timeout,
        request_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => StoreBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => StoreBackend::Memory,
    };

    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DIRECTORY));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.directory", "must not be empty"));
    }

    let prefix = cache
        .static_prefix
        .unwrap_or_else(|| DEFAULT_STATIC_PREFIX.to_string());
    let version = cache
        .version
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());
    let static_assets = NamespaceName::versioned(prefix.trim(), version.trim())
        .map_err(|err| LoadError::invalid("cache.static_prefix", err.to_string()))?;
    let chapters = NamespaceName::new(
        cache
            .chapter_namespace
            .unwrap_or_else(|| DEFAULT_CHAPTER_NAMESPACE.to_string())
            .trim(),
    )
    .map_err(|err| LoadError::invalid("cache.chapter_namespace", err.to_string()))?;
    let namespaces = Namespaces::new(static_assets, chapters)
        .map_err(|err| LoadError::invalid("cache.chapter_namespace", err.to_string()))?;

    let precache: Vec<String> = match cache.precache {
        Some(targets) => targets
            .into_iter()
            .map(|target| target.trim().to_string())
            .filter(|target| !target.is_empty())
            .collect(),
        None => DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
    };
    if let Some(bad) = precache.iter().find(|target| !target.starts_with('/')) {
        return Err(LoadError::invalid(
            "cache.precache",
            format!("`{bad}` must be an origin-form target starting with `/`"),
        ));
    }

    let max_body_bytes = non_zero_usize(
        cache
            .max_body_bytes
            .unwrap_or(DEFAULT_MAX_BODY_BYTES as u64),
        "cache.max_body_bytes",
    )?;

    Ok(CacheSettings {
        backend,
        directory,
        namespaces,
        precache,
        max_body_bytes,
    })
}

fn build_routing_settings(routing: RawRoutingSettings) -> Result<RoutingSettings, LoadError> {
    let chapter_marker = routing
        .chapter_marker
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CHAPTER_MARKER.to_string());
    if chapter_marker.is_empty() || chapter_marker.contains('/') {
        return Err(LoadError::invalid(
            "routing.chapter_marker",
            "must be a single non-empty path segment",
        ));
    }

    let api_prefixes = routing
        .api_prefixes
        .unwrap_or_else(|| vec![DEFAULT_API_PREFIX.to_string()]);
    if let Some(bad) = api_prefixes.iter().find(|prefix| !prefix.starts_with('/')) {
        return Err(LoadError::invalid(
            "routing.api_prefixes",
            format!("`{bad}` must start with `/`"),
        ));
    }

    let control_path = route_path(
        routing.control_path,
        DEFAULT_CONTROL_PATH,
        "routing.control_path",
    )?;
    let health_path = route_path(
        routing.health_path,
        DEFAULT_HEALTH_PATH,
        "routing.health_path",
    )?;
    if control_path == health_path {
        return Err(LoadError::invalid(
            "routing.health_path",
            "must differ from routing.control_path",
        ));
    }

    Ok(RoutingSettings {
        chapter_marker,
        api_prefixes,
        control_path,
        health_path,
    })
}

fn build_revalidation_settings(
    revalidation: RawRevalidationSettings,
) -> Result<RevalidationSettings, LoadError> {
    let max_in_flight = non_zero_usize(
        revalidation
            .max_in_flight
            .unwrap_or(DEFAULT_REVALIDATION_MAX_IN_FLIGHT),
        "revalidation.max_in_flight",
    )?;
    let timeout = positive_secs(
        revalidation
            .timeout_secs
            .unwrap_or(DEFAULT_REVALIDATION_TIMEOUT_SECS),
        "revalidation.timeout_secs",
    )?;

    Ok(RevalidationSettings {
        max_in_flight,
        timeout,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    base_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    directory: Option<PathBuf>,
    static_prefix: Option<String>,
    version: Option<String>,
    chapter_namespace: Option<String>,
    precache: Option<Vec<String>>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRoutingSettings {
    chapter_marker: Option<String>,
    api_prefixes: Option<Vec<String>>,
    control_path: Option<String>,
    health_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRevalidationSettings {
    max_in_flight: Option<u64>,
    timeout_secs: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Router paths must be absolute and free of capture syntax.
fn route_path(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let path = value
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| default.to_string());
    if !path.starts_with('/') || path.len() < 2 {
        return Err(LoadError::invalid(key, "must start with `/` and name a path"));
    }
    if path.contains(['{', '}', '*', '?', '#']) {
        return Err(LoadError::invalid(
            key,
            "must not contain `{`, `}`, `*`, `?` or `#`",
        ));
    }
    Ok(path)
}
