//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::client::PushDefaults;
use crate::routing::{ClientRules, ClientStrategyTable, EdgeRules};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tiercache";
const ENV_PREFIX: &str = "TIERCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ORIGIN_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_EDGE_GENERATION: &str = "edge-v1";
const DEFAULT_CLIENT_ORIGIN: &str = "http://127.0.0.1:3000";
const DEFAULT_CLIENT_GENERATION: &str = "cotai-edge-v1.0.0";
const DEFAULT_OFFLINE_PATH: &str = "/offline";
const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SYNC_TAG: &str = "background-quotation-sync";
const DEFAULT_MANIFEST: [&str; 7] = [
    "/",
    "/dashboard",
    "/login",
    "/offline",
    "/manifest.json",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
];

/// Command-line arguments for the tiercache binary.
#[derive(Debug, Parser)]
#[command(
    name = "tiercache",
    version,
    about = "Two-tier HTTP caching and routing proxy"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TIERCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the edge proxy.
    Serve(Box<ServeArgs>),
    /// Print the resource class and strategies chosen for a request.
    Classify(ClassifyArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
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

    /// Override the origin base URL.
    #[arg(long = "origin-url", value_name = "URL")]
    pub origin_url: Option<String>,

    /// Override the origin request timeout.
    #[arg(long = "origin-timeout-seconds", value_name = "SECONDS")]
    pub origin_timeout_seconds: Option<u64>,

    /// Override the name of the initial edge cache generation.
    #[arg(long = "edge-generation", value_name = "NAME")]
    pub edge_generation: Option<String>,

    /// Toggle the edge response cache.
    #[arg(
        long = "cache-response-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_response_enabled: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct ClassifyArgs {
    /// HTTP method, e.g. GET.
    #[arg(value_name = "METHOD")]
    pub method: String,

    /// Request URL or path, e.g. /api/health.
    #[arg(value_name = "URL")]
    pub url: String,

    /// Extra request headers as `name: value`.
    #[arg(long = "header", short = 'H', value_name = "HEADER")]
    pub headers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub origin: OriginSettings,
    pub edge: EdgeSettings,
    pub cache: CacheSettings,
    pub client: ClientSettings,
    pub push: PushDefaults,
    pub sync: SyncSettings,
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
pub struct OriginSettings {
    pub base_url: Url,
    pub timeout: Duration,
    pub max_request_bytes: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct EdgeSettings {
    pub generation: String,
    pub rules: EdgeRules,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enable_response_cache: bool,
    pub response_limit: usize,
    pub kv_limit: usize,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub origin: Url,
    pub generation: String,
    pub offline_path: String,
    pub manifest: Vec<String>,
    pub network_timeout: Duration,
    pub rules: ClientRules,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub tag: String,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Classify(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    origin: RawOriginSettings,
    lifecycle: RawLifecycleSettings,
    edge: EdgeRules,
    cache: RawCacheSettings,
    client: RawClientSettings,
    push: PushDefaults,
    sync: RawSyncSettings,
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
        if let Some(url) = overrides.origin_url.as_ref() {
            self.origin.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.origin_timeout_seconds {
            self.origin.timeout_seconds = Some(seconds);
        }
        if let Some(name) = overrides.edge_generation.as_ref() {
            self.lifecycle.edge_generation = Some(name.clone());
        }
        if let Some(enabled) = overrides.cache_response_enabled {
            self.cache.enable_response_cache = Some(enabled);
        }
    }
}

#[cfg(test)]
impl Settings {
    /// Built-in defaults with no files, environment or CLI layered on top.
    pub(crate) fn defaults() -> Self {
        Self::from_raw(RawSettings::default()).expect("built-in defaults are valid")
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            origin,
            lifecycle,
            edge,
            cache,
            client,
            push,
            sync,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let origin = build_origin_settings(origin)?;
        let edge = build_edge_settings(lifecycle, edge)?;
        let cache = build_cache_settings(cache)?;
        let client = build_client_settings(client)?;
        let push = build_push_settings(push)?;
        let sync = build_sync_settings(sync)?;

        Ok(Self {
            server,
            logging,
            origin,
            edge,
            cache,
            client,
            push,
            sync,
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

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let base_url = parse_http_url(
        origin.base_url.as_deref().unwrap_or(DEFAULT_ORIGIN_URL),
        "origin.base_url",
    )?;

    let timeout_secs = origin
        .timeout_seconds
        .unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "origin.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_request_bytes = non_zero_usize(
        origin
            .max_request_bytes
            .unwrap_or(DEFAULT_MAX_REQUEST_BYTES),
        "origin.max_request_bytes",
    )?;

    Ok(OriginSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
        max_request_bytes,
    })
}

fn build_edge_settings(
    lifecycle: RawLifecycleSettings,
    rules: EdgeRules,
) -> Result<EdgeSettings, LoadError> {
    let generation = non_empty(
        lifecycle.edge_generation,
        DEFAULT_EDGE_GENERATION,
        "lifecycle.edge_generation",
    )?;

    for (key, prefix) in [
        ("edge.object_prefix", rules.object_prefix.as_str()),
        ("edge.api_prefix", rules.api_prefix.as_str()),
    ] {
        if !prefix.starts_with('/') {
            return Err(LoadError::invalid(key, "prefix must start with `/`"));
        }
    }

    if rules.api_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "edge.api_ttl_secs",
            "must be greater than zero",
        ));
    }
    if rules.immutable_max_age_secs == 0 || rules.page_shared_max_age_secs == 0 {
        return Err(LoadError::invalid(
            "edge.max_age",
            "cache lifetimes must be greater than zero",
        ));
    }

    Ok(EdgeSettings { generation, rules })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = crate::cache::CacheConfig::default();
    let response_limit = non_zero_usize(
        cache.response_limit.unwrap_or(defaults.response_limit as u64),
        "cache.response_limit",
    )?;
    let kv_limit = non_zero_usize(
        cache.kv_limit.unwrap_or(defaults.kv_limit as u64),
        "cache.kv_limit",
    )?;

    Ok(CacheSettings {
        enable_response_cache: cache
            .enable_response_cache
            .unwrap_or(defaults.enable_response_cache),
        response_limit: response_limit.get(),
        kv_limit: kv_limit.get(),
    })
}

fn build_client_settings(client: RawClientSettings) -> Result<ClientSettings, LoadError> {
    let origin = parse_http_url(
        client.origin.as_deref().unwrap_or(DEFAULT_CLIENT_ORIGIN),
        "client.origin",
    )?;
    let generation = non_empty(
        client.generation,
        DEFAULT_CLIENT_GENERATION,
        "client.generation",
    )?;

    let offline_path = client
        .offline_path
        .unwrap_or_else(|| DEFAULT_OFFLINE_PATH.to_string());
    if !offline_path.starts_with('/') {
        return Err(LoadError::invalid(
            "client.offline_path",
            "path must start with `/`",
        ));
    }

    let manifest = client
        .manifest
        .unwrap_or_else(|| DEFAULT_MANIFEST.iter().map(|path| path.to_string()).collect());
    if !manifest.contains(&offline_path) {
        return Err(LoadError::invalid(
            "client.manifest",
            format!("must include the offline page `{offline_path}`"),
        ));
    }

    let timeout_secs = client
        .network_timeout_seconds
        .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "client.network_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let rules = ClientRules::compile(&client.strategies)
        .map_err(|err| LoadError::invalid("client.strategies", err.to_string()))?;

    Ok(ClientSettings {
        origin,
        generation,
        offline_path,
        manifest,
        network_timeout: Duration::from_secs(timeout_secs),
        rules,
    })
}

fn build_push_settings(push: PushDefaults) -> Result<PushDefaults, LoadError> {
    if push.title.trim().is_empty() {
        return Err(LoadError::invalid("push.title", "must not be empty"));
    }
    if !push.target_url.starts_with('/') {
        return Err(LoadError::invalid(
            "push.target_url",
            "path must start with `/`",
        ));
    }
    Ok(push)
}

fn build_sync_settings(sync: RawSyncSettings) -> Result<SyncSettings, LoadError> {
    let tag = non_empty(sync.tag, DEFAULT_SYNC_TAG, "sync.tag")?;
    Ok(SyncSettings { tag })
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
struct RawOriginSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLifecycleSettings {
    edge_generation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enable_response_cache: Option<bool>,
    response_limit: Option<u64>,
    kv_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClientSettings {
    origin: Option<String>,
    generation: Option<String>,
    offline_path: Option<String>,
    manifest: Option<Vec<String>>,
    network_timeout_seconds: Option<u64>,
    strategies: ClientStrategyTable,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSyncSettings {
    tag: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{value}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "scheme must be http or https"));
    }
    Ok(url)
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_empty(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
