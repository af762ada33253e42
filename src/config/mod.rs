//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, DemoArgs, GlobalOverrides, RankArgs, WindowArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "talentgrid";
const ENV_PREFIX: &str = "TALENTGRID";
const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_PROFILE_TTL_SECS: u64 = 600;
const DEFAULT_OFFERS_TTL_SECS: u64 = 180;
const DEFAULT_MAX_ENTRIES: usize = 1000;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER_MS: u64 = 250;
const DEFAULT_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_PAGE_SIZE: usize = crate::query::DEFAULT_PAGE_SIZE;
const DEFAULT_FEED_PAGE_SIZE: usize = crate::query::DEFAULT_FEED_PAGE_SIZE;
const DEFAULT_MESSAGES_PAGE_SIZE: usize = crate::query::DEFAULT_MESSAGES_PAGE_SIZE;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub realtime: RealtimeSettings,
    pub query: QuerySettings,
    pub window: WindowSettings,
    pub backend: BackendSettings,
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
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub profile_ttl: Duration,
    pub offers_ttl: Duration,
    pub max_entries: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: Duration,
    pub channel_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub page_size: NonZeroUsize,
    pub feed_page_size: NonZeroUsize,
    pub messages_page_size: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct WindowSettings {
    pub overscan: usize,
    pub end_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_global_overrides(&cli.overrides);
    if let Some(Command::Window(args)) = cli.command.as_ref()
        && let Some(overscan) = args.overscan
    {
        raw.window.overscan = Some(overscan);
    }

    Settings::from_raw(raw)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            cache: CacheSettings {
                default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
                profile_ttl: Duration::from_secs(DEFAULT_PROFILE_TTL_SECS),
                offers_ttl: Duration::from_secs(DEFAULT_OFFERS_TTL_SECS),
                max_entries: non_zero_or_min(DEFAULT_MAX_ENTRIES),
            },
            realtime: RealtimeSettings {
                initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
                max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
                multiplier: DEFAULT_BACKOFF_MULTIPLIER,
                jitter: Duration::from_millis(DEFAULT_JITTER_MS),
                channel_capacity: non_zero_or_min(DEFAULT_CHANNEL_CAPACITY),
            },
            query: QuerySettings {
                page_size: non_zero_or_min(DEFAULT_PAGE_SIZE),
                feed_page_size: non_zero_or_min(DEFAULT_FEED_PAGE_SIZE),
                messages_page_size: non_zero_or_min(DEFAULT_MESSAGES_PAGE_SIZE),
            },
            window: WindowSettings {
                overscan: crate::window::DEFAULT_OVERSCAN,
                end_threshold: crate::window::DEFAULT_END_THRESHOLD,
            },
            backend: BackendSettings {
                url: None,
                api_key: None,
                request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    realtime: RawRealtimeSettings,
    query: RawQuerySettings,
    window: RawWindowSettings,
    backend: RawBackendSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(seconds) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(seconds);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(size) = overrides.query_page_size {
            self.query.page_size = Some(size);
        }
        if let Some(size) = overrides.query_feed_page_size {
            self.query.feed_page_size = Some(size);
        }
        if let Some(url) = overrides.backend_url.as_ref() {
            self.backend.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            realtime,
            query,
            window,
            backend,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            realtime: build_realtime_settings(realtime)?,
            query: build_query_settings(query)?,
            window: build_window_settings(window)?,
            backend: build_backend_settings(backend)?,
        })
    }
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_ttl = non_zero_secs(
        cache.default_ttl_seconds.unwrap_or(DEFAULT_TTL_SECS),
        "cache.default_ttl_seconds",
    )?;
    let profile_ttl = non_zero_secs(
        cache.profile_ttl_seconds.unwrap_or(DEFAULT_PROFILE_TTL_SECS),
        "cache.profile_ttl_seconds",
    )?;
    let offers_ttl = non_zero_secs(
        cache.offers_ttl_seconds.unwrap_or(DEFAULT_OFFERS_TTL_SECS),
        "cache.offers_ttl_seconds",
    )?;
    let max_entries = non_zero_usize(
        cache.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES),
        "cache.max_entries",
    )?;

    Ok(CacheSettings {
        default_ttl,
        profile_ttl,
        offers_ttl,
        max_entries,
    })
}

fn build_realtime_settings(
    realtime: RawRealtimeSettings,
) -> Result<RealtimeSettings, LoadError> {
    let initial_ms = realtime
        .initial_backoff_ms
        .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS);
    if initial_ms == 0 {
        return Err(LoadError::invalid(
            "realtime.initial_backoff_ms",
            "must be greater than zero",
        ));
    }
    let max_ms = realtime.max_backoff_ms.unwrap_or(DEFAULT_MAX_BACKOFF_MS);
    if max_ms < initial_ms {
        return Err(LoadError::invalid(
            "realtime.max_backoff_ms",
            "must not be smaller than initial_backoff_ms",
        ));
    }
    let multiplier = realtime.multiplier.unwrap_or(DEFAULT_BACKOFF_MULTIPLIER);
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(LoadError::invalid(
            "realtime.multiplier",
            "must be a finite number of at least 1.0",
        ));
    }
    let channel_capacity = non_zero_usize(
        realtime.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY),
        "realtime.channel_capacity",
    )?;

    Ok(RealtimeSettings {
        initial_backoff: Duration::from_millis(initial_ms),
        max_backoff: Duration::from_millis(max_ms),
        multiplier,
        jitter: Duration::from_millis(realtime.jitter_ms.unwrap_or(DEFAULT_JITTER_MS)),
        channel_capacity,
    })
}

fn build_query_settings(query: RawQuerySettings) -> Result<QuerySettings, LoadError> {
    Ok(QuerySettings {
        page_size: non_zero_usize(
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            "query.page_size",
        )?,
        feed_page_size: non_zero_usize(
            query.feed_page_size.unwrap_or(DEFAULT_FEED_PAGE_SIZE),
            "query.feed_page_size",
        )?,
        messages_page_size: non_zero_usize(
            query.messages_page_size.unwrap_or(DEFAULT_MESSAGES_PAGE_SIZE),
            "query.messages_page_size",
        )?,
    })
}

fn build_window_settings(window: RawWindowSettings) -> Result<WindowSettings, LoadError> {
    let end_threshold = window
        .end_threshold
        .unwrap_or(crate::window::DEFAULT_END_THRESHOLD);
    if !(end_threshold > 0.0 && end_threshold <= 1.0) {
        return Err(LoadError::invalid(
            "window.end_threshold",
            "must be within (0, 1]",
        ));
    }

    Ok(WindowSettings {
        overscan: window.overscan.unwrap_or(crate::window::DEFAULT_OVERSCAN),
        end_threshold,
    })
}

fn build_backend_settings(backend: RawBackendSettings) -> Result<BackendSettings, LoadError> {
    let url = match backend.url {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid("backend.url", "must not be empty"));
            }
            url::Url::parse(trimmed)
                .map_err(|err| LoadError::invalid("backend.url", format!("invalid URL: {err}")))?;
            Some(trimmed.to_string())
        }
        None => None,
    };
    let api_key = backend.api_key.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let timeout_ms = backend
        .request_timeout_ms
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "backend.request_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(BackendSettings {
        url,
        api_key,
        request_timeout: Duration::from_millis(timeout_ms),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_ttl_seconds: Option<u64>,
    profile_ttl_seconds: Option<u64>,
    offers_ttl_seconds: Option<u64>,
    max_entries: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRealtimeSettings {
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    multiplier: Option<f64>,
    jitter_ms: Option<u64>,
    channel_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQuerySettings {
    page_size: Option<usize>,
    feed_page_size: Option<usize>,
    messages_page_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWindowSettings {
    overscan: Option<usize>,
    end_threshold: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBackendSettings {
    url: Option<String>,
    api_key: Option<String>,
    request_timeout_ms: Option<u64>,
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_or_min(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
