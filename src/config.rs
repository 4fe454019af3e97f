use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Verbosity used when wiring up `env_logger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Installs `env_logger` at `level`. `RUST_LOG` still overrides per module.
///
/// Safe to call more than once; only the first call installs the logger.
pub fn init_logging(level: LogLevel) {
    let _ = env_logger::Builder::new()
        .filter_level(level.to_filter())
        .parse_default_env()
        .try_init();
}

/// Connection settings for the HTTP document service.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Base URL the document paths are joined onto (ie: `https://sync.example.com/v1/`)
    pub base_url: url::Url,
    /// Bearer token sent with every request, if any
    pub auth_token: Option<String>,
    /// Per-request timeout. `None` leaves requests unbounded
    pub request_timeout: Option<Duration>,
}

impl CloudConfig {
    pub fn new(base_url: url::Url) -> Self {
        Self {
            base_url,
            auth_token: None,
            request_timeout: None,
        }
    }
}

/// Configuration for a [`PersistenceService`](crate::service::PersistenceService) and the cells it spawns.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Serialize the durable writes of a cell so they land in dispatch order
    pub sequential_writes: bool,
    /// Capacity of the sync event bus
    pub event_channel_capacity: usize,
    /// Log level used by `init_logging` callers that take it from config
    pub log_level: LogLevel,
    /// Cloud document service, when the crate builds its own HTTP store
    pub cloud: Option<CloudConfig>,
    /// SQLite file for the durable local store. `None` keeps local data in memory
    pub local_db_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sequential_writes: true,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            log_level: LogLevel::default(),
            cloud: None,
            local_db_path: None,
        }
    }
}
