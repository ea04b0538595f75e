//! Configuration for the Lifeline client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/lifeline/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use lifeline_proto::message::Coordinates;

use crate::messenger::TextPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Only one of latitude and longitude was given, or they are out of range.
    #[error("location needs both lat and lng within range")]
    InvalidLocation,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    messenger: MessengerFileConfig,
    storage: StorageFileConfig,
    location: LocationFileConfig,
    ui: UiFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    directory_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    register_timeout_secs: Option<u64>,
    check_interval_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[messenger]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct MessengerFileConfig {
    name: Option<String>,
    text_policy: Option<TextPolicy>,
    reconnect_concurrency: Option<usize>,
    event_buffer: Option<usize>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
}

/// `[location]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LocationFileConfig {
    lat: Option<f64>,
    lng: Option<f64>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    poll_timeout_ms: Option<u64>,
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Messenger tuning (used by `Messenger::load`).
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// How plain text is delivered without a usable connection.
    pub text_policy: TextPolicy,
    /// Maximum concurrent reconnect attempts at startup.
    pub reconnect_concurrency: usize,
    /// Capacity of the `MessengerEvent` channel.
    pub event_buffer: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            text_policy: TextPolicy::QueueOrSend,
            reconnect_concurrency: 4,
            event_buffer: 64,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Directory server WebSocket URL. `None` runs the offline demo.
    pub directory_url: Option<String>,
    /// Timeout for reaching the directory server.
    pub connect_timeout: Duration,
    /// Timeout for registration and link requests.
    pub register_timeout: Duration,
    /// How often reachability is checked.
    pub check_interval: Duration,
    /// Channel capacity for the UI command channel.
    pub channel_capacity: usize,

    // -- Messenger --
    /// Name to register if none is persisted yet.
    pub name: Option<String>,
    /// Messenger tuning.
    pub messenger: MessengerConfig,

    // -- Storage --
    /// Where state is kept. `None` uses the platform data directory.
    pub data_dir: Option<PathBuf>,

    // -- Location --
    /// Fixed device position, if configured.
    pub position: Option<Coordinates>,

    // -- UI --
    /// Poll timeout for the TUI event loop.
    pub poll_timeout: Duration,
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            directory_url: None,
            connect_timeout: Duration::from_secs(10),
            register_timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(5),
            channel_capacity: 256,
            name: None,
            messenger: MessengerConfig::default(),
            data_dir: None,
            position: None,
            poll_timeout: Duration::from_millis(50),
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/lifeline/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if the configured location is incomplete or out of range.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Kept apart from `load()` so it can
    /// be tested without CLI parsing.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lat = cli.lat.or(file.location.lat);
        let lng = cli.lng.or(file.location.lng);
        let position = match (lat, lng) {
            (None, None) => None,
            (Some(lat), Some(lng)) if Coordinates::new(lat, lng).is_valid() => {
                Some(Coordinates::new(lat, lng))
            }
            _ => return Err(ConfigError::InvalidLocation),
        };

        Ok(Self {
            directory_url: cli
                .directory_url
                .clone()
                .or_else(|| file.network.directory_url.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            register_timeout: file
                .network
                .register_timeout_secs
                .map_or(defaults.register_timeout, Duration::from_secs),
            check_interval: file
                .network
                .check_interval_secs
                .map_or(defaults.check_interval, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            name: cli.name.clone().or_else(|| file.messenger.name.clone()),
            messenger: MessengerConfig {
                text_policy: file
                    .messenger
                    .text_policy
                    .unwrap_or(defaults.messenger.text_policy),
                reconnect_concurrency: file
                    .messenger
                    .reconnect_concurrency
                    .unwrap_or(defaults.messenger.reconnect_concurrency),
                event_buffer: file
                    .messenger
                    .event_buffer
                    .unwrap_or(defaults.messenger.event_buffer),
            },
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone()),
            position,
            poll_timeout: file
                .ui
                .poll_timeout_ms
                .map_or(defaults.poll_timeout, Duration::from_millis),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Peer-to-peer disaster messenger")]
pub struct CliArgs {
    /// WebSocket URL of the directory server. Omit for the offline demo.
    #[arg(long, env = "LIFELINE_DIRECTORY_URL")]
    pub directory_url: Option<String>,

    /// Name to register on first start (e.g. `rescue-42`).
    #[arg(long, env = "LIFELINE_NAME")]
    pub name: Option<String>,

    /// Path to config file (default: `~/.config/lifeline/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for persisted state.
    #[arg(long, env = "LIFELINE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Fixed latitude reported when sharing location.
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Fixed longitude reported when sharing location.
    #[arg(long, allow_hyphen_values = true)]
    pub lng: Option<f64>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LIFELINE_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/lifeline.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("lifeline").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
