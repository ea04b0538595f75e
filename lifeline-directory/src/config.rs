//! Directory server settings.
//!
//! Each source yields a partial [`Settings`] layer. Layers are merged with
//! the command line (and its `DIRECTORY_*` environment fallbacks) first,
//! then the `[server]` table of the TOML file, then the built-in defaults.
//! The merged result is checked before the server starts: the bind address
//! must parse, the payload limit must fit the largest valid message, and
//! the log filter must be a valid `EnvFilter` directive.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use lifeline_proto::message::MAX_TEXT_SIZE;

use crate::directory::DEFAULT_MAX_PAYLOAD_SIZE;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9100";

/// Smallest accepted payload limit: the longest valid text plus room for
/// the rest of the encoded message.
pub const MIN_PAYLOAD_LIMIT: usize = MAX_TEXT_SIZE + 1024;

/// Why the directory could not be configured.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read, or an explicit
    /// `--config` path does not exist.
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        /// The file that was tried.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this server.
    #[error("invalid config file {}: {source}", path.display())]
    Malformed {
        /// The offending file.
        path: PathBuf,
        /// What the TOML parser reported.
        source: toml::de::Error,
    },

    /// The bind address is not `host:port`.
    #[error("bind address '{0}' is not a socket address")]
    BindAddr(String),

    /// The payload limit would reject valid messages.
    #[error("max payload size {0} is below the minimum of {MIN_PAYLOAD_LIMIT} bytes")]
    PayloadLimit(usize),

    /// The log filter does not parse.
    #[error("log level '{0}' is not a valid filter")]
    LogLevel(String),
}

/// Command-line arguments for `lifeline-directory`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Lifeline name directory and link broker")]
pub struct DirectoryCliArgs {
    /// Address to listen on (default 0.0.0.0:9100).
    #[arg(short, long, env = "DIRECTORY_ADDR")]
    pub bind: Option<String>,

    /// Config file (default `~/.config/lifeline-directory/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest `Data` payload forwarded between peers, in bytes.
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Log filter, e.g. `info` or `lifeline_directory=debug`.
    #[arg(long, env = "DIRECTORY_LOG")]
    pub log_level: Option<String>,
}

/// One partial layer of settings. Unset fields fall through to the next
/// layer.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Listen address.
    pub bind_addr: Option<String>,
    /// Payload limit in bytes.
    pub max_payload_size: Option<usize>,
    /// Log filter.
    pub log_level: Option<String>,
}

impl Settings {
    /// Fill every unset field from `lower`.
    #[must_use]
    pub fn over(self, lower: Self) -> Self {
        Self {
            bind_addr: self.bind_addr.or(lower.bind_addr),
            max_payload_size: self.max_payload_size.or(lower.max_payload_size),
            log_level: self.log_level.or(lower.log_level),
        }
    }
}

impl From<&DirectoryCliArgs> for Settings {
    fn from(cli: &DirectoryCliArgs) -> Self {
        Self {
            bind_addr: cli.bind.clone(),
            max_payload_size: cli.max_payload_size,
            log_level: cli.log_level.clone(),
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: Settings,
}

/// Checked settings the server runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Payload limit in bytes.
    pub max_payload_size: usize,
    /// Log filter.
    pub log_level: String,
    /// The config file that contributed, if any.
    pub source: Option<PathBuf>,
}

impl DirectoryConfig {
    /// Merge the command line, the config file, and the defaults.
    ///
    /// A missing default file contributes nothing. A missing `--config`
    /// file is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or the
    /// merged settings fail validation.
    pub fn load(cli: &DirectoryCliArgs) -> Result<Self, ConfigError> {
        let (file, source) = match &cli.config {
            Some(path) => (read_settings(path)?, Some(path.clone())),
            None => match default_path() {
                Some(path) if path.exists() => (read_settings(&path)?, Some(path)),
                _ => (Settings::default(), None),
            },
        };
        let mut config = Self::from_settings(Settings::from(cli).over(file))?;
        config.source = source;
        Ok(config)
    }

    /// Validate a merged layer, filling gaps from the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BindAddr`], [`ConfigError::PayloadLimit`] or
    /// [`ConfigError::LogLevel`] for unusable values.
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let bind_addr = settings
            .bind_addr
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let max_payload_size = settings.max_payload_size.unwrap_or(DEFAULT_MAX_PAYLOAD_SIZE);
        let log_level = settings.log_level.unwrap_or_else(|| "info".to_string());

        let bind_addr: SocketAddr = bind_addr
            .parse()
            .map_err(|_| ConfigError::BindAddr(bind_addr))?;
        if max_payload_size < MIN_PAYLOAD_LIMIT {
            return Err(ConfigError::PayloadLimit(max_payload_size));
        }
        if tracing_subscriber::EnvFilter::try_new(&log_level).is_err() {
            return Err(ConfigError::LogLevel(log_level));
        }
        Ok(Self {
            bind_addr,
            max_payload_size,
            log_level,
            source: None,
        })
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9100)),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            log_level: "info".to_string(),
            source: None,
        }
    }
}

/// `~/.config/lifeline-directory/config.toml`, if there is a config dir.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lifeline-directory").join("config.toml"))
}

fn read_settings(path: &Path) -> Result<Settings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_settings(&text).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_settings(text: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str::<ConfigFile>(text).map(|file| file.server)
}
