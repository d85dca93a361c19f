//! Command line and configuration file handling.
//!
//! Every setting can come from the command line or from the TOML file;
//! the command line wins, then the file, then the built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;

use crate::server::listener::{
    DEFAULT_CDR_PORT, DEFAULT_HOTEL_PORT, DEFAULT_LISTEN_TIMEOUT, DEFAULT_PBX_PORT,
    DEFAULT_RETRIES, DEFAULT_RETRY_SLEEP,
};
use crate::server::session::{DEFAULT_LIVENESS_TIMEOUT, DEFAULT_PASSWORD, DEFAULT_REPLY_TIMEOUT};
use crate::server::{CdrTarget, ServerConfig, SessionConfig};

/// Configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "omnipcx-proxy.toml";
pub const DEFAULT_BUFFER_DB: &str = "omnipcx-cdr.db";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;

/// Longest password the six-digit check-in can carry.
const MAX_PASSWORD_LEN: usize = 6;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No PBX address given (--pbx-address or [pbx] address)")]
    MissingPbxAddress,

    #[error("No CDR destination given (--cdr-address or --cdr-file)")]
    MissingCdrTarget,

    #[error("Both a CDR collector address and a CDR file are configured")]
    ConflictingCdrTarget,

    #[error("Invalid default password {0:?}: must be ASCII and at most 6 characters")]
    InvalidPassword(String),

    #[error("Invalid log level {0:?}")]
    InvalidLogLevel(String),
}

/// omnipcx-proxy - OmniPCX Office to Opera hotel link proxy
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// PBX (Office Link Driver) host
    #[arg(long)]
    pub pbx_address: Option<String>,

    /// PBX port [default: 5010]
    #[arg(long)]
    pub pbx_port: Option<u16>,

    /// Port the hotel system connects to [default: 2561]
    #[arg(long)]
    pub hotel_port: Option<u16>,

    /// CDR collector host
    #[arg(long, conflicts_with = "cdr_file")]
    pub cdr_address: Option<String>,

    /// CDR collector port [default: 6666]
    #[arg(long, conflicts_with = "cdr_file")]
    pub cdr_port: Option<u16>,

    /// Write CDRs to this file instead of a collector
    #[arg(long)]
    pub cdr_file: Option<PathBuf>,

    /// Voice mail password for check-ins that leave it blank [default: 8756]
    #[arg(long)]
    pub default_password: Option<String>,

    /// Store for CDRs that could not be delivered [default: omnipcx-cdr.db]
    #[arg(long)]
    pub buffer_db: Option<PathBuf>,

    /// Connection attempts for PBX and CDR links [default: 5]
    #[arg(long)]
    pub retries: Option<u32>,

    /// Pause between connection attempts in milliseconds [default: 2000]
    #[arg(long)]
    pub retry_sleep_ms: Option<u64>,

    /// Listen and connect over IPv6
    #[arg(long)]
    pub ipv6: bool,

    /// Log level: trace, debug, info, warning, error, critical [default: info]
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory where log files are stored [default: logs]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Number of days to keep log files [default: 7]
    #[arg(long)]
    pub log_retention_days: Option<u64>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// Read window per socket read in milliseconds [default: 500]
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Accept timeout in seconds [default: 5]
    #[arg(long)]
    pub listen_timeout_secs: Option<u64>,

    /// End a session after this many seconds without traffic [default: 60]
    #[arg(long)]
    pub liveness_timeout_secs: Option<u64>,

    /// Wait for a reply this long in milliseconds [default: 500]
    #[arg(long)]
    pub reply_timeout_ms: Option<u64>,
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub pbx: PbxSection,
    #[serde(default)]
    pub hotel: HotelSection,
    #[serde(default)]
    pub cdr: CdrSection,
    #[serde(default)]
    pub buffer: BufferSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub timing: TimingSection,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PbxSection {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub default_password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct HotelSection {
    pub port: Option<u16>,
    pub ipv6: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CdrSection {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BufferSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    pub log_dir: Option<PathBuf>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TimingSection {
    pub retries: Option<u32>,
    pub retry_sleep_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub listen_timeout_secs: Option<u64>,
    pub liveness_timeout_secs: Option<u64>,
    pub reply_timeout_ms: Option<u64>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub log_dir: PathBuf,
    pub retention_days: u64,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub buffer_db: PathBuf,
    pub logging: LogSettings,
}

/// Explicit path, else `omnipcx-proxy.toml` if it exists.
pub fn config_path(args: &Args) -> Option<PathBuf> {
    args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    })
}

pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Map a log level name onto a filter. `warning` and `critical` are
/// accepted for compatibility with the usual syslog-style names.
pub fn parse_log_level(name: &str) -> Result<LevelFilter, ConfigError> {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Ok(LevelFilter::Trace),
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warn" | "warning" => Ok(LevelFilter::Warn),
        "error" | "critical" | "crit" => Ok(LevelFilter::Error),
        "off" => Ok(LevelFilter::Off),
        _ => Err(ConfigError::InvalidLogLevel(name.to_string())),
    }
}

fn validate_password(password: String) -> Result<String, ConfigError> {
    if password.is_ascii() && password.len() <= MAX_PASSWORD_LEN {
        Ok(password)
    } else {
        Err(ConfigError::InvalidPassword(password))
    }
}

impl Settings {
    /// Merge command line arguments over the configuration file.
    pub fn resolve(args: Args, file: ConfigFile) -> Result<Self, ConfigError> {
        let pbx_host = args
            .pbx_address
            .or(file.pbx.address)
            .ok_or(ConfigError::MissingPbxAddress)?;

        let cdr = if args.cdr_file.is_some() || args.cdr_address.is_some() {
            cdr_target(args.cdr_address, args.cdr_port.or(file.cdr.port), args.cdr_file)?
        } else {
            cdr_target(file.cdr.address, args.cdr_port.or(file.cdr.port), file.cdr.file)?
        };

        let default_password = validate_password(
            args.default_password
                .or(file.pbx.default_password)
                .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
        )?;

        let level = match args.log_level.or(file.logging.level) {
            _ if args.verbose => LevelFilter::Debug,
            Some(name) => parse_log_level(&name)?,
            None => LevelFilter::Info,
        };

        let t = &file.timing;
        let session = SessionConfig {
            default_password,
            liveness_timeout: args
                .liveness_timeout_secs
                .or(t.liveness_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_LIVENESS_TIMEOUT),
            reply_timeout: args
                .reply_timeout_ms
                .or(t.reply_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REPLY_TIMEOUT),
        };

        let mut server = ServerConfig::new(pbx_host, cdr);
        server.hotel_port = args.hotel_port.or(file.hotel.port).unwrap_or(DEFAULT_HOTEL_PORT);
        server.pbx_port = args.pbx_port.or(file.pbx.port).unwrap_or(DEFAULT_PBX_PORT);
        server.ipv6 = args.ipv6 || file.hotel.ipv6.unwrap_or(false);
        server.retries = args.retries.or(t.retries).unwrap_or(DEFAULT_RETRIES);
        server.retry_sleep = args
            .retry_sleep_ms
            .or(t.retry_sleep_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_SLEEP);
        if let Some(ms) = args.read_timeout_ms.or(t.read_timeout_ms) {
            server.read_timeout = Duration::from_millis(ms);
            server.connect_timeout = Duration::from_millis(ms);
        }
        server.listen_timeout = args
            .listen_timeout_secs
            .or(t.listen_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LISTEN_TIMEOUT);
        server.session = session;

        Ok(Self {
            server,
            buffer_db: args
                .buffer_db
                .or(file.buffer.path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BUFFER_DB)),
            logging: LogSettings {
                level,
                log_dir: args
                    .log_dir
                    .or(file.logging.log_dir)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
                retention_days: args
                    .log_retention_days
                    .or(file.logging.retention_days)
                    .unwrap_or(DEFAULT_LOG_RETENTION_DAYS),
            },
        })
    }
}

fn cdr_target(
    address: Option<String>,
    port: Option<u16>,
    file: Option<PathBuf>,
) -> Result<CdrTarget, ConfigError> {
    match (address, file) {
        (Some(host), None) => Ok(CdrTarget::Collector {
            host,
            port: port.unwrap_or(DEFAULT_CDR_PORT),
        }),
        (None, Some(path)) => Ok(CdrTarget::File(path)),
        (Some(_), Some(_)) => Err(ConfigError::ConflictingCdrTarget),
        (None, None) => Err(ConfigError::MissingCdrTarget),
    }
}
