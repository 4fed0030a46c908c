//! Configuration parsing.

use std::collections::HashMap;
use std::default::Default;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use log::{debug, warn};
use regex::Captures;
use regex::Regex;
use serde::de::Deserializer;
use serde::Deserialize;
use structopt::StructOpt;

use crate::application::FlushPolicy;
use crate::models::{BrokerError, BrokerResult, Duration};

const INTERPOLATE_RE: &str = r"(?m)\$\{([A-Z][A-Z0-9_]*)(?:=([^}]+))?\}";

/// Parsed command line options.
#[derive(Debug, StructOpt)]
#[structopt(name = "rq-broker")]
pub struct CliOpts {
    #[structopt(short, long, parse(from_os_str), help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Debug, PartialEq, StructOpt)]
pub enum Command {
    /// Run the HTTP server exposing queue introspection (the default).
    Serve,

    /// Run the periodic scheduler, releasing scheduled jobs once they're due.
    Scheduler {
        /// Queue to bind the scheduler to, optionally qualified as "<connection>.<queue>".
        #[structopt(default_value = "default")]
        queue: String,

        /// How often the scheduler checks for new jobs to add to the queue, in seconds.
        #[structopt(long)]
        interval: Option<u64>,
    },
}

/// Parses configuration from either configuration path specified in command line arguments,
/// or using default configuration if no configuration file was specified.
///
/// Exits the process if the configuration can't be read or is invalid.
pub fn parse_config_from_cli_args() -> (Config, Command) {
    let opts = CliOpts::from_args();
    let conf = match opts.config {
        Some(config_path) => match Config::from_file(&config_path) {
            Ok(config) => config,
            Err(msg) => {
                eprintln!(
                    "Failed to parse config file {}: {}",
                    &config_path.display(),
                    msg
                );
                std::process::exit(1);
            }
        },
        None => {
            warn!("No config file specified, using default config");
            Config::default()
        }
    };

    if let Err(err) = conf.validate() {
        eprintln!("{}", err);
        std::process::exit(1);
    }

    (conf, opts.command.unwrap_or(Command::Serve))
}

/// Main application config, typically read from a `.toml` file.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Configuration for the application's HTTP server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Queue behaviour shared by every connection.
    #[serde(default)]
    pub rq: RqConfig,

    /// Named Redis connections that queues can be bound to.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,

    /// Named external cache clients that connections can borrow via `use_redis_cache`.
    #[serde(default)]
    pub caches: HashMap<String, CacheConfig>,
}

impl Default for Config {
    /// Single "default" connection to a local Redis server.
    fn default() -> Self {
        let mut connections = HashMap::new();
        connections.insert("default".to_owned(), ConnectionConfig::default());
        Config {
            server: ServerConfig::default(),
            rq: RqConfig::default(),
            connections,
            caches: HashMap::new(),
        }
    }
}

impl Config {
    /// Read configuration from a file into a new Config struct.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        debug!("Reading configuration from {}", path.display());

        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) => return Err(err.to_string()),
        };

        Self::from_toml(&data)
    }

    /// Parse configuration from a TOML string, after substituting any `${VAR}` placeholders.
    pub fn from_toml(data: &str) -> Result<Self, String> {
        match toml::from_str(&Self::interpolate_env(data)) {
            Ok(conf) => Ok(conf),
            Err(err) => Err(err.to_string()),
        }
    }

    /// Check settings that can't be expressed by deserialisation alone.
    pub fn validate(&self) -> BrokerResult<()> {
        if self.connections.is_empty() {
            return Err(BrokerError::MisconfiguredRegistry(
                "at least one entry is required under [connections]".to_owned(),
            ));
        }
        Ok(())
    }

    /// Get the address for the HTTP server to listen on.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn interpolate_env(raw_toml: &str) -> std::borrow::Cow<str> {
        let re = Regex::new(INTERPOLATE_RE)
            .expect("failed to compile interpolation regex");

        re.replace_all(raw_toml, |captures: &Captures| {
            let var_name = captures.get(1)
                .expect("capture should have at least 1 group");

            match std::env::var(var_name.as_str()) {
                Ok(env_val) => env_val,
                Err(_) => captures.get(2).map_or_else(String::new, |v| v.as_str().to_owned())
            }
        })
    }
}

/// Configuration for the application's HTTP server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to listen on. Defaults to "127.0.0.1" if not specified.
    pub host: String,

    /// Port to listen on. Defaults to 8024 if not specified.
    pub port: u16,

    /// Number of HTTP worker threads. Defaults to number of CPUs if not specified.
    pub threads: Option<usize>,

    /// Maximum size in bytes for HTTP POST requests. Defaults to actix-web's JSON limit if not
    /// specified.
    #[serde(deserialize_with = "deserialize_human_size")]
    pub max_body_size: Option<usize>,

    /// Sets the application-wide log level.
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: log::Level,
}

fn deserialize_human_size<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<usize>, D::Error> {
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(match s {
        Some(s) => {
            let size: human_size::SpecificSize<human_size::Byte> = match s.parse() {
                Ok(size) => size,
                Err(_) => {
                    return Err(serde::de::Error::custom(format!(
                        "Unable to parse size '{}'",
                        s
                    )))
                }
            };
            Some(size.value() as usize)
        }
        None => None,
    })
}

fn deserialize_log_level<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<log::Level, D::Error> {
    let s: String = Deserialize::deserialize(deserializer)?;
    match log::Level::from_str(&s) {
        Ok(level) => Ok(level),
        Err(_) => Err(serde::de::Error::custom(format!(
            "Invalid log level: {}",
            s
        ))),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 8024,
            threads: None,
            max_body_size: None,
            log_level: log::Level::Info,
        }
    }
}

/// Whether enqueued jobs are submitted straight away, or held until the unit of work completes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    Immediate,
    Deferred,
}

impl CommitMode {
    pub fn autocommit(self) -> bool {
        self == CommitMode::Immediate
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommitMode::Immediate => "immediate",
            CommitMode::Deferred => "deferred",
        }
    }
}

/// Queue behaviour shared by every connection.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RqConfig {
    /// Default commit mode for queues that don't override it. Defaults to "immediate".
    pub commit_mode: CommitMode,

    /// What to do with the rest of a deferred batch when one submission fails.
    pub flush_policy: FlushPolicy,

    /// How often the scheduler releases due jobs. Defaults to "60s".
    pub scheduler_interval: Duration,

    /// Prefix of all Redis keys. Defaults to "rq", matching RQ workers.
    pub key_namespace: String,

    /// Whether dashboards should link to the queue overview from their admin pages.
    pub show_admin_link: bool,

    /// Default name for workers started against this configuration.
    pub name: String,

    /// Whether workers started against this configuration exit once their queues are empty.
    pub burst: bool,
}

impl Default for RqConfig {
    fn default() -> Self {
        RqConfig {
            commit_mode: CommitMode::Immediate,
            flush_policy: FlushPolicy::Continue,
            scheduler_interval: Duration::from_secs(60),
            key_namespace: "rq".to_owned(),
            show_admin_link: false,
            name: "default".to_owned(),
            burst: false,
        }
    }
}

/// A single named Redis connection.
///
/// The endpoint can be given as a URL, borrowed from a named cache client, or given as
/// individual host/port/db/password fields, checked in that order.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    pub url: Option<String>,

    /// Database index. Overrides any database given in `url`.
    pub db: Option<i64>,

    /// Name of an entry under `[caches]` whose client should be reused.
    pub use_redis_cache: Option<String>,

    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,

    /// Whether jobs are run by workers (true, the default) or inline at enqueue time.
    #[serde(rename = "async")]
    pub is_async: Option<bool>,
}

/// An external cache that may expose a Redis client for reuse.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CacheConfig {
    /// Redis URL the cache is backed by. Caches without one have no client to share.
    pub url: Option<String>,
}
