use crate::sfu::{SessionRouter, DEFAULT_RENEGOTIATE_TIMEOUT};
use clap::builder::BoolishValueParser;
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Where the kernel classifier pins its participant table
pub const DEFAULT_KERNEL_REGISTRY_PATH: &str = "/sys/fs/bpf/xdp_ip_tc_map";
pub const DEFAULT_KERNEL_REGISTRY_SLOTS: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Arguments(#[from] clap::Error),

    #[error("kernel participant registry unavailable: {0}")]
    KernelRegistry(#[from] crate::kernel::TableError),
}

/// Command-line flags. Everything else comes from the environment.
#[derive(Parser, Debug, Default)]
#[command(name = "sfu-relay-server")]
#[command(about = "Selective forwarding relay with HTTP signaling")]
#[command(version)]
pub struct Args {
    /// Mirror connected participants into the kernel participant registry.
    /// Overrides KERNEL_REGISTRY when given.
    #[arg(
        long,
        visible_alias = "ebpf",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub kernel_registry: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    /// `None` when the kernel participant registry is disabled
    pub kernel_registry: Option<KernelRegistryConfig>,
    pub renegotiate_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

#[derive(Clone, Debug)]
pub struct KernelRegistryConfig {
    pub path: PathBuf,
    pub slots: u32,
    /// Re-log the table contents this often
    pub dump_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
            kernel_registry: None,
            renegotiate_timeout: DEFAULT_RENEGOTIATE_TIMEOUT,
        }
    }
}

impl Config {
    /// Load from environment variables and command-line flags. Bad flags
    /// print usage and exit.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_parts(|key| std::env::var(key).ok(), Args::parse())
    }

    /// `args` excludes the program name
    pub fn from_source<F, I, T>(var: F, args: I) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = Args::try_parse_from(
            std::iter::once(OsString::from("sfu-relay-server"))
                .chain(args.into_iter().map(Into::into)),
        )?;
        Self::from_parts(var, args)
    }

    pub fn from_parts<F>(var: F, args: Args) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let bind_address = var("BIND_ADDRESS").unwrap_or(defaults.bind_address);

        let stun_servers = var("STUN_SERVERS")
            .map(|s| split_list(&s).map(String::from).collect())
            .unwrap_or(defaults.stun_servers);

        let turn_servers = match var("TURN_SERVERS") {
            Some(s) => split_list(&s)
                .map(parse_turn_server)
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![],
        };

        let enabled = match (args.kernel_registry, var("KERNEL_REGISTRY")) {
            (Some(flag), _) => flag,
            (None, Some(v)) => parse_bool("KERNEL_REGISTRY", &v)?,
            (None, None) => false,
        };

        let kernel_registry = if enabled {
            Some(KernelRegistryConfig {
                path: var("KERNEL_REGISTRY_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_KERNEL_REGISTRY_PATH)),
                slots: parse_or("KERNEL_REGISTRY_SLOTS", &var, DEFAULT_KERNEL_REGISTRY_SLOTS)?,
                dump_interval: var("KERNEL_REGISTRY_DUMP_SECS")
                    .map(|v| parse_value::<u64>("KERNEL_REGISTRY_DUMP_SECS", &v))
                    .transpose()?
                    .map(Duration::from_secs),
            })
        } else {
            None
        };

        let renegotiate_timeout = var("RENEGOTIATE_TIMEOUT_MS")
            .map(|v| parse_value::<u64>("RENEGOTIATE_TIMEOUT_MS", &v))
            .transpose()?
            .map(Duration::from_millis)
            .unwrap_or(defaults.renegotiate_timeout);

        Ok(Config {
            bind_address,
            stun_servers,
            turn_servers,
            kernel_registry,
            renegotiate_timeout,
        })
    }
}

fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T, F>(key: &'static str, var: &F, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// `url|username|credential`
fn parse_turn_server(entry: &str) -> Result<TurnServer, ConfigError> {
    let mut parts = entry.split('|');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(url), Some(username), Some(credential), None) if !url.is_empty() => Ok(TurnServer {
            url: url.to_string(),
            username: username.to_string(),
            credential: credential.to_string(),
        }),
        _ => Err(ConfigError::Invalid {
            key: "TURN_SERVERS",
            value: entry.to_string(),
            reason: "expected url|username|credential".to_string(),
        }),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub router: Arc<SessionRouter>,
}

impl AppState {
    pub fn new(config: Config, router: Arc<SessionRouter>) -> Self {
        Self { config, router }
    }
}
