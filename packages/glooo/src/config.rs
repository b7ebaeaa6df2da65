use anyhow::{Context, Result};
use glooo_session::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [server]
//                    host = "chat.example.com"
//
//   env var:         GLOOO_SERVER__HOST=chat.example.com   (double underscore = nesting)
//
//   (single underscore stays within field names: GLOOO_CONNECTION__MAX_RETRIES)

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// host=localhost:7878, plain http/ws
    Local,
    /// https/wss, host from config
    Production,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Where the chat server lives (`[server]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    /// Use https/wss instead of http/ws.
    #[serde(default)]
    pub secure: bool,
}

/// Reconnect tuning (`[connection]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Give up on a handshake after this long and back off.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Credentials (`[session] token`). The token is the `jwt` cookie value
/// issued by the server at login.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default)]
    pub token: Option<String>,
}

fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

const DEFAULT_HOST: &str = "localhost:7878";

/// Build a figment that layers: defaults → profile defaults → config.toml → GLOOO_* env vars.
///
/// The CLI profile takes priority over the config file profile.
pub fn load_config(data_dir: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    // Pass 1: peek at profile from config.toml/env (CLI overrides file)
    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("GLOOO_").split("__"));

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok());

    // Pass 2: profile defaults slot in between struct defaults and config.toml
    let profile_layer = profile_to_file_config(profile.as_ref());

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_layer))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("GLOOO_").split("__"))
}

/// Convert a profile into a `FileConfig` with the profile's default values filled in.
fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    match profile {
        Some(Profile::Local) => FileConfig {
            profile: Some(Profile::Local),
            server: ServerFileConfig {
                host: Some(DEFAULT_HOST.to_string()),
                secure: false,
            },
            ..Default::default()
        },
        Some(Profile::Production) => FileConfig {
            profile: Some(Profile::Production),
            server: ServerFileConfig {
                host: None,
                secure: true,
            },
            ..Default::default()
        },
        None => FileConfig::default(),
    }
}

// =============================================================================
// Runtime views
// =============================================================================

/// Resolved server endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// REST base, e.g. `http://localhost:7878`
    pub base_url: String,
    /// Duplex endpoint, e.g. `ws://localhost:7878/chat`
    pub ws_url: String,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        let host = fc.host.as_deref().unwrap_or(DEFAULT_HOST);
        let (http, ws) = if fc.secure {
            ("https", "wss")
        } else {
            ("http", "ws")
        };
        Self {
            base_url: format!("{http}://{host}"),
            ws_url: format!("{ws}://{host}/chat"),
        }
    }
}

pub fn retry_policy(fc: &ConnectionFileConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: fc.max_retries,
        base_delay: Duration::from_millis(fc.base_delay_ms),
        max_delay: Duration::from_millis(fc.max_delay_ms),
        connect_timeout: Duration::from_millis(fc.connect_timeout_ms),
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct GloooConfig {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl GloooConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".glooo"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        Ok(Self { data_dir, logs_dir })
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join("glooo.log")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
