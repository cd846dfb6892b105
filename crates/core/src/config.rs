use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lines::{LineConfig, LineRegistry};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub handoff: HandoffConfig,
    pub notifications: NotificationsConfig,
    pub telephony: TelephonyConfig,
    pub lines: Vec<LineConfig>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Ownership-arbitration knobs. The inactivity window and sweep cadence are
/// deliberately configuration, not constants (reference deployment: 12 h
/// window, 5 min sweep).
#[derive(Clone, Debug)]
pub struct HandoffConfig {
    pub inactivity_window_mins: i64,
    pub sweep_interval_secs: u64,
    pub default_agent_id: String,
}

#[derive(Clone, Debug)]
pub struct NotificationsConfig {
    pub operator_id: String,
    pub operator_phone: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TelephonyConfig {
    pub base_url: Option<String>,
    pub account_id: Option<String>,
    pub auth_token: Option<SecretString>,
    pub webhook_secret: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub inactivity_window_mins: Option<i64>,
    pub sweep_interval_secs: Option<u64>,
    pub default_agent_id: Option<String>,
    pub operator_id: Option<String>,
    pub operator_phone: Option<String>,
    pub telephony_auth_token: Option<String>,
    pub telephony_webhook_secret: Option<String>,
    pub lines: Option<Vec<LineConfig>>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://switchboard.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8090,
                health_check_port: 8091,
                graceful_shutdown_secs: 15,
            },
            handoff: HandoffConfig {
                inactivity_window_mins: 720,
                sweep_interval_secs: 300,
                default_agent_id: "operator".to_string(),
            },
            notifications: NotificationsConfig {
                operator_id: "operator".to_string(),
                operator_phone: None,
            },
            telephony: TelephonyConfig {
                base_url: None,
                account_id: None,
                auth_token: None,
                webhook_secret: None,
            },
            lines: Vec::new(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("switchboard.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(handoff) = patch.handoff {
            if let Some(inactivity_window_mins) = handoff.inactivity_window_mins {
                self.handoff.inactivity_window_mins = inactivity_window_mins;
            }
            if let Some(sweep_interval_secs) = handoff.sweep_interval_secs {
                self.handoff.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(default_agent_id) = handoff.default_agent_id {
                self.handoff.default_agent_id = default_agent_id;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(operator_id) = notifications.operator_id {
                self.notifications.operator_id = operator_id;
            }
            if let Some(operator_phone) = notifications.operator_phone {
                self.notifications.operator_phone = Some(operator_phone);
            }
        }

        if let Some(telephony) = patch.telephony {
            if let Some(base_url) = telephony.base_url {
                self.telephony.base_url = Some(base_url);
            }
            if let Some(account_id) = telephony.account_id {
                self.telephony.account_id = Some(account_id);
            }
            if let Some(auth_token_value) = telephony.auth_token {
                self.telephony.auth_token = Some(secret_value(auth_token_value));
            }
            if let Some(webhook_secret) = telephony.webhook_secret {
                self.telephony.webhook_secret = Some(webhook_secret);
            }
        }

        if let Some(lines) = patch.lines {
            self.lines = lines;
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SWITCHBOARD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SWITCHBOARD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SWITCHBOARD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_PORT") {
            self.server.port = parse_u16("SWITCHBOARD_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("SWITCHBOARD_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_HANDOFF_INACTIVITY_WINDOW_MINS") {
            self.handoff.inactivity_window_mins =
                parse_i64("SWITCHBOARD_HANDOFF_INACTIVITY_WINDOW_MINS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_HANDOFF_SWEEP_INTERVAL_SECS") {
            self.handoff.sweep_interval_secs =
                parse_u64("SWITCHBOARD_HANDOFF_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_HANDOFF_DEFAULT_AGENT_ID") {
            self.handoff.default_agent_id = value;
        }

        if let Some(value) = read_env("SWITCHBOARD_NOTIFY_OPERATOR_ID") {
            self.notifications.operator_id = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_NOTIFY_OPERATOR_PHONE") {
            self.notifications.operator_phone = Some(value);
        }

        if let Some(value) = read_env("SWITCHBOARD_TELEPHONY_BASE_URL") {
            self.telephony.base_url = Some(value);
        }
        if let Some(value) = read_env("SWITCHBOARD_TELEPHONY_ACCOUNT_ID") {
            self.telephony.account_id = Some(value);
        }
        if let Some(value) = read_env("SWITCHBOARD_TELEPHONY_AUTH_TOKEN") {
            self.telephony.auth_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("SWITCHBOARD_TELEPHONY_WEBHOOK_SECRET") {
            self.telephony.webhook_secret = Some(value);
        }

        let log_level =
            read_env("SWITCHBOARD_LOGGING_LEVEL").or_else(|| read_env("SWITCHBOARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SWITCHBOARD_LOGGING_FORMAT").or_else(|| read_env("SWITCHBOARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(inactivity_window_mins) = overrides.inactivity_window_mins {
            self.handoff.inactivity_window_mins = inactivity_window_mins;
        }
        if let Some(sweep_interval_secs) = overrides.sweep_interval_secs {
            self.handoff.sweep_interval_secs = sweep_interval_secs;
        }
        if let Some(default_agent_id) = overrides.default_agent_id {
            self.handoff.default_agent_id = default_agent_id;
        }
        if let Some(operator_id) = overrides.operator_id {
            self.notifications.operator_id = operator_id;
        }
        if let Some(operator_phone) = overrides.operator_phone {
            self.notifications.operator_phone = Some(operator_phone);
        }
        if let Some(auth_token) = overrides.telephony_auth_token {
            self.telephony.auth_token = Some(secret_value(auth_token));
        }
        if let Some(webhook_secret) = overrides.telephony_webhook_secret {
            self.telephony.webhook_secret = Some(webhook_secret);
        }
        if let Some(lines) = overrides.lines {
            self.lines = lines;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_handoff(&self.handoff)?;
        validate_lines(&self.lines)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("switchboard.toml"), PathBuf::from("config/switchboard.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_handoff(handoff: &HandoffConfig) -> Result<(), ConfigError> {
    if handoff.inactivity_window_mins <= 0 {
        return Err(ConfigError::Validation(
            "handoff.inactivity_window_mins must be greater than zero".to_string(),
        ));
    }

    if handoff.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "handoff.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    if handoff.default_agent_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "handoff.default_agent_id must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_lines(lines: &[LineConfig]) -> Result<(), ConfigError> {
    if lines.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[lines]] entry must be configured".to_string(),
        ));
    }

    // Surfaces duplicates, bad numbers, and default-send conflicts with the
    // registry's own wording.
    let registry = LineRegistry::from_config(lines)
        .map_err(|error| ConfigError::Validation(format!("lines: {error}")))?;
    registry
        .default_send_line()
        .map_err(|error| ConfigError::Validation(format!("lines: {error}")))?;

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    handoff: Option<HandoffPatch>,
    notifications: Option<NotificationsPatch>,
    telephony: Option<TelephonyPatch>,
    lines: Option<Vec<LineConfig>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct HandoffPatch {
    inactivity_window_mins: Option<i64>,
    sweep_interval_secs: Option<u64>,
    default_agent_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationsPatch {
    operator_id: Option<String>,
    operator_phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TelephonyPatch {
    base_url: Option<String>,
    account_id: Option<String>,
    auth_token: Option<String>,
    webhook_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
