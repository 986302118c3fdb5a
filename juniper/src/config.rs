use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_SITE_URL: &str = "http://localhost:8080";
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Parser)]
#[command(name = "juniper", version, about = "Small personal CMS and blog server")]
pub struct Cli {
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    #[arg(long, short = 'd', value_name = "FILE")]
    pub database: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub session_key_file: Option<PathBuf>,

    #[arg(long, value_name = "URL")]
    pub site_url: Option<String>,

    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub database: PathBuf,
    pub session_key_file: PathBuf,
    pub site_url: String,
    pub allowed_origins: Vec<String>,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
    pub admin: AdminSeed,
    pub smtp: SmtpConfig,
}

/// Account created on first start when no user with this name exists.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl Default for AdminSeed {
    fn default() -> Self {
        Self {
            username: String::from("admin"),
            password: String::from("admin"),
            email: String::from("admin@localhost"),
        }
    }
}

/// SMTP settings. An empty host disables delivery.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid boolean value for env var {key}: {value}")]
    InvalidEnvBool { key: String, value: String },
    #[error("invalid port value for env var {key}: {value}")]
    InvalidEnvPort { key: String, value: String },
    #[error("invalid session_ttl {value}: {source}")]
    InvalidSessionTtl {
        value: String,
        source: humantime::DurationError,
    },
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind: Option<SocketAddr>,
    database: Option<PathBuf>,
    session_key_file: Option<PathBuf>,
    site_url: Option<String>,
    allowed_origins: Option<Vec<String>>,
    session_ttl: Option<String>,
    secure_cookies: Option<bool>,
    admin_username: Option<String>,
    admin_password: Option<String>,
    admin_email: Option<String>,
    smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let from_file = read_file_config(cli.config.as_deref())?;

        let env_port = read_env_port("PORT")?;
        let bind = cli
            .bind
            .or_else(|| env_port.map(|port| SocketAddr::from(([127, 0, 0, 1], port))))
            .or(from_file.bind)
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));
        let database = cli
            .database
            .or(from_file.database)
            .unwrap_or_else(|| PathBuf::from("database/juniper.db"));
        let session_key_file = cli
            .session_key_file
            .or(from_file.session_key_file)
            .unwrap_or_else(|| PathBuf::from("session.key"));
        let site_url = cli
            .site_url
            .or_else(|| read_env("JUNIPER_SITE_URL"))
            .or(from_file.site_url)
            .unwrap_or_else(|| String::from(DEFAULT_SITE_URL));
        let site_url = site_url.trim_end_matches('/').to_string();
        let allowed_origins = from_file
            .allowed_origins
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec![site_url.clone()]);
        let session_ttl = match from_file.session_ttl {
            Some(raw) => parse_session_ttl(&raw)?,
            None => DEFAULT_SESSION_TTL,
        };
        let secure_cookies = read_env_bool("JUNIPER_SECURE_COOKIES")?
            .or(from_file.secure_cookies)
            .unwrap_or(false);

        let defaults = AdminSeed::default();
        let admin = AdminSeed {
            username: from_file.admin_username.unwrap_or(defaults.username),
            password: from_file.admin_password.unwrap_or(defaults.password),
            email: from_file.admin_email.unwrap_or(defaults.email),
        };

        let smtp = merge_smtp_env(from_file.smtp.unwrap_or_default())?;

        Ok(Self {
            bind,
            database,
            session_key_file,
            site_url,
            allowed_origins,
            session_ttl,
            secure_cookies,
            admin,
            smtp,
        })
    }
}

fn read_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Environment values win over the `[smtp]` table.
fn merge_smtp_env(mut smtp: SmtpConfig) -> Result<SmtpConfig, ConfigError> {
    if let Some(host) = read_env("SMTP_HOST") {
        smtp.host = host;
    }
    if let Some(port) = read_env_port("SMTP_PORT")? {
        smtp.port = Some(port);
    }
    if let Some(username) = read_env("SMTP_USERNAME") {
        smtp.username = Some(username);
    }
    if let Some(password) = read_env("SMTP_PASSWORD") {
        smtp.password = Some(password);
    }
    Ok(smtp)
}

fn parse_session_ttl(raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|source| ConfigError::InvalidSessionTtl {
        value: String::from(raw),
        source,
    })
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_env_port(key: &str) -> Result<Option<u16>, ConfigError> {
    let Some(raw) = read_env(key) else {
        return Ok(None);
    };
    parse_port_value(key, &raw).map(Some)
}

fn parse_port_value(key: &str, raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidEnvPort {
            key: String::from(key),
            value: String::from(raw),
        })
}

fn read_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => parse_bool_value(key, &value).map(Some),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnvBool {
            key: String::from(key),
            value: String::from("<non-unicode>"),
        }),
    }
}

fn parse_bool_value(key: &str, raw: &str) -> Result<bool, ConfigError> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvBool {
            key: String::from(key),
            value: String::from(raw),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::{parse_bool_value, parse_port_value, parse_session_ttl, read_file_config};

    #[test]
    fn parse_bool_value_accepts_common_values() {
        assert_eq!(parse_bool_value("K", "true").ok(), Some(true));
        assert_eq!(parse_bool_value("K", " on ").ok(), Some(true));
        assert_eq!(parse_bool_value("K", "NO").ok(), Some(false));
        assert_eq!(parse_bool_value("K", "0").ok(), Some(false));
        assert!(parse_bool_value("K", "maybe").is_err());
    }

    #[test]
    fn parse_port_value_rejects_garbage() {
        assert_eq!(parse_port_value("PORT", "8080").ok(), Some(8080));
        assert_eq!(parse_port_value("PORT", " 25 ").ok(), Some(25));
        assert!(parse_port_value("PORT", "http").is_err());
        assert!(parse_port_value("PORT", "70000").is_err());
    }

    #[test]
    fn session_ttl_uses_humantime_syntax() {
        assert_eq!(
            parse_session_ttl("24h").ok(),
            Some(Duration::from_secs(86_400))
        );
        assert_eq!(
            parse_session_ttl("30m").ok(),
            Some(Duration::from_secs(1_800))
        );
        assert!(parse_session_ttl("soon").is_err());
    }

    #[test]
    fn file_config_reads_smtp_table() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("juniper.toml");
        std::fs::write(
            &path,
            "site_url = \"https://example.org\"\nallowed_origins = [\"https://example.org\"]\n\
             session_ttl = \"2h\"\n[smtp]\nhost = \"smtp.example.org\"\nport = 587\n",
        )?;

        let parsed = read_file_config(Some(&path))?;

        assert_eq!(parsed.site_url.as_deref(), Some("https://example.org"));
        assert_eq!(parsed.session_ttl.as_deref(), Some("2h"));
        let smtp = parsed.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.example.org");
        assert_eq!(smtp.port, Some(587));
        assert!(smtp.username.is_none());
        Ok(())
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(read_file_config(Some(&path)).is_err());
    }
}
