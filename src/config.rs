use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::statement::balance::BalanceMatchers;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// OAuth credentials and upstream endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    pub client_id: String,
    pub client_secret: String,
    pub dev_app_key: String,
    #[serde(default = "default_oauth_url")]
    pub oauth_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,
    #[serde(default)]
    pub cert_password: String,
    #[serde(default = "default_true")]
    pub verify_peer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Renew this many seconds before the token actually expires.
    #[serde(default = "default_renew_before_secs")]
    pub renew_before_expiry_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub bank: BankConfig,
    #[serde(default)]
    pub mtls: MtlsConfig,
    #[serde(default)]
    pub token: TokenConfig,
    /// Description phrases used by balance derivation; Portuguese if absent.
    #[serde(default)]
    pub balance_labels: Option<BalanceLabels>,
}

/// Phrase lists for each balance category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceLabels {
    pub previous: Vec<String>,
    pub day: Vec<String>,
    pub current: Vec<String>,
    pub opening_keyword: String,
}

fn default_port() -> u16 {
    3000
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_oauth_url() -> String {
    "https://oauth.bb.com.br".to_string()
}
fn default_api_url() -> String {
    "https://api-extratos.bb.com.br".to_string()
}
fn default_scope() -> String {
    "extrato-info".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cert_path() -> PathBuf {
    PathBuf::from("./certificados/client.p12")
}
fn default_true() -> bool {
    true
}
fn default_renew_before_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            environment: default_environment(),
        }
    }
}

impl Default for MtlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_path: default_cert_path(),
            cert_password: String::new(),
            verify_peer: true,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            renew_before_expiry_secs: default_renew_before_secs(),
        }
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} is not set"))
}

fn parsed_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("parsing {name}={raw}")),
        _ => Ok(default),
    }
}

impl Config {
    /// Build configuration from environment variables.
    ///
    /// Required:
    /// - `BB_CLIENT_ID`, `BB_CLIENT_SECRET`, `BB_DEV_APP_KEY`
    ///
    /// Optional (with defaults): `BB_OAUTH_URL`, `BB_API_URL`, `BB_SCOPE`,
    /// `BB_TIMEOUT_SECS`, `USE_MTLS`, `BB_CERT_PATH`, `BB_CERT_PASSWORD`,
    /// `BB_VERIFY_PEER`, `TOKEN_RENEW_BEFORE_SECS`, `PORT`, `APP_ENV`.
    pub fn from_env() -> Result<Self> {
        let bank = BankConfig {
            client_id: required_env("BB_CLIENT_ID")?,
            client_secret: required_env("BB_CLIENT_SECRET")?,
            dev_app_key: required_env("BB_DEV_APP_KEY")?,
            oauth_url: std::env::var("BB_OAUTH_URL").unwrap_or_else(|_| default_oauth_url()),
            api_url: std::env::var("BB_API_URL").unwrap_or_else(|_| default_api_url()),
            scope: std::env::var("BB_SCOPE").unwrap_or_else(|_| default_scope()),
            timeout_secs: parsed_env("BB_TIMEOUT_SECS", default_timeout_secs())?,
        };

        let mtls = MtlsConfig {
            enabled: std::env::var("USE_MTLS").map(|v| v == "true").unwrap_or(false),
            cert_path: std::env::var("BB_CERT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_cert_path()),
            cert_password: std::env::var("BB_CERT_PASSWORD").unwrap_or_default(),
            verify_peer: parsed_env("BB_VERIFY_PEER", true)?,
        };

        Ok(Config {
            server: ServerConfig {
                port: parsed_env("PORT", default_port())?,
                environment: std::env::var("APP_ENV").unwrap_or_else(|_| default_environment()),
            },
            bank,
            mtls,
            token: TokenConfig {
                renew_before_expiry_secs: parsed_env(
                    "TOKEN_RENEW_BEFORE_SECS",
                    default_renew_before_secs(),
                )?,
            },
            balance_labels: None,
        })
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: Config = serde_json::from_str(&raw).context("parsing JSON config")?;
        Ok(cfg)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.bank.timeout_secs)
    }

    pub fn renewal_buffer(&self) -> Duration {
        Duration::from_secs(self.token.renew_before_expiry_secs)
    }

    pub fn balance_matchers(&self) -> BalanceMatchers {
        match &self.balance_labels {
            Some(labels) => BalanceMatchers::from_phrases(
                labels.previous.as_slice(),
                labels.day.as_slice(),
                labels.current.as_slice(),
                &labels.opening_keyword,
            ),
            None => BalanceMatchers::default(),
        }
    }
}
