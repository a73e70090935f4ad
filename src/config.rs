/// Configuration loading and validation.
///
/// Reads `config.toml` (or any format the config crate recognizes under the
/// name "config") into a process-wide global. Validation failures are fatal
/// at startup.
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::error::{IndexerError, Result};

static GLOBAL_CONFIG: OnceCell<AppConfig> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    // Relational store connection.
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub database: String,

    /// Prefix for log lines and alert-mail subjects.
    #[serde(default)]
    pub label: String,

    #[serde(default, rename = "rpc_url")]
    pub rpc_urls: Vec<String>,

    /// Number of block fetcher workers. Recommended value: 3.
    #[serde(default)]
    pub workers: usize,

    /// Known-pathological transaction ids skipped by the NEP5 fetcher.
    #[serde(default)]
    pub skip_txids: Vec<String>,

    #[serde(default)]
    pub aliyun_mail: Option<AliyunMailConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AliyunMailConfig {
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub access_key_secret: String,
    #[serde(default)]
    pub receiver: Vec<String>,
}

pub fn init() -> Result<()> {
    let raw = config::Config::builder()
        .add_source(config::File::with_name("config"))
        .build()?;
    let mut cfg: AppConfig = raw.try_deserialize()?;

    normalize(&mut cfg);
    validate(&cfg)?;

    GLOBAL_CONFIG
        .set(cfg)
        .map_err(|_| IndexerError::Config("config already initialized".to_string()))?;
    Ok(())
}

fn normalize(cfg: &mut AppConfig) {
    for url in cfg.rpc_urls.iter_mut() {
        if !url.starts_with("http") {
            *url = format!("http://{}", url);
        }
    }
}

fn validate(cfg: &AppConfig) -> Result<()> {
    if cfg.workers < 1 {
        return Err(IndexerError::Config(
            "value of 'workers' must be greater than or equal to 1".to_string(),
        ));
    }

    if cfg.rpc_urls.is_empty() {
        return Err(IndexerError::Config(
            "at least 1 rpc server url must be set".to_string(),
        ));
    }
    for url in &cfg.rpc_urls {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| IndexerError::Config(format!("invalid rpc url {}: {}", url, e)))?;
        if parsed.host_str().is_none() {
            return Err(IndexerError::Config(format!("rpc url {} has no host", url)));
        }
    }

    Ok(())
}

/// Basic check on the mail section, required only when alerts are enabled.
pub fn validate_mail(cfg: &AliyunMailConfig) -> Result<()> {
    if cfg.account_name.is_empty() {
        return Err(IndexerError::Config(
            "aliyun mail account name cannot be empty".to_string(),
        ));
    }
    if cfg.region.is_empty() {
        return Err(IndexerError::Config(
            "aliyun mail region cannot be empty".to_string(),
        ));
    }
    if cfg.access_key_id.is_empty() {
        return Err(IndexerError::Config(
            "aliyun mail accessKeyID cannot be empty".to_string(),
        ));
    }
    if cfg.access_key_secret.is_empty() {
        return Err(IndexerError::Config(
            "aliyun mail accessKeySecret cannot be empty".to_string(),
        ));
    }
    if cfg.receiver.is_empty() {
        return Err(IndexerError::Config(
            "aliyun mail receiver cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn get() -> &'static AppConfig {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: Config not initialized - call config::init() first");
        std::process::exit(1);
    })
}

/// MySQL connection string for the configured database.
pub fn db_conn_str() -> String {
    let cfg = get();
    format!(
        "mysql://{}:{}@{}:{}/{}",
        cfg.user, cfg.password, cfg.hostname, cfg.port, cfg.database
    )
}

pub fn label() -> String {
    get().label.clone()
}

pub fn rpc_urls() -> Vec<String> {
    get().rpc_urls.clone()
}

pub fn workers() -> usize {
    get().workers
}

pub fn skip_txids() -> &'static [String] {
    &get().skip_txids
}

pub fn mail_config() -> Option<&'static AliyunMailConfig> {
    get().aliyun_mail.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            user: "u".to_string(),
            password: "p".to_string(),
            hostname: "127.0.0.1".to_string(),
            port: "3306".to_string(),
            database: "chain".to_string(),
            label: String::new(),
            rpc_urls: vec!["http://10.0.0.1:10332".to_string()],
            workers: 3,
            skip_txids: Vec::new(),
            aliyun_mail: None,
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_workers_must_be_positive() {
        let mut cfg = base_config();
        cfg.workers = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rpc_required() {
        let mut cfg = base_config();
        cfg.rpc_urls.clear();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_normalize_prefixes_scheme() {
        let mut cfg = base_config();
        cfg.rpc_urls = vec!["10.0.0.2:10332".to_string(), "https://a:1".to_string()];
        normalize(&mut cfg);
        assert_eq!(cfg.rpc_urls[0], "http://10.0.0.2:10332");
        assert_eq!(cfg.rpc_urls[1], "https://a:1");
    }

    #[test]
    fn test_validate_mail() {
        let mut mail = AliyunMailConfig {
            account_name: "noreply@example.com".to_string(),
            region: "cn-hangzhou".to_string(),
            access_key_id: "id".to_string(),
            access_key_secret: "secret".to_string(),
            receiver: vec!["ops@example.com".to_string()],
        };
        assert!(validate_mail(&mail).is_ok());
        mail.receiver.clear();
        assert!(validate_mail(&mail).is_err());
    }
}
