//! Engine configuration, loaded from environment variables.

use thiserror::Error;

use wms_observability::LogFormat;

pub const ENV_LEDGER_STRIPES: &str = "WMS_LEDGER_STRIPES";
pub const ENV_COUNT_RETRY_LIMIT: &str = "WMS_COUNT_RETRY_LIMIT";
pub const ENV_AUDIT_PAGE_LIMIT: &str = "WMS_AUDIT_PAGE_LIMIT";
pub const ENV_LOG_FORMAT: &str = "WMS_LOG_FORMAT";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Lock stripes of the in-memory ledger.
    pub ledger_stripes: usize,
    /// Attempts made to complete a count while ledger rows keep moving.
    pub count_retry_limit: u32,
    /// Upper bound on audit query page size.
    pub audit_page_limit: u32,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_stripes: 64,
            count_retry_limit: 3,
            audit_page_limit: 1000,
            log_format: LogFormat::Json,
            database_url: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable source (unset means default).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ledger_stripes = match lookup(ENV_LEDGER_STRIPES) {
            Some(raw) => parse_positive(ENV_LEDGER_STRIPES, &raw)?,
            None => defaults.ledger_stripes,
        };
        let count_retry_limit = match lookup(ENV_COUNT_RETRY_LIMIT) {
            Some(raw) => parse_positive(ENV_COUNT_RETRY_LIMIT, &raw)?,
            None => defaults.count_retry_limit,
        };
        let audit_page_limit = match lookup(ENV_AUDIT_PAGE_LIMIT) {
            Some(raw) => parse_positive(ENV_AUDIT_PAGE_LIMIT, &raw)?,
            None => defaults.audit_page_limit,
        };
        let log_format = match lookup(ENV_LOG_FORMAT) {
            Some(raw) => LogFormat::parse(&raw).ok_or(ConfigError::Invalid {
                var: ENV_LOG_FORMAT,
                value: raw,
                reason: "expected `json` or `pretty`",
            })?,
            None => defaults.log_format,
        };
        let database_url = lookup(ENV_DATABASE_URL).filter(|url| !url.trim().is_empty());

        Ok(Self {
            ledger_stripes,
            count_retry_limit,
            audit_page_limit,
            log_format,
            database_url,
        })
    }
}

fn parse_positive<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    let value: T = raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: "not a number",
    })?;
    if value < T::from(1) {
        return Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "must be at least 1",
        });
    }
    Ok(value)
}
