// ⚙️ Configuration - Process-wide, read-only settings
// Every required key is validated at startup so nothing fails mid-pipeline

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// SECTIONS
// ============================================================================

/// Record store settings
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Name of the account table (the change stream table is `{table_name}_stream`)
    pub table_name: String,

    /// SQLite database file
    pub database_path: PathBuf,
}

/// Fixed parameters handed to the provisioning back-end for every account
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningConfig {
    pub product_id: String,
    pub provisioning_artifact_id: String,
    pub managed_organizational_unit: String,
}

/// Budget definition and alert subscription attached to each new account
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailConfig {
    /// Monthly limit as the back-end expects it (decimal string)
    pub budget_limit: String,

    pub currency: String,

    /// Notification channel address (topic) for threshold alerts
    pub alert_topic: String,
}

/// Which budget amount the monitor compares against the global ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorBasis {
    /// The budget's configured limit (historical behaviour)
    ConfiguredLimit,

    /// The spend accrued so far in the period
    ActualSpend,
}

impl MonitorBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorBasis::ConfiguredLimit => "configured-limit",
            MonitorBasis::ActualSpend => "actual-spend",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "configured-limit" | "configured_limit" | "limit" => Some(MonitorBasis::ConfiguredLimit),
            "actual-spend" | "actual_spend" | "spend" => Some(MonitorBasis::ActualSpend),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Global ceiling compared against every account's budget
    pub ceiling: f64,
    pub basis: MonitorBasis,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub store: StoreConfig,
    pub provisioning: ProvisioningConfig,
    pub guardrail: GuardrailConfig,
    pub monitor: MonitorConfig,
    pub feed: FeedConfig,
    pub retry: RetryPolicy,
    pub listen_addr: SocketAddr,
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
    /// Load from process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an explicit map (tests, embedding)
    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| values.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let table_name = env.required("TABLE_NAME")?;
        validate_identifier("TABLE_NAME", &table_name)?;

        let budget_limit = env.required("BUDGET_LIMIT")?;
        parse_positive("BUDGET_LIMIT", &budget_limit)?;

        let retry = RetryPolicy {
            max_attempts: env.parsed("RETRY_MAX_ATTEMPTS", 5u32)?.max(1),
            initial_backoff: Duration::from_millis(env.parsed("RETRY_INITIAL_BACKOFF_MS", 200u64)?),
            max_backoff: Duration::from_millis(env.parsed("RETRY_MAX_BACKOFF_MS", 10_000u64)?),
        };

        let basis = match env.optional("GUARDRAIL_MONITOR_BASIS") {
            None => MonitorBasis::ConfiguredLimit,
            Some(raw) => MonitorBasis::parse(&raw).ok_or(ConfigError::Invalid {
                key: "GUARDRAIL_MONITOR_BASIS",
                value: raw.clone(),
                reason: "expected configured-limit or actual-spend".to_string(),
            })?,
        };

        let ceiling_raw = env.optional("GUARDRAIL_CEILING").unwrap_or_else(|| "50000".to_string());
        let ceiling = parse_positive("GUARDRAIL_CEILING", &ceiling_raw)?;

        let batch_size: usize = env.parsed("CHANGE_FEED_BATCH_SIZE", 10usize)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "CHANGE_FEED_BATCH_SIZE",
                value: "0".to_string(),
                reason: "batch size must be at least 1".to_string(),
            });
        }

        Ok(Config {
            store: StoreConfig {
                table_name,
                database_path: PathBuf::from(
                    env.optional("ACCOUNT_DB_PATH").unwrap_or_else(|| "accounts.db".to_string()),
                ),
            },
            provisioning: ProvisioningConfig {
                product_id: env.required("PRODUCT_ID")?,
                provisioning_artifact_id: env.required("PROVISIONING_ARTIFACT_ID")?,
                managed_organizational_unit: env.required("MANAGED_ORGANIZATIONAL_UNIT")?,
            },
            guardrail: GuardrailConfig {
                budget_limit,
                currency: env.optional("BUDGET_CURRENCY").unwrap_or_else(|| "USD".to_string()),
                alert_topic: env.required("SNS_TOPIC")?,
            },
            monitor: MonitorConfig {
                ceiling,
                basis,
                interval: Duration::from_secs(env.parsed("GUARDRAIL_MONITOR_INTERVAL_SECS", 3600u64)?.max(1)),
            },
            feed: FeedConfig {
                poll_interval: Duration::from_millis(env.parsed("CHANGE_FEED_POLL_MS", 1000u64)?.max(1)),
                batch_size,
            },
            retry,
            listen_addr: env.parsed("LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a positive decimal amount".to_string(),
        }),
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass
fn validate_identifier(key: &'static str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_rest = value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected letters, digits and underscores".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> HashMap<String, String> {
        [
            ("TABLE_NAME", "account_information"),
            ("BUDGET_LIMIT", "1000"),
            ("PRODUCT_ID", "prod-abc123"),
            ("PROVISIONING_ARTIFACT_ID", "pa-xyz789"),
            ("MANAGED_ORGANIZATIONAL_UNIT", "Sandbox (ou-1234)"),
            ("SNS_TOPIC", "arn:aws:sns:us-east-1:111122223333:budget-alerts"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_loads_required_keys_with_defaults() {
        let config = Config::from_map(&base_env()).unwrap();

        assert_eq!(config.store.table_name, "account_information");
        assert_eq!(config.guardrail.budget_limit, "1000");
        assert_eq!(config.guardrail.currency, "USD");
        assert_eq!(config.monitor.ceiling, 50000.0);
        assert_eq!(config.monitor.basis, MonitorBasis::ConfiguredLimit);
        assert_eq!(config.feed.batch_size, 10);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_missing_required_key_fails_fast() {
        for key in [
            "TABLE_NAME",
            "BUDGET_LIMIT",
            "PRODUCT_ID",
            "PROVISIONING_ARTIFACT_ID",
            "MANAGED_ORGANIZATIONAL_UNIT",
            "SNS_TOPIC",
        ] {
            let mut env = base_env();
            env.remove(key);
            assert_eq!(Config::from_map(&env), Err(ConfigError::Missing(key)));
        }
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut env = base_env();
        env.insert("PRODUCT_ID".into(), "   ".into());
        assert_eq!(Config::from_map(&env), Err(ConfigError::Missing("PRODUCT_ID")));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut env = base_env();
        env.insert("BUDGET_LIMIT".into(), "lots".into());
        assert!(matches!(
            Config::from_map(&env),
            Err(ConfigError::Invalid { key: "BUDGET_LIMIT", .. })
        ));

        let mut env = base_env();
        env.insert("TABLE_NAME".into(), "accounts; DROP TABLE x".into());
        assert!(matches!(
            Config::from_map(&env),
            Err(ConfigError::Invalid { key: "TABLE_NAME", .. })
        ));

        let mut env = base_env();
        env.insert("GUARDRAIL_MONITOR_BASIS".into(), "vibes".into());
        assert!(matches!(
            Config::from_map(&env),
            Err(ConfigError::Invalid { key: "GUARDRAIL_MONITOR_BASIS", .. })
        ));
    }

    #[test]
    fn test_optional_overrides() {
        let mut env = base_env();
        env.insert("GUARDRAIL_CEILING".into(), "75000".into());
        env.insert("GUARDRAIL_MONITOR_BASIS".into(), "actual-spend".into());
        env.insert("RETRY_MAX_ATTEMPTS".into(), "2".into());
        env.insert("LISTEN_ADDR".into(), "127.0.0.1:8081".into());

        let config = Config::from_map(&env).unwrap();
        assert_eq!(config.monitor.ceiling, 75000.0);
        assert_eq!(config.monitor.basis, MonitorBasis::ActualSpend);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.listen_addr.port(), 8081);
    }
}
