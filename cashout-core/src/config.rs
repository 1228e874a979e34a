//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory. Every section
//! is optional:
//! ```json
//! {
//!   "sandbox": false,
//!   "retry": { "maxRetries": 3, "initialDelayMs": 30000, "maxDelayMs": 3600000, "claimLeaseMs": 120000 },
//!   "reconciliation": { "batchSize": 100, "maxAgeDays": 7 },
//!   "scheduler": { "retrySweepIntervalMs": 60000, "reconciliationIntervalMs": 3600000 },
//!   "providers": { "mtnMomo": { ... }, "airtelMoney": { ... } }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::ProviderErrorCode;
use crate::services::{ReconcileOptions, RetryPolicy, SchedulerConfig};

pub const SANDBOX_ENV: &str = "CASHOUT_SANDBOX";
pub const MAX_RETRIES_ENV: &str = "CASHOUT_MAX_RETRIES";
pub const MTN_BASE_URL_ENV: &str = "CASHOUT_MTN_BASE_URL";
pub const AIRTEL_BASE_URL_ENV: &str = "CASHOUT_AIRTEL_BASE_URL";

const SETTINGS_FILE: &str = "settings.json";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    sandbox: bool,
    #[serde(default)]
    retry: RetrySettings,
    #[serde(default)]
    reconciliation: ReconciliationSettings,
    #[serde(default)]
    scheduler: SchedulerSettings,
    #[serde(default)]
    providers: ProviderSettings,
    /// Keys this crate does not manage, written back untouched
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// How long an attempt holds a record; keep it above the adapter timeouts
    pub claim_lease_ms: u64,
    /// Overrides the default set of retryable codes when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable_codes: Option<Vec<ProviderErrorCode>>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_delay_ms: policy.initial_delay_ms,
            max_delay_ms: policy.max_delay_ms,
            claim_lease_ms: policy.claim_lease_ms,
            retryable_codes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconciliationSettings {
    pub batch_size: usize,
    pub max_age_days: i64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        let options = ReconcileOptions::default();
        Self {
            batch_size: options.batch_size,
            max_age_days: options.max_age_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerSettings {
    pub retry_sweep_interval_ms: u64,
    pub reconciliation_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let config = SchedulerConfig::default();
        Self {
            retry_sweep_interval_ms: config.retry_sweep_interval_ms,
            reconciliation_interval_ms: config.reconciliation_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    pub mtn_momo: MtnMomoSettings,
    pub airtel_money: AirtelMoneySettings,
}

/// MTN MoMo disbursement API credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MtnMomoSettings {
    pub base_url: String,
    pub api_user: Option<String>,
    pub api_key: Option<String>,
    pub subscription_key: Option<String>,
    pub target_environment: String,
    pub timeout_secs: u64,
}

impl Default for MtnMomoSettings {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.momodeveloper.mtn.com".to_string(),
            api_user: None,
            api_key: None,
            subscription_key: None,
            target_environment: "sandbox".to_string(),
            timeout_secs: 30,
        }
    }
}

impl MtnMomoSettings {
    pub fn is_configured(&self) -> bool {
        [&self.api_user, &self.api_key, &self.subscription_key]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

/// Airtel Money disbursement API credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AirtelMoneySettings {
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub country: String,
    pub currency: String,
    /// Encrypted disbursement PIN, as issued by Airtel
    pub pin: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AirtelMoneySettings {
    fn default() -> Self {
        Self {
            base_url: "https://openapiuat.airtel.africa".to_string(),
            client_id: None,
            client_secret: None,
            country: "UG".to_string(),
            currency: "UGX".to_string(),
            pin: None,
            timeout_secs: 30,
        }
    }
}

impl AirtelMoneySettings {
    pub fn is_configured(&self) -> bool {
        [&self.client_id, &self.client_secret]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

/// Cash-out configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Use in-process sandbox providers instead of live APIs
    pub sandbox: bool,
    pub retry: RetrySettings,
    pub reconciliation: ReconciliationSettings,
    pub scheduler: SchedulerSettings,
    pub providers: ProviderSettings,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Config {
    /// Load config from the data directory, then apply environment overrides
    pub fn load(data_dir: &Path) -> Result<Self> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid settings in {}", settings_path.display()))?
        } else {
            SettingsFile::default()
        };

        let mut config = Self {
            sandbox: raw.sandbox,
            retry: raw.retry.clone(),
            reconciliation: raw.reconciliation.clone(),
            scheduler: raw.scheduler.clone(),
            providers: raw.providers.clone(),
            _raw_settings: raw,
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        match std::env::var(SANDBOX_ENV).ok().as_deref() {
            Some("true" | "1" | "yes" | "TRUE" | "YES") => self.sandbox = true,
            Some("false" | "0" | "no" | "FALSE" | "NO") => self.sandbox = false,
            _ => {}
        }
        if let Ok(value) = std::env::var(MAX_RETRIES_ENV) {
            self.retry.max_retries = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a non-negative integer", MAX_RETRIES_ENV))?;
        }
        if let Ok(url) = std::env::var(MTN_BASE_URL_ENV) {
            self.providers.mtn_momo.base_url = url;
        }
        if let Ok(url) = std::env::var(AIRTEL_BASE_URL_ENV) {
            self.providers.airtel_money.base_url = url;
        }
        Ok(())
    }

    /// Save config to the data directory.
    /// Preserves other settings that this crate doesn't manage
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_else(|_| self._raw_settings.clone())
        } else {
            self._raw_settings.clone()
        };

        settings.sandbox = self.sandbox;
        settings.retry = self.retry.clone();
        settings.reconciliation = self.reconciliation.clone();
        settings.scheduler = self.scheduler.clone();
        settings.providers = self.providers.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_delay_ms: self.retry.initial_delay_ms,
            max_delay_ms: self.retry.max_delay_ms,
            claim_lease_ms: self.retry.claim_lease_ms,
            ..RetryPolicy::default()
        };
        if let Some(codes) = &self.retry.retryable_codes {
            policy.retryable_codes = codes.iter().copied().collect();
        }
        policy
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            provider: None,
            max_age_days: self.reconciliation.max_age_days,
            batch_size: self.reconciliation.batch_size,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            retry_sweep_interval_ms: self.scheduler.retry_sweep_interval_ms,
            reconciliation_interval_ms: self.scheduler.reconciliation_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_settings_file() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay_ms, 30_000);
        assert_eq!(policy.claim_lease_ms, 120_000);
        assert_eq!(config.reconciliation.batch_size, 100);
        assert_eq!(config.scheduler.retry_sweep_interval_ms, 60_000);
        assert!(!config.providers.mtn_momo.is_configured());
        assert!(!config.providers.airtel_money.is_configured());
    }

    #[test]
    fn test_partial_settings_and_custom_codes() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{
                "retry": { "initialDelayMs": 1000, "claimLeaseMs": 5000, "retryableCodes": ["TIMEOUT"] },
                "providers": { "airtelMoney": { "clientId": "id", "clientSecret": "secret", "country": "KE" } }
            }"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 3_600_000);
        assert_eq!(policy.claim_lease_ms, 5000);
        assert_eq!(policy.retryable_codes.len(), 1);
        assert!(policy.retryable_codes.contains(&ProviderErrorCode::Timeout));
        assert!(config.providers.airtel_money.is_configured());
        assert_eq!(config.providers.airtel_money.country, "KE");
        assert_eq!(config.providers.airtel_money.currency, "UGX");
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{ "dashboard": { "theme": "dark" } }"#).unwrap();

        let mut config = Config::load(dir.path()).unwrap();
        config.reconciliation.batch_size = 25;
        config.save(dir.path()).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["dashboard"]["theme"], "dark");
        assert_eq!(saved["reconciliation"]["batchSize"], 25);
    }

    #[test]
    fn test_invalid_settings_are_reported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ not json").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
