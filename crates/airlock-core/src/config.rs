//! Process configuration from the environment.

use std::time::Duration;

use airlock_agent::ProcessingMode;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::Result;

/// Environment variable names the gateway recognizes. Everything else is
/// request-scoped.
const ENV_MODE: &str = "AIRLOCK_MODE";
const ENV_MAX_RISK: &str = "AIRLOCK_MAX_RISK_SCORE";
const ENV_BUDGET_MS: &str = "AIRLOCK_BUDGET_MS";
const ENV_MAX_ITERATIONS: &str = "AIRLOCK_MAX_ITERATIONS";
const ENV_VAULT_KEY: &str = "AIRLOCK_VAULT_KEY";
const ENV_VAULT_PATH: &str = "AIRLOCK_VAULT_PATH";
const ENV_AUDIT_PATH: &str = "AIRLOCK_AUDIT_PATH";
const ENV_PROVIDER_URL: &str = "AIRLOCK_PROVIDER_URL";
const ENV_PROVIDER_KEY: &str = "AIRLOCK_PROVIDER_API_KEY";
const ENV_MODEL: &str = "AIRLOCK_MODEL";
const ENV_PII_CONFIDENCE: &str = "AIRLOCK_PII_CONFIDENCE_THRESHOLD";
const ENV_BIAS_CONFIDENCE: &str = "AIRLOCK_BIAS_CONFIDENCE_THRESHOLD";

/// Gateway process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Default mode when a request names none.
    pub default_mode: ProcessingMode,
    /// Default block-gate override; `None` defers to the mode policy.
    pub default_max_risk: Option<f64>,
    /// Overall request budget in milliseconds.
    pub budget_ms: u64,
    /// Tool-loop iteration bound.
    pub max_iterations: u32,
    /// Vault encryption secret.
    pub vault_secret: String,
    /// Vault storage path; `None` keeps the vault in memory.
    pub vault_path: Option<String>,
    /// Audit log path; `None` keeps the log in memory.
    pub audit_path: Option<String>,
    /// Provider base URL.
    pub provider_url: Option<String>,
    /// Provider API key.
    pub provider_api_key: Option<String>,
    /// Default model name.
    pub model: String,
    /// Environment override for PII confidence thresholds.
    pub pii_confidence_override: Option<f64>,
    /// Environment override for bias confidence thresholds.
    pub bias_confidence_override: Option<f64>,
    /// Resolve placeholders back to originals just before release.
    /// Normally off; redacted values stay redacted.
    pub restore_on_release: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_mode: ProcessingMode::Balanced,
            default_max_risk: None,
            budget_ms: 30_000,
            max_iterations: 4,
            vault_secret: "airlock-dev-secret".to_string(),
            vault_path: None,
            audit_path: None,
            provider_url: None,
            provider_api_key: None,
            model: "gpt-4o-mini".to_string(),
            pii_confidence_override: None,
            bias_confidence_override: None,
            restore_on_release: false,
        }
    }
}

impl GatewayConfig {
    /// Reads configuration from the environment (and `.env` when present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(mode) = std::env::var(ENV_MODE) {
            config.default_mode = parse_mode(&mode)?;
        }
        if let Ok(value) = std::env::var(ENV_MAX_RISK) {
            config.default_max_risk = Some(parse_number(ENV_MAX_RISK, &value)?);
        }
        if let Ok(value) = std::env::var(ENV_BUDGET_MS) {
            config.budget_ms = parse_number(ENV_BUDGET_MS, &value)? as u64;
        }
        if let Ok(value) = std::env::var(ENV_MAX_ITERATIONS) {
            config.max_iterations = parse_number(ENV_MAX_ITERATIONS, &value)? as u32;
        }
        if let Ok(secret) = std::env::var(ENV_VAULT_KEY) {
            config.vault_secret = secret;
        }
        config.vault_path = std::env::var(ENV_VAULT_PATH).ok();
        config.audit_path = std::env::var(ENV_AUDIT_PATH).ok();
        config.provider_url = std::env::var(ENV_PROVIDER_URL).ok();
        config.provider_api_key = std::env::var(ENV_PROVIDER_KEY).ok();
        if let Ok(model) = std::env::var(ENV_MODEL) {
            config.model = model;
        }
        if let Ok(value) = std::env::var(ENV_PII_CONFIDENCE) {
            config.pii_confidence_override = Some(parse_number(ENV_PII_CONFIDENCE, &value)?);
        }
        if let Ok(value) = std::env::var(ENV_BIAS_CONFIDENCE) {
            config.bias_confidence_override = Some(parse_number(ENV_BIAS_CONFIDENCE, &value)?);
        }

        Ok(config)
    }

    /// The overall request budget.
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

fn parse_mode(value: &str) -> Result<ProcessingMode> {
    match value.to_lowercase().as_str() {
        "strict" => Ok(ProcessingMode::Strict),
        "balanced" => Ok(ProcessingMode::Balanced),
        "permissive" => Ok(ProcessingMode::Permissive),
        other => Err(GatewayError::Config(format!(
            "unrecognized mode '{}' in {}",
            other, ENV_MODE
        ))),
    }
}

fn parse_number(name: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| GatewayError::Config(format!("{} is not a number: '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.default_mode, ProcessingMode::Balanced);
        assert_eq!(config.budget_ms, 30_000);
        assert_eq!(config.max_iterations, 4);
        assert!(!config.restore_on_release);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("STRICT").unwrap(), ProcessingMode::Strict);
        assert!(parse_mode("loose").is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("X", "7.5").unwrap(), 7.5);
        assert!(parse_number("X", "not-a-number").is_err());
    }
}
