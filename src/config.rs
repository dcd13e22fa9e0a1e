use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::alerter::{ChannelKind, Recipient};
use crate::analyzer::rules::{AlertRule, Operator, RuleCondition, RuleKind};
use crate::types::{AlertSeverity, MetricField, RuleAction};

/// Top-level configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default = "default_rules")]
    pub rules: Vec<AlertRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            generator: GeneratorConfig::default(),
            storage: StorageConfig::default(),
            thresholds: ThresholdConfig::default(),
            trend: TrendConfig::default(),
            ai: AiConfig::default(),
            alerting: AlertingConfig::default(),
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            cors_permissive: true,
        }
    }
}

/// Synthetic reading generator
#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_base_consumption")]
    pub base_consumption_kw: f64,
    #[serde(default = "default_base_generation")]
    pub base_generation_kw: f64,
    #[serde(default = "default_battery_capacity")]
    pub battery_capacity_kwh: f64,
    /// Amplitude of the random component; 0 makes readings deterministic
    #[serde(default = "default_noise")]
    pub noise: f64,
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_consumption_kw: 150.0,
            base_generation_kw: 200.0,
            battery_capacity_kwh: 500.0,
            noise: 0.1,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_metric_capacity")]
    pub metric_capacity: u32,
    #[serde(default = "default_detection_window")]
    pub detection_window: u32,
    #[serde(default = "default_alert_capacity")]
    pub notification_log_capacity: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metric_capacity: 720,
            detection_window: 24,
            notification_log_capacity: 1000,
        }
    }
}

/// Hard limits shared by the screening detector and the threshold pass.
/// The two storage limits are kept apart on purpose: screening fires at 5 %,
/// the sweep at 10 %.
#[derive(Debug, Deserialize, Clone)]
pub struct ThresholdConfig {
    #[serde(default = "default_consumption_critical")]
    pub consumption_critical_kw: f64,
    #[serde(default = "default_storage_screening")]
    pub storage_screening_critical_percent: f64,
    #[serde(default = "default_storage_sweep")]
    pub storage_sweep_critical_percent: f64,
    #[serde(default = "default_solar_efficiency_min")]
    pub solar_efficiency_min_percent: f64,
    #[serde(default = "default_battery_health_min")]
    pub battery_health_min_percent: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            consumption_critical_kw: 300.0,
            storage_screening_critical_percent: 5.0,
            storage_sweep_critical_percent: 10.0,
            solar_efficiency_min_percent: 50.0,
            battery_health_min_percent: 85.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrendConfig {
    #[serde(default = "default_consumption_rise")]
    pub consumption_rise_rate: f64,
    #[serde(default = "default_generation_drop")]
    pub generation_drop_rate: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            consumption_rise_rate: 0.1,
            generation_drop_rate: -0.15,
            min_samples: 2,
        }
    }
}

/// Language-model classifier settings
#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_ai_temperature")]
    pub temperature: f64,
    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_ai_endpoint(),
            model: default_ai_model(),
            timeout_secs: 10,
            temperature: 0.2,
            max_tokens: 400,
        }
    }
}

impl AiConfig {
    /// Configured key, falling back to `OPENAI_API_KEY`. Empty values count as absent.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertingConfig {
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    #[serde(default)]
    pub relay: Option<RelayConfig>,
    #[serde(default = "default_recipients")]
    pub recipients: Vec<Recipient>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: 5,
            relay: None,
            recipients: default_recipients(),
        }
    }
}

/// Outbound webhook used for email, sms and push delivery
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        // Expand environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| "Failed to parse configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.detection_window < 2 {
            bail!("storage.detection_window must be at least 2");
        }
        if self.storage.metric_capacity < self.storage.detection_window {
            bail!("storage.metric_capacity must hold at least one detection window");
        }
        if self.ai.timeout_secs == 0 {
            bail!("ai.timeout_secs must be positive");
        }
        let noise = self.generator.noise;
        if !noise.is_finite() || !(0.0..=1.0).contains(&noise) {
            bail!("generator.noise must be between 0 and 1, got {}", noise);
        }
        if self.generator.battery_capacity_kwh <= 0.0 {
            bail!("generator.battery_capacity_kwh must be positive");
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                bail!("duplicate rule id '{}'", rule.id);
            }
        }
        Ok(())
    }
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string())
}

fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            id: "high-consumption".into(),
            name: "Sustained high consumption".into(),
            kind: RuleKind::Threshold,
            severity: AlertSeverity::Warning,
            conditions: vec![RuleCondition {
                metric: MetricField::Consumption,
                operator: Operator::Gt,
                value: 250.0,
                duration: None,
                confidence: None,
            }],
            actions: vec![RuleAction::CreateAlert, RuleAction::SendNotification],
            enabled: true,
        },
        AlertRule {
            id: "low-storage".into(),
            name: "Battery reserve low".into(),
            kind: RuleKind::Threshold,
            severity: AlertSeverity::Warning,
            conditions: vec![RuleCondition {
                metric: MetricField::Storage,
                operator: Operator::Lt,
                value: 20.0,
                duration: None,
                confidence: None,
            }],
            actions: vec![RuleAction::CreateAlert, RuleAction::SendNotification],
            enabled: true,
        },
    ]
}

fn default_recipients() -> Vec<Recipient> {
    vec![Recipient {
        id: "operator".into(),
        email: Some("operator@microgrid.local".into()),
        phone: None,
        push_token: Some("operator-device".into()),
        channels: vec![ChannelKind::Email, ChannelKind::Push],
    }]
}

// Default value functions
fn default_bind() -> String { "0.0.0.0:8080".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }
fn default_base_consumption() -> f64 { 150.0 }
fn default_base_generation() -> f64 { 200.0 }
fn default_battery_capacity() -> f64 { 500.0 }
fn default_noise() -> f64 { 0.1 }
fn default_metric_capacity() -> u32 { 720 }
fn default_detection_window() -> u32 { 24 }
fn default_alert_capacity() -> u32 { 1000 }
fn default_consumption_critical() -> f64 { 300.0 }
fn default_storage_screening() -> f64 { 5.0 }
fn default_storage_sweep() -> f64 { 10.0 }
fn default_solar_efficiency_min() -> f64 { 50.0 }
fn default_battery_health_min() -> f64 { 85.0 }
fn default_consumption_rise() -> f64 { 0.1 }
fn default_generation_drop() -> f64 { -0.15 }
fn default_min_samples() -> u32 { 2 }
fn default_ai_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_ai_model() -> String { "gpt-4o-mini".to_string() }
fn default_ai_timeout() -> u64 { 10 }
fn default_ai_temperature() -> f64 { 0.2 }
fn default_ai_max_tokens() -> u32 { 400 }
fn default_send_timeout() -> u64 { 5 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.thresholds.consumption_critical_kw, 300.0);
        assert_eq!(config.storage.detection_window, 24);
        assert_eq!(config.ai.timeout_secs, 10);
        assert_eq!(config.rules.len(), 2);
    }

    #[test]
    fn env_vars_are_expanded() {
        std::env::set_var("MICROGRID_TEST_BIND", "127.0.0.1:9999");
        let config = Config::from_toml_str(
            "[server]\nbind = \"${MICROGRID_TEST_BIND}\"\n",
        )
        .unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9999");
    }

    #[test]
    fn rules_parse_with_symbolic_operators() {
        let config = Config::from_toml_str(
            r#"
[[rules]]
id = "export-spike"
name = "Export spike"
type = "threshold"
severity = "info"
actions = ["log"]

[[rules.conditions]]
metric = "grid_export"
operator = ">="
value = 120.0
"#,
        )
        .unwrap();
        assert_eq!(config.rules.len(), 1);
        let rule = &config.rules[0];
        assert!(rule.enabled);
        assert_eq!(rule.conditions[0].operator, Operator::Ge);
        assert_eq!(rule.actions, vec![RuleAction::Log]);
    }

    #[test]
    fn duplicate_rule_ids_are_rejected() {
        let toml = r#"
[[rules]]
id = "a"
name = "one"
type = "threshold"
severity = "info"

[[rules]]
id = "a"
name = "two"
type = "threshold"
severity = "info"
"#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn example_config_parses() {
        let config = Config::from_toml_str(include_str!("../config.example.toml")).unwrap();
        assert_eq!(config.rules.len(), 2);
        assert!(config.rules[1].actions.contains(&RuleAction::Escalate));
        assert_eq!(config.alerting.recipients[0].channels, vec![ChannelKind::Email, ChannelKind::Push]);
    }

    #[test]
    fn window_must_fit_capacity() {
        let toml = "[storage]\nmetric_capacity = 10\ndetection_window = 24\n";
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn noise_outside_unit_range_is_rejected() {
        let mut config = Config::default();
        config.generator.noise = 1e308;
        assert!(config.validate().is_err());

        config.generator.noise = f64::NAN;
        assert!(config.validate().is_err());

        config.generator.noise = 1.0;
        assert!(config.validate().is_ok());

        assert!(Config::from_toml_str("[generator]\nnoise = 1e308\n").is_err());
    }
}
