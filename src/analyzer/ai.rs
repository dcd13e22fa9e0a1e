//! Language-model pattern classifier.
//!
//! The model only ever sees aggregate statistics and answers with a small JSON
//! judgement. Anything it returns is validated before it becomes an
//! [`AnomalyResult`]; transport failures, timeouts and malformed answers all
//! collapse to "no anomaly".

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Timelike;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AiConfig;
use crate::dashboard::DailyTotals;
use crate::types::{AnomalyKind, AnomalyResult, DetectorKind, DetectorSeverity, EnergyMetric};
use super::mean_stddev;

/// Readings the classifier sees beyond the current one
pub const MAX_HISTORY: usize = 24;

const ANOMALY_SYSTEM_PROMPT: &str = "You are an energy systems analyst monitoring a solar microgrid. \
Classify whether the current reading is anomalous given the historical statistics. \
Respond only with a JSON object of the form \
{\"isAnomaly\": bool, \"score\": number between 0 and 1, \
\"type\": \"consumption\"|\"generation\"|\"storage\"|\"device_fault\", \
\"severity\": \"low\"|\"medium\"|\"high\"|\"critical\", \
\"description\": string, \"affectedComponent\": string}.";

const INSIGHTS_SYSTEM_PROMPT: &str = "You are an energy advisor for a community microgrid. \
Write two or three plain sentences summarising the last day of operation and one practical recommendation.";

/// Chat-completion backend
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model(&self) -> &str;

    /// Return the assistant message content
    async fn complete(&self, system: &str, user: &str, json_response: bool) -> Result<String>;
}

/// OpenAI-compatible `/chat/completions` client
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: &AiConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn model(&self) -> &str { &self.model }

    async fn complete(&self, system: &str, user: &str, json_response: bool) -> Result<String> {
        let mut payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if json_response {
            payload["response_format"] = json!({ "type": "json_object" });
        }

        let response: ChatResponse = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("completion returned no content"))
    }
}

/// Anomaly classifier and insight writer backed by a language model
pub struct AiAnalyzer {
    client: Option<Arc<dyn CompletionClient>>,
    timeout: Duration,
}

impl AiAnalyzer {
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let client: Option<Arc<dyn CompletionClient>> = match config.resolved_api_key() {
            Some(key) => Some(Arc::new(OpenAiClient::new(config, key)?)),
            None => {
                warn!("No language-model API key configured, AI detection disabled");
                None
            }
        };
        Ok(Self::new(client, config.timeout()))
    }

    pub fn new(client: Option<Arc<dyn CompletionClient>>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Classify `latest` against up to [`MAX_HISTORY`] prior readings. Never fails.
    pub async fn analyze(&self, latest: &EnergyMetric, history: &[EnergyMetric]) -> AnomalyResult {
        let Some(client) = &self.client else {
            return AnomalyResult::none();
        };

        let start = history.len().saturating_sub(MAX_HISTORY);
        let prompt = build_prompt(latest, &history[start..]);

        match self.call(client.as_ref(), ANOMALY_SYSTEM_PROMPT, &prompt, true).await {
            Ok(content) => match parse_judgement(&content) {
                Some(result) => {
                    debug!(model = client.model(), anomaly = result.is_anomaly, score = result.score, "AI judgement received");
                    result
                }
                None => {
                    warn!(model = client.model(), "AI judgement malformed, treating as no anomaly");
                    AnomalyResult::none()
                }
            },
            Err(e) => {
                warn!(model = client.model(), error = %e, "AI anomaly analysis failed, treating as no anomaly");
                AnomalyResult::none()
            }
        }
    }

    /// Free-text daily summary, with a deterministic fallback
    pub async fn insights(&self, metrics: &[EnergyMetric], totals: &DailyTotals) -> String {
        let fallback = fallback_insight(metrics.len(), totals);
        let Some(client) = &self.client else {
            return fallback;
        };
        if metrics.is_empty() {
            return fallback;
        }

        let prompt = build_insights_prompt(metrics, totals);
        match self.call(client.as_ref(), INSIGHTS_SYSTEM_PROMPT, &prompt, false).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback,
            Err(e) => {
                warn!(error = %e, "AI insights unavailable, using fallback");
                fallback
            }
        }
    }

    async fn call(&self, client: &dyn CompletionClient, system: &str, user: &str, json: bool) -> Result<String> {
        tokio::time::timeout(self.timeout, client.complete(system, user, json))
            .await
            .map_err(|_| anyhow!("timed out after {}s", self.timeout.as_secs_f64()))?
    }
}

/// Textual summary handed to the classifier
pub fn build_prompt(latest: &EnergyMetric, history: &[EnergyMetric]) -> String {
    let consumption: Vec<f64> = history.iter().map(|m| m.consumption).collect();
    let generation: Vec<f64> = history.iter().map(|m| m.generation).collect();
    let (c_mean, c_sd) = mean_stddev(&consumption);
    let (g_mean, g_sd) = mean_stddev(&generation);
    let hour = latest.timestamp.hour();
    let period = if (6..18).contains(&hour) { "day" } else { "night" };

    let mut out = String::new();
    let _ = writeln!(out, "Current reading at {}:", latest.timestamp.to_rfc3339());
    let _ = writeln!(out, "- consumption: {:.1} kW", latest.consumption);
    let _ = writeln!(out, "- generation: {:.1} kW", latest.generation);
    let _ = writeln!(out, "- storage: {:.1} %", latest.storage);
    let _ = writeln!(out, "- grid export: {:.1} kW", latest.grid_export);
    let _ = writeln!(out, "- solar efficiency: {:.1} %", latest.solar_efficiency);
    let _ = writeln!(out, "- battery health: {:.1} %", latest.battery_health);
    let _ = writeln!(out);
    let _ = writeln!(out, "Historical statistics over {} readings:", history.len());
    let _ = writeln!(out, "- consumption mean {:.1} kW, stddev {:.1} kW", c_mean, c_sd);
    let _ = writeln!(out, "- generation mean {:.1} kW, stddev {:.1} kW", g_mean, g_sd);
    let _ = writeln!(out, "Time of day: {} (hour {} UTC)", period, hour);
    let _ = writeln!(out);
    let _ = writeln!(out, "Normal operating ranges:");
    let _ = writeln!(out, "- consumption: 80-250 kW");
    let _ = writeln!(out, "- generation: 0-300 kW (zero at night)");
    let _ = writeln!(out, "- storage: 20-90 %");
    let _ = writeln!(out, "- solar efficiency: 80-95 %");
    let _ = writeln!(out, "- battery health: 90-100 %");
    out
}

fn build_insights_prompt(metrics: &[EnergyMetric], totals: &DailyTotals) -> String {
    let peak = metrics
        .iter()
        .max_by(|a, b| a.consumption.total_cmp(&b.consumption));
    let avg_storage = metrics.iter().map(|m| m.storage).sum::<f64>() / metrics.len().max(1) as f64;

    let mut out = String::new();
    let _ = writeln!(out, "Readings: {}", metrics.len());
    let _ = writeln!(out, "Total consumption: {:.1} MWh", totals.consumption);
    let _ = writeln!(out, "Total generation: {:.1} MWh", totals.generation);
    let _ = writeln!(out, "CO2 saved: {:.1} t", totals.co2_saved);
    let _ = writeln!(out, "Average battery level: {:.1} %", avg_storage);
    if let Some(peak) = peak {
        let _ = writeln!(out, "Peak load: {:.1} kW at {}", peak.consumption, peak.timestamp.format("%H:%M"));
    }
    out
}

fn fallback_insight(readings: usize, totals: &DailyTotals) -> String {
    if readings == 0 {
        return "No readings recorded yet. Run a simulation to start collecting energy data.".to_string();
    }
    format!(
        "Over the last {} readings the microgrid consumed {:.1} MWh and generated {:.1} MWh, saving an estimated {:.1} t of CO2.",
        readings, totals.consumption, totals.generation, totals.co2_saved
    )
}

/// Validate a model answer. `None` means the payload could not be trusted.
pub fn parse_judgement(content: &str) -> Option<AnomalyResult> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&content[start..=end]).ok()?;
    let obj = value.as_object()?;

    if !obj.get("isAnomaly")?.as_bool()? {
        return Some(AnomalyResult {
            detector: Some(DetectorKind::Ai),
            ..AnomalyResult::none()
        });
    }

    let score = obj.get("score")?.as_f64()?.clamp(0.0, 1.0);
    let kind: AnomalyKind = serde_json::from_value(obj.get("type")?.clone()).ok()?;
    let severity: DetectorSeverity = serde_json::from_value(obj.get("severity")?.clone()).ok()?;
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("AI detected an unusual operating pattern")
        .to_string();
    let affected_component = obj
        .get("affectedComponent")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    Some(AnomalyResult {
        is_anomaly: true,
        score,
        kind: Some(kind),
        severity: Some(severity),
        description,
        affected_component,
        detector: Some(DetectorKind::Ai),
    })
}
