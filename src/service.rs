//! Pipeline orchestration shared by the HTTP handlers.
//!
//! Each batch (simulate, test detection, initialize) holds the pipeline lock
//! from generation through alert creation, so batches never interleave.
//! Notifications go out after the pipeline lock has been released.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::alerter::broadcast::AlertEvent;
use crate::alerter::{ChannelKind, NotificationDispatcher};
use crate::alerts::{AlertStore, ManualAlertRequest, NewAlert};
use crate::analyzer::ai::{AiAnalyzer, CompletionClient};
use crate::analyzer::pattern::{to_detection, PatternAnalyzer};
use crate::analyzer::rules::AlertRule;
use crate::analyzer::threshold::{RuleBasedDetector, ThresholdTable};
use crate::config::Config;
use crate::dashboard::{self, DashboardSummary, DAY_WINDOW, RECENT_ANOMALIES};
use crate::engine::DetectionEngine;
use crate::error::AlertError;
use crate::generator::{InjectedAnomaly, MetricGenerator, SimulationMode};
use crate::storage::MetricStore;
use crate::types::{
    Alert, AlertSource, Anomaly, AnomalyKind, AnomalyResult, DetectionResult, DetectorKind,
    DetectorSeverity, EnergyMetric, RuleAction, SensorReading,
};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    #[serde(rename = "type", default)]
    pub mode: SimulationMode,
    #[serde(default)]
    pub anomaly_type: Option<InjectedAnomaly>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOutcome {
    pub metric: EnergyMetric,
    pub anomaly_detected: bool,
    pub anomaly_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub detections: Vec<DetectionResult>,
    pub alerts_created: usize,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub microgrid_location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeOutcome {
    pub preferences: Preferences,
    pub readings: usize,
    pub anomaly: Option<Anomaly>,
    pub alert: Option<Alert>,
}

pub struct MonitorService {
    config: Config,
    metrics: MetricStore,
    alerts: AlertStore,
    generator: Mutex<MetricGenerator>,
    pattern: PatternAnalyzer,
    engine: DetectionEngine,
    ai: Arc<AiAnalyzer>,
    dispatcher: NotificationDispatcher,
    events: broadcast::Sender<AlertEvent>,
    pipeline: tokio::sync::Mutex<()>,
    preferences: RwLock<Preferences>,
}

impl MonitorService {
    pub fn new(config: Config) -> Result<Self> {
        let ai = AiAnalyzer::from_config(&config.ai)?;
        Self::build(config, ai)
    }

    /// Use `client` instead of the configured language model
    pub fn with_ai_client(config: Config, client: Option<Arc<dyn CompletionClient>>) -> Result<Self> {
        let ai = AiAnalyzer::new(client, config.ai.timeout());
        Self::build(config, ai)
    }

    fn build(config: Config, ai: AiAnalyzer) -> Result<Self> {
        config.validate()?;
        let ai = Arc::new(ai);
        let table = Arc::new(ThresholdTable::from_config(&config.thresholds));
        let pattern = PatternAnalyzer::new(RuleBasedDetector::new(table.clone()), ai.clone());
        let engine = DetectionEngine::new(&config, table, ai.clone());

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let dispatcher = NotificationDispatcher::new(
            &config.alerting,
            config.storage.notification_log_capacity as usize,
            events.clone(),
        )?;

        Ok(Self {
            metrics: MetricStore::new(&config.storage),
            alerts: AlertStore::new(),
            generator: Mutex::new(MetricGenerator::new(&config.generator)),
            pattern,
            engine,
            ai,
            dispatcher,
            events,
            pipeline: tokio::sync::Mutex::new(()),
            preferences: RwLock::new(Preferences::default()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    pub fn metrics(&self) -> &MetricStore {
        &self.metrics
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn rules(&self) -> &[AlertRule] {
        self.engine.rules()
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai.is_enabled()
    }

    pub fn preferences(&self) -> Preferences {
        self.preferences.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Live alert feed for websocket clients
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    fn window(&self) -> Vec<EnergyMetric> {
        self.metrics.recent(self.config.storage.detection_window as usize)
    }

    pub async fn simulate(&self, request: SimulateRequest) -> SimulationOutcome {
        self.simulate_at(request, Utc::now()).await
    }

    /// Generate one reading stamped `at`, store it and check it for anomalies
    pub async fn simulate_at(&self, request: SimulateRequest, at: DateTime<Utc>) -> SimulationOutcome {
        let (metric, result, raised) = {
            let _batch = self.pipeline.lock().await;

            let injected = match request.mode {
                SimulationMode::Normal => None,
                SimulationMode::Anomaly => Some(request.anomaly_type.unwrap_or(InjectedAnomaly::ConsumptionSpike)),
            };
            let metric = self
                .generator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .generate(at, injected);
            self.metrics.insert(metric);

            let result = self.pattern.inspect(&self.window()).await;
            let raised = if result.is_anomaly { self.raise_anomaly(&result) } else { None };
            (metric, result, raised)
        };

        let alert = self.notify(raised).await;

        SimulationOutcome {
            metric,
            anomaly_detected: result.is_anomaly,
            anomaly_score: result.score,
            alert,
        }
    }

    async fn notify(&self, raised: Option<(Alert, Vec<ChannelKind>)>) -> Option<Alert> {
        let (alert, requested) = raised?;
        self.dispatcher.dispatch(&alert, &requested).await;
        Some(alert)
    }

    /// Persist the anomaly and open its alert. Dispatch is left to the caller.
    fn raise_anomaly(&self, result: &AnomalyResult) -> Option<(Alert, Vec<ChannelKind>)> {
        let detection = to_detection(result)?;
        let anomaly = self.alerts.record_anomaly(result);
        let source = match result.detector {
            Some(DetectorKind::Ai) => AlertSource::AiDetection,
            _ => AlertSource::System,
        };

        let mut new = NewAlert::from_detection(&detection, source);
        new.anomaly_id = Some(anomaly.id);
        info!(
            anomaly_id = %anomaly.id,
            score = result.score,
            component = ?result.affected_component,
            "Anomaly detected"
        );
        Some((self.alerts.create(new), requested_channels(&detection)))
    }

    /// Run every detection pass over the trailing window and act on the results
    pub async fn run_detection(&self, sensors: &[SensorReading]) -> DetectionReport {
        let batch = self.pipeline.lock().await;

        let detections = self.engine.detect(&self.window(), sensors).await;

        let mut created = Vec::new();
        let mut outbox = Vec::new();
        for detection in &detections {
            if detection.wants(RuleAction::Log) {
                info!(
                    alert_type = %detection.alert_type,
                    severity = %detection.severity,
                    title = %detection.title,
                    "Detection logged"
                );
            }
            if !detection.wants(RuleAction::CreateAlert) {
                continue;
            }

            let alert = self.alerts.create(NewAlert::from_detection(detection, source_of(detection)));
            if detection.wants(RuleAction::SendNotification) || detection.wants(RuleAction::Escalate) {
                outbox.push((alert.clone(), requested_channels(detection)));
            }
            created.push(alert);
        }
        drop(batch);

        for (alert, requested) in &outbox {
            self.dispatcher.dispatch(alert, requested).await;
        }

        info!(detections = detections.len(), alerts = created.len(), "Detection batch complete");
        DetectionReport {
            alerts_created: created.len(),
            alerts: created,
            detections,
        }
    }

    /// Validate and store an operator-submitted alert, then notify
    pub async fn create_manual_alert(&self, request: ManualAlertRequest) -> Result<Alert, AlertError> {
        let alert = self.alerts.create_manual(request)?;
        self.dispatcher.dispatch(&alert, &[]).await;
        Ok(alert)
    }

    /// Seed a day of hourly readings plus one demo anomaly, and remember the
    /// operator's preferences
    pub async fn initialize(&self, preferences: Preferences) -> InitializeOutcome {
        let batch = self.pipeline.lock().await;

        let history = self
            .generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history(Utc::now(), DAY_WINDOW);
        let readings = history.len();
        self.metrics.extend(history);

        let demo = AnomalyResult {
            is_anomaly: true,
            score: 0.92,
            kind: Some(AnomalyKind::Consumption),
            severity: Some(DetectorSeverity::High),
            description: "Unusual consumption spike detected on the grid load during system initialization".into(),
            affected_component: Some("grid_load".into()),
            detector: Some(DetectorKind::RuleBased),
        };
        let raised = self.raise_anomaly(&demo);

        *self.preferences.write().unwrap_or_else(PoisonError::into_inner) = preferences.clone();
        info!(
            readings,
            role = ?preferences.user_role,
            location = ?preferences.microgrid_location,
            "System initialized"
        );

        drop(batch);

        let alert = self.notify(raised).await;

        InitializeOutcome {
            preferences,
            readings,
            anomaly: alert
                .as_ref()
                .and_then(|a| a.anomaly_id)
                .and_then(|id| self.alerts.anomalies(RECENT_ANOMALIES).into_iter().find(|an| an.id == id)),
            alert,
        }
    }

    pub fn summary(&self) -> DashboardSummary {
        dashboard::build(
            &self.metrics.recent(DAY_WINDOW),
            self.alerts.active(),
            self.alerts.anomalies(RECENT_ANOMALIES),
            self.ai.is_enabled(),
        )
    }

    pub async fn insights(&self) -> String {
        let metrics = self.metrics.recent(DAY_WINDOW);
        let totals = dashboard::daily_totals(&metrics);
        self.ai.insights(&metrics, &totals).await
    }
}

/// Escalation adds SMS on top of the severity's channels
fn requested_channels(detection: &DetectionResult) -> Vec<ChannelKind> {
    if detection.wants(RuleAction::Escalate) {
        vec![ChannelKind::Sms]
    } else {
        Vec::new()
    }
}

fn source_of(detection: &DetectionResult) -> AlertSource {
    if detection.device_id.is_some() {
        AlertSource::Sensor
    } else if detection.metadata.get("detector").and_then(|d| d.as_str()) == Some("ai") {
        AlertSource::AiDetection
    } else {
        AlertSource::System
    }
}
