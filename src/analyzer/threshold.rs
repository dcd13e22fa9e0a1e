use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::ThresholdConfig;
use crate::types::{
    AlertSeverity, AlertType, AnomalyResult, DetectionResult, DetectorKind, DetectorSeverity,
    DeviceStatus, EnergyMetric, MetricField, SensorReading,
};
use super::{Analyzer, DetectionInput};

/// Which caller a threshold row serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdPurpose {
    /// First-match screening ahead of the AI classifier
    Screening,
    /// Exhaustive sweep inside the detection engine
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Above(f64),
    Below(f64),
}

impl Bound {
    fn violated_by(self, value: f64) -> bool {
        match self {
            Bound::Above(limit) => value > limit,
            Bound::Below(limit) => value < limit,
        }
    }

    fn limit(self) -> f64 {
        match self {
            Bound::Above(limit) | Bound::Below(limit) => limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdRule {
    pub purpose: ThresholdPurpose,
    pub field: MetricField,
    pub bound: Bound,
    pub severity: DetectorSeverity,
    pub score: f64,
}

impl ThresholdRule {
    fn check(&self, metric: &EnergyMetric) -> Option<f64> {
        let value = self.field.read(metric);
        self.bound.violated_by(value).then_some(value)
    }

    fn title(&self) -> &'static str {
        match (self.field, self.bound) {
            (MetricField::Consumption, Bound::Above(_)) => "High energy consumption",
            (MetricField::Storage, Bound::Below(_)) => "Critical battery level",
            (MetricField::SolarEfficiency, Bound::Below(_)) => "Low solar panel efficiency",
            (MetricField::BatteryHealth, Bound::Below(_)) => "Battery health degraded",
            (_, Bound::Above(_)) => "Reading above limit",
            (_, Bound::Below(_)) => "Reading below limit",
        }
    }

    fn describe(&self, value: f64) -> String {
        let unit = self.field.unit();
        match self.bound {
            Bound::Above(limit) => format!(
                "{} is {:.1} {} (limit: above {:.1} {})",
                self.field, value, unit, limit, unit
            ),
            Bound::Below(limit) => format!(
                "{} is {:.1} {} (limit: below {:.1} {})",
                self.field, value, unit, limit, unit
            ),
        }
    }
}

/// The single authoritative set of hard limits.
///
/// Rows are ordered: for screening, earlier rows pre-empt later ones.
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    rules: Vec<ThresholdRule>,
}

impl ThresholdTable {
    pub fn from_config(config: &ThresholdConfig) -> Self {
        use DetectorSeverity::*;
        use ThresholdPurpose::*;

        let row = |purpose, field, bound, severity, score| ThresholdRule {
            purpose,
            field,
            bound,
            severity,
            score,
        };

        let rules = vec![
            row(Screening, MetricField::Consumption, Bound::Above(config.consumption_critical_kw), Critical, 0.95),
            row(Screening, MetricField::Storage, Bound::Below(config.storage_screening_critical_percent), Critical, 0.90),
            row(Screening, MetricField::SolarEfficiency, Bound::Below(config.solar_efficiency_min_percent), High, 0.85),
            row(Screening, MetricField::BatteryHealth, Bound::Below(config.battery_health_min_percent), Medium, 0.80),
            row(Sweep, MetricField::Consumption, Bound::Above(config.consumption_critical_kw), Critical, 0.95),
            row(Sweep, MetricField::Storage, Bound::Below(config.storage_sweep_critical_percent), Critical, 0.90),
            row(Sweep, MetricField::SolarEfficiency, Bound::Below(config.solar_efficiency_min_percent), Medium, 0.85),
            row(Sweep, MetricField::BatteryHealth, Bound::Below(config.battery_health_min_percent), Medium, 0.80),
        ];

        Self { rules }
    }

    pub fn rows(&self, purpose: ThresholdPurpose) -> impl Iterator<Item = &ThresholdRule> {
        self.rules.iter().filter(move |r| r.purpose == purpose)
    }
}

/// Deterministic screening of the latest reading. First match wins.
#[derive(Clone)]
pub struct RuleBasedDetector {
    table: Arc<ThresholdTable>,
}

impl RuleBasedDetector {
    pub fn new(table: Arc<ThresholdTable>) -> Self {
        Self { table }
    }

    pub fn evaluate(&self, latest: &EnergyMetric) -> AnomalyResult {
        for rule in self.table.rows(ThresholdPurpose::Screening) {
            if let Some(value) = rule.check(latest) {
                tracing::debug!(field = %rule.field, value, "Screening threshold violated");
                return AnomalyResult {
                    is_anomaly: true,
                    score: rule.score,
                    kind: Some(rule.field.anomaly_kind()),
                    severity: Some(rule.severity),
                    description: rule.describe(value),
                    affected_component: Some(rule.field.component().to_string()),
                    detector: Some(DetectorKind::RuleBased),
                };
            }
        }
        AnomalyResult::none()
    }
}

/// Sweep of every hard limit plus device status checks
pub struct ThresholdAnalyzer {
    table: Arc<ThresholdTable>,
}

impl ThresholdAnalyzer {
    pub fn new(table: Arc<ThresholdTable>) -> Self {
        Self { table }
    }

    fn check_device(sensor: &SensorReading) -> Option<DetectionResult> {
        let (severity, state) = match sensor.status {
            DeviceStatus::Fault => (AlertSeverity::Critical, "reporting a fault"),
            DeviceStatus::Offline => (AlertSeverity::Warning, "offline"),
            DeviceStatus::Online | DeviceStatus::Maintenance => return None,
        };

        let mut result = DetectionResult::new(
            AlertType::DeviceFault,
            severity,
            format!("Device {} {}", sensor.device_id, state),
            format!("{} {} is {}", sensor.device_type, sensor.device_id, state),
            0.9,
        )
        .with_component(sensor.device_id.clone())
        .with_meta("device_type", sensor.device_type.clone());
        result.device_id = Some(sensor.device_id.clone());
        result.location = sensor.location.clone();
        Some(result)
    }
}

#[async_trait]
impl Analyzer for ThresholdAnalyzer {
    fn name(&self) -> &str { "threshold" }

    async fn analyze(&self, input: &DetectionInput<'_>) -> Result<Vec<DetectionResult>> {
        let mut results = Vec::new();

        if let Some(latest) = input.latest() {
            for rule in self.table.rows(ThresholdPurpose::Sweep) {
                if let Some(value) = rule.check(latest) {
                    results.push(
                        DetectionResult::new(
                            rule.field.anomaly_kind().into(),
                            rule.severity.alert_severity(),
                            rule.title(),
                            rule.describe(value),
                            rule.score,
                        )
                        .with_component(rule.field.component())
                        .with_meta("metric", rule.field.to_string())
                        .with_meta("value", value)
                        .with_meta("threshold", rule.bound.limit()),
                    );
                }
            }
        }

        results.extend(input.sensors.iter().filter_map(Self::check_device));
        Ok(results)
    }
}
