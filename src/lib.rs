pub mod alerter;
pub mod alerts;
pub mod analyzer;
pub mod api;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod export;
pub mod generator;
pub mod service;
pub mod storage;

/// Common types used across modules
pub mod types {
    use std::str::FromStr;

    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value};
    use smallvec::{smallvec, SmallVec};
    use uuid::Uuid;

    /// A point-in-time microgrid reading
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EnergyMetric {
        pub timestamp: DateTime<Utc>,
        /// kW
        pub consumption: f64,
        /// kW
        pub generation: f64,
        /// Battery state of charge, 0-100 %
        pub storage: f64,
        /// kW
        pub grid_export: f64,
        /// 0-100 %
        pub solar_efficiency: f64,
        /// 0-100 %
        pub battery_health: f64,
    }

    /// Reading fields addressable by thresholds and configured rules
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum MetricField {
        Consumption,
        Generation,
        Storage,
        #[serde(alias = "gridExport")]
        GridExport,
        #[serde(alias = "solarEfficiency")]
        SolarEfficiency,
        #[serde(alias = "batteryHealth")]
        BatteryHealth,
    }

    impl MetricField {
        pub fn read(self, metric: &EnergyMetric) -> f64 {
            match self {
                MetricField::Consumption => metric.consumption,
                MetricField::Generation => metric.generation,
                MetricField::Storage => metric.storage,
                MetricField::GridExport => metric.grid_export,
                MetricField::SolarEfficiency => metric.solar_efficiency,
                MetricField::BatteryHealth => metric.battery_health,
            }
        }

        /// Physical subsystem a reading belongs to
        pub fn component(self) -> &'static str {
            match self {
                MetricField::Consumption => "grid_load",
                MetricField::Generation | MetricField::SolarEfficiency => "solar_panels",
                MetricField::Storage | MetricField::BatteryHealth => "battery_system",
                MetricField::GridExport => "grid_connection",
            }
        }

        pub fn anomaly_kind(self) -> AnomalyKind {
            match self {
                MetricField::Consumption | MetricField::GridExport => AnomalyKind::Consumption,
                MetricField::Generation | MetricField::SolarEfficiency => AnomalyKind::Generation,
                MetricField::Storage => AnomalyKind::Storage,
                MetricField::BatteryHealth => AnomalyKind::DeviceFault,
            }
        }

        pub fn unit(self) -> &'static str {
            match self {
                MetricField::Consumption | MetricField::Generation | MetricField::GridExport => "kW",
                _ => "%",
            }
        }
    }

    /// Category reported by a detector
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AnomalyKind {
        Consumption,
        Generation,
        Storage,
        DeviceFault,
    }

    /// Detector-local severity, mapped onto [`AlertSeverity`] before alerting
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DetectorSeverity {
        Low,
        Medium,
        High,
        Critical,
    }

    impl DetectorSeverity {
        pub fn alert_severity(self) -> AlertSeverity {
            match self {
                DetectorSeverity::Low => AlertSeverity::Info,
                DetectorSeverity::Medium => AlertSeverity::Warning,
                DetectorSeverity::High | DetectorSeverity::Critical => AlertSeverity::Critical,
            }
        }
    }

    /// Alert severity levels
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum AlertSeverity {
        Info,
        Warning,
        Critical,
    }

    impl AlertSeverity {
        /// Priority rank used when ordering a detection batch
        pub fn rank(self) -> u8 {
            match self {
                AlertSeverity::Info => 1,
                AlertSeverity::Warning => 2,
                AlertSeverity::Critical => 3,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AlertType {
        Consumption,
        Generation,
        Storage,
        DeviceFault,
        SystemHealth,
        Anomaly,
    }

    impl From<AnomalyKind> for AlertType {
        fn from(kind: AnomalyKind) -> Self {
            match kind {
                AnomalyKind::Consumption => AlertType::Consumption,
                AnomalyKind::Generation => AlertType::Generation,
                AnomalyKind::Storage => AlertType::Storage,
                AnomalyKind::DeviceFault => AlertType::DeviceFault,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum AlertStatus {
        Active,
        Acknowledged,
        Resolved,
        Dismissed,
    }

    impl AlertStatus {
        /// Whether the alert still needs operator attention
        pub fn is_open(self) -> bool {
            matches!(self, AlertStatus::Active | AlertStatus::Acknowledged)
        }

        /// Forward-only lifecycle: resolved and dismissed are terminal
        pub fn can_transition_to(self, next: AlertStatus) -> bool {
            use AlertStatus::*;
            matches!(
                (self, next),
                (Active, Acknowledged)
                    | (Active, Resolved)
                    | (Active, Dismissed)
                    | (Acknowledged, Resolved)
                    | (Acknowledged, Dismissed)
            )
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AlertSource {
        Sensor,
        AiDetection,
        Manual,
        System,
    }

    /// Follow-up requested by whatever produced a detection
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum RuleAction {
        CreateAlert,
        SendNotification,
        Escalate,
        Log,
    }

    /// Which detector produced an [`AnomalyResult`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DetectorKind {
        RuleBased,
        Ai,
    }

    /// Transient output of a single-reading detector
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AnomalyResult {
        pub is_anomaly: bool,
        pub score: f64,
        #[serde(rename = "type")]
        pub kind: Option<AnomalyKind>,
        pub severity: Option<DetectorSeverity>,
        pub description: String,
        pub affected_component: Option<String>,
        pub detector: Option<DetectorKind>,
    }

    impl AnomalyResult {
        pub fn none() -> Self {
            Self {
                is_anomaly: false,
                score: 0.0,
                kind: None,
                severity: None,
                description: String::new(),
                affected_component: None,
                detector: None,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DeviceStatus {
        Online,
        Offline,
        Fault,
        Maintenance,
    }

    /// Optional per-device reading supplied alongside the metric window
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SensorReading {
        pub device_id: String,
        pub device_type: String,
        pub status: DeviceStatus,
        #[serde(default)]
        pub location: Option<String>,
    }

    /// One candidate alert produced by a detection pass
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DetectionResult {
        #[serde(rename = "type")]
        pub alert_type: AlertType,
        pub severity: AlertSeverity,
        pub title: String,
        pub description: String,
        pub confidence: f64,
        pub affected_component: Option<String>,
        pub device_id: Option<String>,
        pub location: Option<String>,
        pub actions: SmallVec<[RuleAction; 4]>,
        pub metadata: Map<String, Value>,
    }

    impl DetectionResult {
        pub fn new(
            alert_type: AlertType,
            severity: AlertSeverity,
            title: impl Into<String>,
            description: impl Into<String>,
            confidence: f64,
        ) -> Self {
            Self {
                alert_type,
                severity,
                title: title.into(),
                description: description.into(),
                confidence: confidence.clamp(0.0, 1.0),
                affected_component: None,
                device_id: None,
                location: None,
                actions: smallvec![RuleAction::CreateAlert, RuleAction::SendNotification],
                metadata: Map::new(),
            }
        }

        pub fn with_component(mut self, component: impl Into<String>) -> Self {
            self.affected_component = Some(component.into());
            self
        }

        pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
            self.metadata.insert(key.to_string(), value.into());
            self
        }

        /// Batch deduplication key
        pub fn dedup_key(&self) -> (AlertType, AlertSeverity, Option<&str>) {
            (self.alert_type, self.severity, self.affected_component.as_deref())
        }

        pub fn wants(&self, action: RuleAction) -> bool {
            self.actions.contains(&action)
        }
    }

    /// The central alert entity
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Alert {
        pub id: Uuid,
        pub title: String,
        pub description: String,
        #[serde(rename = "type")]
        pub alert_type: AlertType,
        pub severity: AlertSeverity,
        pub status: AlertStatus,
        pub source: AlertSource,
        pub device_id: Option<String>,
        pub location: Option<String>,
        pub timestamp: DateTime<Utc>,
        pub acknowledged_at: Option<DateTime<Utc>>,
        pub acknowledged_by: Option<String>,
        pub resolved_at: Option<DateTime<Utc>>,
        pub resolved_by: Option<String>,
        pub resolution_notes: Option<String>,
        pub metadata: Map<String, Value>,
        pub anomaly_id: Option<Uuid>,
    }

    /// Persisted record of an anomalous detector result
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Anomaly {
        pub id: Uuid,
        pub timestamp: DateTime<Utc>,
        #[serde(rename = "type")]
        pub kind: AnomalyKind,
        pub severity: DetectorSeverity,
        pub score: f64,
        pub description: String,
        pub affected_component: Option<String>,
        pub resolved: bool,
    }

    impl std::fmt::Display for AlertSeverity {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                AlertSeverity::Info => write!(f, "info"),
                AlertSeverity::Warning => write!(f, "warning"),
                AlertSeverity::Critical => write!(f, "critical"),
            }
        }
    }

    impl std::fmt::Display for AlertStatus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                AlertStatus::Active => "active",
                AlertStatus::Acknowledged => "acknowledged",
                AlertStatus::Resolved => "resolved",
                AlertStatus::Dismissed => "dismissed",
            };
            write!(f, "{}", s)
        }
    }

    impl std::fmt::Display for AlertType {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                AlertType::Consumption => "consumption",
                AlertType::Generation => "generation",
                AlertType::Storage => "storage",
                AlertType::DeviceFault => "device_fault",
                AlertType::SystemHealth => "system_health",
                AlertType::Anomaly => "anomaly",
            };
            write!(f, "{}", s)
        }
    }

    impl std::fmt::Display for AlertSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                AlertSource::Sensor => "sensor",
                AlertSource::AiDetection => "ai_detection",
                AlertSource::Manual => "manual",
                AlertSource::System => "system",
            };
            write!(f, "{}", s)
        }
    }

    impl std::fmt::Display for MetricField {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                MetricField::Consumption => "consumption",
                MetricField::Generation => "generation",
                MetricField::Storage => "storage",
                MetricField::GridExport => "grid_export",
                MetricField::SolarEfficiency => "solar_efficiency",
                MetricField::BatteryHealth => "battery_health",
            };
            write!(f, "{}", s)
        }
    }

    impl FromStr for AlertSeverity {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "info" => Ok(AlertSeverity::Info),
                "warning" => Ok(AlertSeverity::Warning),
                "critical" => Ok(AlertSeverity::Critical),
                other => Err(format!("unknown severity '{}'", other)),
            }
        }
    }

    impl FromStr for AlertType {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "consumption" => Ok(AlertType::Consumption),
                "generation" => Ok(AlertType::Generation),
                "storage" => Ok(AlertType::Storage),
                "device_fault" => Ok(AlertType::DeviceFault),
                "system_health" => Ok(AlertType::SystemHealth),
                "anomaly" => Ok(AlertType::Anomaly),
                other => Err(format!("unknown alert type '{}'", other)),
            }
        }
    }

    impl FromStr for AlertStatus {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "active" => Ok(AlertStatus::Active),
                "acknowledged" => Ok(AlertStatus::Acknowledged),
                "resolved" => Ok(AlertStatus::Resolved),
                "dismissed" => Ok(AlertStatus::Dismissed),
                other => Err(format!("unknown status '{}'", other)),
            }
        }
    }
}
