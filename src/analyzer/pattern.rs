use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AlertType, AnomalyKind, AnomalyResult, DetectionResult, DetectorKind, DetectorSeverity, EnergyMetric};
use super::ai::{AiAnalyzer, MAX_HISTORY};
use super::threshold::RuleBasedDetector;
use super::{Analyzer, DetectionInput};

/// Single-reading anomaly check: deterministic screening first, the language
/// model only when screening found nothing.
pub struct PatternAnalyzer {
    screening: RuleBasedDetector,
    ai: Arc<AiAnalyzer>,
}

impl PatternAnalyzer {
    pub fn new(screening: RuleBasedDetector, ai: Arc<AiAnalyzer>) -> Self {
        Self { screening, ai }
    }

    /// Judge the newest reading of `metrics` (oldest first)
    pub async fn inspect(&self, metrics: &[EnergyMetric]) -> AnomalyResult {
        let Some((latest, history)) = metrics.split_last() else {
            return AnomalyResult::none();
        };

        let screened = self.screening.evaluate(latest);
        if screened.is_anomaly {
            return screened;
        }

        let start = history.len().saturating_sub(MAX_HISTORY);
        self.ai.analyze(latest, &history[start..]).await
    }
}

/// Title used when an anomaly becomes an alert
pub fn anomaly_title(kind: AnomalyKind) -> &'static str {
    match kind {
        AnomalyKind::Consumption => "Consumption anomaly detected",
        AnomalyKind::Generation => "Generation anomaly detected",
        AnomalyKind::Storage => "Storage anomaly detected",
        AnomalyKind::DeviceFault => "Device fault detected",
    }
}

/// Convert a positive anomaly into a detection candidate
pub fn to_detection(result: &AnomalyResult) -> Option<DetectionResult> {
    if !result.is_anomaly {
        return None;
    }
    let kind = result.kind?;
    let severity = result.severity.unwrap_or(DetectorSeverity::Medium);
    let detector = match result.detector {
        Some(DetectorKind::Ai) => "ai",
        _ => "rule_based",
    };

    let mut detection = DetectionResult::new(
        AlertType::from(kind),
        severity.alert_severity(),
        anomaly_title(kind),
        result.description.clone(),
        result.score,
    )
    .with_meta("detector", detector)
    .with_meta("detector_severity", serde_json::to_value(severity).unwrap_or_default());
    detection.affected_component = result.affected_component.clone();
    Some(detection)
}

#[async_trait]
impl Analyzer for PatternAnalyzer {
    fn name(&self) -> &str { "ai" }

    async fn analyze(&self, input: &DetectionInput<'_>) -> Result<Vec<DetectionResult>> {
        let result = self.inspect(input.metrics).await;
        Ok(to_detection(&result).into_iter().collect())
    }
}
