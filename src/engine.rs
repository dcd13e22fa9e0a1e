use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analyzer::ai::AiAnalyzer;
use crate::analyzer::pattern::PatternAnalyzer;
use crate::analyzer::rules::{AlertRule, RuleAnalyzer};
use crate::analyzer::threshold::{RuleBasedDetector, ThresholdAnalyzer, ThresholdTable};
use crate::analyzer::trend::TrendAnalyzer;
use crate::analyzer::{Analyzer, DetectionInput};
use crate::config::Config;
use crate::types::{DetectionResult, EnergyMetric, SensorReading};

/// Runs every detection pass and merges the candidates into one prioritized batch
pub struct DetectionEngine {
    passes: Vec<Box<dyn Analyzer>>,
    rules: Vec<AlertRule>,
}

impl DetectionEngine {
    /// Build the standard pass order: AI, rules, thresholds, trend
    pub fn new(config: &Config, table: Arc<ThresholdTable>, ai: Arc<AiAnalyzer>) -> Self {
        let passes: Vec<Box<dyn Analyzer>> = vec![
            Box::new(PatternAnalyzer::new(RuleBasedDetector::new(table.clone()), ai)),
            Box::new(RuleAnalyzer::new(config.rules.clone())),
            Box::new(ThresholdAnalyzer::new(table)),
            Box::new(TrendAnalyzer::new(&config.trend)),
        ];

        info!(count = passes.len(), rules = config.rules.len(), "Initialized detection passes");
        Self {
            passes,
            rules: config.rules.clone(),
        }
    }

    /// Custom pass list, run in the given order
    pub fn with_passes(passes: Vec<Box<dyn Analyzer>>) -> Self {
        Self { passes, rules: Vec::new() }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub async fn detect(&self, metrics: &[EnergyMetric], sensors: &[SensorReading]) -> Vec<DetectionResult> {
        let input = DetectionInput::new(metrics, sensors);
        let mut candidates = Vec::new();

        for pass in &self.passes {
            match pass.analyze(&input).await {
                Ok(results) => {
                    debug!(pass = pass.name(), found = results.len(), "Detection pass finished");
                    candidates.extend(results.into_iter().map(|r| r.with_meta("pass", pass.name())));
                }
                Err(e) => {
                    warn!(pass = pass.name(), error = %e, "Detection pass failed, continuing");
                }
            }
        }

        merge(candidates)
    }
}

/// Drop later duplicates of `(type, severity, component)` and order by
/// severity, highest first. Stable, so detection order breaks ties.
pub fn merge(candidates: Vec<DetectionResult>) -> Vec<DetectionResult> {
    let mut seen = HashSet::new();
    let mut merged: Vec<DetectionResult> = candidates
        .into_iter()
        .filter(|c| {
            let (t, s, comp) = c.dedup_key();
            seen.insert((t, s, comp.map(str::to_string)))
        })
        .collect();
    merged.sort_by(|a, b| b.severity.rank().cmp(&a.severity.rank()));
    merged
}
