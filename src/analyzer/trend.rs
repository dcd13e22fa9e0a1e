use anyhow::Result;
use async_trait::async_trait;

use crate::config::TrendConfig;
use crate::types::{AlertSeverity, AlertType, DetectionResult, EnergyMetric, MetricField};
use super::{Analyzer, DetectionInput};

/// Slow-drift detection: compares the first and last reading of the window.
pub struct TrendAnalyzer {
    consumption_rise_rate: f64,
    generation_drop_rate: f64,
    min_samples: usize,
}

/// Direction and size of change across a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub first: f64,
    pub last: f64,
    pub rate: f64,
    /// Mean change per reading
    pub step: f64,
}

impl TrendAnalyzer {
    pub fn new(config: &TrendConfig) -> Self {
        Self {
            consumption_rise_rate: config.consumption_rise_rate,
            generation_drop_rate: config.generation_drop_rate,
            min_samples: (config.min_samples as usize).max(2),
        }
    }

    /// Trend of one field, or `None` when the window is too short or starts at zero
    pub fn trend(&self, metrics: &[EnergyMetric], field: MetricField) -> Option<Trend> {
        if metrics.len() < self.min_samples {
            return None;
        }
        let first = field.read(metrics.first()?);
        let last = field.read(metrics.last()?);
        if first.abs() < 1e-9 {
            return None;
        }

        Some(Trend {
            first,
            last,
            rate: (last - first) / first,
            step: (last - first) / (metrics.len() - 1) as f64,
        })
    }

    fn result(field: MetricField, alert_type: AlertType, title: &str, trend: Trend, samples: usize) -> DetectionResult {
        DetectionResult::new(
            alert_type,
            AlertSeverity::Warning,
            title,
            format!(
                "{} moved from {:.1} to {:.1} {} ({:+.1}%) over {} readings",
                field,
                trend.first,
                trend.last,
                field.unit(),
                trend.rate * 100.0,
                samples
            ),
            (0.5 + trend.rate.abs()).min(0.9),
        )
        .with_component(field.component())
        .with_meta("metric", field.to_string())
        .with_meta("first", trend.first)
        .with_meta("last", trend.last)
        .with_meta("rate", trend.rate)
        .with_meta("step", trend.step)
        .with_meta("samples", samples as u64)
    }
}

#[async_trait]
impl Analyzer for TrendAnalyzer {
    fn name(&self) -> &str { "trend" }

    async fn analyze(&self, input: &DetectionInput<'_>) -> Result<Vec<DetectionResult>> {
        let metrics = input.metrics;
        let mut results = Vec::new();

        if let Some(t) = self.trend(metrics, MetricField::Consumption) {
            if t.rate > self.consumption_rise_rate {
                results.push(Self::result(
                    MetricField::Consumption,
                    AlertType::Consumption,
                    "Rising consumption trend",
                    t,
                    metrics.len(),
                ));
            }
        }

        if let Some(t) = self.trend(metrics, MetricField::Generation) {
            if t.rate < self.generation_drop_rate {
                results.push(Self::result(
                    MetricField::Generation,
                    AlertType::Generation,
                    "Declining generation trend",
                    t,
                    metrics.len(),
                ));
            }
        }

        Ok(results)
    }
}
