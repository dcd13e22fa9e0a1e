pub mod ai;
pub mod pattern;
pub mod rules;
pub mod threshold;
pub mod trend;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{DetectionResult, EnergyMetric, SensorReading};

/// Everything a detection pass may look at
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    /// Trailing window, oldest first
    pub metrics: &'a [EnergyMetric],
    pub sensors: &'a [SensorReading],
}

impl<'a> DetectionInput<'a> {
    pub fn new(metrics: &'a [EnergyMetric], sensors: &'a [SensorReading]) -> Self {
        Self { metrics, sensors }
    }

    pub fn latest(&self) -> Option<&'a EnergyMetric> {
        self.metrics.last()
    }
}

/// Trait for detection passes.
///
/// Each pass examines the metric window and produces candidate alerts. A pass
/// returning `Err` is skipped by the engine; the other passes still run.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Human-readable name for this pass
    fn name(&self) -> &str;

    async fn analyze(&self, input: &DetectionInput<'_>) -> Result<Vec<DetectionResult>>;
}

/// Population mean and standard deviation
pub(crate) fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
