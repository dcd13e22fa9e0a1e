use std::f64::consts::PI;

use chrono::{DateTime, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;
use crate::types::EnergyMetric;

const STORAGE_MIN: f64 = 10.0;
const STORAGE_MAX: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    #[default]
    Normal,
    Anomaly,
}

/// Perturbation applied on top of a normal sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectedAnomaly {
    ConsumptionSpike,
    GenerationDrop,
    StorageDrain,
}

/// Synthetic reading source following a diurnal load and solar curve.
///
/// Battery charge, panel efficiency and battery health carry state between
/// samples; anomalies never feed back into that state.
pub struct MetricGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    storage: f64,
    efficiency: f64,
    battery_health: f64,
}

impl MetricGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config: config.clone(),
            rng,
            storage: 60.0,
            efficiency: 90.0,
            battery_health: 97.0,
        }
    }

    /// Produce one reading for `at`, optionally perturbed
    pub fn generate(&mut self, at: DateTime<Utc>, anomaly: Option<InjectedAnomaly>) -> EnergyMetric {
        let normal = self.sample_normal(at);
        match anomaly {
            Some(kind) => inject(normal, kind),
            None => normal,
        }
    }

    /// Hourly readings ending at `end`, oldest first
    pub fn history(&mut self, end: DateTime<Utc>, hours: usize) -> Vec<EnergyMetric> {
        (0..hours)
            .rev()
            .map(|back| self.sample_normal(end - Duration::hours(back as i64)))
            .collect()
    }

    fn sample_normal(&mut self, at: DateTime<Utc>) -> EnergyMetric {
        let hour = at.hour() as f64 + at.minute() as f64 / 60.0;
        let noise = self.config.noise.abs();

        let load_noise = self.jitter(noise);
        let consumption = (self.config.base_consumption_kw
            * (0.7 + 0.3 * ((hour - 8.0) * PI / 8.0).sin() + load_noise))
            .max(0.0);

        let sun = ((hour - 6.0) * PI / 12.0).sin().max(0.0);
        let solar_noise = if noise > 0.0 { self.rng.gen_range(0.0..=2.0 * noise) } else { 0.0 };
        let generation = self.config.base_generation_kw * sun * (0.8 + solar_noise);

        let net = generation - consumption;
        self.storage = (self.storage + net / self.config.battery_capacity_kwh * 100.0)
            .clamp(STORAGE_MIN, STORAGE_MAX);

        self.efficiency = (self.efficiency + self.jitter(noise * 10.0)).clamp(85.0, 95.0);
        self.battery_health = (self.battery_health + self.jitter(noise * 2.0)).clamp(95.0, 99.0);

        EnergyMetric {
            timestamp: at,
            consumption,
            generation,
            storage: self.storage,
            grid_export: (generation - consumption).max(0.0),
            solar_efficiency: self.efficiency,
            battery_health: self.battery_health,
        }
    }

    fn jitter(&mut self, amplitude: f64) -> f64 {
        if amplitude > 0.0 {
            self.rng.gen_range(-amplitude..=amplitude)
        } else {
            0.0
        }
    }
}

/// Apply an anomaly to an otherwise normal reading
pub fn inject(mut metric: EnergyMetric, kind: InjectedAnomaly) -> EnergyMetric {
    match kind {
        InjectedAnomaly::ConsumptionSpike => {
            metric.consumption *= 2.5;
        }
        InjectedAnomaly::GenerationDrop => {
            metric.generation *= 0.3;
            metric.solar_efficiency = 45.0;
        }
        InjectedAnomaly::StorageDrain => {
            metric.storage = (metric.storage * 0.2).max(5.0);
        }
    }
    metric.grid_export = (metric.generation - metric.consumption).max(0.0);
    metric
}
