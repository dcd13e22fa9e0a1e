//! Read-only aggregates for the dashboard view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Alert, AlertSeverity, Anomaly, EnergyMetric};

/// Readings covered by totals and the chart
pub const DAY_WINDOW: usize = 24;
/// Anomaly records shown on the dashboard
pub const RECENT_ANOMALIES: usize = 10;
/// Tonnes of CO2 avoided per MWh generated
const CO2_PER_MWH: f64 = 0.4;

/// Sums over the day window, in MWh and tonnes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotals {
    pub consumption: f64,
    pub generation: f64,
    pub co2_saved: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub time: String,
    pub consumption: f64,
    pub generation: f64,
    pub storage: f64,
    pub grid_export: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridStatus {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub status: GridStatus,
    pub active_alerts: usize,
    pub critical_alerts: usize,
    pub ai_enabled: bool,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub current: Option<EnergyMetric>,
    pub alerts: Vec<Alert>,
    pub anomalies: Vec<Anomaly>,
    pub daily_totals: DailyTotals,
    pub chart_data: Vec<ChartPoint>,
    pub system_status: SystemStatus,
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn day_window(metrics: &[EnergyMetric]) -> &[EnergyMetric] {
    &metrics[metrics.len().saturating_sub(DAY_WINDOW)..]
}

/// Hourly kW readings summed to MWh over the last day window
pub fn daily_totals(metrics: &[EnergyMetric]) -> DailyTotals {
    let window = day_window(metrics);
    let consumption: f64 = window.iter().map(|m| m.consumption).sum();
    let generation: f64 = window.iter().map(|m| m.generation).sum();
    DailyTotals {
        consumption: round1(consumption / 1000.0),
        generation: round1(generation / 1000.0),
        co2_saved: round1(generation * CO2_PER_MWH / 1000.0),
    }
}

pub fn chart_data(metrics: &[EnergyMetric]) -> Vec<ChartPoint> {
    day_window(metrics)
        .iter()
        .map(|m| ChartPoint {
            time: m.timestamp.format("%H:%M").to_string(),
            consumption: round1(m.consumption),
            generation: round1(m.generation),
            storage: round1(m.storage),
            grid_export: round1(m.grid_export),
        })
        .collect()
}

/// `open_alerts` must hold only active or acknowledged alerts
pub fn system_status(open_alerts: &[Alert], ai_enabled: bool, last_update: Option<DateTime<Utc>>) -> SystemStatus {
    let critical_alerts = open_alerts
        .iter()
        .filter(|a| a.severity == AlertSeverity::Critical)
        .count();
    let status = if critical_alerts > 0 {
        GridStatus::Critical
    } else if !open_alerts.is_empty() {
        GridStatus::Warning
    } else {
        GridStatus::Normal
    };
    SystemStatus {
        status,
        active_alerts: open_alerts.len(),
        critical_alerts,
        ai_enabled,
        last_update,
    }
}

/// Assemble the summary from store snapshots (metrics oldest first)
pub fn build(metrics: &[EnergyMetric], open_alerts: Vec<Alert>, anomalies: Vec<Anomaly>, ai_enabled: bool) -> DashboardSummary {
    let current = metrics.last().copied();
    let system_status = system_status(&open_alerts, ai_enabled, current.map(|m| m.timestamp));
    DashboardSummary {
        current,
        daily_totals: daily_totals(metrics),
        chart_data: chart_data(metrics),
        alerts: open_alerts,
        anomalies,
        system_status,
    }
}
