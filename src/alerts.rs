//! In-memory alert store and lifecycle.
//!
//! All state lives behind one mutex and every public operation completes
//! under a single acquisition, so lifecycle transitions and batch inserts
//! never interleave.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::AlertError;
use crate::types::{
    Alert, AlertSeverity, AlertSource, AlertStatus, AlertType, Anomaly, AnomalyKind, AnomalyResult,
    DetectionResult, DetectorSeverity,
};

const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    View,
    Acknowledge,
    Resolve,
    Dismiss,
    Escalate,
    AddNotes,
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertInteraction {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub user_id: String,
    pub action: InteractionAction,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Fields needed to open an alert
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub title: String,
    pub description: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub source: AlertSource,
    pub device_id: Option<String>,
    pub location: Option<String>,
    pub metadata: Map<String, Value>,
    pub anomaly_id: Option<Uuid>,
}

impl NewAlert {
    pub fn from_detection(result: &DetectionResult, source: AlertSource) -> Self {
        let mut metadata = result.metadata.clone();
        metadata.insert("confidence".into(), result.confidence.into());
        if let Some(component) = &result.affected_component {
            metadata.insert("affected_component".into(), component.clone().into());
        }
        Self {
            title: result.title.clone(),
            description: result.description.clone(),
            alert_type: result.alert_type,
            severity: result.severity,
            source,
            device_id: result.device_id.clone(),
            location: result.location.clone(),
            metadata,
            anomaly_id: None,
        }
    }
}

/// Operator-submitted alert, validated before anything is stored
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAlertRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    pub severity: Option<String>,
    pub device_id: Option<String>,
    pub location: Option<String>,
    pub created_by: Option<String>,
}

impl ManualAlertRequest {
    /// Check every field, reporting all problems at once
    pub fn validate(self) -> Result<NewAlert, AlertError> {
        let mut problems = Vec::new();

        let title = self.title.map(|t| t.trim().to_string()).unwrap_or_default();
        if title.is_empty() {
            problems.push("title is required".to_string());
        } else if title.chars().count() > MAX_TITLE_LEN {
            problems.push(format!("title must be at most {} characters", MAX_TITLE_LEN));
        }

        let description = self.description.map(|d| d.trim().to_string()).unwrap_or_default();
        if description.is_empty() {
            problems.push("description is required".to_string());
        } else if description.chars().count() > MAX_DESCRIPTION_LEN {
            problems.push(format!("description must be at most {} characters", MAX_DESCRIPTION_LEN));
        }

        let alert_type = match self.alert_type.as_deref().map(str::parse::<AlertType>) {
            Some(Ok(t)) => Some(t),
            Some(Err(e)) => {
                problems.push(e);
                None
            }
            None => {
                problems.push("type is required".to_string());
                None
            }
        };

        let severity = match self.severity.as_deref().map(str::parse::<AlertSeverity>) {
            Some(Ok(s)) => Some(s),
            Some(Err(e)) => {
                problems.push(e);
                None
            }
            None => {
                problems.push("severity is required".to_string());
                None
            }
        };

        let created_by = self.created_by.map(|c| c.trim().to_string()).unwrap_or_default();
        if created_by.is_empty() {
            problems.push("createdBy is required".to_string());
        }

        match (alert_type, severity) {
            (Some(alert_type), Some(severity)) if problems.is_empty() => {
                let mut metadata = Map::new();
                metadata.insert("created_by".into(), created_by.into());
                Ok(NewAlert {
                    title,
                    description,
                    alert_type,
                    severity,
                    source: AlertSource::Manual,
                    device_id: self.device_id.filter(|d| !d.trim().is_empty()),
                    location: self.location.filter(|l| !l.trim().is_empty()),
                    metadata,
                    anomaly_id: None,
                })
            }
            _ => Err(AlertError::Validation(problems)),
        }
    }
}

/// Listing filter for `list`
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<AlertType>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    fn accepts(&self, alert: &Alert) -> bool {
        self.status.map_or(true, |s| alert.status == s)
            && self.severity.map_or(true, |s| alert.severity == s)
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub dismissed: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub mean_minutes_to_acknowledge: Option<f64>,
    pub mean_minutes_to_resolve: Option<f64>,
}

#[derive(Clone, Default)]
pub struct AlertStore {
    inner: Arc<Mutex<AlertStoreInner>>,
}

#[derive(Default)]
struct AlertStoreInner {
    /// Creation order
    alerts: Vec<Alert>,
    index: HashMap<Uuid, usize>,
    interactions: Vec<AlertInteraction>,
    anomalies: Vec<Anomaly>,
}

impl AlertStoreInner {
    fn alert_mut(&mut self, id: Uuid) -> Result<&mut Alert, AlertError> {
        let idx = *self.index.get(&id).ok_or(AlertError::NotFound(id))?;
        Ok(&mut self.alerts[idx])
    }

    fn record(&mut self, alert_id: Uuid, user_id: &str, action: InteractionAction, notes: Option<String>) -> AlertInteraction {
        let interaction = AlertInteraction {
            id: Uuid::new_v4(),
            alert_id,
            user_id: user_id.to_string(),
            action,
            timestamp: Utc::now(),
            notes,
            metadata: Map::new(),
        };
        self.interactions.push(interaction.clone());
        interaction
    }
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AlertStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new alert in the `active` state
    pub fn create(&self, new: NewAlert) -> Alert {
        let alert = Alert {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            alert_type: new.alert_type,
            severity: new.severity,
            status: AlertStatus::Active,
            source: new.source,
            device_id: new.device_id,
            location: new.location,
            timestamp: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            metadata: new.metadata,
            anomaly_id: new.anomaly_id,
        };

        let mut inner = self.lock();
        let idx = inner.alerts.len();
        inner.index.insert(alert.id, idx);
        inner.alerts.push(alert.clone());
        drop(inner);

        info!(
            alert_id = %alert.id,
            severity = %alert.severity,
            alert_type = %alert.alert_type,
            source = %alert.source,
            "Alert created"
        );
        alert
    }

    pub fn create_manual(&self, request: ManualAlertRequest) -> Result<Alert, AlertError> {
        let new = request.validate()?;
        Ok(self.create(new))
    }

    pub fn acknowledge(&self, id: Uuid, user_id: &str, notes: Option<String>) -> Result<Alert, AlertError> {
        self.transition(id, user_id, notes, AlertStatus::Acknowledged)
    }

    pub fn resolve(&self, id: Uuid, user_id: &str, notes: Option<String>) -> Result<Alert, AlertError> {
        self.transition(id, user_id, notes, AlertStatus::Resolved)
    }

    pub fn dismiss(&self, id: Uuid, user_id: &str, notes: Option<String>) -> Result<Alert, AlertError> {
        self.transition(id, user_id, notes, AlertStatus::Dismissed)
    }

    fn transition(&self, id: Uuid, user_id: &str, notes: Option<String>, to: AlertStatus) -> Result<Alert, AlertError> {
        let mut inner = self.lock();
        let alert = inner.alert_mut(id)?;
        let from = alert.status;
        if !from.can_transition_to(to) {
            return Err(AlertError::InvalidTransition { id, from, to });
        }

        let now = Utc::now();
        let action = match to {
            AlertStatus::Acknowledged => {
                alert.acknowledged_at = Some(now);
                alert.acknowledged_by = Some(user_id.to_string());
                InteractionAction::Acknowledge
            }
            AlertStatus::Resolved => {
                alert.resolved_at = Some(now);
                alert.resolved_by = Some(user_id.to_string());
                alert.resolution_notes = notes.clone();
                InteractionAction::Resolve
            }
            AlertStatus::Dismissed => InteractionAction::Dismiss,
            AlertStatus::Active => return Err(AlertError::InvalidTransition { id, from, to }),
        };
        alert.status = to;
        let updated = alert.clone();

        if let Some(anomaly_id) = updated.anomaly_id.filter(|_| !to.is_open()) {
            if let Some(anomaly) = inner.anomalies.iter_mut().find(|a| a.id == anomaly_id) {
                anomaly.resolved = true;
            }
        }
        inner.record(id, user_id, action, notes);
        drop(inner);

        info!(alert_id = %id, from = %from, to = %to, user = user_id, "Alert status changed");
        Ok(updated)
    }

    /// Attach free-form notes without changing status
    pub fn add_notes(&self, id: Uuid, user_id: &str, notes: String) -> Result<AlertInteraction, AlertError> {
        let mut inner = self.lock();
        inner.alert_mut(id)?;
        Ok(inner.record(id, user_id, InteractionAction::AddNotes, Some(notes)))
    }

    /// Fetch an alert and log that `user_id` looked at it
    pub fn view(&self, id: Uuid, user_id: &str) -> Result<Alert, AlertError> {
        let mut inner = self.lock();
        let alert = inner.alert_mut(id)?.clone();
        inner.record(id, user_id, InteractionAction::View, None);
        Ok(alert)
    }

    pub fn get(&self, id: Uuid) -> Option<Alert> {
        let inner = self.lock();
        inner.index.get(&id).map(|&idx| inner.alerts[idx].clone())
    }

    /// Matching alerts, newest first
    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        let inner = self.lock();
        let mut alerts: Vec<Alert> = inner
            .alerts
            .iter()
            .rev()
            .filter(|a| filter.accepts(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        alerts
    }

    /// Active and acknowledged alerts, newest first
    pub fn active(&self) -> Vec<Alert> {
        let inner = self.lock();
        let mut alerts: Vec<Alert> = inner
            .alerts
            .iter()
            .rev()
            .filter(|a| a.status.is_open())
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    pub fn all(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    /// Audit trail for one alert, oldest first
    pub fn interactions(&self, id: Uuid) -> Vec<AlertInteraction> {
        self.lock()
            .interactions
            .iter()
            .filter(|i| i.alert_id == id)
            .cloned()
            .collect()
    }

    /// Persist an anomalous detector result
    pub fn record_anomaly(&self, result: &AnomalyResult) -> Anomaly {
        let anomaly = Anomaly {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: result.kind.unwrap_or(AnomalyKind::DeviceFault),
            severity: result.severity.unwrap_or(DetectorSeverity::Medium),
            score: result.score,
            description: result.description.clone(),
            affected_component: result.affected_component.clone(),
            resolved: false,
        };
        self.lock().anomalies.push(anomaly.clone());
        anomaly
    }

    /// Most recent anomalies, newest first
    pub fn anomalies(&self, limit: usize) -> Vec<Anomaly> {
        self.lock().anomalies.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> AlertStats {
        let inner = self.lock();
        let mut stats = AlertStats {
            total: inner.alerts.len(),
            active: 0,
            acknowledged: 0,
            resolved: 0,
            dismissed: 0,
            by_severity: BTreeMap::new(),
            by_type: BTreeMap::new(),
            mean_minutes_to_acknowledge: None,
            mean_minutes_to_resolve: None,
        };

        let mut ack_minutes = Vec::new();
        let mut resolve_minutes = Vec::new();
        for alert in &inner.alerts {
            match alert.status {
                AlertStatus::Active => stats.active += 1,
                AlertStatus::Acknowledged => stats.acknowledged += 1,
                AlertStatus::Resolved => stats.resolved += 1,
                AlertStatus::Dismissed => stats.dismissed += 1,
            }
            *stats.by_severity.entry(alert.severity.to_string()).or_default() += 1;
            *stats.by_type.entry(alert.alert_type.to_string()).or_default() += 1;
            if let Some(at) = alert.acknowledged_at {
                ack_minutes.push((at - alert.timestamp).num_milliseconds() as f64 / 60_000.0);
            }
            if let Some(at) = alert.resolved_at {
                resolve_minutes.push((at - alert.timestamp).num_milliseconds() as f64 / 60_000.0);
            }
        }

        let mean = |v: &[f64]| (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64);
        stats.mean_minutes_to_acknowledge = mean(&ack_minutes);
        stats.mean_minutes_to_resolve = mean(&resolve_minutes);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(severity: AlertSeverity) -> NewAlert {
        NewAlert {
            title: "High energy consumption".into(),
            description: "consumption is 375.0 kW".into(),
            alert_type: AlertType::Consumption,
            severity,
            source: AlertSource::System,
            device_id: None,
            location: None,
            metadata: Map::new(),
            anomaly_id: None,
        }
    }

    fn manual() -> ManualAlertRequest {
        ManualAlertRequest {
            title: Some("Inverter noise".into()),
            description: Some("Loud buzzing from inverter 2".into()),
            alert_type: Some("device_fault".into()),
            severity: Some("warning".into()),
            device_id: Some("inv-2".into()),
            location: Some("  ".into()),
            created_by: Some("alice".into()),
        }
    }

    #[test]
    fn new_alerts_start_active() {
        let store = AlertStore::new();
        let alert = store.create(sample(AlertSeverity::Critical));
        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(store.get(alert.id), Some(alert));
    }

    #[test]
    fn acknowledge_then_resolve_records_two_interactions() {
        let store = AlertStore::new();
        let alert = store.create(sample(AlertSeverity::Critical));

        store.acknowledge(alert.id, "alice", None).unwrap();
        let resolved = store.resolve(alert.id, "alice", Some("breaker reset".into())).unwrap();

        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));
        assert_eq!(resolved.acknowledged_by.as_deref(), Some("alice"));
        assert_eq!(resolved.resolution_notes.as_deref(), Some("breaker reset"));

        let actions: Vec<_> = store.interactions(alert.id).iter().map(|i| i.action).collect();
        assert_eq!(actions, vec![InteractionAction::Acknowledge, InteractionAction::Resolve]);
    }

    #[test]
    fn resolving_twice_fails_the_second_time() {
        let store = AlertStore::new();
        let alert = store.create(sample(AlertSeverity::Warning));
        assert!(store.resolve(alert.id, "bob", None).is_ok());
        let err = store.resolve(alert.id, "bob", None).unwrap_err();
        assert_eq!(
            err,
            AlertError::InvalidTransition {
                id: alert.id,
                from: AlertStatus::Resolved,
                to: AlertStatus::Resolved
            }
        );
        assert_eq!(store.interactions(alert.id).len(), 1);
    }

    #[test]
    fn terminal_states_reject_everything() {
        let store = AlertStore::new();
        let resolved = store.create(sample(AlertSeverity::Info));
        store.resolve(resolved.id, "bob", None).unwrap();
        assert!(store.dismiss(resolved.id, "bob", None).is_err());
        assert!(store.acknowledge(resolved.id, "bob", None).is_err());

        let dismissed = store.create(sample(AlertSeverity::Info));
        store.dismiss(dismissed.id, "bob", None).unwrap();
        assert!(store.resolve(dismissed.id, "bob", None).is_err());
        assert!(store.acknowledge(dismissed.id, "bob", None).is_err());
    }

    #[test]
    fn acknowledge_only_from_active() {
        let store = AlertStore::new();
        let alert = store.create(sample(AlertSeverity::Info));
        store.acknowledge(alert.id, "carol", None).unwrap();
        assert!(matches!(
            store.acknowledge(alert.id, "carol", None),
            Err(AlertError::InvalidTransition { from: AlertStatus::Acknowledged, .. })
        ));
        assert!(store.dismiss(alert.id, "carol", None).is_ok());
    }

    #[test]
    fn unknown_alert_is_not_found() {
        let store = AlertStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.acknowledge(id, "x", None), Err(AlertError::NotFound(id)));
        assert!(store.add_notes(id, "x", "n".into()).is_err());
    }

    #[test]
    fn notes_do_not_change_status() {
        let store = AlertStore::new();
        let alert = store.create(sample(AlertSeverity::Warning));
        store.resolve(alert.id, "dave", None).unwrap();
        let note = store.add_notes(alert.id, "dave", "root cause: HVAC".into()).unwrap();
        assert_eq!(note.action, InteractionAction::AddNotes);
        assert_eq!(store.get(alert.id).map(|a| a.status), Some(AlertStatus::Resolved));
    }

    #[test]
    fn active_lists_open_alerts_newest_first() {
        let store = AlertStore::new();
        let first = store.create(sample(AlertSeverity::Info));
        let second = store.create(sample(AlertSeverity::Warning));
        let third = store.create(sample(AlertSeverity::Critical));
        store.acknowledge(second.id, "eve", None).unwrap();
        store.dismiss(third.id, "eve", None).unwrap();

        let active: Vec<Uuid> = store.active().iter().map(|a| a.id).collect();
        assert_eq!(active, vec![second.id, first.id]);
    }

    #[test]
    fn list_filters_and_limits() {
        let store = AlertStore::new();
        store.create(sample(AlertSeverity::Info));
        store.create(sample(AlertSeverity::Critical));
        store.create(sample(AlertSeverity::Critical));

        let critical = store.list(&AlertFilter {
            severity: Some(AlertSeverity::Critical),
            ..AlertFilter::default()
        });
        assert_eq!(critical.len(), 2);

        let limited = store.list(&AlertFilter { limit: Some(1), ..AlertFilter::default() });
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn manual_request_is_validated() {
        let alert = manual().validate().unwrap();
        assert_eq!(alert.source, AlertSource::Manual);
        assert_eq!(alert.alert_type, AlertType::DeviceFault);
        assert_eq!(alert.device_id.as_deref(), Some("inv-2"));
        assert_eq!(alert.location, None);
        assert_eq!(alert.metadata["created_by"], "alice");
    }

    #[test]
    fn invalid_manual_request_reports_every_problem() {
        let store = AlertStore::new();
        let request = ManualAlertRequest {
            title: Some("   ".into()),
            severity: Some("urgent".into()),
            alert_type: Some("consumption".into()),
            ..ManualAlertRequest::default()
        };
        match store.create_manual(request) {
            Err(AlertError::Validation(problems)) => {
                assert_eq!(problems.len(), 4, "{:?}", problems);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(store.all().is_empty());
    }

    #[test]
    fn overlong_title_is_rejected() {
        let request = ManualAlertRequest { title: Some("x".repeat(201)), ..manual() };
        assert!(matches!(request.validate(), Err(AlertError::Validation(_))));
    }

    #[test]
    fn closing_an_alert_resolves_its_anomaly() {
        let store = AlertStore::new();
        let anomaly = store.record_anomaly(&AnomalyResult {
            is_anomaly: true,
            score: 0.95,
            kind: Some(AnomalyKind::Consumption),
            severity: Some(DetectorSeverity::Critical),
            description: "spike".into(),
            affected_component: Some("grid_load".into()),
            detector: None,
        });
        let alert = store.create(NewAlert { anomaly_id: Some(anomaly.id), ..sample(AlertSeverity::Critical) });

        store.acknowledge(alert.id, "f", None).unwrap();
        assert!(!store.anomalies(10)[0].resolved);
        store.resolve(alert.id, "f", None).unwrap();
        assert!(store.anomalies(10)[0].resolved);
    }

    #[test]
    fn stats_count_by_status_and_severity() {
        let store = AlertStore::new();
        let a = store.create(sample(AlertSeverity::Critical));
        let b = store.create(sample(AlertSeverity::Warning));
        store.create(sample(AlertSeverity::Warning));
        store.acknowledge(a.id, "g", None).unwrap();
        store.resolve(a.id, "g", None).unwrap();
        store.dismiss(b.id, "g", None).unwrap();

        let stats = store.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.dismissed, 1);
        assert_eq!(stats.by_severity["warning"], 2);
        assert_eq!(stats.by_type["consumption"], 3);
        assert!(stats.mean_minutes_to_acknowledge.is_some());
        assert!(stats.mean_minutes_to_resolve.is_some());
    }
}
