use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{AlertSeverity, DetectionResult, EnergyMetric, MetricField, RuleAction};
use super::{Analyzer, DetectionInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Gt => lhs > rhs,
            Operator::Lt => lhs < rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Le => lhs <= rhs,
            Operator::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Operator::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Threshold,
    Pattern,
    Ai,
    Statistical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub metric: MetricField,
    pub operator: Operator,
    pub value: f64,
    /// Minutes the condition should persist. Not evaluated yet: conditions
    /// are checked against the latest reading only.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RuleCondition {
    pub fn holds(&self, metric: &EnergyMetric) -> bool {
        self.operator.holds(self.metric.read(metric), self.value)
    }
}

/// A configured detection rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub severity: AlertSeverity,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default = "default_actions")]
    pub actions: Vec<RuleAction>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AlertRule {
    /// All conditions hold. A rule without conditions never fires.
    pub fn matches(&self, latest: &EnergyMetric) -> bool {
        self.enabled
            && !self.conditions.is_empty()
            && self.conditions.iter().all(|c| c.holds(latest))
    }

    fn confidence(&self) -> f64 {
        self.conditions
            .iter()
            .filter_map(|c| c.confidence)
            .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.min(c))))
            .unwrap_or(0.8)
    }

    fn to_result(&self, latest: &EnergyMetric) -> Option<DetectionResult> {
        let primary = self.conditions.first()?;
        let clauses: Vec<String> = self
            .conditions
            .iter()
            .map(|c| {
                format!(
                    "{} {:.1} {} {:.1}",
                    c.metric,
                    c.metric.read(latest),
                    c.operator.symbol(),
                    c.value
                )
            })
            .collect();

        let mut result = DetectionResult::new(
            primary.metric.anomaly_kind().into(),
            self.severity,
            self.name.clone(),
            format!("Rule '{}' matched: {}", self.name, clauses.join(", ")),
            self.confidence(),
        )
        .with_component(primary.metric.component())
        .with_meta("rule_id", self.id.clone())
        .with_meta("rule_type", serde_json::to_value(self.kind).unwrap_or_default());
        result.actions = self.actions.iter().copied().collect::<SmallVec<_>>();
        Some(result)
    }
}

fn default_actions() -> Vec<RuleAction> {
    vec![RuleAction::CreateAlert, RuleAction::SendNotification]
}

fn default_enabled() -> bool { true }

/// Evaluates configured rules against the latest reading
pub struct RuleAnalyzer {
    rules: Vec<AlertRule>,
}

impl RuleAnalyzer {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }
}

#[async_trait]
impl Analyzer for RuleAnalyzer {
    fn name(&self) -> &str { "rules" }

    async fn analyze(&self, input: &DetectionInput<'_>) -> Result<Vec<DetectionResult>> {
        let Some(latest) = input.latest() else {
            return Ok(Vec::new());
        };

        Ok(self
            .rules
            .iter()
            .filter(|rule| rule.matches(latest))
            .filter_map(|rule| {
                tracing::debug!(rule = %rule.id, "Alert rule matched");
                rule.to_result(latest)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertType;
    use chrono::Utc;

    fn reading() -> EnergyMetric {
        EnergyMetric {
            timestamp: Utc::now(),
            consumption: 260.0,
            generation: 40.0,
            storage: 15.0,
            grid_export: 0.0,
            solar_efficiency: 88.0,
            battery_health: 96.0,
        }
    }

    fn cond(metric: MetricField, operator: Operator, value: f64) -> RuleCondition {
        RuleCondition { metric, operator, value, duration: None, confidence: None }
    }

    fn rule(id: &str, conditions: Vec<RuleCondition>) -> AlertRule {
        AlertRule {
            id: id.into(),
            name: format!("rule {}", id),
            kind: RuleKind::Threshold,
            severity: AlertSeverity::Warning,
            conditions,
            actions: default_actions(),
            enabled: true,
        }
    }

    #[test]
    fn operators_compare_as_expected() {
        assert!(Operator::Gt.holds(2.0, 1.0));
        assert!(!Operator::Gt.holds(1.0, 1.0));
        assert!(Operator::Ge.holds(1.0, 1.0));
        assert!(Operator::Lt.holds(0.5, 1.0));
        assert!(Operator::Le.holds(1.0, 1.0));
        assert!(Operator::Eq.holds(3.0, 3.0));
        assert!(Operator::Ne.holds(3.0, 3.5));
        assert!(!Operator::Ne.holds(3.0, 3.0));
    }

    #[test]
    fn conditions_are_and_combined() {
        let both = rule(
            "both",
            vec![
                cond(MetricField::Consumption, Operator::Gt, 250.0),
                cond(MetricField::Storage, Operator::Lt, 20.0),
            ],
        );
        assert!(both.matches(&reading()));

        let one_fails = rule(
            "one-fails",
            vec![
                cond(MetricField::Consumption, Operator::Gt, 250.0),
                cond(MetricField::Storage, Operator::Lt, 10.0),
            ],
        );
        assert!(!one_fails.matches(&reading()));
    }

    #[test]
    fn empty_or_disabled_rules_never_fire() {
        assert!(!rule("empty", vec![]).matches(&reading()));
        let mut disabled = rule("off", vec![cond(MetricField::Consumption, Operator::Gt, 0.0)]);
        disabled.enabled = false;
        assert!(!disabled.matches(&reading()));
    }

    #[tokio::test]
    async fn matched_rule_carries_provenance_and_actions() {
        let mut r = rule("low-storage", vec![cond(MetricField::Storage, Operator::Lt, 20.0)]);
        r.actions = vec![RuleAction::Log];
        let analyzer = RuleAnalyzer::new(vec![r]);
        let metrics = [reading()];
        let results = analyzer.analyze(&DetectionInput::new(&metrics, &[])).await.unwrap();

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.alert_type, AlertType::Storage);
        assert_eq!(result.affected_component.as_deref(), Some("battery_system"));
        assert_eq!(result.metadata["rule_id"], "low-storage");
        assert_eq!(result.metadata["rule_type"], "threshold");
        assert!(result.wants(RuleAction::Log));
        assert!(!result.wants(RuleAction::CreateAlert));
    }

    #[test]
    fn lowest_condition_confidence_wins() {
        let mut a = cond(MetricField::Consumption, Operator::Gt, 1.0);
        a.confidence = Some(0.9);
        let mut b = cond(MetricField::Storage, Operator::Lt, 50.0);
        b.confidence = Some(0.7);
        assert_eq!(rule("c", vec![a, b]).confidence(), 0.7);
        assert_eq!(rule("d", vec![cond(MetricField::Storage, Operator::Lt, 50.0)]).confidence(), 0.8);
    }
}
