pub mod broadcast;
pub mod webhook;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::Sender;
use uuid::Uuid;

use crate::config::AlertingConfig;
use crate::types::{Alert, AlertSeverity};
use self::broadcast::{AlertEvent, DashboardChannel, WebsocketChannel};
use self::webhook::RelayChannel;

/// Recipient id recorded for channels that fan out to every viewer
pub const BROADCAST: &str = "broadcast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Dashboard,
    Websocket,
    Email,
    Sms,
    Push,
}

impl ChannelKind {
    /// Delivered once to all viewers rather than per recipient
    pub fn is_broadcast(self) -> bool {
        matches!(self, ChannelKind::Dashboard | ChannelKind::Websocket)
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelKind::Dashboard => "dashboard",
            ChannelKind::Websocket => "websocket",
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Push => "push",
        };
        write!(f, "{}", s)
    }
}

/// Channels every alert of the given severity goes out on
pub fn channels_for(severity: AlertSeverity) -> BTreeSet<ChannelKind> {
    use ChannelKind::*;
    match severity {
        AlertSeverity::Critical => [Dashboard, Websocket, Email, Sms, Push].into(),
        AlertSeverity::Warning => [Dashboard, Websocket, Email, Push].into(),
        AlertSeverity::Info => [Dashboard, Websocket, Push].into(),
    }
}

/// A person who may be notified, with per-channel opt-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub channels: Vec<ChannelKind>,
}

impl Recipient {
    pub fn wants(&self, kind: ChannelKind) -> bool {
        self.channels.contains(&kind)
    }

    pub fn address(&self, kind: ChannelKind) -> Option<&str> {
        match kind {
            ChannelKind::Email => self.email.as_deref(),
            ChannelKind::Sms => self.phone.as_deref(),
            ChannelKind::Push => self.push_token.as_deref(),
            ChannelKind::Dashboard | ChannelKind::Websocket => None,
        }
    }
}

/// Who a single send is addressed to
#[derive(Debug, Clone)]
pub struct Target {
    pub recipient: String,
    pub address: Option<String>,
}

/// Trait for alert delivery channels
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Channel name
    fn name(&self) -> &str;

    /// Deliver one alert to one target
    async fn send(&self, alert: &Alert, target: &Target) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// Audit record of one delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub channel: ChannelKind,
    pub recipient: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fans an alert out to every selected channel and keeps a bounded audit log
pub struct NotificationDispatcher {
    channels: BTreeMap<ChannelKind, Arc<dyn AlertChannel>>,
    recipients: Vec<Recipient>,
    send_timeout: Duration,
    log: Mutex<VecDeque<NotificationRecord>>,
    log_capacity: usize,
}

impl NotificationDispatcher {
    /// Standard channel set: dashboard log, websocket feed, and relayed
    /// email/sms/push
    pub fn new(config: &AlertingConfig, log_capacity: usize, events: Sender<AlertEvent>) -> Result<Self> {
        let mut channels: Vec<Arc<dyn AlertChannel>> = vec![
            Arc::new(DashboardChannel),
            Arc::new(WebsocketChannel::new(events)),
        ];
        for kind in [ChannelKind::Email, ChannelKind::Sms, ChannelKind::Push] {
            channels.push(Arc::new(RelayChannel::new(kind, config.relay.as_ref())?));
        }

        tracing::info!(
            channels = channels.len(),
            recipients = config.recipients.len(),
            relay = config.relay.is_some(),
            "Initialized notification channels"
        );

        Ok(Self::with_channels(
            channels,
            config.recipients.clone(),
            Duration::from_secs(config.send_timeout_secs),
            log_capacity,
        ))
    }

    pub fn with_channels(
        channels: Vec<Arc<dyn AlertChannel>>,
        recipients: Vec<Recipient>,
        send_timeout: Duration,
        log_capacity: usize,
    ) -> Self {
        Self {
            channels: channels.into_iter().map(|c| (c.kind(), c)).collect(),
            recipients,
            send_timeout,
            log: Mutex::new(VecDeque::with_capacity(log_capacity.min(1024))),
            log_capacity: log_capacity.max(1),
        }
    }

    fn targets(&self, kind: ChannelKind) -> Vec<Target> {
        if kind.is_broadcast() {
            return vec![Target { recipient: BROADCAST.to_string(), address: None }];
        }
        self.recipients
            .iter()
            .filter(|r| r.wants(kind))
            .map(|r| Target {
                recipient: r.id.clone(),
                address: r.address(kind).map(str::to_string),
            })
            .collect()
    }

    /// Send `alert` on its severity's channels plus any `requested` extras.
    /// Every attempt runs independently; the returned records cover all of them.
    pub async fn dispatch(&self, alert: &Alert, requested: &[ChannelKind]) -> Vec<NotificationRecord> {
        let mut kinds = channels_for(alert.severity);
        kinds.extend(requested.iter().copied());

        let mut sends = Vec::new();
        for kind in kinds {
            let Some(channel) = self.channels.get(&kind) else {
                tracing::warn!(channel = %kind, "No channel registered, skipping");
                continue;
            };
            for target in self.targets(kind) {
                sends.push(self.attempt(channel.clone(), alert, target));
            }
        }

        let records = join_all(sends).await;

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        for record in &records {
            if log.len() >= self.log_capacity {
                log.pop_front();
            }
            log.push_back(record.clone());
        }
        drop(log);

        let failed = records.iter().filter(|r| r.status == DeliveryStatus::Failed).count();
        tracing::debug!(alert_id = %alert.id, attempts = records.len(), failed, "Notifications dispatched");
        records
    }

    async fn attempt(&self, channel: Arc<dyn AlertChannel>, alert: &Alert, target: Target) -> NotificationRecord {
        let kind = channel.kind();
        let outcome = if !kind.is_broadcast() && target.address.is_none() {
            Err(format!("recipient has no {} address", kind))
        } else {
            match tokio::time::timeout(self.send_timeout, channel.send(alert, &target)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {:?}", self.send_timeout)),
            }
        };

        if let Err(ref e) = outcome {
            tracing::error!(
                channel = channel.name(),
                recipient = %target.recipient,
                alert_id = %alert.id,
                error = %e,
                "Failed to send notification"
            );
        }

        NotificationRecord {
            id: Uuid::new_v4(),
            alert_id: alert.id,
            channel: kind,
            recipient: target.recipient,
            status: if outcome.is_ok() { DeliveryStatus::Sent } else { DeliveryStatus::Failed },
            error: outcome.err(),
            timestamp: Utc::now(),
        }
    }

    /// Logged attempts for one alert, oldest first
    pub fn history(&self, alert_id: Uuid) -> Vec<NotificationRecord> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.alert_id == alert_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertSource, AlertStatus, AlertType};
    use anyhow::anyhow;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        kind: ChannelKind,
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AlertChannel for Counting {
        fn kind(&self) -> ChannelKind { self.kind }
        fn name(&self) -> &str { "counting" }

        async fn send(&self, _alert: &Alert, _target: &Target) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing(ChannelKind);

    #[async_trait]
    impl AlertChannel for Failing {
        fn kind(&self) -> ChannelKind { self.0 }
        fn name(&self) -> &str { "failing" }

        async fn send(&self, _alert: &Alert, _target: &Target) -> Result<()> {
            Err(anyhow!("smtp unavailable"))
        }
    }

    struct Stalled(ChannelKind);

    #[async_trait]
    impl AlertChannel for Stalled {
        fn kind(&self) -> ChannelKind { self.0 }
        fn name(&self) -> &str { "stalled" }

        async fn send(&self, _alert: &Alert, _target: &Target) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn alert(severity: AlertSeverity) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            title: "Low battery storage".into(),
            description: "storage 4.0 %".into(),
            alert_type: AlertType::Storage,
            severity,
            status: AlertStatus::Active,
            source: AlertSource::System,
            device_id: None,
            location: None,
            timestamp: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            metadata: Map::new(),
            anomaly_id: None,
        }
    }

    fn everyone() -> Vec<Recipient> {
        vec![
            Recipient {
                id: "alice".into(),
                email: Some("alice@example.com".into()),
                phone: Some("+15550100".into()),
                push_token: Some("tok-a".into()),
                channels: vec![ChannelKind::Email, ChannelKind::Sms, ChannelKind::Push],
            },
            Recipient {
                id: "bob".into(),
                email: Some("bob@example.com".into()),
                phone: None,
                push_token: None,
                channels: vec![ChannelKind::Email],
            },
        ]
    }

    fn counting_all(sent: &Arc<AtomicUsize>) -> Vec<Arc<dyn AlertChannel>> {
        [
            ChannelKind::Dashboard,
            ChannelKind::Websocket,
            ChannelKind::Email,
            ChannelKind::Sms,
            ChannelKind::Push,
        ]
        .into_iter()
        .map(|kind| Arc::new(Counting { kind, sent: sent.clone() }) as Arc<dyn AlertChannel>)
        .collect()
    }

    #[test]
    fn channel_sets_grow_with_severity() {
        let info = channels_for(AlertSeverity::Info);
        let warning = channels_for(AlertSeverity::Warning);
        let critical = channels_for(AlertSeverity::Critical);
        assert!(info.is_subset(&warning));
        assert!(warning.is_subset(&critical));
        assert!(info.contains(&ChannelKind::Dashboard) && info.contains(&ChannelKind::Websocket));
        assert!(!warning.contains(&ChannelKind::Sms));
        assert_eq!(critical.len(), 5);
    }

    #[tokio::test]
    async fn recipients_are_filtered_by_opt_in() {
        let sent = Arc::new(AtomicUsize::new(0));
        let dispatcher = NotificationDispatcher::with_channels(counting_all(&sent), everyone(), Duration::from_secs(5), 100);

        let a = alert(AlertSeverity::Warning);
        let records = dispatcher.dispatch(&a, &[]).await;

        // dashboard + websocket broadcasts, email to alice and bob, push to alice
        assert_eq!(records.len(), 5);
        assert_eq!(sent.load(Ordering::SeqCst), 5);
        assert!(records.iter().all(|r| r.status == DeliveryStatus::Sent));
        assert_eq!(
            records.iter().filter(|r| r.recipient == BROADCAST).count(),
            2
        );
        assert!(!records.iter().any(|r| r.channel == ChannelKind::Push && r.recipient == "bob"));
        assert_eq!(dispatcher.history(a.id).len(), 5);
    }

    #[tokio::test]
    async fn requested_channels_are_added() {
        let sent = Arc::new(AtomicUsize::new(0));
        let dispatcher = NotificationDispatcher::with_channels(counting_all(&sent), everyone(), Duration::from_secs(5), 100);
        let records = dispatcher.dispatch(&alert(AlertSeverity::Info), &[ChannelKind::Sms]).await;
        assert!(records.iter().any(|r| r.channel == ChannelKind::Sms && r.recipient == "alice"));
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_others() {
        let sent = Arc::new(AtomicUsize::new(0));
        let channels: Vec<Arc<dyn AlertChannel>> = vec![
            Arc::new(Counting { kind: ChannelKind::Dashboard, sent: sent.clone() }),
            Arc::new(Failing(ChannelKind::Email)),
            Arc::new(Counting { kind: ChannelKind::Push, sent: sent.clone() }),
        ];
        let dispatcher = NotificationDispatcher::with_channels(channels, everyone(), Duration::from_secs(5), 100);

        let records = dispatcher.dispatch(&alert(AlertSeverity::Warning), &[]).await;

        let failed: Vec<_> = records.iter().filter(|r| r.status == DeliveryStatus::Failed).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|r| r.channel == ChannelKind::Email));
        assert_eq!(failed[0].error.as_deref(), Some("smtp unavailable"));
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_address_is_recorded_as_failure() {
        let sent = Arc::new(AtomicUsize::new(0));
        let recipients = vec![Recipient {
            id: "carol".into(),
            email: None,
            phone: None,
            push_token: None,
            channels: vec![ChannelKind::Sms],
        }];
        let dispatcher = NotificationDispatcher::with_channels(counting_all(&sent), recipients, Duration::from_secs(5), 100);
        let records = dispatcher.dispatch(&alert(AlertSeverity::Critical), &[]).await;
        let sms: Vec<_> = records.iter().filter(|r| r.channel == ChannelKind::Sms).collect();
        assert_eq!(sms.len(), 1);
        assert_eq!(sms[0].status, DeliveryStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_channel_times_out() {
        let sent = Arc::new(AtomicUsize::new(0));
        let channels: Vec<Arc<dyn AlertChannel>> = vec![
            Arc::new(Stalled(ChannelKind::Dashboard)),
            Arc::new(Counting { kind: ChannelKind::Websocket, sent: sent.clone() }),
        ];
        let dispatcher = NotificationDispatcher::with_channels(channels, vec![], Duration::from_secs(2), 100);
        let records = dispatcher.dispatch(&alert(AlertSeverity::Info), &[]).await;

        assert_eq!(records.len(), 2);
        let dashboard = records.iter().find(|r| r.channel == ChannelKind::Dashboard).unwrap();
        assert_eq!(dashboard.status, DeliveryStatus::Failed);
        assert!(dashboard.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn audit_log_is_bounded() {
        let sent = Arc::new(AtomicUsize::new(0));
        let dispatcher = NotificationDispatcher::with_channels(counting_all(&sent), vec![], Duration::from_secs(5), 3);
        let first = alert(AlertSeverity::Info);
        dispatcher.dispatch(&first, &[]).await;
        let second = alert(AlertSeverity::Info);
        dispatcher.dispatch(&second, &[]).await;
        assert_eq!(dispatcher.history(first.id).len(), 1);
        assert_eq!(dispatcher.history(second.id).len(), 2);
    }
}
