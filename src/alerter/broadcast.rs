use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast::Sender;

use crate::types::Alert;
use super::{AlertChannel, ChannelKind, Target};

/// Event pushed to live subscribers
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub channel: ChannelKind,
    pub alert: Alert,
}

/// Dashboard delivery is the alert store itself; this only leaves a log line
pub struct DashboardChannel;

#[async_trait]
impl AlertChannel for DashboardChannel {
    fn kind(&self) -> ChannelKind { ChannelKind::Dashboard }
    fn name(&self) -> &str { "dashboard" }

    async fn send(&self, alert: &Alert, _target: &Target) -> Result<()> {
        tracing::info!(
            alert_id = %alert.id,
            severity = %alert.severity,
            title = %alert.title,
            "Dashboard notification"
        );
        Ok(())
    }
}

/// Publishes alerts to connected websocket clients
pub struct WebsocketChannel {
    events: Sender<AlertEvent>,
}

impl WebsocketChannel {
    pub fn new(events: Sender<AlertEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl AlertChannel for WebsocketChannel {
    fn kind(&self) -> ChannelKind { ChannelKind::Websocket }
    fn name(&self) -> &str { "websocket" }

    async fn send(&self, alert: &Alert, _target: &Target) -> Result<()> {
        let event = AlertEvent { channel: ChannelKind::Websocket, alert: alert.clone() };
        // no subscribers is not a delivery failure
        match self.events.send(event) {
            Ok(subscribers) => tracing::debug!(alert_id = %alert.id, subscribers, "Alert published"),
            Err(_) => tracing::debug!(alert_id = %alert.id, "No websocket subscribers"),
        }
        Ok(())
    }
}
