use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::config::RelayConfig;
use crate::types::Alert;
use super::{AlertChannel, ChannelKind, Target};

/// Email, SMS and push delivery through an HTTP relay.
///
/// Without a configured relay the send is logged and counted as delivered.
pub struct RelayChannel {
    kind: ChannelKind,
    name: String,
    url: Option<String>,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl RelayChannel {
    pub fn new(kind: ChannelKind, relay: Option<&RelayConfig>) -> Result<Self> {
        Ok(Self {
            kind,
            name: format!("{}-relay", kind),
            url: relay.map(|r| r.url.clone()),
            headers: relay.map(|r| r.headers.clone()).unwrap_or_default(),
            client: reqwest::Client::builder().build()?,
        })
    }

    fn payload(&self, alert: &Alert, target: &Target) -> serde_json::Value {
        json!({
            "channel": self.kind,
            "recipient": &target.recipient,
            "address": &target.address,
            "alert": {
                "id": alert.id,
                "title": &alert.title,
                "description": &alert.description,
                "type": alert.alert_type,
                "severity": alert.severity,
                "deviceId": &alert.device_id,
                "location": &alert.location,
                "timestamp": alert.timestamp.to_rfc3339(),
            },
        })
    }
}

#[async_trait]
impl AlertChannel for RelayChannel {
    fn kind(&self) -> ChannelKind { self.kind }

    fn name(&self) -> &str { &self.name }

    async fn send(&self, alert: &Alert, target: &Target) -> Result<()> {
        let Some(url) = &self.url else {
            tracing::info!(
                channel = %self.kind,
                recipient = %target.recipient,
                alert_id = %alert.id,
                "Notification logged (no relay configured)"
            );
            return Ok(());
        };

        let mut req = self.client.post(url).json(&self.payload(alert, target));
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }

        req.send().await?.error_for_status()?;
        Ok(())
    }
}
