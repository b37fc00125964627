//! Publishing rendered artifacts on the message bus.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use serde::{Deserialize, Serialize};

use crate::config::BusConfig;
use crate::foundation::error::{RelayError, RelayResult};

const KEEP_ALIVE: Duration = Duration::from_secs(5);
const ACK_TIMEOUT: Duration = Duration::from_secs(5);
const DISCONNECT_LINGER: Duration = Duration::from_millis(250);
const MAX_PACKET_BYTES: usize = 10 * 1024 * 1024;

/// Fresh client id for one connection.
///
/// MQTT 3.1 brokers only have to accept ids of up to 23 alphanumeric characters.
fn client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("tr{}", &id[..16])
}

/// Message picked up by display agents subscribed to `<topic>/applet`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppletMessage {
    /// Originating applet name (`notify` or the generic proxy name).
    pub applet: String,
    /// Base64 encoded artifact bytes.
    pub payload: String,
}

impl AppletMessage {
    /// Wrap artifact bytes for `applet`.
    pub fn new(applet: impl Into<String>, artifact: &[u8]) -> Self {
        Self {
            applet: applet.into(),
            payload: STANDARD.encode(artifact),
        }
    }

    /// Wire form published on the bus.
    pub fn to_json(&self) -> RelayResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| RelayError::delivery(format!("serialize applet message: {e}")))
    }
}

/// Sink for rendered artifacts on the message bus.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one message. Failures are reported as [`RelayError::Delivery`].
    async fn publish(&self, message: &AppletMessage) -> RelayResult<()>;
}

/// MQTT publisher that connects, publishes and disconnects once per message.
#[derive(Clone, Debug)]
pub struct MqttPublisher {
    cfg: BusConfig,
    ack_timeout: Duration,
    linger: Duration,
}

impl MqttPublisher {
    /// Publisher for the broker in `cfg`.
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            cfg,
            ack_timeout: ACK_TIMEOUT,
            linger: DISCONNECT_LINGER,
        }
    }

    /// How long to wait for the publish to be flushed to the broker.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(client_id(), self.cfg.host.clone(), self.cfg.port);
        opts.set_keep_alive(KEEP_ALIVE);
        opts.set_clean_session(true);
        opts.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);
        if let Some(user) = &self.cfg.username {
            opts.set_credentials(user.clone(), self.cfg.password.clone().unwrap_or_default());
        }
        opts
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    #[tracing::instrument(skip_all, fields(host = %self.cfg.host, applet = %message.applet))]
    async fn publish(&self, message: &AppletMessage) -> RelayResult<()> {
        let payload = message.to_json()?;
        let topic = self.cfg.applet_topic();
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);

        client
            .publish(topic.clone(), QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| RelayError::delivery(format!("queue publish to '{topic}': {e}")))?;

        let flushed = tokio::time::timeout(self.ack_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
                    Ok(Event::Incoming(packet)) => tracing::trace!(?packet, "mqtt incoming"),
                    Ok(Event::Outgoing(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        })
        .await;
        match flushed {
            Err(_) => {
                return Err(RelayError::delivery(format!(
                    "publish to {}:{} timed out",
                    self.cfg.host, self.cfg.port
                )));
            }
            Ok(Err(e)) => {
                return Err(RelayError::delivery(format!(
                    "publish to {}:{} '{topic}': {e}",
                    self.cfg.host, self.cfg.port
                )));
            }
            Ok(Ok(())) => {}
        }
        tracing::debug!(topic = %topic, "published applet");

        if let Err(e) = client.disconnect().await {
            tracing::warn!("mqtt disconnect request failed: {e}");
            return Ok(());
        }
        let drained = tokio::time::timeout(self.linger, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!("mqtt disconnect linger elapsed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/deliver/publish.rs"]
mod tests;
