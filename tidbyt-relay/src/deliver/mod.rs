//! Delivery of rendered artifacts.
//!
//! Channels run in a fixed order: inline response, cloud push, bus publish. A failed push ends
//! delivery for the request; the publish channel is then not attempted.

pub mod publish;

use std::sync::Arc;

use axum::http::StatusCode;

use crate::config::{Config, PushConfig};
use crate::renderer::{Artifact, Renderer};
use crate::request::DisplayRequest;

use self::publish::{AppletMessage, Publisher};

/// Result of a single delivery channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Channel not configured or not requested.
    NotConfigured,
    /// Not attempted because an earlier channel failed.
    Skipped,
    /// Delivered successfully.
    Delivered,
    /// Attempted and failed with the given reason.
    Failed(String),
}

impl ChannelOutcome {
    /// Whether the channel was attempted and failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Artifact bytes to stream back to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineImage {
    /// MIME type sniffed from the bytes.
    pub content_type: &'static str,
    /// Raw artifact bytes.
    pub bytes: Vec<u8>,
}

/// Per-channel record of one delivery run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Inline response channel.
    pub inline: ChannelOutcome,
    /// Cloud push channel.
    pub push: ChannelOutcome,
    /// Bus publish channel.
    pub publish: ChannelOutcome,
    /// Body to stream back, when the inline channel delivered.
    pub body: Option<InlineImage>,
}

impl Default for DeliveryOutcome {
    fn default() -> Self {
        Self {
            inline: ChannelOutcome::NotConfigured,
            push: ChannelOutcome::NotConfigured,
            publish: ChannelOutcome::NotConfigured,
            body: None,
        }
    }
}

impl DeliveryOutcome {
    /// First failure of a network channel. Inline failures are not fatal.
    pub fn failure(&self) -> Option<&str> {
        [&self.push, &self.publish]
            .into_iter()
            .find_map(|c| match c {
                ChannelOutcome::Failed(msg) => Some(msg.as_str()),
                _ => None,
            })
    }

    /// `502` when a network channel failed, `200` otherwise.
    pub fn status(&self) -> StatusCode {
        if self.failure().is_some() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::OK
        }
    }
}

/// Drives the configured delivery channels for a rendered artifact.
#[derive(Clone)]
pub struct Dispatcher {
    renderer: Renderer,
    push: Option<PushConfig>,
    publisher: Option<Arc<dyn Publisher>>,
    debug: bool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("push", &self.push.is_some())
            .field("publish", &self.publisher.is_some())
            .field("debug", &self.debug)
            .finish()
    }
}

impl Dispatcher {
    /// Channels are enabled from `cfg`; publishing needs a `publisher`.
    pub fn new(
        renderer: Renderer,
        cfg: &Config,
        publisher: Option<Arc<dyn Publisher>>,
    ) -> Self {
        Self {
            renderer,
            push: cfg.push.clone(),
            publisher,
            debug: cfg.debug,
        }
    }

    /// Run the enabled channels for `artifact` in order. Never fails as a whole; per-channel
    /// results are recorded in the outcome.
    #[tracing::instrument(skip_all, fields(artifact = %artifact.path().display()))]
    pub async fn deliver(&self, artifact: &Artifact, request: &DisplayRequest) -> DeliveryOutcome {
        let opts = request.delivery_options();
        let mut outcome = DeliveryOutcome::default();
        let mut bytes: Option<Vec<u8>> = None;

        if opts.return_image || self.debug {
            match artifact.read().await {
                Ok(data) => {
                    let content_type = image::guess_format(&data)
                        .map(|f| f.to_mime_type())
                        .unwrap_or("application/octet-stream");
                    outcome.body = Some(InlineImage {
                        content_type,
                        bytes: data.clone(),
                    });
                    outcome.inline = ChannelOutcome::Delivered;
                    bytes = Some(data);
                }
                Err(e) => {
                    tracing::error!("inline response: {e}");
                    outcome.inline = ChannelOutcome::Failed(e.to_string());
                }
            }
        }

        if let Some(push) = &self.push {
            match self.renderer.push(artifact, push, opts).await {
                Ok(()) => outcome.push = ChannelOutcome::Delivered,
                Err(e) => {
                    tracing::error!("push: {e}");
                    outcome.push = ChannelOutcome::Failed(e.to_string());
                    if self.publisher.is_some() {
                        outcome.publish = ChannelOutcome::Skipped;
                    }
                    return outcome;
                }
            }
        }

        if let Some(publisher) = &self.publisher {
            let data = match bytes {
                Some(data) => Ok(data),
                None => artifact.read().await,
            };
            outcome.publish = match data {
                Ok(data) => {
                    let message = AppletMessage::new(request.applet_name(), &data);
                    match publisher.publish(&message).await {
                        Ok(()) => ChannelOutcome::Delivered,
                        Err(e) => {
                            tracing::error!("publish: {e}");
                            ChannelOutcome::Failed(e.to_string())
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("publish: {e}");
                    ChannelOutcome::Failed(e.to_string())
                }
            };
        }

        outcome
    }
}

#[cfg(test)]
#[path = "../../tests/unit/deliver/dispatch.rs"]
mod tests;
