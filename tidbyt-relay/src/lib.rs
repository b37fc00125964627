//! HTTP relay that renders notifications and images for Tidbyt displays.
//!
//! A request flows through a fixed pipeline:
//!
//! - Decode the body into a [`DisplayRequest`] and fill defaults
//! - Materialize a [`TemplateSet`] template into a scratch `.star` document
//! - Render it to a GIF with the external renderer
//! - Deliver the artifact inline, to the cloud API and to the message bus
//!
//! Scratch files are removed on every exit path.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

/// Startup configuration.
pub mod config;
/// Delivery channels.
pub mod deliver;
/// Request orchestration.
pub mod pipeline;
/// External renderer invocation.
pub mod renderer;
/// Request decoding and defaults.
pub mod request;
/// HTTP router and server loop.
pub mod server;
/// Source-document templates.
pub mod template;

pub use crate::config::{BusConfig, Config, PushConfig};
pub use crate::deliver::publish::{AppletMessage, MqttPublisher, Publisher};
pub use crate::deliver::{ChannelOutcome, DeliveryOutcome, Dispatcher, InlineImage};
pub use crate::foundation::error::{RelayError, RelayResult};
pub use crate::pipeline::{Pipeline, Stage};
pub use crate::renderer::{Artifact, Renderer};
pub use crate::request::{
    DeliveryOptions, DisplayRequest, ImageForm, ImageRequest, ImageSource, NotifyRequest,
    RequestKind,
};
pub use crate::server::{ErrorResponse, router, serve};
pub use crate::template::{SourceDocument, TemplateSet};
