use std::sync::Arc;

use crate::config::Config;
use crate::deliver::publish::{MqttPublisher, Publisher};
use crate::deliver::{DeliveryOutcome, Dispatcher};
use crate::foundation::error::{RelayError, RelayResult};
use crate::renderer::Renderer;
use crate::request::{DisplayRequest, ImageSource};
use crate::template::TemplateSet;

/// Progress of a single request through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Body accepted by a handler.
    Received,
    /// Body parsed into a request.
    Decoded,
    /// Omitted fields filled in.
    Defaulted,
    /// Source document written to the scratch dir.
    Materialized,
    /// Artifact produced by the renderer.
    Rendered,
    /// Delivery channels attempted.
    Delivered,
    /// Scratch files removed.
    Cleaned,
    /// Request abandoned with an error.
    Failed,
}

impl Stage {
    /// Name used in log records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Decoded => "decoded",
            Self::Defaulted => "defaulted",
            Self::Materialized => "materialized",
            Self::Rendered => "rendered",
            Self::Delivered => "delivered",
            Self::Cleaned => "cleaned",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defaults, materializes, renders and delivers decoded requests.
///
/// Shared by all request handlers. Scratch files are owned by guards local to [`Pipeline::run`],
/// so they are removed on every exit path including cancellation.
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: Arc<Config>,
    templates: Arc<TemplateSet>,
    renderer: Renderer,
    dispatcher: Dispatcher,
}

impl Pipeline {
    /// Pipeline publishing through `publisher`, if any.
    pub fn new(
        config: Config,
        templates: TemplateSet,
        publisher: Option<Arc<dyn Publisher>>,
    ) -> Self {
        let renderer = Renderer::from_config(&config);
        let dispatcher = Dispatcher::new(renderer.clone(), &config, publisher);
        Self {
            config: Arc::new(config),
            templates: Arc::new(templates),
            renderer,
            dispatcher,
        }
    }

    /// Build a pipeline with an MQTT publisher when a bus is configured.
    pub fn from_config(config: Config, templates: TemplateSet) -> Self {
        let publisher = config
            .bus
            .clone()
            .map(|bus| Arc::new(MqttPublisher::new(bus)) as Arc<dyn Publisher>);
        Self::new(config, templates, publisher)
    }

    /// Process configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Renderer shared with the dispatcher.
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Run a decoded request to completion.
    ///
    /// A failed delivery channel is reported as [`RelayError::Delivery`]; any inline body is
    /// discarded in that case.
    #[tracing::instrument(skip_all, fields(kind = %request.kind()))]
    pub async fn run(&self, request: DisplayRequest) -> RelayResult<DeliveryOutcome> {
        let result = self.drive(request).await;
        if let Err(e) = &result {
            tracing::debug!(stage = %Stage::Failed, code = e.code(), "{e}");
        }
        result
    }

    async fn drive(&self, request: DisplayRequest) -> RelayResult<DeliveryOutcome> {
        tracing::debug!(stage = %Stage::Decoded);
        let request = request.apply_defaults();
        match &request {
            DisplayRequest::Notify(r) => {
                tracing::debug!(
                    stage = %Stage::Defaulted,
                    text_size = r.text_size,
                    icon = r.icon.as_deref().unwrap_or("-")
                );
            }
            DisplayRequest::Image(r) => {
                tracing::debug!(
                    stage = %Stage::Defaulted,
                    inline = matches!(r.source, ImageSource::Inline(_)),
                    width = r.width,
                    height = r.height,
                    delay = r.delay
                );
            }
        }

        let source = self
            .templates
            .materialize(&request, &self.config.scratch_dir)?;
        tracing::debug!(stage = %Stage::Materialized, path = %source.path().display());

        let timestamp = chrono::Utc::now().timestamp();
        let artifact = self.renderer.render(&source, timestamp).await?;
        tracing::debug!(stage = %Stage::Rendered, path = %artifact.path().display());

        let outcome = self.dispatcher.deliver(&artifact, &request).await;
        tracing::debug!(
            stage = %Stage::Delivered,
            inline = ?outcome.inline,
            push = ?outcome.push,
            publish = ?outcome.publish
        );

        drop(artifact);
        drop(source);
        tracing::debug!(stage = %Stage::Cleaned);

        match outcome.failure() {
            Some(msg) => Err(RelayError::delivery(msg)),
            None => Ok(outcome),
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/pipeline.rs"]
mod tests;
