//! HTTP surface.
//!
//! - `/api/notify` (any method): JSON text notification
//! - `/api/image` (POST): JSON image reference or multipart upload
//! - `/healthcheck` (any method): empty 200
//!
//! Both API routes reject bodies over `max_upload_bytes` with a `DECODE_FAILED` 400.

use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, post};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::deliver::DeliveryOutcome;
use crate::foundation::error::{RelayError, RelayResult};
use crate::pipeline::{Pipeline, Stage};
use crate::request::{ImageForm, ImageRequest, NotifyRequest};

/// Multipart field carrying the uploaded image file.
const UPLOAD_FIELD: &str = "image";

/// Error body returned for every failed request.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Human readable message.
    pub error: String,
    /// Stable machine code, see [`RelayError::code`].
    pub code: String,
    #[serde(skip)]
    status: StatusCode,
}

impl From<&RelayError> for ErrorResponse {
    fn from(err: &RelayError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
            status: err.status(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match &self {
            // Rendering is skipped, not failed, when no renderer is installed.
            Self::RendererAbsent(_) => {
                tracing::warn!("{self}");
                StatusCode::OK.into_response()
            }
            e if e.is_client_error() => {
                tracing::warn!("{e}");
                ErrorResponse::from(e).into_response()
            }
            e => {
                tracing::error!("{e}");
                ErrorResponse::from(e).into_response()
            }
        }
    }
}

fn respond(result: RelayResult<DeliveryOutcome>) -> Response {
    match result {
        Ok(outcome) => match outcome.body {
            Some(image) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, image.content_type)],
                image.bytes,
            )
                .into_response(),
            None => StatusCode::OK.into_response(),
        },
        Err(e) => e.into_response(),
    }
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    max_upload_bytes: usize,
}

/// Build the relay router around a shared pipeline.
pub fn router(pipeline: Pipeline) -> Router {
    let max_upload_bytes = pipeline.config().max_upload_bytes;
    let state = AppState {
        pipeline: Arc::new(pipeline),
        max_upload_bytes,
    };

    Router::new()
        .route("/api/notify", any(notify))
        .route(
            "/api/image",
            post(image).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/healthcheck", any(healthcheck))
        .with_state(state)
}

#[tracing::instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4()))]
async fn notify(State(state): State<AppState>, request: Request) -> Response {
    tracing::debug!(stage = %Stage::Received);
    let result = match decode_notify(request, state.max_upload_bytes).await {
        Ok(request) => state.pipeline.run(request.into()).await,
        Err(e) => Err(e),
    };
    respond(result)
}

#[tracing::instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4()))]
async fn image(State(state): State<AppState>, request: Request) -> Response {
    tracing::debug!(stage = %Stage::Received);
    let result = match decode_image(request, state.max_upload_bytes).await {
        Ok(request) => state.pipeline.run(request.into()).await,
        Err(e) => Err(e),
    };
    respond(result)
}

async fn healthcheck() -> StatusCode {
    StatusCode::OK
}

async fn read_body(request: Request, limit: usize) -> RelayResult<Bytes> {
    axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|e| RelayError::decode(format!("read request body (limit {limit} bytes): {e}")))
}

async fn decode_notify(request: Request, limit: usize) -> RelayResult<NotifyRequest> {
    NotifyRequest::decode(&read_body(request, limit).await?)
}

async fn decode_image(request: Request, limit: usize) -> RelayResult<ImageRequest> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if !is_multipart {
        return ImageRequest::decode_json(&read_body(request, limit).await?);
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| RelayError::decode(e.body_text()))?;
    let mut form = ImageForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == UPLOAD_FIELD {
            let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
            form.set_upload(bytes);
        } else {
            let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
            form.set_field(&name, &value)?;
        }
    }
    form.finish()
}

fn multipart_error(err: MultipartError, limit: usize) -> RelayError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RelayError::decode(format!("upload exceeds {limit} bytes"))
    } else {
        RelayError::decode(format!("multipart: {}", err.body_text()))
    }
}

/// Serve `router` on `listener` until ctrl-c or SIGTERM.
pub async fn serve(listener: TcpListener, router: Router) -> RelayResult<()> {
    let addr = listener.local_addr().context("read listener address")?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("install ctrl-c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
