use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::foundation::error::{RelayError, RelayResult};
use crate::request::{ImageRequest, NotifyRequest};
use crate::template::TemplateSet;

#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<AppletMessage>>,
    fail: bool,
}

#[async_trait]
impl Publisher for Recorder {
    async fn publish(&self, message: &AppletMessage) -> RelayResult<()> {
        self.messages.lock().unwrap().push(message.clone());
        if self.fail {
            return Err(RelayError::delivery("broker refused"));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn fake_renderer(dir: &Path, push_exit: i32) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt as _;

    let script = format!(
        r#"#!/bin/sh
case "$1" in
  render)
    out=""; prev=""
    for a in "$@"; do
      if [ "$prev" = "--output" ]; then out="$a"; fi
      prev="$a"
    done
    printf 'GIF89a' > "$out"
    ;;
  push) exit {push_exit} ;;
esac
exit 0
"#
    );
    let bin = dir.join("fake-pixlet");
    std::fs::write(&bin, script).unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
    bin
}

fn templates() -> TemplateSet {
    TemplateSet::from_sources(
        vec![
            ("notify".to_string(), "{{ text }}".to_string()),
            ("image".to_string(), "{{ width }}".to_string()),
        ],
        Vec::new(),
    )
    .unwrap()
}

fn notify(body: &[u8]) -> DisplayRequest {
    NotifyRequest::decode(body).unwrap().apply_defaults().into()
}

#[cfg(unix)]
async fn rendered(bin: &Path, scratch: &Path, req: &DisplayRequest) -> (Renderer, Artifact) {
    let renderer = Renderer::new(bin, Duration::from_secs(10));
    let doc = templates().materialize(req, scratch).unwrap();
    let artifact = renderer.render(&doc, 1).await.unwrap();
    (renderer, artifact)
}

fn push_config() -> Config {
    Config {
        push: PushConfig::from_parts("https://api.example", Some("k".into()), Some("d".into())),
        ..Config::default()
    }
}

#[test]
fn outcome_status_ignores_inline_failures() {
    let mut outcome = DeliveryOutcome {
        inline: ChannelOutcome::Failed("gone".into()),
        ..Default::default()
    };
    assert_eq!(outcome.status(), StatusCode::OK);
    assert!(outcome.failure().is_none());

    outcome.publish = ChannelOutcome::Failed("broker down".into());
    assert_eq!(outcome.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(outcome.failure(), Some("broker down"));
}

#[cfg(unix)]
#[tokio::test]
async fn nothing_configured_delivers_nothing() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = fake_renderer(tools.path(), 0);
    let req = notify(br#"{"text":"hi"}"#);
    let (renderer, artifact) = rendered(&bin, scratch.path(), &req).await;

    let outcome = Dispatcher::new(renderer, &Config::default(), None)
        .deliver(&artifact, &req)
        .await;
    assert_eq!(outcome, DeliveryOutcome::default());
    assert_eq!(outcome.status(), StatusCode::OK);
}

#[cfg(unix)]
#[tokio::test]
async fn return_image_streams_sniffed_gif() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = fake_renderer(tools.path(), 0);
    let req = notify(br#"{"text":"hi","return_image":true}"#);
    let (renderer, artifact) = rendered(&bin, scratch.path(), &req).await;

    let outcome = Dispatcher::new(renderer, &Config::default(), None)
        .deliver(&artifact, &req)
        .await;
    assert_eq!(outcome.inline, ChannelOutcome::Delivered);
    let body = outcome.body.unwrap();
    assert_eq!(body.content_type, "image/gif");
    assert_eq!(body.bytes, b"GIF89a");
}

#[cfg(unix)]
#[tokio::test]
async fn debug_mode_implies_inline_response() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = fake_renderer(tools.path(), 0);
    let req = notify(br#"{"text":"hi"}"#);
    let (renderer, artifact) = rendered(&bin, scratch.path(), &req).await;

    let cfg = Config {
        debug: true,
        ..Config::default()
    };
    let outcome = Dispatcher::new(renderer, &cfg, None)
        .deliver(&artifact, &req)
        .await;
    assert!(outcome.body.is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn failed_push_skips_publish() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = fake_renderer(tools.path(), 1);
    let req = notify(br#"{"text":"hi"}"#);
    let (renderer, artifact) = rendered(&bin, scratch.path(), &req).await;

    let recorder = Arc::new(Recorder::default());
    let outcome = Dispatcher::new(renderer, &push_config(), Some(recorder.clone() as Arc<dyn Publisher>))
        .deliver(&artifact, &req)
        .await;
    assert!(outcome.push.is_failed());
    assert_eq!(outcome.publish, ChannelOutcome::Skipped);
    assert_eq!(outcome.status(), StatusCode::BAD_GATEWAY);
    assert!(recorder.messages.lock().unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn push_then_publish_with_proxy_applet_name() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = fake_renderer(tools.path(), 0);
    let req: DisplayRequest = ImageRequest::decode_json(br#"{"image":"https://example/x.png"}"#)
        .unwrap()
        .apply_defaults()
        .into();
    let (renderer, artifact) = rendered(&bin, scratch.path(), &req).await;

    let recorder = Arc::new(Recorder::default());
    let outcome = Dispatcher::new(renderer, &push_config(), Some(recorder.clone() as Arc<dyn Publisher>))
        .deliver(&artifact, &req)
        .await;
    assert_eq!(outcome.push, ChannelOutcome::Delivered);
    assert_eq!(outcome.publish, ChannelOutcome::Delivered);

    let messages = recorder.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0], AppletMessage::new("tidbyt-proxy", b"GIF89a"));
}

#[cfg(unix)]
#[tokio::test]
async fn publish_failure_is_reported() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = fake_renderer(tools.path(), 0);
    let req = notify(br#"{"text":"hi"}"#);
    let (renderer, artifact) = rendered(&bin, scratch.path(), &req).await;

    let recorder = Arc::new(Recorder {
        fail: true,
        ..Default::default()
    });
    let outcome = Dispatcher::new(renderer, &Config::default(), Some(recorder as Arc<dyn Publisher>))
        .deliver(&artifact, &req)
        .await;
    assert_eq!(outcome.push, ChannelOutcome::NotConfigured);
    assert!(outcome.publish.is_failed());
    assert_eq!(outcome.status(), StatusCode::BAD_GATEWAY);
}
