use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::*;
use crate::config::PushConfig;
use crate::request::{ImageForm, NotifyRequest};

fn templates() -> TemplateSet {
    TemplateSet::from_sources(
        vec![
            ("notify".to_string(), "{{ text | starstr }}".to_string()),
            ("image".to_string(), "{{ width }}".to_string()),
        ],
        Vec::new(),
    )
    .unwrap()
}

#[cfg(unix)]
fn fake_renderer(dir: &Path, render_exit: i32, push_exit: i32) -> std::path::PathBuf {
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
    exit {render_exit}
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

fn config(scratch: &Path, bin: &Path) -> Config {
    let mut cfg = Config::default()
        .with_scratch_dir(scratch)
        .with_renderer_bin(bin);
    cfg.render_timeout = Duration::from_secs(10);
    cfg
}

fn hello() -> DisplayRequest {
    NotifyRequest::decode(br#"{"text":"hi"}"#).unwrap().into()
}

fn is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[test]
fn stage_names() {
    assert_eq!(Stage::Received.to_string(), "received");
    assert_eq!(Stage::Cleaned.as_str(), "cleaned");
    assert_eq!(Stage::Failed.as_str(), "failed");
}

#[cfg(unix)]
#[tokio::test]
async fn successful_run_leaves_scratch_dir_empty() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = fake_renderer(tools.path(), 0, 0);

    let pipeline = Pipeline::new(config(scratch.path(), &bin), templates(), None);
    let outcome = pipeline.run(hello()).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::default());
    assert!(is_empty(scratch.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn render_failure_leaves_scratch_dir_empty() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = fake_renderer(tools.path(), 2, 0);

    let pipeline = Pipeline::new(config(scratch.path(), &bin), templates(), None);
    let err = pipeline.run(hello()).await.unwrap_err();
    assert!(matches!(err, RelayError::Render(_)), "{err}");
    assert!(is_empty(scratch.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn push_failure_is_delivery_error_and_cleans_up() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = fake_renderer(tools.path(), 0, 1);

    let mut cfg = config(scratch.path(), &bin);
    cfg.push = PushConfig::from_parts("https://api.example", Some("k".into()), Some("d".into()));
    let pipeline = Pipeline::new(cfg, templates(), None);
    let err = pipeline.run(hello()).await.unwrap_err();
    assert!(matches!(err, RelayError::Delivery(_)), "{err}");
    assert!(is_empty(scratch.path()));
}

#[tokio::test]
async fn absent_renderer_is_reported_without_artifacts() {
    let scratch = tempfile::tempdir().unwrap();
    let cfg = config(scratch.path(), &scratch.path().join("missing-renderer"));

    let pipeline = Pipeline::from_config(cfg, templates());
    let err = pipeline.run(hello()).await.unwrap_err();
    assert!(matches!(err, RelayError::RendererAbsent(_)), "{err}");
    assert!(is_empty(scratch.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn dropped_run_leaves_scratch_dir_empty() {
    use std::os::unix::fs::PermissionsExt as _;

    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bin = tools.path().join("slow-pixlet");
    std::fs::write(
        &bin,
        r#"#!/bin/sh
[ "$1" = "render" ] || exit 0
out=""; prev=""
for a in "$@"; do
  if [ "$prev" = "--output" ]; then out="$a"; fi
  prev="$a"
done
printf 'GIF8' > "$out"
exec sleep 5
"#,
    )
    .unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

    let pipeline = Pipeline::new(config(scratch.path(), &bin), templates(), None);
    let cut = tokio::time::timeout(Duration::from_millis(700), pipeline.run(hello())).await;
    assert!(cut.is_err(), "run finished before it was dropped");
    assert!(is_empty(scratch.path()));
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[tokio::test]
async fn logs_carry_dimensions_and_failure_but_not_uploads() {
    let logs = Captured::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let scratch = tempfile::tempdir().unwrap();
    let cfg = config(scratch.path(), &scratch.path().join("missing-renderer"));
    let pipeline = Pipeline::new(cfg, templates(), None);

    let upload = b"very-private-upload-bytes".repeat(8);
    let mut form = ImageForm::default();
    form.set_upload(upload.as_slice());
    form.set_field("width", "48").unwrap();
    let request = form.finish().unwrap();
    let ImageSource::Inline(encoded) = &request.source else {
        panic!("upload should be inline");
    };
    let encoded = encoded.clone();

    let err = pipeline.run(request.into()).await.unwrap_err();
    assert!(matches!(err, RelayError::RendererAbsent(_)), "{err}");

    let text = logs.text();
    assert!(!text.contains(&encoded), "{text}");
    assert!(!text.contains(&encoded[..32]), "{text}");
    assert!(text.contains("stage=defaulted"), "{text}");
    assert!(text.contains("width=48"), "{text}");
    assert!(text.contains("stage=failed"), "{text}");
    assert!(text.contains("RENDERER_ABSENT"), "{text}");
}
