use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::process::Command;

use crate::config::{Config, PushConfig};
use crate::foundation::error::{RelayError, RelayResult};
use crate::request::DeliveryOptions;
use crate::template::SourceDocument;

/// Runs the external renderer (`pixlet`) as a subprocess.
///
/// Every invocation is bounded by `timeout`; the child is killed when the timeout elapses or
/// when the calling future is dropped. Clones share the cached availability check.
#[derive(Clone, Debug)]
pub struct Renderer {
    bin: PathBuf,
    timeout: Duration,
    available: Arc<AtomicBool>,
}

impl Renderer {
    /// Renderer at `bin` with a per-call `timeout`.
    pub fn new(bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
            available: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Renderer described by `cfg`.
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.renderer_bin.clone(), cfg.render_timeout)
    }

    /// Path or name of the renderer executable.
    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// Return `true` when the renderer can be invoked.
    ///
    /// Runs `<bin> version` until the first success; later calls answer from the cache. A
    /// missing renderer is checked again on every call so installing it needs no restart.
    pub async fn is_available(&self) -> bool {
        if self.available.load(Ordering::Acquire) {
            return true;
        }
        let check = Command::new(&self.bin)
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        let ok = matches!(
            tokio::time::timeout(self.timeout, check).await,
            Ok(Ok(status)) if status.success()
        );
        if ok {
            self.available.store(true, Ordering::Release);
        }
        ok
    }

    /// Render `source` into `<source>-<timestamp>.gif`.
    ///
    /// Returns [`RelayError::RendererAbsent`] without spawning anything when the renderer is
    /// not available.
    #[tracing::instrument(skip(self, source), fields(source = %source.path().display()))]
    pub async fn render(&self, source: &SourceDocument, timestamp: i64) -> RelayResult<Artifact> {
        if !self.is_available().await {
            return Err(RelayError::renderer_absent(format!(
                "'{}' was not found on PATH",
                self.bin.display()
            )));
        }

        // Guard the output path before spawning so partial output is removed on failure.
        let artifact = Artifact::new(source.artifact_path(timestamp));
        let args: Vec<OsString> = vec![
            "render".into(),
            source.path().into(),
            "--output".into(),
            artifact.path().into(),
            "--gif".into(),
        ];
        let output = self.run("render", args, RelayError::render).await?;
        if !output.status.success() {
            return Err(RelayError::render(format!(
                "renderer exited with status {} for '{}': {}",
                output.status,
                source.path().display(),
                combined_output(&output).trim()
            )));
        }
        if !artifact.path().is_file() {
            return Err(RelayError::render(format!(
                "renderer produced no artifact at '{}'",
                artifact.path().display()
            )));
        }
        Ok(artifact)
    }

    /// Push a rendered artifact to the configured device through the cloud API.
    #[tracing::instrument(skip_all, fields(device = %push.device_id))]
    pub async fn push(
        &self,
        artifact: &Artifact,
        push: &PushConfig,
        opts: &DeliveryOptions,
    ) -> RelayResult<()> {
        let mut args: Vec<OsString> = vec![
            "push".into(),
            "--api-token".into(),
            push.api_key.clone().into(),
            "--url".into(),
            push.api_url.clone().into(),
        ];
        if let Some(id) = &opts.installation_id {
            args.push("--installation-id".into());
            args.push(id.into());
        }
        if opts.background {
            args.push("--background".into());
        }
        args.push(push.device_id.clone().into());
        args.push(artifact.path().into());

        let output = self.run("push", args, RelayError::delivery).await?;
        if !output.status.success() {
            return Err(RelayError::delivery(format!(
                "push exited with status {}: {}",
                output.status,
                combined_output(&output).trim()
            )));
        }
        Ok(())
    }

    async fn run(
        &self,
        op: &str,
        args: Vec<OsString>,
        on_error: fn(String) -> RelayError,
    ) -> RelayResult<Output> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(on_error(format!(
                    "{op} timed out after {}s",
                    self.timeout.as_secs_f32()
                )));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RelayError::renderer_absent(format!(
                    "failed to spawn '{}': {e}",
                    self.bin.display()
                )));
            }
            Ok(Err(e)) => {
                return Err(on_error(format!(
                    "failed to spawn '{}' for {op}: {e}",
                    self.bin.display()
                )));
            }
            Ok(Ok(output)) => output,
        };

        tracing::debug!(op, status = %output.status, "{}", combined_output(&output));
        Ok(output)
    }
}

fn combined_output(output: &Output) -> String {
    let mut s = String::from_utf8_lossy(&output.stdout).into_owned();
    s.push_str(&String::from_utf8_lossy(&output.stderr));
    s
}

/// A rendered raster animation on disk. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the artifact on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole artifact.
    pub async fn read(&self) -> RelayResult<Vec<u8>> {
        use anyhow::Context as _;
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("read artifact '{}'", self.path.display()))?;
        Ok(bytes)
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), "failed to remove artifact: {e}"),
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/renderer.rs"]
mod tests;
