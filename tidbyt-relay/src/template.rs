use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use minijinja::{Environment, ErrorKind};
use tempfile::TempPath;

use crate::foundation::error::{RelayError, RelayResult};
use crate::request::{DisplayRequest, RequestKind};

const TEMPLATE_EXT: &str = "star";
const ICON_EXT: &str = "png";
const SOURCE_PREFIX: &str = "tidbyt";
const SOURCE_SUFFIX: &str = ".star";

/// Compiled source-document templates plus the named icon registry.
///
/// Loaded once at startup and shared read-only by every request.
pub struct TemplateSet {
    env: Environment<'static>,
    icons: BTreeMap<String, String>,
}

impl std::fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSet")
            .field("templates", &self.names())
            .field("icons", &self.icons.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TemplateSet {
    /// Load every `*.star` template in `dir` (named by file stem) and every `icons/*.png`.
    pub fn load(dir: &Path) -> RelayResult<Self> {
        let templates = read_dir_by_ext(dir, TEMPLATE_EXT)?
            .into_iter()
            .map(|(name, path)| -> RelayResult<(String, String)> {
                let source = std::fs::read_to_string(&path)
                    .with_context(|| format!("read template '{}'", path.display()))?;
                Ok((name, source))
            })
            .collect::<RelayResult<Vec<_>>>()?;

        let icon_dir = dir.join("icons");
        let icons = if icon_dir.is_dir() {
            read_dir_by_ext(&icon_dir, ICON_EXT)?
                .into_iter()
                .map(|(name, path)| -> RelayResult<(String, Vec<u8>)> {
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("read icon '{}'", path.display()))?;
                    Ok((name, bytes))
                })
                .collect::<RelayResult<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let set = Self::from_sources(templates, icons)?;
        tracing::info!(
            dir = %dir.display(),
            templates = ?set.names(),
            icons = set.icons.len(),
            "loaded templates"
        );
        Ok(set)
    }

    /// Build a set from in-memory template sources and raw icon bytes.
    pub fn from_sources(
        templates: impl IntoIterator<Item = (String, String)>,
        icons: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> RelayResult<Self> {
        let mut env = Environment::new();
        env.add_filter("starstr", starstr);
        for (name, source) in templates {
            env.add_template_owned(name.clone(), source).map_err(|e| {
                RelayError::config(format!("template '{name}' failed to compile: {e}"))
            })?;
        }

        for kind in [RequestKind::Notify, RequestKind::Image] {
            if env.get_template(kind.as_str()).is_err() {
                return Err(RelayError::config(format!(
                    "missing template '{}.{TEMPLATE_EXT}'",
                    kind.as_str()
                )));
            }
        }

        let icons = icons
            .into_iter()
            .map(|(name, bytes)| (name, STANDARD.encode(bytes)))
            .collect();
        Ok(Self { env, icons })
    }

    /// Names of the compiled templates.
    pub fn names(&self) -> Vec<&str> {
        self.env.templates().map(|(name, _)| name).collect()
    }

    /// Whether an icon with this name was loaded.
    pub fn has_icon(&self, name: &str) -> bool {
        self.icons.contains_key(name)
    }

    /// Instantiate the template selected by the request kind.
    pub fn render(&self, request: &DisplayRequest) -> RelayResult<String> {
        let mut ctx = match request {
            DisplayRequest::Notify(n) => serde_json::to_value(n),
            DisplayRequest::Image(i) => serde_json::to_value(i),
        }
        .map_err(|e| RelayError::render_prep(format!("serialize template context: {e}")))?;

        if let DisplayRequest::Notify(n) = request {
            let icon_data = n.icon.as_deref().and_then(|name| {
                let data = self.icons.get(name);
                if data.is_none() {
                    tracing::warn!(icon = name, "unknown icon, rendering without it");
                }
                data.cloned()
            });
            ctx["icon_data"] = icon_data.into();
        }

        let name = request.template_name();
        let tmpl = self
            .env
            .get_template(name)
            .map_err(|e| RelayError::render_prep(format!("template '{name}': {e}")))?;
        tmpl.render(&ctx)
            .map_err(|e| RelayError::render_prep(format!("instantiate template '{name}': {e}")))
    }

    /// Render the request into a fresh `tidbyt*.star` file inside `scratch_dir`.
    #[tracing::instrument(skip(self, request), fields(kind = %request.kind()))]
    pub fn materialize(
        &self,
        request: &DisplayRequest,
        scratch_dir: &Path,
    ) -> RelayResult<SourceDocument> {
        let mut file = tempfile::Builder::new()
            .prefix(SOURCE_PREFIX)
            .suffix(SOURCE_SUFFIX)
            .tempfile_in(scratch_dir)
            .map_err(|e| {
                RelayError::render_prep(format!(
                    "create source document in '{}': {e}",
                    scratch_dir.display()
                ))
            })?;
        // The file exists from here on; dropping `file` on any error below removes it.
        let rendered = self.render(request)?;
        file.write_all(rendered.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| {
                RelayError::render_prep(format!(
                    "write source document '{}': {e}",
                    file.path().display()
                ))
            })?;

        let doc = SourceDocument {
            path: file.into_temp_path(),
        };
        tracing::debug!("rendered template to path {}", doc.path().display());
        Ok(doc)
    }
}

/// A materialized source document. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct SourceDocument {
    path: TempPath,
}

impl SourceDocument {
    /// Location of the document on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Artifact path for this document: `<source>-<unix-timestamp>.gif`.
    pub fn artifact_path(&self, timestamp: i64) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!("-{timestamp}.gif"));
        PathBuf::from(name)
    }
}

fn read_dir_by_ext(dir: &Path, ext: &str) -> RelayResult<Vec<(String, PathBuf)>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("read directory '{}'", dir.display()))?;
    let mut out = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("read directory '{}'", dir.display()))?
            .path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            out.push((stem.to_string(), path.clone()));
        }
    }
    out.sort();
    Ok(out)
}

/// Quote a value as a string literal safe to embed in generated source.
fn starstr(value: String) -> Result<String, minijinja::Error> {
    serde_json::to_string(&value)
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

#[cfg(test)]
#[path = "../tests/unit/template.rs"]
mod tests;
