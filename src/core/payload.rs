use crate::core::model::FilePayload;
use anyhow::Context;
use std::path::Path;

const VIDEO_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
    ("wmv", "video/x-ms-wmv"),
    ("flv", "video/x-flv"),
    ("mpg", "video/mpeg"),
    ("mpeg", "video/mpeg"),
    ("3gp", "video/3gpp"),
    ("ogv", "video/ogg"),
    ("ts", "video/mp2t"),
];

impl FilePayload {
    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("stat {}", path.display()))?;
        if !meta.is_file() {
            anyhow::bail!("not a regular file: {}", path.display());
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            path: path.to_path_buf(),
            content_type: guess_content_type(&name).map(|s| s.to_string()),
            name,
            size: meta.len(),
        })
    }

    /// Video title: file name without its extension.
    pub fn title(&self) -> &str {
        strip_extension(&self.name)
    }

    pub fn is_video(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|t| t.starts_with("video/"))
            .unwrap_or(false)
    }

    /// Declared type for session negotiation.
    pub fn upload_content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or("video/*")
    }

    /// `Content-Type` of the PUT body.
    pub fn body_content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or("application/octet-stream")
    }
}

pub fn guess_content_type(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    VIDEO_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, t)| *t)
}

/// Drops a trailing `.ext`; a trailing bare dot is kept.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => &name[..idx],
        _ => name,
    }
}

/// `Content-Range` for a single PUT of the whole body.
pub fn content_range(size: u64) -> String {
    if size == 0 {
        "bytes */0".to_string()
    } else {
        format!("bytes 0-{}/{}", size - 1, size)
    }
}
