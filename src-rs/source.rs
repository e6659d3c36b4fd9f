//! Resolution of an `<img src>` value into data an AI provider can consume.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{AltError, AltResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// Sent to the provider verbatim.
    Url { url: String },
    DataUri { mime: String, data: String },
}

impl ImagePayload {
    /// The string placed in the provider's `image_url` field.
    pub fn to_url(&self) -> String {
        match self {
            ImagePayload::Url { url } => url.clone(),
            ImagePayload::DataUri { mime, data } => format!("data:{mime};base64,{data}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImagePayload::Url { .. } => "url",
            ImagePayload::DataUri { .. } => "data_uri",
        }
    }
}

pub fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

/// Remote and inline sources pass through; anything else is read from disk.
pub fn resolve(
    src: &str,
    document_path: &Path,
    workspace_root: Option<&Path>,
) -> AltResult<ImagePayload> {
    if is_remote(src) || src.starts_with("data:") {
        return Ok(ImagePayload::Url {
            url: src.to_string(),
        });
    }

    let path = local_path(src, document_path, workspace_root)?;
    let bytes = fs::read(&path).map_err(|source| AltError::FileRead {
        path: path.clone(),
        source,
    })?;
    let mime = mime_for_path(&path);
    tracing::debug!(path = %path.display(), mime, bytes = bytes.len(), "encoded local image");

    Ok(ImagePayload::DataUri {
        mime: mime.to_string(),
        data: BASE64.encode(bytes),
    })
}

/// Leading `/` is workspace-relative; anything else is document-relative.
pub fn local_path(
    src: &str,
    document_path: &Path,
    workspace_root: Option<&Path>,
) -> AltResult<PathBuf> {
    if let Some(rooted) = src.strip_prefix('/') {
        let root = workspace_root.ok_or_else(|| AltError::UnresolvedSource {
            src: src.to_string(),
            reason: "root-relative path but no workspace root is open".to_string(),
        })?;
        return Ok(root.join(rooted));
    }

    let dir = document_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or_else(|| AltError::UnresolvedSource {
            src: src.to_string(),
            reason: format!(
                "document {} has no containing directory",
                document_path.display()
            ),
        })?;
    Ok(dir.join(src))
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/jpeg",
    }
}
