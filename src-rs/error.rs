use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type AltResult<T> = std::result::Result<T, AltError>;

#[derive(Debug, Error)]
pub enum AltError {
    /// No `<img>` tag spans the offset, or the tag vanished before the rewrite.
    #[error("{0}")]
    TagNotFound(String),
    #[error("the <img> tag has no {name} attribute")]
    AttributeMissing { name: &'static str },
    #[error("cannot resolve image source {src:?}: {reason}")]
    UnresolvedSource { src: String, reason: String },
    #[error("failed to read image file {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("provider configuration: {0}")]
    ProviderConfig(String),
    #[error("provider request failed: {0}")]
    ProviderRequest(String),
}

impl AltError {
    pub fn tag_not_at_offset(offset: usize) -> Self {
        Self::TagNotFound(format!("no <img> tag found at offset {offset}"))
    }

    pub fn tag_vanished() -> Self {
        Self::TagNotFound("the <img> tag is no longer present in the document".to_string())
    }

    /// Stable identifier used in JSON error output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TagNotFound(_) => "tag_not_found",
            Self::AttributeMissing { .. } => "attribute_missing",
            Self::UnresolvedSource { .. } => "unresolved_source",
            Self::FileRead { .. } => "file_read",
            Self::ProviderConfig(_) => "provider_config",
            Self::ProviderRequest(_) => "provider_request",
        }
    }
}
