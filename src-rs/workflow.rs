//! One describe/translate invocation: locate, resolve, ask the backend, then
//! re-read the document and rewrite the tag against the current text.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::error::AltError;
use crate::provider::AltTextBackend;
use crate::source::{self, ImagePayload};
use crate::tag::{self, Attr, RewriteResult, TagSpan};

#[derive(Debug, Clone)]
pub struct DocumentContext {
    pub path: PathBuf,
    pub workspace_root: Option<PathBuf>,
    pub offset: usize,
}

impl DocumentContext {
    fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Describe,
    Translate,
}

#[derive(Debug)]
pub struct Outcome {
    pub action: Action,
    pub tag: TagSpan,
    pub previous_alt: Option<String>,
    pub alt: Option<String>,
    pub payload_kind: Option<&'static str>,
    pub edit: Option<RewriteResult>,
    pub warnings: Vec<String>,
    /// Full document text after the edit; `None` when nothing changes.
    pub updated_text: Option<String>,
}

impl Outcome {
    pub fn changed(&self) -> bool {
        self.updated_text.is_some()
    }
}

/// `current` is called after the backend returns and must yield the
/// document text as it is now, which may differ from `snapshot`.
pub fn describe<B, F>(
    snapshot: &str,
    ctx: &DocumentContext,
    backend: &B,
    current: F,
) -> Result<Outcome>
where
    B: AltTextBackend + ?Sized,
    F: FnOnce() -> Result<String>,
{
    let tag = locate_tag(snapshot, ctx.offset)?;
    let src = tag
        .attr(Attr::Src)
        .ok_or(AltError::AttributeMissing {
            name: Attr::Src.name(),
        })?;
    let previous_alt = tag.attr(Attr::Alt);

    let mut warnings = Vec::new();
    if previous_alt.as_deref() == Some("") {
        warnings.push("replacing the empty alt of a decorative image".to_string());
    }

    let payload = source::resolve(&src, &ctx.path, ctx.workspace_root())?;
    tracing::info!(src = %src, kind = payload.kind(), "resolved image source");
    let alt = backend.describe(&payload)?;

    finish(
        Action::Describe,
        tag,
        previous_alt,
        alt,
        Some(&payload),
        warnings,
        current,
    )
}

pub fn translate<B, F>(
    snapshot: &str,
    ctx: &DocumentContext,
    backend: &B,
    current: F,
) -> Result<Outcome>
where
    B: AltTextBackend + ?Sized,
    F: FnOnce() -> Result<String>,
{
    let tag = locate_tag(snapshot, ctx.offset)?;
    let previous = tag
        .attr(Attr::Alt)
        .ok_or(AltError::AttributeMissing {
            name: Attr::Alt.name(),
        })?;

    if previous.is_empty() {
        return Ok(Outcome {
            action: Action::Translate,
            tag,
            previous_alt: Some(previous),
            alt: None,
            payload_kind: None,
            edit: None,
            warnings: vec!["alt is empty (decorative image); nothing to translate".to_string()],
            updated_text: None,
        });
    }

    let alt = backend.translate(&previous)?;
    finish(
        Action::Translate,
        tag,
        Some(previous),
        alt,
        None,
        Vec::new(),
        current,
    )
}

fn locate_tag(text: &str, offset: usize) -> Result<TagSpan> {
    let tag = tag::locate(text, offset).ok_or_else(|| AltError::tag_not_at_offset(offset))?;
    tracing::debug!(start = tag.start, end = tag.end, tag = %tag.text, "located img tag");
    Ok(tag)
}

fn finish<F>(
    action: Action,
    tag: TagSpan,
    previous_alt: Option<String>,
    alt: String,
    payload: Option<&ImagePayload>,
    mut warnings: Vec<String>,
    current: F,
) -> Result<Outcome>
where
    F: FnOnce() -> Result<String>,
{
    let current_text = current()?;
    let edit = tag::rewrite_alt_at(&current_text, &tag, &alt)?;
    tracing::debug!(start = edit.range.start, end = edit.range.end, "computed alt rewrite");

    let updated_text = if edit.is_noop() {
        warnings.push("alt text already matches; document unchanged".to_string());
        None
    } else {
        Some(edit.apply(&current_text)?)
    };

    Ok(Outcome {
        action,
        tag,
        previous_alt,
        alt: Some(alt),
        payload_kind: payload.map(ImagePayload::kind),
        edit: Some(edit),
        warnings,
        updated_text,
    })
}
