// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Pagestack capture pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard upper bound on the number of pages in one capture session.
pub const MAX_PAGES: usize = 20;

/// Stable identifier for a captured page.
///
/// Assigned once at capture time and never reused. Every asynchronous result
/// (crop completions, metadata lookups) is keyed by this id, never by
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the hyphenated string form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// URI-like handle to image bytes.
///
/// Either a `file://` URI or a plain filesystem path. Other schemes (for
/// example platform content URIs) are carried through untouched but cannot be
/// opened by the transform executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local filesystem path this reference points at, if it has one.
    pub fn to_path(&self) -> Option<PathBuf> {
        if let Some(rest) = self.0.strip_prefix("file://") {
            return Some(PathBuf::from(rest));
        }
        if self.0.contains("://") || self.0.is_empty() {
            return None;
        }
        Some(PathBuf::from(&self.0))
    }

    /// Last path segment, without any query string or fragment.
    pub fn file_name(&self) -> Option<&str> {
        let without_query = self.0.split(['?', '#']).next().unwrap_or_default();
        without_query
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }

    /// File name without its extension.
    pub fn file_stem(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(0) | None => Some(name),
            Some(dot) => Some(&name[..dot]),
        }
    }

    /// Lower-cased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        let dot = name.rfind('.')?;
        let ext = &name[dot + 1..];
        if dot == 0 || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which capture source produced a page. Display-only provenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// The structured page scanner.
    #[default]
    Scanner,
    /// The photo picker.
    Gallery,
    /// The file picker.
    Files,
}

impl SourceKind {
    /// Stable keyword used in persisted state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scanner => "scanner",
            Self::Gallery => "gallery",
            Self::Files => "files",
        }
    }

    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "scanner" => Some(Self::Scanner),
            "gallery" => Some(Self::Gallery),
            "files" => Some(Self::Files),
            _ => None,
        }
    }
}

/// Per-page metadata override, used when each page becomes its own document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correspondent_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type_id: Option<u64>,
}

/// One captured image destined for the final document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub image_ref: ImageRef,
    /// 1-based index, recomputed by the collection after every structural
    /// change.
    pub position: usize,
    /// One of 0, 90, 180, 270. Applied to pixels only at finalization.
    pub rotation_degrees: u16,
    pub source_kind: SourceKind,
    pub metadata: Option<PageMetadata>,
}

impl Page {
    /// A fresh page with a new id. Position is assigned by the collection.
    pub fn new(image_ref: ImageRef, source_kind: SourceKind) -> Self {
        Self {
            id: PageId::new(),
            image_ref,
            position: 0,
            rotation_degrees: 0,
            source_kind,
            metadata: None,
        }
    }

    /// Record another quarter turn clockwise.
    pub fn rotate_clockwise(&mut self) {
        self.rotation_degrees = (self.rotation_degrees + 90) % 360;
    }
}

/// Whether `degrees` is one of the four quarter-turn rotations.
pub fn is_quarter_turn(degrees: u16) -> bool {
    matches!(degrees, 0 | 90 | 180 | 270)
}

/// What a capture source hands to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedImage {
    pub image_ref: ImageRef,
    /// Declared MIME type, when the source provides one.
    pub content_type: Option<String>,
}

impl CapturedImage {
    pub fn new(image_ref: ImageRef) -> Self {
        Self {
            image_ref,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// How metadata is collected before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataMode {
    /// All pages merge into one document with one shared metadata record.
    SingleDocument,
    /// Every page becomes its own document with its own metadata.
    IndividualDocuments,
}

/// A page with every deferred transform baked into its image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedPage {
    pub image_ref: ImageRef,
    /// False only when a rotation was requested but could not be applied;
    /// the image then still carries its pre-rotation pixels.
    pub rotation_applied: bool,
    pub metadata: Option<PageMetadata>,
}

/// The unit handed to the upload collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadBatch {
    pub mode: MetadataMode,
    /// Set in `SingleDocument` mode only.
    pub shared_metadata: Option<PageMetadata>,
    pub pages: Vec<FinalizedPage>,
}
