// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistence codec — the page collection as a handful of compact strings.
//
// Layout (each string is a `|`-separated list, elements escaped so that `\`
// and `|` inside a URI or a JSON value survive):
//
//   uris       image refs, in collection order
//   ids        page ids, in collection order
//   rotations  `id:degrees` for pages with a non-zero rotation only
//   metadata   `id:json` for pages carrying per-page metadata only
//   sources    `id:kind` for pages not captured by the scanner only
//
// An empty list encodes as `None`, never as an empty string: `Some("")` is a
// one-element list holding an empty element.
//
// `uris` and `ids` are the spine. If they disagree in length (or an id is
// unreadable or repeated) the whole state is corrupt and nothing is restored.
// The overlays are best-effort: entries for unknown ids or with unreadable
// values are dropped.

use std::collections::{HashMap, HashSet};

use pagestack_core::error::{PipelineError, Result};
use pagestack_core::types::{ImageRef, Page, PageId, PageMetadata, SourceKind, is_quarter_turn};
use tracing::debug;

/// Element separator.
pub const SEPARATOR: char = '|';
const ESCAPE: char = '\\';
const PAIR_SEPARATOR: char = ':';

/// The encoded form of a page collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPages {
    pub uris: Option<String>,
    pub ids: Option<String>,
    pub rotations: Option<String>,
    pub metadata: Option<String>,
    pub sources: Option<String>,
}

impl EncodedPages {
    /// True when nothing at all is stored.
    pub fn is_absent(&self) -> bool {
        self.uris.is_none()
            && self.ids.is_none()
            && self.rotations.is_none()
            && self.metadata.is_none()
            && self.sources.is_none()
    }
}

/// Encode `pages` in collection order.
pub fn encode(pages: &[Page]) -> Result<EncodedPages> {
    let uris = join(pages.iter().map(|p| p.image_ref.as_str().to_owned()));
    let ids = join(pages.iter().map(|p| p.id.to_string()));

    let rotations = join(
        pages
            .iter()
            .filter(|p| p.rotation_degrees != 0)
            .map(|p| format!("{}{PAIR_SEPARATOR}{}", p.id, p.rotation_degrees)),
    );

    let mut metadata_pairs = Vec::new();
    for page in pages {
        if let Some(meta) = &page.metadata {
            let json = serde_json::to_string(meta)?;
            metadata_pairs.push(format!("{}{PAIR_SEPARATOR}{json}", page.id));
        }
    }
    let metadata = join(metadata_pairs);

    let sources = join(
        pages
            .iter()
            .filter(|p| p.source_kind != SourceKind::Scanner)
            .map(|p| format!("{}{PAIR_SEPARATOR}{}", p.id, p.source_kind.as_str())),
    );

    Ok(EncodedPages {
        uris,
        ids,
        rotations,
        metadata,
        sources,
    })
}

/// Rebuild the collection. Positions are assigned `1..=n` in order.
pub fn decode(encoded: &EncodedPages) -> Result<Vec<Page>> {
    let uris = split(encoded.uris.as_deref());
    let raw_ids = split(encoded.ids.as_deref());

    if uris.len() != raw_ids.len() {
        return Err(PipelineError::CorruptPersistedState(format!(
            "{} image refs but {} ids",
            uris.len(),
            raw_ids.len()
        )));
    }

    let mut seen = HashSet::with_capacity(raw_ids.len());
    let mut ids = Vec::with_capacity(raw_ids.len());
    for raw in &raw_ids {
        let id = PageId::parse(raw)
            .ok_or_else(|| PipelineError::CorruptPersistedState(format!("unreadable id {raw:?}")))?;
        if !seen.insert(id) {
            return Err(PipelineError::CorruptPersistedState(format!("duplicate id {id}")));
        }
        ids.push(id);
    }

    let rotations = overlay(encoded.rotations.as_deref(), &seen, "rotation", |v| {
        v.parse::<u16>().ok().filter(|d| *d != 0 && is_quarter_turn(*d))
    });
    let mut metadata = overlay(encoded.metadata.as_deref(), &seen, "metadata", |v| {
        serde_json::from_str::<PageMetadata>(v).ok()
    });
    let sources = overlay(encoded.sources.as_deref(), &seen, "source", SourceKind::parse);

    let pages = ids
        .into_iter()
        .zip(uris)
        .enumerate()
        .map(|(index, (id, uri))| Page {
            id,
            image_ref: ImageRef::new(uri),
            position: index + 1,
            rotation_degrees: rotations.get(&id).copied().unwrap_or(0),
            source_kind: sources.get(&id).copied().unwrap_or_default(),
            metadata: metadata.remove(&id),
        })
        .collect();

    Ok(pages)
}

/// Parse an `id:value` overlay, dropping anything that does not line up.
fn overlay<T>(
    raw: Option<&str>,
    known: &HashSet<PageId>,
    what: &str,
    parse_value: impl Fn(&str) -> Option<T>,
) -> HashMap<PageId, T> {
    let mut out = HashMap::new();
    for entry in split(raw) {
        let parsed = entry.split_once(PAIR_SEPARATOR).and_then(|(id, value)| {
            let id = PageId::parse(id).filter(|id| known.contains(id))?;
            Some((id, parse_value(value)?))
        });
        match parsed {
            Some((id, value)) => {
                out.insert(id, value);
            }
            None => debug!(entry = %entry, what, "dropping unusable overlay entry"),
        }
    }
    out
}

fn join(items: impl IntoIterator<Item = String>) -> Option<String> {
    let mut buf = String::new();
    let mut any = false;
    for item in items {
        if any {
            buf.push(SEPARATOR);
        }
        escape_into(&item, &mut buf);
        any = true;
    }
    any.then_some(buf)
}

fn escape_into(item: &str, buf: &mut String) {
    for c in item.chars() {
        if c == ESCAPE || c == SEPARATOR {
            buf.push(ESCAPE);
        }
        buf.push(c);
    }
}

fn split(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => {
                // A trailing lone escape is kept literally.
                current.push(chars.next().unwrap_or(ESCAPE));
            }
            SEPARATOR => items.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    items.push(current);
    items
}
