// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Commands — one function per CLI verb, each returning the JSON printed on
// stdout.

mod cli;

use std::path::PathBuf;

use pagestack_core::error::PipelineError;
use pagestack_core::geometry::NormalizedRect;
use pagestack_core::human_errors::humanize_error;
use pagestack_core::types::{CapturedImage, ImageRef, MetadataMode, PageId, PageMetadata, SourceKind};
use pagestack_session::batch::default_title;
use pagestack_session::{BatchMetadataCoordinator, PageCollectionManager};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

pub use cli::{Cli, Command};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("no page at position {0}")]
    NoSuchPage(usize),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Execute `command` against the session.
pub async fn run(command: Command, session: &mut PageCollectionManager) -> Result<Value, CliError> {
    match command {
        Command::Add(args) => add(session, args.kind(), args.paths).await,
        Command::List => Ok(list(session)),
        Command::Rotate { position } => {
            let id = page_at(session, position)?;
            session.rotate(id);
            Ok(list(session))
        }
        Command::Remove { position } => {
            let id = page_at(session, position)?;
            session.remove(id);
            Ok(list(session))
        }
        Command::Move { from, to } => {
            page_at(session, from)?;
            page_at(session, to)?;
            session.move_page(from - 1, to - 1);
            Ok(list(session))
        }
        Command::Crop(args) => crop(session, args.position, args.rect()).await,
        Command::Title { position, title } => {
            let id = page_at(session, position)?;
            let mut metadata = session
                .get(id)
                .and_then(|p| p.metadata.clone())
                .unwrap_or_default();
            metadata.title = Some(title.join(" "));
            session.set_metadata(id, Some(metadata));
            Ok(list(session))
        }
        Command::Finalize { individual, title } => finalize(session, individual, title).await,
        Command::Clear => {
            session.clear();
            Ok(json!({ "cleared": true }))
        }
    }
}

fn list(session: &PageCollectionManager) -> Value {
    json!({
        "pages": session.pages(),
        "max_pages": session.max_pages(),
    })
}

fn page_at(session: &PageCollectionManager, position: usize) -> Result<PageId, CliError> {
    session
        .at_position(position)
        .map(|p| p.id)
        .ok_or(CliError::NoSuchPage(position))
}

async fn add(
    session: &mut PageCollectionManager,
    kind: SourceKind,
    paths: Vec<PathBuf>,
) -> Result<Value, CliError> {
    let captures = paths
        .into_iter()
        .map(|path| {
            let path = std::path::absolute(&path).unwrap_or(path);
            CapturedImage::new(ImageRef::from_path(path))
        })
        .collect();

    let report = session.ingest(captures, kind).await?;
    let failed: Vec<Value> = report
        .failed
        .iter()
        .map(|(image_ref, err)| {
            json!({
                "image_ref": image_ref,
                "error": err.to_string(),
                "notice": humanize_error(err),
            })
        })
        .collect();

    Ok(json!({
        "added": report.added,
        "failed": failed,
        "total": session.len(),
    }))
}

async fn crop(
    session: &mut PageCollectionManager,
    position: usize,
    rect: NormalizedRect,
) -> Result<Value, CliError> {
    let id = page_at(session, position)?;
    let dispatched = session.apply_crop(id, rect);
    let applied = session.settle().await > 0;
    if dispatched && !applied {
        info!(position, "crop not applied, original image kept");
    }
    Ok(json!({
        "applied": applied,
        "page": session.get(id),
    }))
}

async fn finalize(
    session: &mut PageCollectionManager,
    individual: bool,
    title: Option<String>,
) -> Result<Value, CliError> {
    let mut coordinator = BatchMetadataCoordinator::new(session.pages().to_vec());

    let outcome = if individual {
        coordinator.select_mode(MetadataMode::IndividualDocuments)?;
        while coordinator.next()? {
            session.record_saved_forms(&mut coordinator);
        }
        let outcome = coordinator.finish()?;
        session.record_saved_forms(&mut coordinator);
        outcome
    } else {
        coordinator.select_mode(MetadataMode::SingleDocument)?;
        let title = title.or_else(|| coordinator.pages().first().map(default_title));
        coordinator.set_shared_form(PageMetadata {
            title,
            ..Default::default()
        });
        coordinator.submit_shared()?
    };

    let upload = session.finalize(outcome).await?;
    Ok(serde_json::to_value(upload).map_err(PipelineError::from)?)
}
