// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line surface of the `pagestack` binary.

use std::path::PathBuf;

use clap::builder::RangedU64ValueParser;
use clap::{ArgGroup, Args, Parser, Subcommand};
use pagestack_core::geometry::NormalizedRect;
use pagestack_core::types::SourceKind;

#[derive(Debug, Parser)]
#[command(
    name = "pagestack",
    version,
    about = "Collect scanned pages, edit them, and hand them off as one batch",
    after_help = "The session lives in $PAGESTACK_DATA_DIR (default: ~/.local/share/pagestack).\n\
                  Set RUST_LOG=debug for diagnostics on stderr."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// One verb against the persisted session. Positions are 1-based.
#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Copy images into the session
    Add(AddArgs),
    /// Show the pages in order
    List,
    /// Turn a page a quarter clockwise
    Rotate {
        #[arg(value_parser = position())]
        position: usize,
    },
    /// Remove a page
    Remove {
        #[arg(value_parser = position())]
        position: usize,
    },
    /// Move a page so it ends up at another position
    Move {
        #[arg(value_parser = position())]
        from: usize,
        #[arg(value_parser = position())]
        to: usize,
    },
    /// Crop a page to fractions of its image
    Crop(CropArgs),
    /// Set a page's own title
    Title {
        #[arg(value_parser = position())]
        position: usize,
        /// Words of the title
        #[arg(required = true)]
        title: Vec<String>,
    },
    /// Bake rotations and hand the pages off
    Finalize {
        /// Describe each page separately instead of the batch as one document
        #[arg(long, conflicts_with = "title")]
        individual: bool,
        /// Title of the single document
        #[arg(long)]
        title: Option<String>,
    },
    /// Discard the session
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
#[command(group(ArgGroup::new("source").args(["scanner", "gallery", "files"])))]
pub struct AddArgs {
    /// Pages come from the document scanner (default)
    #[arg(long)]
    pub scanner: bool,
    /// Pages were picked from the photo gallery
    #[arg(long)]
    pub gallery: bool,
    /// Pages were picked from the file system
    #[arg(long)]
    pub files: bool,
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

impl AddArgs {
    pub fn kind(&self) -> SourceKind {
        if self.gallery {
            SourceKind::Gallery
        } else if self.files {
            SourceKind::Files
        } else {
            SourceKind::Scanner
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Args)]
pub struct CropArgs {
    #[arg(value_parser = position())]
    pub position: usize,
    #[arg(value_parser = fraction)]
    pub left: f32,
    #[arg(value_parser = fraction)]
    pub top: f32,
    #[arg(value_parser = fraction)]
    pub right: f32,
    #[arg(value_parser = fraction)]
    pub bottom: f32,
}

impl CropArgs {
    pub fn rect(&self) -> NormalizedRect {
        NormalizedRect::new(self.left, self.top, self.right, self.bottom)
    }
}

impl Command {
    /// Checks that span more than one argument.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Command::Crop(args) if args.right <= args.left || args.bottom <= args.top => {
                Err("crop needs right > left and bottom > top".to_owned())
            }
            _ => Ok(()),
        }
    }
}

fn position() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..)
}

fn fraction(arg: &str) -> Result<f32, String> {
    match arg.parse::<f32>() {
        Ok(value) if (0.0..=1.0).contains(&value) => Ok(value),
        _ => Err(format!("`{arg}` is not a fraction between 0 and 1")),
    }
}
