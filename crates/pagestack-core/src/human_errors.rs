// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable notices for pipeline errors.
//
// Every technical error maps to a plain sentence and a suggestion. The
// severity drives whether the UI shows a blocking message, a passing
// warning, or nothing at all.

use serde::Serialize;

use crate::error::PipelineError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The request was refused and nothing changed (e.g. too many pages).
    Rejected,
    /// A transform or copy failed; the previous image was kept.
    SoftWarning,
    /// State was reset during recovery. Nothing is shown to the user.
    Recovered,
    /// A bug or environment problem outside the user's control.
    Internal,
}

/// A human-readable error with a plain message and an actionable suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct HumanError {
    /// Plain summary (shown as a heading or toast).
    pub message: String,
    /// What the user should try next.
    pub suggestion: String,
    /// Whether the notice should be shown at all.
    pub visible: bool,
    pub severity: Severity,
}

/// Convert a `PipelineError` into a notice a non-technical user can act on.
pub fn humanize_error(err: &PipelineError) -> HumanError {
    match err {
        PipelineError::CapacityExceeded { current, max, .. } => HumanError {
            message: format!("A document can have at most {max} pages."),
            suggestion: if *current >= *max {
                "Remove a page before adding more.".into()
            } else {
                format!("You can add {} more page(s).", max - current)
            },
            visible: true,
            severity: Severity::Rejected,
        },

        PipelineError::DecodeFailure(_) => HumanError {
            message: "We couldn't edit this image.".into(),
            suggestion: "The original page was kept. You can continue without the change.".into(),
            visible: true,
            severity: Severity::SoftWarning,
        },

        PipelineError::UnsupportedImageRef(_) => HumanError {
            message: "This image can't be opened from here.".into(),
            suggestion: "Try picking the file again, or save it to your device first.".into(),
            visible: true,
            severity: Severity::SoftWarning,
        },

        PipelineError::Io(io_err) => {
            let suggestion = match io_err.kind() {
                std::io::ErrorKind::NotFound => {
                    "The file is no longer available. Try picking it again."
                }
                std::io::ErrorKind::PermissionDenied => {
                    "We lost permission to read the file. Try picking it again."
                }
                _ => "Check that your device has free storage space.",
            };
            HumanError {
                message: "We couldn't save a copy of the image.".into(),
                suggestion: suggestion.into(),
                visible: true,
                severity: Severity::SoftWarning,
            }
        }

        PipelineError::CorruptPersistedState(_) => HumanError {
            message: "Your previous scan session could not be restored.".into(),
            suggestion: "Start a new scan.".into(),
            visible: false,
            severity: Severity::Recovered,
        },

        PipelineError::Worker(_) => HumanError {
            message: "A background task stopped unexpectedly.".into(),
            suggestion: "Your pages were kept. Try the last action again.".into(),
            visible: true,
            severity: Severity::SoftWarning,
        },

        PipelineError::InvalidBatchState(_) => HumanError {
            message: "That step isn't available right now.".into(),
            suggestion: "Finish the current page's details first.".into(),
            visible: true,
            severity: Severity::Rejected,
        },

        PipelineError::Database(_) | PipelineError::Serialization(_) => HumanError {
            message: "Something went wrong while saving your session.".into(),
            suggestion: "Your pages are still here. Restart the app if this keeps happening."
                .into(),
            visible: true,
            severity: Severity::Internal,
        },
    }
}
