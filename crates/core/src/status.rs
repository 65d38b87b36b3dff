//! Per-document outcome records.

use std::fmt;

use crate::{Document, OperatorError};

/// Terminal state of one document within one Apply/Delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Created,
    Updated,
    Skipped,
    Deleted,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::Updated => "updated",
            Phase::Skipped => "skipped",
            Phase::Deleted => "deleted",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one reconcile or delete attempt. `Failed` carries the attempted
/// document, the others carry what the store returned (or what was removed).
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEntry {
    Created(Document),
    Updated(Document),
    Skipped(Document),
    Deleted(Document),
    Failed { document: Document, error: OperatorError },
}

impl StatusEntry {
    pub fn failed(document: Document, error: OperatorError) -> Self {
        StatusEntry::Failed { document, error }
    }

    pub fn phase(&self) -> Phase {
        match self {
            StatusEntry::Created(_) => Phase::Created,
            StatusEntry::Updated(_) => Phase::Updated,
            StatusEntry::Skipped(_) => Phase::Skipped,
            StatusEntry::Deleted(_) => Phase::Deleted,
            StatusEntry::Failed { .. } => Phase::Failed,
        }
    }

    pub fn document(&self) -> &Document {
        match self {
            StatusEntry::Created(d)
            | StatusEntry::Updated(d)
            | StatusEntry::Skipped(d)
            | StatusEntry::Deleted(d) => d,
            StatusEntry::Failed { document, .. } => document,
        }
    }

    pub fn into_document(self) -> Document {
        match self {
            StatusEntry::Created(d)
            | StatusEntry::Updated(d)
            | StatusEntry::Skipped(d)
            | StatusEntry::Deleted(d) => d,
            StatusEntry::Failed { document, .. } => document,
        }
    }

    pub fn error(&self) -> Option<&OperatorError> {
        match self {
            StatusEntry::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool { self.error().is_some() }
}

impl fmt::Display for StatusEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let doc = self.document();
        write!(f, "{} {} {}", doc.kind, doc.name(), self.phase())?;
        if let Some(e) = self.error() {
            write!(f, ": {}", e)?;
        }
        Ok(())
    }
}
