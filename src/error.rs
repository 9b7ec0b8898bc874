use std::fmt;

use thiserror::Error;

use crate::arc::ArcType;
use crate::path::PrimPath;

/// Fatal errors: these abort an engine call and are returned as `Err`.
/// Everything branch-local during composition is a [`CompositionError`]
/// attached to the resulting index instead.
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Malformed path: {0}")]
    Path(String),
    #[error("Root layer could not be resolved: {0}")]
    RootResolution(String),
    #[error("Build cancelled")]
    Cancelled,
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, ComposeError>;

// ------------- Composition errors -------------
// Recorded per node during a build and surfaced on the finished index,
// so a partially composed result is always available for inspection.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionErrorKind {
    /// The arc's target layer stack could not be resolved.
    ArcResolution { reason: String },
    /// The arc closes a loop over its own ancestors.
    Cycle,
    /// Two otherwise-identical arcs carry different layer offsets.
    ConflictingOffsets,
    /// The arc targets a location marked private.
    PermissionDenied,
    /// Recursion passed the configured depth limit.
    MaxDepthExceeded,
    /// The authored arc metadata is unusable (e.g. an empty target).
    MalformedArc { reason: String },
}

/// One branch-local composition problem, tagged with the site and arc
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionError {
    pub site_path: PrimPath,
    pub arc_type: ArcType,
    pub kind: CompositionErrorKind,
}

impl CompositionError {
    pub fn new(site_path: PrimPath, arc_type: ArcType, kind: CompositionErrorKind) -> Self {
        Self {
            site_path,
            arc_type,
            kind,
        }
    }
}

impl fmt::Display for CompositionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let what = match &self.kind {
            CompositionErrorKind::ArcResolution { reason } => {
                format!("target could not be resolved: {reason}")
            }
            CompositionErrorKind::Cycle => "arc cycles back onto an ancestor".to_owned(),
            CompositionErrorKind::ConflictingOffsets => {
                "conflicting layer offsets on equivalent arcs".to_owned()
            }
            CompositionErrorKind::PermissionDenied => "target is private".to_owned(),
            CompositionErrorKind::MaxDepthExceeded => "recursion depth exceeded".to_owned(),
            CompositionErrorKind::MalformedArc { reason } => format!("malformed arc: {reason}"),
        };
        write!(f, "{} at {}: {}", self.arc_type.label(), self.site_path, what)
    }
}
