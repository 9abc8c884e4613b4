//! Error Types
//!
//! This module defines the error types produced by the render core.
//!
//! # Overview
//!
//! The main error type [`StrataError`] covers the failure taxonomy of the
//! render core: plan construction, image allocation, node rendering,
//! cooperative cancellation, transient cache races and invariant violations.
//!
//! [`TransientRace`](StrataError::TransientRace) is special: callers that can
//! retry locally (the tile dispatcher waiting on a trimap) should recover
//! from it rather than let it propagate — see [`crate::executor`].

use thiserror::Error;

use crate::node::NodeId;

/// The main error type for the Strata render core.
#[derive(Error, Debug)]
pub enum StrataError {
    /// A node's region-of-definition/identity/frames-needed action failed,
    /// or returned an infinite region of interest that could not be clipped.
    #[error("plan failed at node {node:?}: {message}")]
    PlanFailure {
        /// Node at which planning failed.
        node: NodeId,
        /// Diagnostic message surfaced to the node.
        message: String,
    },

    /// The image cache could not satisfy an allocation request.
    #[error("image allocation failed for node {node:?}: {message}")]
    AllocationFailure {
        /// Node whose output image could not be allocated.
        node: NodeId,
        /// Diagnostic message (e.g. RAM/disk budget exhausted).
        message: String,
    },

    /// A node's render action returned failure.
    #[error("render failed at node {node:?}: {message}")]
    RenderFailure {
        /// Node whose render action failed.
        node: NodeId,
        /// Diagnostic message from the node.
        message: String,
    },

    /// Cooperative cancellation: the render was aborted before or during
    /// execution. Callers should treat this as a silent, non-delivered
    /// outcome rather than a reportable failure.
    #[error("render aborted")]
    Aborted,

    /// A tile found an overlapping render already in progress. Recovered
    /// locally by waiting on the trimap and retrying; never escapes
    /// [`crate::executor`].
    #[error("transient race on node {node:?} rectangle {rect:?}")]
    TransientRace {
        /// Node whose image is being concurrently rendered.
        node: NodeId,
        /// The overlapping rectangle, in pixel coordinates.
        rect: crate::geom::RectI,
    },

    /// An internal invariant (coordinate system, bounds containment) did not
    /// hold. Fatal in debug builds via `debug_assert!`; this variant is only
    /// ever constructed in release builds, where it is logged and the
    /// render is aborted rather than panicking.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// On-disk tile cache I/O error.
    #[error("image cache I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Disk cache index corruption (bad magic/version, truncated record).
    #[error("image cache index corrupt: {0}")]
    IndexCorrupt(String),

    /// Project/config file parsing error.
    #[error("config error: {0}")]
    ConfigError(#[from] toml::de::Error),
}

impl StrataError {
    /// True for the subset of errors a sequential (writer) render should
    /// stop on first occurrence for, per the propagation policy.
    #[must_use]
    pub fn is_fatal_for_sequence(&self) -> bool {
        !matches!(self, StrataError::TransientRace { .. })
    }
}

/// Alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;
