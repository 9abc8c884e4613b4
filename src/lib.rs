//! Strata render core.
//!
//! A node-based compositing runtime's render core: given a DAG of
//! image-processing effect nodes, turns a request for a frame into a
//! concurrent, tiled, cached, cancellable execution, with ordered delivery
//! to an interactive viewer or a sequential file writer.
//!
//! # Module map
//!
//! - [`node`] — the [`node::Node`] trait effects implement, and
//!   [`node::NodeGraph`], the arena that owns them.
//! - [`geom`] — canonical/pixel rectangles and affine transforms.
//! - [`render_ctx`] — the context threaded through every node action call.
//! - [`action_cache`] — per-node memoization of declarative node actions.
//! - [`planner`] — the two-pass upstream request planner.
//! - [`image_store`] — the tiled image cache and its per-image trimaps.
//! - [`executor`] — turns a plan into tile dispatch against the graph.
//! - [`scheduler`] — turns a playback intent into an ordered frame stream.
//! - [`cancellation`] — render-age-based cooperative abort.
//! - [`dependency`] — upstream closure walk over graph and expression edges.
//! - [`config`] — tunable policy knobs, loaded from a project TOML file.
//! - [`stats`] — per-node timing accumulation for `--stats` reports.
//! - [`error`] — the crate's error taxonomy.

pub mod action_cache;
pub mod cancellation;
pub mod config;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod geom;
pub mod image_store;
pub mod node;
pub mod planner;
pub mod render_ctx;
pub mod scheduler;
pub mod stats;

/// Fake [`node::Node`] fixtures used by this crate's own unit tests and
/// available to integration tests under `tests/` for the same reason —
/// building a believable effect plugin host is out of this crate's scope.
pub mod test_support;

pub use cancellation::CancellationToken;
pub use config::Settings;
pub use error::{Result, StrataError};
pub use executor::{ExecutionLocks, Executor};
pub use image_store::{ImageCache, ImageKey, ImageRef};
pub use node::{Node, NodeGraph, NodeId};
pub use planner::Planner;
pub use scheduler::{DeliveredFrame, FrameScheduler, FrameSink, Intent, RecordingSink};
