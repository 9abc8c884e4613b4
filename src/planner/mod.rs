//! Request planner (C3): the two-pass RoI/RoD/identity/transform
//! propagation algorithm that turns "render this window of the root at
//! this time" into a concrete, per-node set of regions to produce.

mod plan;
mod request;

pub use plan::Planner;
pub use request::{FrameRequestMap, NodeRequest, TimeViewEntry};
