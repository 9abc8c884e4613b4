//! The plan data model: what each node is asked to produce.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::geom::{RectD, Transform};
use crate::node::NodeId;

/// One `(time, view)` request against a node's output, in canonical
/// coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeViewEntry {
    pub time: f64,
    pub view: u32,
    pub roi: RectD,
}

/// Everything a node needs to know to satisfy its part of a plan: the
/// (unioned) region of interest requested of it at each `(time, view)` it
/// is visited at, and the transform concatenated onto it so far if
/// transform-concatenation redirected its fetch (§4.3 d).
///
/// Most nodes are visited at exactly one `(time, view)` pair per frame, so
/// `entries` is a `SmallVec` sized for that common case (§4.3 Ambient
/// stack note).
#[derive(Clone, Debug, Default)]
pub struct NodeRequest {
    pub entries: SmallVec<[TimeViewEntry; 2]>,
    pub concatenated_transform: Option<Transform>,
}

impl NodeRequest {
    /// Unions `roi` into the existing entry for `(time, view)`, or appends
    /// a new one (§8 property 2: "Pass 2's union of per-visit RoIs is a
    /// superset of every individual RoI requested during Pass 1").
    pub fn union_roi(&mut self, time: f64, view: u32, roi: RectD) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.time == time && e.view == view) {
            existing.roi = existing.roi.union(&roi);
        } else {
            self.entries.push(TimeViewEntry { time, view, roi });
        }
    }

    #[must_use]
    pub fn roi_at(&self, time: f64, view: u32) -> Option<RectD> {
        self.entries.iter().find(|e| e.time == time && e.view == view).map(|e| e.roi)
    }
}

/// The complete plan for one frame request: every node reachable from the
/// root, with the region(s) of interest it must produce.
pub type FrameRequestMap = FxHashMap<NodeId, NodeRequest>;
