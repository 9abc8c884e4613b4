//! Node contract and the arena-based graph that owns nodes.
//!
//! # Design Notes
//!
//! Nodes never hold back-pointers or raw pointers to one another. The graph
//! owns every node in a [`slotmap::SlotMap`]; edges are [`NodeId`] keys,
//! which are generational — stale references left over after a node is
//! removed fail to resolve instead of dangling. [`slotmap`] provides that
//! generational validation for free, the same way handles to GPU resources
//! are kept elsewhere in this codebase.

use std::fmt;

use crate::error::Result;
use crate::geom::{RectD, RectI, Transform};
use crate::render_ctx::RenderCtx;

slotmap::new_key_type! {
    /// Stable identity of a node within a [`NodeGraph`].
    pub struct NodeId;
}

/// Role an input plays for a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// A regular image input.
    Regular,
    /// A mask input: contributes a single channel, pruned from
    /// frames-needed when disconnected or disabled.
    Mask,
    /// An optional input: the planner does not fail if it is unconnected.
    Optional,
}

/// Declared support level for a capability that can vary by situation
/// (`supports_render_scale` may answer "maybe" and defer to a per-call
/// check).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Support {
    Yes,
    No,
    Maybe,
}

impl Support {
    /// The scale a node should actually be asked to act at, given it
    /// declares `self` render-scale support and the caller wanted
    /// `requested_scale` (§4.3 Pass 1 step (b), §4.5 step 6).
    ///
    /// `No` always falls back to full resolution (scale 1) whenever the
    /// requested scale isn't already 1. `Maybe` has no further per-call
    /// negotiation mechanism in this contract (the node cannot tell the
    /// planner "actually, not this time"), so it is treated the same as
    /// `No` rather than risked at the wrong resolution.
    #[must_use]
    pub fn effective_scale(self, requested_scale: f64) -> f64 {
        if requested_scale == 1.0 {
            return requested_scale;
        }
        match self {
            Support::Yes => requested_scale,
            Support::No | Support::Maybe => 1.0,
        }
    }
}

bitflags::bitflags! {
    /// Static capability flags declared by a node, consulted by the planner
    /// and executor.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u16 {
        const SUPPORTS_TILES            = 1 << 0;
        const SUPPORTS_MULTI_RESOLUTION = 1 << 1;
        const MULTI_PLANAR              = 1 << 2;
        const HOST_MASKING              = 1 << 3;
        const HOST_MIXING               = 1 << 4;
    }
}

/// Thread-safety class declared per effect.
///
/// Determines the locking discipline the executor uses when dispatching
/// tiles for this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadSafety {
    /// No concurrency guarantees at all: all tiles for this node, across
    /// every concurrently rendering frame, serialize on one process-global
    /// lock.
    Unsafe,
    /// Safe to call concurrently from different frames, but not safe to
    /// call concurrently with itself within one frame: tiles for one frame
    /// serialize on a per-node lock.
    InstanceSafe,
    /// Safe to call concurrently with itself, but tiles within one frame
    /// still run one at a time (no internal state race, but no internal
    /// parallelism either).
    FullySafe,
    /// Fully reentrant: tiles within the same frame may run on different
    /// worker threads concurrently.
    FullySafeFrame,
}

/// A time range, inclusive on both ends, as used in `frames_needed` maps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub first: f64,
    pub last: f64,
}

/// Outcome of `is_identity`: either the node is not identity, or it is
/// identity on a given input at a (possibly different) time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Identity {
    NotIdentity,
    On { input: u32, time: f64 },
}

/// Outcome of a node render action.
#[derive(Debug)]
pub enum RenderStatus {
    Ok,
    Failed(String),
    Aborted,
}

/// The contract the render core consumes from a node.
///
/// Implementations are provided by the (out-of-scope) plugin host; the core
/// only depends on this trait. All methods that can be answered purely from
/// declared state and the node-hash are memoized by the action cache before
/// reaching the node.
pub trait Node: Send + Sync {
    /// 64-bit digest of the node's current parameter state.
    fn hash(&self) -> u64;
    fn input_count(&self) -> u32;
    fn input_kind(&self, input: u32) -> InputKind;

    fn capabilities(&self) -> Capabilities;
    fn supports_render_scale(&self) -> Support;
    fn thread_safety(&self) -> ThreadSafety;

    /// Region of definition in canonical coordinates, or an error message on
    /// failure.
    fn region_of_definition(&self, ctx: &RenderCtx, time: f64, scale: f64, view: u32) -> Result<RectD>;

    /// Regions of interest this node needs from each input, given its own
    /// region of interest (canonical coordinates).
    fn regions_of_interest(
        &self,
        ctx: &RenderCtx,
        time: f64,
        scale: f64,
        output_rod: RectD,
        render_window: RectD,
        view: u32,
    ) -> rustc_hash::FxHashMap<u32, RectD>;

    /// Frames this node will read from each input, per view, as time ranges.
    fn frames_needed(
        &self,
        ctx: &RenderCtx,
        time: f64,
        view: u32,
    ) -> rustc_hash::FxHashMap<u32, rustc_hash::FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>>;

    fn time_domain(&self) -> (f64, f64);

    fn is_identity(&self, ctx: &RenderCtx, time: f64, scale: f64, window: RectI, view: u32) -> Identity;

    /// An invertible affine transform this node applies, redirecting the
    /// fetch to the given input. `None` disables concatenation through this
    /// node.
    fn get_transform(&self, ctx: &RenderCtx, time: f64, scale: f64, view: u32) -> Option<(u32, Transform)>;

    /// Renders `roi` of `planes` into `output`, reading from `input_images`.
    fn render(&self, ctx: &RenderCtx, args: &RenderArgs<'_>) -> RenderStatus;

    fn begin_sequence(&self) {}
    fn end_sequence(&self) {}
}

/// Arguments passed to [`Node::render`].
pub struct RenderArgs<'a> {
    pub time: f64,
    pub view: u32,
    pub scale: f64,
    pub roi: RectI,
    pub input_images: &'a rustc_hash::FxHashMap<u32, crate::image_store::ImageRef>,
    pub output: &'a crate::image_store::ImageRef,
    pub process_channels: u8,
    pub mask: Option<&'a crate::image_store::ImageRef>,
    pub mix: f32,
}

/// One input edge: the source node and which of its outputs feeds this input.
#[derive(Clone, Copy, Debug)]
pub struct Edge {
    pub input: u32,
    pub source: NodeId,
}

/// A node slot in the graph: the boxed node plus per-node render state that
/// does not belong in the `Node` trait (render age, action cache).
pub struct NodeSlot {
    pub node: Box<dyn Node>,
    pub name: String,
    pub edges: Vec<Edge>,
    pub render_age: std::sync::atomic::AtomicU64,
    pub action_cache: crate::action_cache::ActionCache,
}

impl fmt::Debug for NodeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSlot")
            .field("name", &self.name)
            .field("edges", &self.edges)
            .finish_non_exhaustive()
    }
}

/// Owns every node in the graph. Nodes never hold pointers to one another;
/// all traversal goes through [`NodeId`] lookups against this arena.
#[derive(Default)]
pub struct NodeGraph {
    slots: slotmap::SlotMap<NodeId, NodeSlot>,
}

impl NodeGraph {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: slotmap::SlotMap::with_key() }
    }

    pub fn add_node(&mut self, name: impl Into<String>, node: Box<dyn Node>) -> NodeId {
        self.slots.insert(NodeSlot {
            node,
            name: name.into(),
            edges: Vec::new(),
            render_age: std::sync::atomic::AtomicU64::new(0),
            action_cache: crate::action_cache::ActionCache::default(),
        })
    }

    /// Connects `source`'s output to `target`'s `input`.
    ///
    /// # Panics
    /// Panics in debug builds if the edge would create a self-loop. The
    /// graph is otherwise assumed acyclic by construction; cycles are not
    /// detected beyond this direct check.
    pub fn add_edge(&mut self, target: NodeId, input: u32, source: NodeId) {
        debug_assert_ne!(target, source, "self-referential edge on node input {input}");
        if let Some(slot) = self.slots.get_mut(target) {
            slot.edges.retain(|e| e.input != input);
            slot.edges.push(Edge { input, source });
        }
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&NodeSlot> {
        self.slots.get(id)
    }

    #[must_use]
    pub fn input(&self, node: NodeId, input: u32) -> Option<NodeId> {
        self.slots.get(node)?.edges.iter().find(|e| e.input == input).map(|e| e.source)
    }

    pub fn remove(&mut self, id: NodeId) {
        self.slots.remove(id);
    }

    pub fn next_render_age(&self, id: NodeId) -> Option<u64> {
        self.slots
            .get(id)
            .map(|s| s.render_age.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1)
    }

    #[must_use]
    pub fn current_render_age(&self, id: NodeId) -> u64 {
        self.slots
            .get(id)
            .map_or(0, |s| s.render_age.load(std::sync::atomic::Ordering::SeqCst))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeSlot)> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::GeneratorNode;

    #[test]
    fn add_edge_replaces_existing_input() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node("a", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 10.0, 10.0))));
        let b = graph.add_node("b", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 10.0, 10.0))));
        let c = graph.add_node("c", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 10.0, 10.0))));
        graph.add_edge(c, 0, a);
        graph.add_edge(c, 0, b);
        assert_eq!(graph.input(c, 0), Some(b));
    }

    #[test]
    fn removed_node_id_no_longer_resolves() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node("a", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 10.0, 10.0))));
        graph.remove(a);
        assert!(graph.get(a).is_none());
    }

    #[test]
    fn render_age_is_monotonic_per_node() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node("a", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 10.0, 10.0))));
        let first = graph.next_render_age(a).unwrap();
        let second = graph.next_render_age(a).unwrap();
        assert!(second > first);
    }
}
