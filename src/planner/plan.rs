//! The two-pass request planner.
//!
//! Pass 1 walks the graph top-down from the root, at each node asking for
//! its region of definition, checking identity and transform redirection,
//! then asking for the regions of interest and frames needed from its
//! inputs and recursing into them. Pass 2 is implicit in
//! [`NodeRequest::union_roi`]: a node visited more than once (a diamond in
//! the graph, or two different time/view pairs) accumulates the union of
//! every region it was asked for, never loses an earlier request to a
//! later, smaller one.
//!
//! Mask inputs are skipped from frames-needed entirely (not fetched and
//! discarded) when masking is not enabled on the node; an `is_identity`
//! redirect reroutes to the named input at the named time without asking
//! that node's own `regions_of_interest`; an infinite region of definition
//! that cannot be clipped raises a `PlanFailure` before any clipping
//! heuristic runs.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::action_cache::ActionCacheEntry;
use crate::cancellation::CancellationToken;
use crate::config::{InfiniteRodPolicy, Settings};
use crate::error::{Result, StrataError};
use crate::geom::{RectD, Transform};
use crate::node::{Capabilities, Identity, InputKind, NodeGraph, NodeId};
use crate::render_ctx::{RenderCtx, RenderFlags};
use crate::stats::Stats;

use super::request::FrameRequestMap;

/// Builds [`FrameRequestMap`]s for a graph. Stateless; one instance can be
/// reused across frames.
pub struct Planner<'g> {
    graph: &'g NodeGraph,
    project_format: RectD,
    settings: &'g Settings,
}

impl<'g> Planner<'g> {
    #[must_use]
    pub fn new(graph: &'g NodeGraph, project_format: RectD, settings: &'g Settings) -> Self {
        Self { graph, project_format, settings }
    }

    /// Builds the plan to render `window` (canonical coordinates) of
    /// `root`'s output at `time`/`view`/`mip_level`.
    pub fn build_plan(
        &self,
        root: NodeId,
        time: f64,
        view: u32,
        mip_level: u32,
        window: RectD,
        token: &CancellationToken,
        stats: &Arc<Stats>,
    ) -> Result<FrameRequestMap> {
        let mut map: FrameRequestMap = FxHashMap::default();
        self.visit(root, time, view, mip_level, window, Transform::identity(), token, stats, &mut map)?;
        Ok(map)
    }

    /// Builds the `RenderCtx` a node action is called with. `pub(crate)` so
    /// [`crate::executor`] can bootstrap contexts identically when it needs
    /// to re-run an action outside the planning pass (e.g. re-deriving an
    /// input's region of definition while resolving a transform chain).
    pub(crate) fn bootstrap_ctx(
        &self,
        node: NodeId,
        hash: u64,
        time: f64,
        view: u32,
        mip_level: u32,
        root: NodeId,
        token: &CancellationToken,
        stats: &Arc<Stats>,
    ) -> RenderCtx {
        RenderCtx {
            time,
            view,
            mip_level,
            scale: crate::geom::mip_scale(mip_level),
            token: token.clone(),
            root,
            current_node: node,
            current_hash: hash,
            // Planning never reads `ctx.plan` (only `Node::render` does),
            // so an empty placeholder is safe here.
            plan: Arc::new(FxHashMap::default()),
            stats: stats.clone(),
            flags: RenderFlags::empty(),
        }
    }

    /// Public entry point used by [`crate::executor`] to re-derive the same
    /// memoized region-of-definition/identity decision the planner saw,
    /// without recomputing the node action. The action cache is shared, so
    /// this is a cache hit whenever the plan already visited `node` at this
    /// `(hash, time, view, mip_level)`.
    pub fn cached_entry(&self, node: NodeId, ctx: &RenderCtx) -> Result<Arc<ActionCacheEntry>> {
        self.action_entry(node, ctx)
    }

    /// Public wrapper around [`Self::clip_rod`] for the executor's own
    /// region-of-definition lookups outside the planning pass.
    pub fn clipped_rod(&self, node: NodeId, rod: RectD, ctx: &RenderCtx) -> Result<RectD> {
        self.clip_rod(node, rod, ctx)
    }

    #[must_use]
    pub fn project_format(&self) -> RectD {
        self.project_format
    }

    fn node_rod(&self, node: NodeId, ctx: &RenderCtx) -> Result<RectD> {
        let slot = self.graph.get(node).ok_or_else(|| StrataError::InvariantViolation("missing node".into()))?;
        let entry = self.action_entry(node, ctx)?;
        let _ = slot;
        Ok(entry.region_of_definition)
    }

    fn action_entry(&self, node: NodeId, ctx: &RenderCtx) -> Result<Arc<ActionCacheEntry>> {
        let slot = self.graph.get(node).ok_or_else(|| StrataError::InvariantViolation("missing node".into()))?;
        let hash = ctx.current_hash;
        let time = ctx.time;
        let view = ctx.view;
        let mip_level = ctx.mip_level;
        // §4.3 Pass 1 step (b): a node that does not declare render-scale
        // support is queried as though rendering at scale 1, not at the
        // fractional mip-level scale the caller requested, so the cached
        // identity/region-of-interest decisions match what the executor
        // will actually ask it to do (see `Support::effective_scale`).
        let action_scale = slot.node.supports_render_scale().effective_scale(ctx.scale);
        slot.action_cache.get_or_compute(hash, time, view, mip_level, || {
            let rod = slot.node.region_of_definition(ctx, time, action_scale, view).map_err(|e| match e {
                StrataError::PlanFailure { .. } => e,
                other => StrataError::PlanFailure { node, message: other.to_string() },
            })?;
            let window_px = rod.to_pixel(action_scale, 1.0);
            let identity = slot.node.is_identity(ctx, time, action_scale, window_px, view);
            let frames_needed = slot.node.frames_needed(ctx, time, view);
            let time_domain = slot.node.time_domain();
            Ok(ActionCacheEntry { region_of_definition: rod, identity, frames_needed, time_domain })
        })
    }

    fn clip_rod(&self, node: NodeId, rod: RectD, ctx: &RenderCtx) -> Result<RectD> {
        if !rod.is_infinite() {
            return Ok(rod);
        }
        match self.settings.infinite_rod_policy {
            InfiniteRodPolicy::Fail => Err(StrataError::PlanFailure {
                node,
                message: "region of definition is infinite and InfiniteRodPolicy::Fail is active".into(),
            }),
            InfiniteRodPolicy::ProjectFormatOnly => Ok(rod.clip_infinite(&self.project_format, &RectD::EMPTY)),
            InfiniteRodPolicy::ProjectFormatUnionInputs => {
                let mut inputs_union = RectD::EMPTY;
                if let Some(slot) = self.graph.get(node) {
                    for input in 0..slot.node.input_count() {
                        if let Some(src) = self.graph.input(node, input) {
                            if let Some(src_slot) = self.graph.get(src) {
                                let src_hash = src_slot.node.hash();
                                let src_ctx = ctx.for_node(src, src_hash);
                                if let Ok(src_rod) = self.node_rod(src, &src_ctx) {
                                    if !src_rod.is_infinite() {
                                        inputs_union = inputs_union.union(&src_rod);
                                    }
                                }
                            }
                        }
                    }
                }
                Ok(rod.clip_infinite(&self.project_format, &inputs_union))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        node: NodeId,
        time: f64,
        view: u32,
        mip_level: u32,
        window: RectD,
        accumulated_transform: Transform,
        token: &CancellationToken,
        stats: &Arc<Stats>,
        map: &mut FrameRequestMap,
    ) -> Result<()> {
        if token.is_aborted(self.graph) {
            return Err(StrataError::Aborted);
        }

        let slot = self.graph.get(node).ok_or_else(|| StrataError::InvariantViolation("missing node".into()))?;
        let hash = slot.node.hash();
        let root = token.root;
        let ctx = self.bootstrap_ctx(node, hash, time, view, mip_level, root, token, stats);

        let entry = self.action_entry(node, &ctx)?;
        let rod = self.clip_rod(node, entry.region_of_definition, &ctx)?;
        let clamped_window = window.intersect(&rod);

        map.entry(node).or_default().union_roi(time, view, clamped_window);

        // §4.3 Pass 1 step (b): a node declaring anything other than full
        // render-scale support is asked everything below as though
        // rendering at scale 1, matching the scale the executor will
        // actually invoke it at (it renders full-resolution and downscales
        // the result, rather than being handed a fractional `scale`).
        let action_scale = slot.node.supports_render_scale().effective_scale(ctx.scale);

        // Identity redirect: forward to the named input at the named time
        // without asking this node's own `regions_of_interest`.
        let window_px = clamped_window.to_pixel(action_scale, 1.0);
        if let Identity::On { input, time: identity_time } =
            slot.node.is_identity(&ctx, time, action_scale, window_px, view)
        {
            if let Some(source) = self.graph.input(node, input) {
                return self.visit(
                    source,
                    identity_time,
                    view,
                    mip_level,
                    clamped_window,
                    accumulated_transform,
                    token,
                    stats,
                    map,
                );
            }
            return Ok(());
        }

        // Transform concatenation: redirect the fetch through an affine
        // transform rather than treating this node as a normal processing
        // stage.
        if self.settings.enable_transform_concatenation {
            if let Some((input, node_transform)) = slot.node.get_transform(&ctx, time, action_scale, view) {
                if let Some(source) = self.graph.input(node, input) {
                    let composed = accumulated_transform.then(&node_transform);
                    map.entry(node).or_default().concatenated_transform = Some(composed);
                    let Some(inv) = node_transform.inverse() else {
                        return Err(StrataError::PlanFailure {
                            node,
                            message: "transform is not invertible".into(),
                        });
                    };
                    let transformed_window = clamped_window.transform_by(&inv.0);
                    return self.visit(
                        source,
                        time,
                        view,
                        mip_level,
                        transformed_window,
                        composed,
                        token,
                        stats,
                        map,
                    );
                }
            }
        }

        // Normal processing node: ask for RoI/frames-needed per input and
        // recurse.
        let rois = slot.node.regions_of_interest(&ctx, time, action_scale, rod, clamped_window, view);
        let frames_needed = slot.node.frames_needed(&ctx, time, view);

        for input in 0..slot.node.input_count() {
            if slot.node.input_kind(input) == InputKind::Mask
                && !slot.node.capabilities().contains(Capabilities::HOST_MASKING)
            {
                continue;
            }
            let Some(source) = self.graph.input(node, input) else {
                if slot.node.input_kind(input) == InputKind::Optional {
                    continue;
                }
                continue;
            };
            let input_roi = rois.get(&input).copied().unwrap_or(clamped_window);
            let default_range = {
                let mut m = FxHashMap::default();
                let mut per_view = FxHashMap::default();
                per_view.insert(view, smallvec::smallvec![crate::node::TimeRange { first: time, last: time }]);
                m.insert(input, per_view);
                m
            };
            let views_for_input = frames_needed.get(&input).or_else(|| default_range.get(&input));
            let Some(views_for_input) = views_for_input else { continue };
            let Some(ranges) = views_for_input.get(&view) else { continue };
            for range in ranges {
                // Integer frames in the range; continuous time ranges are
                // only meaningful for motion-blur sampling, out of scope
                // here beyond enumerating endpoints. A continuous range is
                // capped to `planner_frame_range_cap` frames (evenly
                // sampled across the range) so a wide motion-blur-style
                // request through several stacked nodes cannot blow the
                // plan up exponentially.
                let first = range.first.floor() as i64;
                let last = range.last.ceil() as i64;
                let cap = self.settings.planner_frame_range_cap.max(1) as i64;
                let span = (last - first + 1).max(1);
                let stride = (span + cap - 1) / cap;
                for frame in (first..=last).step_by(stride.max(1) as usize) {
                    self.visit(
                        source,
                        frame as f64,
                        view,
                        mip_level,
                        input_roi,
                        accumulated_transform,
                        token,
                        stats,
                        map,
                    )?;
                }
            }
        }

        Ok(())
    }
}
