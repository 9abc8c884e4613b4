//! Per-frame executor.
//!
//! Turns the planner's [`FrameRequestMap`] into actual pixels: allocates or
//! finds each node's output image in the [`ImageCache`], subdivides the
//! still-unrendered part of its render window into tiles, and dispatches
//! those tiles according to the node's declared [`ThreadSafety`] class.
//! The cache lookup, the trimap-guarded "minimal rect still needed" shrink,
//! and the canonical unpremult → mask/mix → downscale post-processing
//! order follow the same overall shape a tiled render-RoI pipeline takes
//! in mature compositing engines, with thread-safety-class dispatch
//! backed by a global lock plus a per-node instance lock.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::action_cache::ActionCacheEntry;
use crate::cancellation::CancellationToken;
use crate::config::Settings;
use crate::error::{Result, StrataError};
use crate::geom::{RectD, RectI, Transform, mip_scale};
use crate::image_store::{ImageCache, ImageKey, ImageRef, RectBitmap};
use crate::node::{Capabilities, Identity, InputKind, NodeGraph, NodeId, RenderArgs, RenderStatus, ThreadSafety};
use crate::planner::Planner;
use crate::render_ctx::{NanHandling, RenderCtx};
use crate::stats::Stats;

/// Locks shared by every [`Executor`] running against the same graph,
/// living for the lifetime of the application rather than one frame, so
/// an `unsafe`-class node serializes against itself across *every*
/// concurrently rendering frame, and an `instance-safe`-class node
/// serializes against itself the same way.
#[derive(Default)]
pub struct ExecutionLocks {
    global_unsafe: Mutex<()>,
    instance_locks: RwLock<FxHashMap<NodeId, Arc<Mutex<()>>>>,
}

impl ExecutionLocks {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn instance_lock(&self, node: NodeId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.instance_locks.read().get(&node) {
            return lock.clone();
        }
        self.instance_locks.write().entry(node).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Outcome of rendering a single tile.
enum TileOutcome {
    Ok,
    Aborted,
    Failed(String),
}

/// Drives the render of one `(root, time, view)` task end to end.
pub struct Executor<'a> {
    graph: &'a NodeGraph,
    cache: &'a ImageCache,
    settings: &'a Settings,
    planner: Planner<'a>,
    pool: &'a rayon::ThreadPool,
    locks: &'a ExecutionLocks,
}

impl<'a> Executor<'a> {
    #[must_use]
    pub fn new(
        graph: &'a NodeGraph,
        cache: &'a ImageCache,
        settings: &'a Settings,
        project_format: RectD,
        pool: &'a rayon::ThreadPool,
        locks: &'a ExecutionLocks,
    ) -> Self {
        Self { graph, cache, settings, planner: Planner::new(graph, project_format, settings), pool, locks }
    }

    /// Renders `window` (canonical coordinates) of `root`'s output at
    /// `time`/`view`/`mip_level`. Returns `None` for a zero-area window
    /// without issuing any render calls.
    #[allow(clippy::too_many_arguments)]
    pub fn render_frame(
        &self,
        root: NodeId,
        time: f64,
        view: u32,
        mip_level: u32,
        window: RectD,
        token: &CancellationToken,
        stats: &Arc<Stats>,
    ) -> Result<Option<ImageRef>> {
        if token.is_aborted(self.graph) {
            return Err(StrataError::Aborted);
        }
        let plan = Arc::new(self.planner.build_plan(root, time, view, mip_level, window, token, stats)?);
        let scale = mip_scale(mip_level);
        let window_px = window.to_pixel(scale, 1.0);
        let root_hash = self.graph.get(root).map(|s| s.node.hash()).unwrap_or(0);
        let ctx = self.planner.bootstrap_ctx(root, root_hash, time, view, mip_level, root, token, stats);
        let ctx = RenderCtx { plan, ..ctx };
        self.render_node_roi(&ctx, root, time, view, window_px)
    }

    fn cached_entry(&self, node: NodeId, ctx: &RenderCtx) -> Result<Arc<ActionCacheEntry>> {
        self.planner.cached_entry(node, ctx)
    }

    /// Resolves identity and transform-concatenation redirects starting at
    /// `node`, recursing through as many chained nodes as apply, then
    /// renders (or fetches) the first "real" node's image and — if any
    /// transform was walked through — resamples it into a transient buffer
    /// matching the originally requested rectangle. The chain never
    /// materializes a cache image for the intermediate transform nodes,
    /// only for the node the chain bottoms out at.
    fn render_node_roi(&self, ctx: &RenderCtx, node: NodeId, time: f64, view: u32, roi: RectI) -> Result<Option<ImageRef>> {
        if roi.is_null() {
            return Ok(None);
        }
        if ctx.token.is_aborted(self.graph) {
            return Err(StrataError::Aborted);
        }
        let Some(slot) = self.graph.get(node) else {
            return Err(StrataError::InvariantViolation("missing node".into()));
        };
        let hash = slot.node.hash();
        let node_ctx = ctx.for_node(node, hash).at(time, view);

        let entry = self.cached_entry(node, &node_ctx)?;
        // §4.3 Pass 1 step (b): pre-check identity/transform redirection at
        // the scale the node will actually be asked to act at, matching the
        // planner's decision for the same node (`Support::effective_scale`).
        let action_scale = slot.node.supports_render_scale().effective_scale(ctx.scale);
        let window_px = self.cached_rod(node, &node_ctx, &entry)?.to_pixel(action_scale, 1.0);

        if let Identity::On { input, time: identity_time } = slot.node.is_identity(&node_ctx, time, action_scale, window_px, view) {
            let Some(source) = self.graph.input(node, input) else { return Ok(None) };
            return self.render_node_roi(ctx, source, identity_time, view, roi);
        }

        if self.settings.enable_transform_concatenation {
            if let Some((input, transform)) = slot.node.get_transform(&node_ctx, time, action_scale, view) {
                let Some(source) = self.graph.input(node, input) else { return Ok(None) };
                return self.render_through_transform(ctx, node, source, time, view, roi, transform);
            }
        }

        self.render_concrete(ctx, node, &node_ctx, time, view, roi)
    }

    fn cached_rod(&self, node: NodeId, ctx: &RenderCtx, entry: &ActionCacheEntry) -> Result<RectD> {
        self.planner.clipped_rod(node, entry.region_of_definition, ctx)
    }

    /// Walks a transform-concatenation chain starting at `source`, composing
    /// `transform` with every further transform node encountered, then
    /// resamples the chain's bottom image once.
    fn render_through_transform(
        &self,
        ctx: &RenderCtx,
        requested_node: NodeId,
        mut source: NodeId,
        time: f64,
        view: u32,
        roi: RectI,
        mut composed: Transform,
    ) -> Result<Option<ImageRef>> {
        let scale = ctx.scale;
        let mut input_window = roi.to_canonical(scale, 1.0).transform_by(&composed.inverse().unwrap_or(Transform::identity()).0);
        loop {
            let Some(slot) = self.graph.get(source) else { return Ok(None) };
            let hash = slot.node.hash();
            let node_ctx = ctx.for_node(source, hash).at(time, view);
            let action_scale = slot.node.supports_render_scale().effective_scale(scale);
            if let Some((input, next_transform)) = slot.node.get_transform(&node_ctx, time, action_scale, view) {
                let Some(next_source) = self.graph.input(source, input) else { return Ok(None) };
                composed = composed.then(&next_transform);
                let Some(inv) = next_transform.inverse() else {
                    return Err(StrataError::PlanFailure { node: source, message: "transform is not invertible".into() });
                };
                input_window = input_window.transform_by(&inv.0);
                source = next_source;
                continue;
            }
            break;
        }
        let source_roi = input_window.to_pixel(scale, 1.0);
        let Some(source_image) = self.render_node_roi(ctx, source, time, view, source_roi)? else {
            return Ok(None);
        };
        let channels = source_image.num_channels;
        let key = ImageKey::new(requested_node, 0, time, view, ctx.mip_level, channels);
        let out = crate::image_store::ImageSlot::new_transient(key, roi, channels);
        resample_bilinear(&source_image, &out, &composed, scale);
        Ok(Some(out))
    }

    fn render_concrete(&self, ctx: &RenderCtx, node: NodeId, node_ctx: &RenderCtx, time: f64, view: u32, roi: RectI) -> Result<Option<ImageRef>> {
        let Some(slot) = self.graph.get(node) else {
            return Err(StrataError::InvariantViolation("missing node".into()));
        };
        // §4.3 Pass 1 step (b), §4.5 step 6: a node that does not declare
        // render-scale support at `ctx.scale` is rendered at scale 1 instead
        // and the result is downscaled to the requested mip-level here,
        // rather than handed the fractional scale directly.
        let action_scale = slot.node.supports_render_scale().effective_scale(ctx.scale);
        if action_scale != ctx.scale {
            return self.render_downscaled(ctx, node, time, view, roi, action_scale);
        }
        let hash = slot.node.hash();
        let num_channels = 4u8;

        let full_bounds = ctx
            .plan
            .get(&node)
            .and_then(|r| r.roi_at(time, view))
            .map(|r| r.union(&roi.to_canonical(ctx.scale, 1.0)).to_pixel(ctx.scale, 1.0))
            .unwrap_or(roi);

        let key = ImageKey::new(node, hash, time, view, ctx.mip_level, num_channels);
        let (image, _created) = self.cache.lookup_or_create(key, full_bounds, num_channels);
        if image.read().is_empty() {
            let bytes = image.ensure_allocated();
            self.cache.note_allocated(bytes);
        }

        let missing = loop {
            let claim = image.trimap().claim(roi);
            if let Some(wait_rect) = claim.wait_for {
                self.wait_for_in_flight_render(node, &image, wait_rect, ctx)?;
                continue;
            }
            break claim.to_render;
        };
        let Some(missing) = missing else {
            return Ok(Some(image));
        };

        let safety = slot.node.thread_safety();
        let rows_per_tile = if safety == ThreadSafety::FullySafeFrame { 1 } else { missing.height().max(1) };
        let tiles = missing.split_scanlines(rows_per_tile);

        let inputs = self.prefetch_inputs(ctx, node, node_ctx, time, view, missing)?;
        let inputs = Arc::new(inputs);

        // A mask input is only fetched and wired into `RenderArgs` when the
        // node declares `HOST_MASKING`; otherwise `prefetch_inputs` already
        // skipped it in the planner's `frames_needed` expansion and there is
        // nothing here to find.
        let mask_image = slot
            .node
            .capabilities()
            .contains(Capabilities::HOST_MASKING)
            .then(|| (0..slot.node.input_count()).find(|&i| slot.node.input_kind(i) == InputKind::Mask))
            .flatten()
            .and_then(|mask_input| inputs.get(&mask_input))
            .cloned();

        let run_tile = |tile: &RectI| -> TileOutcome {
            if ctx.token.is_aborted(self.graph) {
                return TileOutcome::Aborted;
            }
            let args = RenderArgs {
                time,
                view,
                scale: ctx.scale,
                roi: *tile,
                input_images: &inputs,
                output: &image,
                process_channels: 0b1111,
                mask: mask_image.as_ref(),
                mix: 1.0,
            };
            let timer = node_ctx.start_timer(&slot.name);
            let status = slot.node.render(node_ctx, &args);
            timer.finish();
            match status {
                RenderStatus::Ok => {
                    post_process(&image, *tile, node_ctx.flags.nan_handling());
                    image.trimap().mark_rendered(*tile);
                    TileOutcome::Ok
                }
                RenderStatus::Failed(msg) => TileOutcome::Failed(msg),
                RenderStatus::Aborted => TileOutcome::Aborted,
            }
        };

        let outcomes: Vec<TileOutcome> = match safety {
            ThreadSafety::Unsafe => {
                let _guard = self.locks.global_unsafe.lock();
                tiles.iter().map(run_tile).collect()
            }
            ThreadSafety::InstanceSafe => {
                let lock = self.locks.instance_lock(node);
                let _guard = lock.lock();
                tiles.iter().map(run_tile).collect()
            }
            ThreadSafety::FullySafe => tiles.iter().map(run_tile).collect(),
            ThreadSafety::FullySafeFrame => {
                self.pool.install(|| {
                    use rayon::prelude::*;
                    tiles.par_iter().map(run_tile).collect()
                })
            }
        };

        let mut aborted = false;
        let mut failure = None;
        for (tile, outcome) in tiles.iter().zip(outcomes.into_iter()) {
            match outcome {
                TileOutcome::Ok => {}
                TileOutcome::Aborted => {
                    image.trimap().clear(*tile);
                    aborted = true;
                }
                TileOutcome::Failed(msg) => {
                    image.trimap().clear(*tile);
                    failure.get_or_insert(msg);
                }
            }
        }
        if let Some(msg) = failure {
            return Err(StrataError::RenderFailure { node, message: msg });
        }
        if aborted {
            return Err(StrataError::Aborted);
        }

        Ok(Some(image))
    }

    /// Spins (yielding between polls) until no pixel in `rect` is still
    /// marked `Rendering` by whichever tile dispatch claimed it first, or
    /// the render is cancelled. This is the local recovery path for
    /// [`StrataError::TransientRace`]: the error never escapes this
    /// function, it only documents what the wait is waiting out.
    fn wait_for_in_flight_render(&self, node: NodeId, image: &ImageRef, rect: RectI, ctx: &RenderCtx) -> Result<()> {
        const MAX_SPINS: u32 = 10_000;
        for spin in 0..MAX_SPINS {
            if ctx.token.is_aborted(self.graph) {
                return Err(StrataError::Aborted);
            }
            let still_in_flight = {
                let trimap = image.trimap();
                (rect.y0..rect.y1).any(|y| (rect.x0..rect.x1).any(|x| trimap.state_at(x, y) == crate::image_store::PixelState::Rendering))
            };
            if !still_in_flight {
                return Ok(());
            }
            if spin == 0 {
                tracing::trace!(node = ?node, rect = ?rect, "waiting on an overlapping in-flight render");
            }
            std::thread::yield_now();
        }
        // Whoever claimed `rect` never finished — most likely it panicked
        // mid-tile. Reclaiming here, rather than spinning forever, is the
        // documented recovery for `StrataError::TransientRace`: it is
        // constructed for the record but never returned to the caller.
        let _ = StrataError::TransientRace { node, rect };
        tracing::warn!(node = ?node, rect = ?rect, "reclaiming a rectangle stuck in-flight past the wait bound");
        image.trimap().clear(rect);
        Ok(())
    }

    /// Renders `node` at scale 1 over the canonical equivalent of `roi`
    /// and downsamples the result into the cache entry for the originally
    /// requested `ctx.mip_level`/`ctx.scale`.
    ///
    /// Used in place of [`Self::render_concrete`]'s normal single-scale path
    /// when `node` does not declare render-scale support at `ctx.scale`
    /// (§4.3 Pass 1 step (b), §4.5 step 6). The full-resolution render goes
    /// through the ordinary `render_node_roi` path and lands in its own
    /// `mip_level: 0` cache entry, so it is itself cacheable and shared with
    /// any other request that needs this node at full resolution.
    fn render_downscaled(
        &self,
        ctx: &RenderCtx,
        node: NodeId,
        time: f64,
        view: u32,
        roi: RectI,
        action_scale: f64,
    ) -> Result<Option<ImageRef>> {
        let full_ctx = ctx.at_mip(0, action_scale);
        let full_roi = roi.to_canonical(ctx.scale, 1.0).to_pixel(action_scale, 1.0);
        let Some(full_image) = self.render_node_roi(&full_ctx, node, time, view, full_roi)? else {
            return Ok(None);
        };

        let Some(slot) = self.graph.get(node) else {
            return Err(StrataError::InvariantViolation("missing node".into()));
        };
        let hash = slot.node.hash();
        let num_channels = full_image.num_channels;

        let full_bounds = ctx
            .plan
            .get(&node)
            .and_then(|r| r.roi_at(time, view))
            .map(|r| r.union(&roi.to_canonical(ctx.scale, 1.0)).to_pixel(ctx.scale, 1.0))
            .unwrap_or(roi);

        let key = ImageKey::new(node, hash, time, view, ctx.mip_level, num_channels);
        let (image, _created) = self.cache.lookup_or_create(key, full_bounds, num_channels);
        if image.read().is_empty() {
            let bytes = image.ensure_allocated();
            self.cache.note_allocated(bytes);
        }

        let missing = loop {
            let claim = image.trimap().claim(roi);
            if let Some(wait_rect) = claim.wait_for {
                self.wait_for_in_flight_render(node, &image, wait_rect, ctx)?;
                continue;
            }
            break claim.to_render;
        };
        let Some(missing) = missing else {
            return Ok(Some(image));
        };

        if ctx.token.is_aborted(self.graph) {
            image.trimap().clear(missing);
            return Err(StrataError::Aborted);
        }
        downscale_tile(&full_image, &image, missing, action_scale, ctx.scale);
        image.trimap().mark_rendered(missing);

        Ok(Some(image))
    }

    fn prefetch_inputs(
        &self,
        ctx: &RenderCtx,
        node: NodeId,
        node_ctx: &RenderCtx,
        time: f64,
        view: u32,
        window: RectI,
    ) -> Result<FxHashMap<u32, ImageRef>> {
        let Some(slot) = self.graph.get(node) else { return Ok(FxHashMap::default()) };
        let window_canon = window.to_canonical(ctx.scale, 1.0);
        let rois = slot.node.regions_of_interest(node_ctx, time, ctx.scale, window_canon, window_canon, view);
        let mut out = FxHashMap::default();
        for input in 0..slot.node.input_count() {
            let Some(source) = self.graph.input(node, input) else { continue };
            let input_roi = rois.get(&input).copied().unwrap_or(window_canon).to_pixel(ctx.scale, 1.0);
            if let Some(image) = self.render_node_roi(ctx, source, time, view, input_roi)? {
                out.insert(input, image);
            }
        }
        Ok(out)
    }
}

/// Canonical post-processing order: unpremult before mask/mix, mask/mix
/// before any depth/component conversion or downscale. Only the
/// NaN-handling stage is implemented here; conversion and mask/mix are
/// host-provided blend steps applied by the node's own `render`
/// (`process_channels`/`mask`/`mix` are passed into the action rather than
/// layered on after it), so this stage is reduced to the diagnostic NaN
/// pass.
fn post_process(image: &ImageRef, tile: RectI, nan_handling: NanHandling) {
    if nan_handling == NanHandling::Propagate {
        return;
    }
    let mut data = image.write();
    for y in tile.y0..tile.y1 {
        for x in tile.x0..tile.x1 {
            let off = image.pixel_offset(x, y);
            for c in 0..image.num_channels as usize {
                let v = data[off + c];
                if !v.is_finite() {
                    match nan_handling {
                        NanHandling::Clamp => data[off + c] = 1.0,
                        NanHandling::Propagate => {}
                    }
                }
            }
        }
    }
}

/// Bilinear-resamples `src` through `transform` (mapping `dst` canonical
/// coordinates to `src` canonical coordinates via its inverse) into every
/// pixel of `dst`'s bounds.
fn resample_bilinear(src: &ImageRef, dst: &ImageRef, transform: &Transform, scale: f64) {
    let Some(inv) = transform.inverse() else { return };
    let channels = dst.num_channels as usize;
    let src_data = src.read();
    let mut dst_data = dst.write();
    for y in dst.bounds.y0..dst.bounds.y1 {
        for x in dst.bounds.x0..dst.bounds.x1 {
            let cx = f64::from(x) / scale;
            let cy = f64::from(y) / scale;
            let (sx, sy) = inv.apply(cx, cy);
            let sample = sample_bilinear(src, &src_data, sx * scale, sy * scale, channels);
            let off = dst.pixel_offset(x, y);
            for c in 0..channels {
                dst_data[off + c] = sample[c];
            }
        }
    }
}

/// Resamples `src` (rendered at `src_scale`) into `tile` of `dst` (target
/// `dst_scale`), both covering the same canonical region. No transform is
/// involved, only a change of scale — used when a node without render-scale
/// support was rendered at full resolution and must be downscaled to the
/// requested mip-level (§4.3 Pass 1 step (b), §4.5 step 6).
fn downscale_tile(src: &ImageRef, dst: &ImageRef, tile: RectI, src_scale: f64, dst_scale: f64) {
    let channels = dst.num_channels as usize;
    let src_data = src.read();
    let mut dst_data = dst.write();
    for y in tile.y0..tile.y1 {
        for x in tile.x0..tile.x1 {
            let cx = f64::from(x) / dst_scale;
            let cy = f64::from(y) / dst_scale;
            let sample = sample_bilinear(src, &src_data, cx * src_scale, cy * src_scale, channels);
            let off = dst.pixel_offset(x, y);
            for c in 0..channels {
                dst_data[off + c] = sample[c];
            }
        }
    }
}

fn sample_bilinear(src: &ImageRef, data: &[f32], px: f64, py: f64, channels: usize) -> smallvec::SmallVec<[f32; 4]> {
    let x0 = px.floor() as i32;
    let y0 = py.floor() as i32;
    let fx = (px - f64::from(x0)) as f32;
    let fy = (py - f64::from(y0)) as f32;
    let mut out: smallvec::SmallVec<[f32; 4]> = smallvec::smallvec![0.0f32; channels];
    let mut fetch = |xi: i32, yi: i32, weight: f32, out: &mut smallvec::SmallVec<[f32; 4]>| {
        if xi < src.bounds.x0 || xi >= src.bounds.x1 || yi < src.bounds.y0 || yi >= src.bounds.y1 || weight == 0.0 {
            return;
        }
        let off = src.pixel_offset(xi, yi);
        for c in 0..channels {
            out[c] += data.get(off + c).copied().unwrap_or(0.0) * weight;
        }
    };
    fetch(x0, y0, (1.0 - fx) * (1.0 - fy), &mut out);
    fetch(x0 + 1, y0, fx * (1.0 - fy), &mut out);
    fetch(x0, y0 + 1, (1.0 - fx) * fy, &mut out);
    fetch(x0 + 1, y0 + 1, fx * fy, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::node::{NodeGraph, Support};
    use crate::test_support::{GeneratorNode, MaskAwareNode, PassthroughNode, ScaleRecordingNode};

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn single_node_generator_renders_full_bounds_without_recursion() {
        let mut graph = NodeGraph::new();
        let root = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 100.0, 100.0))));
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let executor = Executor::new(&graph, &cache, &settings, RectD::new(0.0, 0.0, 100.0, 100.0), &pool, &locks);
        let age = graph.next_render_age(root).unwrap();
        let token = CancellationToken::new(root, age);
        let stats = Stats::new();
        let image = executor
            .render_frame(root, 0.0, 0, 0, RectD::new(0.0, 0.0, 100.0, 100.0), &token, &stats)
            .unwrap()
            .unwrap();
        assert_eq!(image.bounds, RectI::new(0, 0, 100, 100));
        assert!(image.trimap().minimal_rect(image.bounds).is_none());
    }

    #[test]
    fn zero_area_window_returns_no_image() {
        let mut graph = NodeGraph::new();
        let root = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 100.0, 100.0))));
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let executor = Executor::new(&graph, &cache, &settings, RectD::new(0.0, 0.0, 100.0, 100.0), &pool, &locks);
        let age = graph.next_render_age(root).unwrap();
        let token = CancellationToken::new(root, age);
        let stats = Stats::new();
        let image = executor.render_frame(root, 0.0, 0, 0, RectD::EMPTY, &token, &stats).unwrap();
        assert!(image.is_none());
    }

    #[test]
    fn racing_renders_of_same_node_return_same_image_pointer() {
        use std::sync::Barrier;
        let mut graph = NodeGraph::new();
        let root = graph.add_node("pass", Box::new(PassthroughNode::new(RectD::new(0.0, 0.0, 64.0, 64.0))));
        let src = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 64.0, 64.0))));
        graph.add_edge(root, 0, src);
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let executor = Executor::new(&graph, &cache, &settings, RectD::new(0.0, 0.0, 64.0, 64.0), &pool, &locks);
        let age = graph.next_render_age(root).unwrap();
        let barrier = Barrier::new(2);
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for _ in 0..2 {
                let executor = &executor;
                let graph = &graph;
                let barrier = &barrier;
                handles.push(scope.spawn(move || {
                    let token = CancellationToken::new(root, age);
                    let stats = Stats::new();
                    barrier.wait();
                    executor.render_frame(root, 0.0, 0, 0, RectD::new(0.0, 0.0, 64.0, 64.0), &token, &stats).unwrap()
                }));
                let _ = graph;
            }
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let a = results[0].as_ref().unwrap();
            let b = results[1].as_ref().unwrap();
            assert!(Arc::ptr_eq(a, b));
        });
    }

    #[test]
    fn node_without_render_scale_support_is_rendered_at_scale_one() {
        let mut graph = NodeGraph::new();
        let (node, last_scale) = ScaleRecordingNode::new(RectD::new(0.0, 0.0, 64.0, 64.0), Support::No);
        let root = graph.add_node("no_scale", Box::new(node));
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let executor = Executor::new(&graph, &cache, &settings, RectD::new(0.0, 0.0, 64.0, 64.0), &pool, &locks);
        let age = graph.next_render_age(root).unwrap();
        let token = CancellationToken::new(root, age);
        let stats = Stats::new();
        // mip_level 1 => requested scale 0.5; the node must still see 1.0.
        let image = executor
            .render_frame(root, 0.0, 0, 1, RectD::new(0.0, 0.0, 64.0, 64.0), &token, &stats)
            .unwrap()
            .unwrap();
        assert_eq!(ScaleRecordingNode::last_scale(&last_scale), 1.0);
        assert_eq!(image.bounds, RectI::new(0, 0, 32, 32));
    }

    #[test]
    fn node_declaring_maybe_render_scale_support_is_also_downgraded() {
        let mut graph = NodeGraph::new();
        let (node, last_scale) = ScaleRecordingNode::new(RectD::new(0.0, 0.0, 64.0, 64.0), Support::Maybe);
        let root = graph.add_node("maybe_scale", Box::new(node));
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let executor = Executor::new(&graph, &cache, &settings, RectD::new(0.0, 0.0, 64.0, 64.0), &pool, &locks);
        let age = graph.next_render_age(root).unwrap();
        let token = CancellationToken::new(root, age);
        let stats = Stats::new();
        executor.render_frame(root, 0.0, 0, 2, RectD::new(0.0, 0.0, 64.0, 64.0), &token, &stats).unwrap();
        assert_eq!(ScaleRecordingNode::last_scale(&last_scale), 1.0);
    }

    #[test]
    fn render_scale_support_yes_is_asked_at_the_requested_scale() {
        let mut graph = NodeGraph::new();
        let (node, last_scale) = ScaleRecordingNode::new(RectD::new(0.0, 0.0, 64.0, 64.0), Support::Yes);
        let root = graph.add_node("yes_scale", Box::new(node));
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let executor = Executor::new(&graph, &cache, &settings, RectD::new(0.0, 0.0, 64.0, 64.0), &pool, &locks);
        let age = graph.next_render_age(root).unwrap();
        let token = CancellationToken::new(root, age);
        let stats = Stats::new();
        executor.render_frame(root, 0.0, 0, 1, RectD::new(0.0, 0.0, 64.0, 64.0), &token, &stats).unwrap();
        assert_eq!(ScaleRecordingNode::last_scale(&last_scale), 0.5);
    }

    #[test]
    fn host_masking_wires_mask_input_into_render_args() {
        let mut graph = NodeGraph::new();
        let root = graph.add_node("mask_aware", Box::new(MaskAwareNode::new(RectD::new(0.0, 0.0, 32.0, 32.0))));
        let src = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 32.0, 32.0))));
        let mask = graph.add_node("mask_gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 32.0, 32.0))));
        graph.add_edge(root, 0, src);
        graph.add_edge(root, 1, mask);
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let executor = Executor::new(&graph, &cache, &settings, RectD::new(0.0, 0.0, 32.0, 32.0), &pool, &locks);
        let age = graph.next_render_age(root).unwrap();
        let token = CancellationToken::new(root, age);
        let stats = Stats::new();
        let image = executor
            .render_frame(root, 0.0, 0, 0, RectD::new(0.0, 0.0, 32.0, 32.0), &token, &stats)
            .unwrap()
            .unwrap();
        assert_eq!(image.read()[0], 1.0);
    }

    #[test]
    fn mask_input_left_unwired_without_host_masking_connected() {
        let mut graph = NodeGraph::new();
        let root = graph.add_node("mask_aware", Box::new(MaskAwareNode::new(RectD::new(0.0, 0.0, 32.0, 32.0))));
        let src = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 32.0, 32.0))));
        graph.add_edge(root, 0, src);
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let executor = Executor::new(&graph, &cache, &settings, RectD::new(0.0, 0.0, 32.0, 32.0), &pool, &locks);
        let age = graph.next_render_age(root).unwrap();
        let token = CancellationToken::new(root, age);
        let stats = Stats::new();
        let image = executor
            .render_frame(root, 0.0, 0, 0, RectD::new(0.0, 0.0, 32.0, 32.0), &token, &stats)
            .unwrap()
            .unwrap();
        assert_eq!(image.read()[0], 0.0);
    }
}
