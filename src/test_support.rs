//! Minimal fake [`Node`] implementations used by unit and integration
//! tests: a generator, a single-input pass-through (stands in for a
//! blur-like effect), a merge, an identity-chain node, and a node that
//! applies an affine transform. Mirrors the teacher's own small
//! hand-built test fixtures (`tests/scene_tests.rs`).

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::geom::{RectD, RectI, Transform};
use crate::node::{
    Capabilities, Identity, InputKind, Node, RenderArgs, RenderStatus, Support, ThreadSafety, TimeRange,
};
use crate::render_ctx::RenderCtx;

fn next_hash() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A zero-input node with a fixed region of definition. Stands in for an
/// image read or a generator effect.
pub struct GeneratorNode {
    hash: u64,
    rod: RectD,
}

impl GeneratorNode {
    #[must_use]
    pub fn new(rod: RectD) -> Self {
        Self { hash: next_hash(), rod }
    }
}

impl Node for GeneratorNode {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn input_count(&self) -> u32 {
        0
    }

    fn input_kind(&self, _input: u32) -> InputKind {
        InputKind::Regular
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SUPPORTS_TILES | Capabilities::SUPPORTS_MULTI_RESOLUTION
    }

    fn supports_render_scale(&self) -> Support {
        Support::Yes
    }

    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::FullySafeFrame
    }

    fn region_of_definition(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Result<RectD> {
        Ok(self.rod)
    }

    fn regions_of_interest(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _scale: f64,
        _output_rod: RectD,
        _render_window: RectD,
        _view: u32,
    ) -> FxHashMap<u32, RectD> {
        FxHashMap::default()
    }

    fn frames_needed(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _view: u32,
    ) -> FxHashMap<u32, FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>> {
        FxHashMap::default()
    }

    fn time_domain(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_identity(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _window: RectI, _view: u32) -> Identity {
        Identity::NotIdentity
    }

    fn get_transform(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Option<(u32, Transform)> {
        None
    }

    fn render(&self, _ctx: &RenderCtx, args: &RenderArgs<'_>) -> RenderStatus {
        let mut data = args.output.write();
        if data.is_empty() {
            args.output.ensure_allocated();
            data = args.output.write();
        }
        for v in data.iter_mut() {
            *v = 1.0;
        }
        RenderStatus::Ok
    }
}

/// A single-input node that requests its entire input at the node's own
/// requested window, with a fixed region of definition equal to its
/// input's (queried lazily — here fixed for simplicity). Stands in for a
/// blur-like filter.
pub struct PassthroughNode {
    hash: u64,
    rod: RectD,
}

impl PassthroughNode {
    #[must_use]
    pub fn new(rod: RectD) -> Self {
        Self { hash: next_hash(), rod }
    }
}

impl Node for PassthroughNode {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn input_count(&self) -> u32 {
        1
    }

    fn input_kind(&self, _input: u32) -> InputKind {
        InputKind::Regular
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SUPPORTS_TILES
    }

    fn supports_render_scale(&self) -> Support {
        Support::Yes
    }

    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::FullySafe
    }

    fn region_of_definition(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Result<RectD> {
        Ok(self.rod)
    }

    fn regions_of_interest(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _scale: f64,
        _output_rod: RectD,
        render_window: RectD,
        _view: u32,
    ) -> FxHashMap<u32, RectD> {
        let mut m = FxHashMap::default();
        m.insert(0, render_window);
        m
    }

    fn frames_needed(
        &self,
        _ctx: &RenderCtx,
        time: f64,
        view: u32,
    ) -> FxHashMap<u32, FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>> {
        let mut m = FxHashMap::default();
        let mut per_view = FxHashMap::default();
        per_view.insert(view, smallvec::smallvec![TimeRange { first: time, last: time }]);
        m.insert(0, per_view);
        m
    }

    fn time_domain(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_identity(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _window: RectI, _view: u32) -> Identity {
        Identity::NotIdentity
    }

    fn get_transform(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Option<(u32, Transform)> {
        None
    }

    fn render(&self, _ctx: &RenderCtx, args: &RenderArgs<'_>) -> RenderStatus {
        if args.output.read().is_empty() {
            args.output.ensure_allocated();
        }
        RenderStatus::Ok
    }
}

/// An N-input node that requests every input at its own window. Stands in
/// for a merge/comp effect.
pub struct MergeNode {
    hash: u64,
    rod: RectD,
    n_inputs: u32,
}

impl MergeNode {
    #[must_use]
    pub fn new(rod: RectD, n_inputs: u32) -> Self {
        Self { hash: next_hash(), rod, n_inputs }
    }
}

impl Node for MergeNode {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn input_count(&self) -> u32 {
        self.n_inputs
    }

    fn input_kind(&self, _input: u32) -> InputKind {
        InputKind::Regular
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SUPPORTS_TILES | Capabilities::HOST_MIXING
    }

    fn supports_render_scale(&self) -> Support {
        Support::Yes
    }

    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::FullySafeFrame
    }

    fn region_of_definition(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Result<RectD> {
        Ok(self.rod)
    }

    fn regions_of_interest(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _scale: f64,
        _output_rod: RectD,
        render_window: RectD,
        _view: u32,
    ) -> FxHashMap<u32, RectD> {
        (0..self.n_inputs).map(|i| (i, render_window)).collect()
    }

    fn frames_needed(
        &self,
        _ctx: &RenderCtx,
        time: f64,
        view: u32,
    ) -> FxHashMap<u32, FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>> {
        (0..self.n_inputs)
            .map(|i| {
                let mut per_view = FxHashMap::default();
                per_view.insert(view, smallvec::smallvec![TimeRange { first: time, last: time }]);
                (i, per_view)
            })
            .collect()
    }

    fn time_domain(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_identity(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _window: RectI, _view: u32) -> Identity {
        Identity::NotIdentity
    }

    fn get_transform(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Option<(u32, Transform)> {
        None
    }

    fn render(&self, _ctx: &RenderCtx, args: &RenderArgs<'_>) -> RenderStatus {
        if args.output.read().is_empty() {
            args.output.ensure_allocated();
        }
        RenderStatus::Ok
    }
}

/// A node that is always identity on input 0, optionally at a shifted
/// time — stands in for a no-op (e.g. a disabled effect, or a time-offset
/// passthrough).
pub struct IdentityChainNode {
    hash: u64,
    rod: RectD,
    time_offset: f64,
}

impl IdentityChainNode {
    #[must_use]
    pub fn new(rod: RectD, time_offset: f64) -> Self {
        Self { hash: next_hash(), rod, time_offset }
    }
}

impl Node for IdentityChainNode {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn input_count(&self) -> u32 {
        1
    }

    fn input_kind(&self, _input: u32) -> InputKind {
        InputKind::Regular
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SUPPORTS_TILES
    }

    fn supports_render_scale(&self) -> Support {
        Support::Yes
    }

    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::FullySafeFrame
    }

    fn region_of_definition(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Result<RectD> {
        Ok(self.rod)
    }

    fn regions_of_interest(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _scale: f64,
        _output_rod: RectD,
        render_window: RectD,
        _view: u32,
    ) -> FxHashMap<u32, RectD> {
        let mut m = FxHashMap::default();
        m.insert(0, render_window);
        m
    }

    fn frames_needed(
        &self,
        _ctx: &RenderCtx,
        time: f64,
        view: u32,
    ) -> FxHashMap<u32, FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>> {
        let mut m = FxHashMap::default();
        let mut per_view = FxHashMap::default();
        let t = time + self.time_offset;
        per_view.insert(view, smallvec::smallvec![TimeRange { first: t, last: t }]);
        m.insert(0, per_view);
        m
    }

    fn time_domain(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_identity(&self, _ctx: &RenderCtx, time: f64, _scale: f64, _window: RectI, _view: u32) -> Identity {
        Identity::On { input: 0, time: time + self.time_offset }
    }

    fn get_transform(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Option<(u32, Transform)> {
        None
    }

    fn render(&self, _ctx: &RenderCtx, _args: &RenderArgs<'_>) -> RenderStatus {
        RenderStatus::Ok
    }
}

/// A node that redirects its fetch through a translation, concatenating
/// with any accumulated upstream transform (§4.3 d, §8 property 8).
pub struct TransformChainNode {
    hash: u64,
    rod: RectD,
    transform: Transform,
}

impl TransformChainNode {
    #[must_use]
    pub fn new(rod: RectD, transform: Transform) -> Self {
        Self { hash: next_hash(), rod, transform }
    }
}

impl Node for TransformChainNode {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn input_count(&self) -> u32 {
        1
    }

    fn input_kind(&self, _input: u32) -> InputKind {
        InputKind::Regular
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SUPPORTS_TILES
    }

    fn supports_render_scale(&self) -> Support {
        Support::Yes
    }

    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::FullySafeFrame
    }

    fn region_of_definition(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Result<RectD> {
        Ok(self.rod)
    }

    fn regions_of_interest(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _scale: f64,
        _output_rod: RectD,
        render_window: RectD,
        _view: u32,
    ) -> FxHashMap<u32, RectD> {
        let mut m = FxHashMap::default();
        m.insert(0, render_window);
        m
    }

    fn frames_needed(
        &self,
        _ctx: &RenderCtx,
        time: f64,
        view: u32,
    ) -> FxHashMap<u32, FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>> {
        let mut m = FxHashMap::default();
        let mut per_view = FxHashMap::default();
        per_view.insert(view, smallvec::smallvec![TimeRange { first: time, last: time }]);
        m.insert(0, per_view);
        m
    }

    fn time_domain(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_identity(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _window: RectI, _view: u32) -> Identity {
        Identity::NotIdentity
    }

    fn get_transform(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Option<(u32, Transform)> {
        Some((0, self.transform))
    }

    fn render(&self, _ctx: &RenderCtx, _args: &RenderArgs<'_>) -> RenderStatus {
        RenderStatus::Ok
    }
}

/// A zero-input node with a caller-chosen render-scale support level that
/// records the last `scale` it was asked to render at — lets tests assert
/// the executor downgrades a `No`/`Maybe` node to scale 1 regardless of the
/// requested mip-level (§4.3 Pass 1 step (b), §4.5 step 6).
pub struct ScaleRecordingNode {
    hash: u64,
    rod: RectD,
    support: Support,
    last_scale: std::sync::Arc<AtomicU64>,
}

impl ScaleRecordingNode {
    /// Returns the node along with a shared handle tests can read
    /// [`Self::last_scale`] through after the node has been moved into a
    /// [`crate::node::NodeGraph`].
    #[must_use]
    pub fn new(rod: RectD, support: Support) -> (Self, std::sync::Arc<AtomicU64>) {
        let last_scale = std::sync::Arc::new(AtomicU64::new(f64::NAN.to_bits()));
        (Self { hash: next_hash(), rod, support, last_scale: last_scale.clone() }, last_scale)
    }

    #[must_use]
    pub fn last_scale(handle: &AtomicU64) -> f64 {
        f64::from_bits(handle.load(Ordering::Acquire))
    }
}

impl Node for ScaleRecordingNode {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn input_count(&self) -> u32 {
        0
    }

    fn input_kind(&self, _input: u32) -> InputKind {
        InputKind::Regular
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SUPPORTS_TILES | Capabilities::SUPPORTS_MULTI_RESOLUTION
    }

    fn supports_render_scale(&self) -> Support {
        self.support
    }

    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::FullySafeFrame
    }

    fn region_of_definition(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Result<RectD> {
        Ok(self.rod)
    }

    fn regions_of_interest(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _scale: f64,
        _output_rod: RectD,
        _render_window: RectD,
        _view: u32,
    ) -> FxHashMap<u32, RectD> {
        FxHashMap::default()
    }

    fn frames_needed(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _view: u32,
    ) -> FxHashMap<u32, FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>> {
        FxHashMap::default()
    }

    fn time_domain(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_identity(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _window: RectI, _view: u32) -> Identity {
        Identity::NotIdentity
    }

    fn get_transform(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Option<(u32, Transform)> {
        None
    }

    fn render(&self, _ctx: &RenderCtx, args: &RenderArgs<'_>) -> RenderStatus {
        self.last_scale.store(args.scale.to_bits(), Ordering::Release);
        let mut data = args.output.write();
        if data.is_empty() {
            drop(data);
            args.output.ensure_allocated();
            data = args.output.write();
        }
        for v in data.iter_mut() {
            *v = 1.0;
        }
        RenderStatus::Ok
    }
}

/// A node with a regular input and a mask input, writing `1.0` when a mask
/// image was wired into [`RenderArgs::mask`] and `0.0` otherwise — stands
/// in for an effect that blends through `HOST_MASKING`.
pub struct MaskAwareNode {
    hash: u64,
    rod: RectD,
}

impl MaskAwareNode {
    #[must_use]
    pub fn new(rod: RectD) -> Self {
        Self { hash: next_hash(), rod }
    }
}

impl Node for MaskAwareNode {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn input_count(&self) -> u32 {
        2
    }

    fn input_kind(&self, input: u32) -> InputKind {
        if input == 1 { InputKind::Mask } else { InputKind::Regular }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SUPPORTS_TILES | Capabilities::HOST_MASKING
    }

    fn supports_render_scale(&self) -> Support {
        Support::Yes
    }

    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::FullySafeFrame
    }

    fn region_of_definition(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Result<RectD> {
        Ok(self.rod)
    }

    fn regions_of_interest(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _scale: f64,
        _output_rod: RectD,
        render_window: RectD,
        _view: u32,
    ) -> FxHashMap<u32, RectD> {
        let mut m = FxHashMap::default();
        m.insert(0, render_window);
        m.insert(1, render_window);
        m
    }

    fn frames_needed(
        &self,
        _ctx: &RenderCtx,
        time: f64,
        view: u32,
    ) -> FxHashMap<u32, FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>> {
        let mut per_view = FxHashMap::default();
        per_view.insert(view, smallvec::smallvec![TimeRange { first: time, last: time }]);
        let mut m = FxHashMap::default();
        m.insert(0, per_view.clone());
        m.insert(1, per_view);
        m
    }

    fn time_domain(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_identity(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _window: RectI, _view: u32) -> Identity {
        Identity::NotIdentity
    }

    fn get_transform(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Option<(u32, Transform)> {
        None
    }

    fn render(&self, _ctx: &RenderCtx, args: &RenderArgs<'_>) -> RenderStatus {
        let mut data = args.output.write();
        if data.is_empty() {
            drop(data);
            args.output.ensure_allocated();
            data = args.output.write();
        }
        let v = if args.mask.is_some() { 1.0 } else { 0.0 };
        for x in data.iter_mut() {
            *x = v;
        }
        RenderStatus::Ok
    }
}

/// Shared begin/end counters read back by a test after the node that owns
/// them has been moved into a [`crate::node::NodeGraph`].
#[derive(Default)]
pub struct SequenceCounters {
    begins: AtomicU64,
    ends: AtomicU64,
}

impl SequenceCounters {
    #[must_use]
    pub fn begins(&self) -> u64 {
        self.begins.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn ends(&self) -> u64 {
        self.ends.load(Ordering::Acquire)
    }
}

/// A zero-input node that counts `begin_sequence`/`end_sequence` calls, so
/// tests can assert a sequential range render brackets the output node's
/// worker loop with them (§6).
pub struct SequenceTrackingNode {
    hash: u64,
    rod: RectD,
    counters: std::sync::Arc<SequenceCounters>,
}

impl SequenceTrackingNode {
    #[must_use]
    pub fn new(rod: RectD) -> (Self, std::sync::Arc<SequenceCounters>) {
        let counters = std::sync::Arc::new(SequenceCounters::default());
        (Self { hash: next_hash(), rod, counters: counters.clone() }, counters)
    }
}

impl Node for SequenceTrackingNode {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn input_count(&self) -> u32 {
        0
    }

    fn input_kind(&self, _input: u32) -> InputKind {
        InputKind::Regular
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SUPPORTS_TILES
    }

    fn supports_render_scale(&self) -> Support {
        Support::Yes
    }

    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::FullySafeFrame
    }

    fn region_of_definition(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Result<RectD> {
        Ok(self.rod)
    }

    fn regions_of_interest(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _scale: f64,
        _output_rod: RectD,
        _render_window: RectD,
        _view: u32,
    ) -> FxHashMap<u32, RectD> {
        FxHashMap::default()
    }

    fn frames_needed(
        &self,
        _ctx: &RenderCtx,
        _time: f64,
        _view: u32,
    ) -> FxHashMap<u32, FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>> {
        FxHashMap::default()
    }

    fn time_domain(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_identity(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _window: RectI, _view: u32) -> Identity {
        Identity::NotIdentity
    }

    fn get_transform(&self, _ctx: &RenderCtx, _time: f64, _scale: f64, _view: u32) -> Option<(u32, Transform)> {
        None
    }

    fn render(&self, _ctx: &RenderCtx, args: &RenderArgs<'_>) -> RenderStatus {
        if args.output.read().is_empty() {
            args.output.ensure_allocated();
        }
        RenderStatus::Ok
    }

    fn begin_sequence(&self) {
        self.counters.begins.fetch_add(1, Ordering::AcqRel);
    }

    fn end_sequence(&self) {
        self.counters.ends.fetch_add(1, Ordering::AcqRel);
    }
}
