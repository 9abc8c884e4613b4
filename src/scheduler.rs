//! Frame scheduler.
//!
//! Converts a user intent — play, pause, abort, seek, step, render a range,
//! or rerender the current frame — into an ordered stream of frame
//! requests, rendered concurrently by [`crate::executor::Executor`] but
//! delivered to the viewer strictly in admission order.
//!
//! Playback is driven as three explicit stages rather than one thread doing
//! everything: admission turns an intent into a batch of [`Task`]s, each
//! carrying the render age it bumped the output node to; the render stage
//! dispatches all of them onto the shared worker pool inside one
//! `rayon::Scope` and collects finished results behind a mutex keyed by age;
//! the output stage then walks the tasks in admission order, blocking on
//! each age's result as it becomes available, so the sink sees frames in
//! issue order regardless of which one actually finished rendering first.
//! `abort`/`seek` bump the output node's render age, which supersedes every
//! task still in flight for an older age via [`CancellationToken`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::cancellation::CancellationToken;
use crate::config::{RenderMode, Settings};
use crate::error::{Result, StrataError};
use crate::executor::{Executor, ExecutionLocks};
use crate::geom::RectD;
use crate::image_store::{ImageCache, ImageRef};
use crate::node::{NodeGraph, NodeId};
use crate::stats::Stats;

/// A user-facing playback intent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Intent {
    Play { forward: bool },
    Pause,
    Abort,
    Seek(f64),
    Step(i32),
    RenderRange { first: f64, last: f64 },
    RerenderCurrent,
}

/// One frame handed to the viewer or writer, tagged with the render age it
/// was admitted at so delivery order can be verified.
pub struct DeliveredFrame {
    pub age: u64,
    pub time: f64,
    pub view: u32,
    pub result: Result<Option<ImageRef>>,
}

/// Sink the output stage delivers frames to. A thin trait so tests can
/// substitute a `Vec`-backed recorder for an actual viewer/writer.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: DeliveredFrame);
}

/// Records every delivered frame in admission order, for tests and for the
/// CLI driver's `--stats`/exit-code bookkeeping.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<DeliveredFrame>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<DeliveredFrame> {
        std::mem::take(&mut self.frames.lock())
    }
}

impl FrameSink for RecordingSink {
    fn deliver(&self, frame: DeliveredFrame) {
        self.frames.lock().push(frame);
    }
}

/// One admitted frame request, carrying the render age it was admitted at
/// and the token the render stage polls for cooperative abort.
pub struct Task {
    pub age: u64,
    pub time: f64,
    pub view: u32,
    pub token: CancellationToken,
}

/// Per-session admission state: the render age the scheduler last bumped
/// to, and whether new tasks are currently being admitted. New tasks are
/// admitted only while not paused.
struct Session {
    paused: AtomicBool,
    aborted: AtomicBool,
    direction_forward: AtomicBool,
    playing: AtomicBool,
    current_time: AtomicI64,
}

impl Session {
    fn new(start_time: f64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            direction_forward: AtomicBool::new(true),
            playing: AtomicBool::new(false),
            current_time: AtomicI64::new(start_time.to_bits() as i64),
        }
    }

    fn current_time(&self) -> f64 {
        f64::from_bits(self.current_time.load(Ordering::Acquire) as u64)
    }

    fn set_current_time(&self, time: f64) {
        self.current_time.store(time.to_bits() as i64, Ordering::Release);
    }
}

/// Drives one output node's frame stream end to end.
///
/// Owns the bounded task queue and the per-age delivery gate; the render
/// stage's concurrency is bounded by the executor's own rayon pool, not by
/// this struct, so `render_stage_concurrency` only gates how many
/// in-flight [`Executor::render_frame`] calls this scheduler itself issues
/// at once via its task-queue slack.
pub struct FrameScheduler<'a> {
    graph: &'a NodeGraph,
    root: NodeId,
    cache: &'a ImageCache,
    settings: &'a Settings,
    project_format: RectD,
    pool: &'a rayon::ThreadPool,
    locks: &'a ExecutionLocks,
    session: Arc<Session>,
    /// Bound on how far the task queue may run ahead of the output stage
    /// before the render stage blocks.
    prefetch_cap: usize,
    mip_level: u32,
    view: u32,
    window: RectD,
}

impl<'a> FrameScheduler<'a> {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: &'a NodeGraph,
        root: NodeId,
        cache: &'a ImageCache,
        settings: &'a Settings,
        project_format: RectD,
        pool: &'a rayon::ThreadPool,
        locks: &'a ExecutionLocks,
        view: u32,
        mip_level: u32,
        window: RectD,
        start_time: f64,
    ) -> Self {
        Self {
            graph,
            root,
            cache,
            settings,
            project_format,
            pool,
            locks,
            session: Arc::new(Session::new(start_time)),
            prefetch_cap: settings.frame_prefetch_cap.max(1),
            mip_level,
            view,
            window,
        }
    }

    /// Applies one user intent, returning the (possibly empty) list of
    /// frame tasks newly admitted as a result.
    ///
    /// A direction/range-changing intent bumps the output node's render
    /// age, which supersedes every task still in flight for an older age —
    /// the executor observes this cooperatively via [`CancellationToken`].
    pub fn apply_intent(&self, intent: Intent) -> Vec<Task> {
        match intent {
            Intent::Pause => {
                self.session.paused.store(true, Ordering::Release);
                self.session.playing.store(false, Ordering::Release);
                Vec::new()
            }
            Intent::Abort => {
                self.session.aborted.store(true, Ordering::Release);
                self.session.playing.store(false, Ordering::Release);
                Vec::new()
            }
            Intent::Play { forward } => {
                self.session.paused.store(false, Ordering::Release);
                self.session.aborted.store(false, Ordering::Release);
                self.session.playing.store(true, Ordering::Release);
                self.session.direction_forward.store(forward, Ordering::Release);
                self.admit_range_from_current()
            }
            Intent::Seek(time) => {
                self.session.paused.store(false, Ordering::Release);
                self.session.aborted.store(false, Ordering::Release);
                self.session.set_current_time(time);
                vec![self.admit_one(time)]
            }
            Intent::Step(delta) => {
                let next = self.session.current_time() + f64::from(delta);
                self.session.set_current_time(next);
                vec![self.admit_one(next)]
            }
            Intent::RenderRange { first, last } => {
                self.session.paused.store(false, Ordering::Release);
                self.session.aborted.store(false, Ordering::Release);
                let mut tasks = Vec::new();
                let mut t = first;
                while t <= last {
                    tasks.push(self.admit_one(t));
                    t += 1.0;
                }
                tasks
            }
            Intent::RerenderCurrent => {
                // Invalidate the cache entries the changed parameter's node
                // produced, and re-submit the current time at a fresh age.
                self.cache.remove_all_with_holder(self.root);
                vec![self.admit_one(self.session.current_time())]
            }
        }
    }

    fn admit_one(&self, time: f64) -> Task {
        let age = self.graph.next_render_age(self.root).unwrap_or(0);
        Task { age, time, view: self.view, token: CancellationToken::new(self.root, age) }
    }

    /// Admits up to `prefetch_cap` further frames in the playback direction
    /// starting at the current time, one render age per frame.
    fn admit_range_from_current(&self) -> Vec<Task> {
        let forward = self.session.direction_forward.load(Ordering::Acquire);
        let start = self.session.current_time();
        (0..self.prefetch_cap)
            .map(|i| {
                let t = if forward { start + i as f64 } else { start - i as f64 };
                self.admit_one(t)
            })
            .collect()
    }

    /// Runs `tasks` to completion against `sink`, blocking on the per-age
    /// delivery gate so frames reach `sink` strictly in increasing age
    /// order regardless of which finishes rendering first.
    ///
    /// Playback obeys `settings.target_fps`: if the render stage finishes a
    /// tick early, the output stage sleeps to the next tick boundary; if
    /// late, the frame is delivered immediately, never sleeping to "catch
    /// down".
    pub fn run(&self, tasks: Vec<Task>, sink: &dyn FrameSink, stats: &Arc<Stats>) {
        if tasks.is_empty() {
            return;
        }
        let tick = Duration::from_secs_f64(1.0 / self.settings.target_fps.max(1.0));
        let order: Vec<u64> = tasks.iter().map(|t| t.age).collect();

        let executor = Executor::new(
            self.graph,
            self.cache,
            self.settings,
            self.project_format,
            self.pool,
            self.locks,
        );
        let executor = &executor;

        // §6: a sequential (writer) render brackets the contiguous range it
        // renders with `begin_sequence`/`end_sequence` per worker thread, so
        // a node that opens an external resource (a decoder, a file handle)
        // for the whole range can do so once rather than once per frame.
        // Interactive playback never brackets: frames are not a contiguous
        // range and the node has no fixed worker to bracket around.
        let sequential = self.settings.render_mode == RenderMode::Sequential;

        // Task-queue -> render-stage handoff: a channel bounded by
        // `prefetch_cap`, so a large `render_range` never queues more
        // renders ahead of the render stage than the prefetch cap allows —
        // the channel's own capacity is the backpressure, no separate
        // semaphore needed.
        let (task_tx, task_rx) = flume::bounded::<Task>(self.prefetch_cap.max(1));

        // Render-stage -> output-stage handoff: the per-age delivery gate,
        // woken via `Condvar` whenever a render completes rather than
        // polled.
        let gate = Arc::new((Mutex::new(FxHashMap::<u64, DeliveredFrame>::default()), Condvar::new()));

        std::thread::scope(|scope| {
            // Task-queue stage: feeds admitted tasks into the bounded
            // channel, blocking (off the output stage) once the render
            // stage's slack is exhausted.
            scope.spawn(move || {
                for task in tasks {
                    if task_tx.send(task).is_err() {
                        break;
                    }
                }
            });

            // Render stage: one worker per pool thread, each pulling the
            // next queued task and rendering it, honoring the task's own
            // cancellation token (superseded tasks abort quickly).
            let gate_for_render = Arc::clone(&gate);
            scope.spawn(move || {
                self.pool.scope(|pool_scope| {
                    for _ in 0..self.pool.current_num_threads().max(1) {
                        let rx = task_rx.clone();
                        let gate = Arc::clone(&gate_for_render);
                        let stats = stats.clone();
                        pool_scope.spawn(move |_| {
                            if sequential {
                                if let Some(slot) = self.graph.get(self.root) {
                                    slot.node.begin_sequence();
                                }
                            }
                            while let Ok(task) = rx.recv() {
                                let frame = if self.session.aborted.load(Ordering::Acquire) {
                                    DeliveredFrame { age: task.age, time: task.time, view: task.view, result: Err(StrataError::Aborted) }
                                } else {
                                    let result = executor.render_frame(
                                        self.root,
                                        task.time,
                                        task.view,
                                        self.mip_level,
                                        self.window,
                                        &task.token,
                                        &stats,
                                    );
                                    DeliveredFrame { age: task.age, time: task.time, view: task.view, result }
                                };
                                let (results, cvar) = &*gate;
                                results.lock().insert(frame.age, frame);
                                cvar.notify_all();
                            }
                            if sequential {
                                if let Some(slot) = self.graph.get(self.root) {
                                    slot.node.end_sequence();
                                }
                            }
                        });
                    }
                });
            });

            // Output stage: deliver strictly in age order, waiting on the
            // delivery gate rather than polling, honoring the target-FPS
            // tick for frames that were ready early.
            let mut tick_deadline = Instant::now();
            let (results, cvar) = &*gate;
            for age in order {
                let mut guard = results.lock();
                while !guard.contains_key(&age) {
                    cvar.wait(&mut guard);
                }
                let frame = guard.remove(&age).expect("just checked contains_key");
                drop(guard);
                let now = Instant::now();
                if now < tick_deadline {
                    std::thread::sleep(tick_deadline - now);
                }
                tick_deadline = Instant::now() + tick;
                sink.deliver(frame);
            }
        });
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.session.playing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.session.current_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RenderMode, Settings};
    use crate::test_support::{GeneratorNode, SequenceTrackingNode};

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn seek_admits_a_single_task_at_a_fresh_age() {
        let mut graph = NodeGraph::new();
        let root = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 32.0, 32.0))));
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let scheduler = FrameScheduler::new(
            &graph,
            root,
            &cache,
            &settings,
            RectD::new(0.0, 0.0, 32.0, 32.0),
            &pool,
            &locks,
            0,
            0,
            RectD::new(0.0, 0.0, 32.0, 32.0),
            0.0,
        );
        let tasks = scheduler.apply_intent(Intent::Seek(5.0));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].time, 5.0);
    }

    #[test]
    fn frames_are_delivered_in_strictly_increasing_age_order() {
        let mut graph = NodeGraph::new();
        let root = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 16.0, 16.0))));
        let mut settings = Settings::default();
        settings.target_fps = 1000.0;
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let scheduler = FrameScheduler::new(
            &graph,
            root,
            &cache,
            &settings,
            RectD::new(0.0, 0.0, 16.0, 16.0),
            &pool,
            &locks,
            0,
            0,
            RectD::new(0.0, 0.0, 16.0, 16.0),
            0.0,
        );
        let tasks = scheduler.apply_intent(Intent::RenderRange { first: 0.0, last: 3.0 });
        let sink = RecordingSink::new();
        let stats = Stats::new();
        scheduler.run(tasks, sink.as_ref(), &stats);
        let delivered = sink.take();
        let ages: Vec<u64> = delivered.iter().map(|f| f.age).collect();
        let mut sorted = ages.clone();
        sorted.sort_unstable();
        assert_eq!(ages, sorted);
        assert_eq!(delivered.len(), 4);
    }

    #[test]
    fn pause_then_play_does_not_admit_while_paused() {
        let mut graph = NodeGraph::new();
        let root = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 8.0, 8.0))));
        let settings = Settings::default();
        let cache = ImageCache::new(1 << 30, settings.trimap_policy);
        let pool = pool();
        let locks = ExecutionLocks::new();
        let scheduler = FrameScheduler::new(
            &graph,
            root,
            &cache,
            &settings,
            RectD::new(0.0, 0.0, 8.0, 8.0),
            &pool,
            &locks,
            0,
            0,
            RectD::new(0.0, 0.0, 8.0, 8.0),
            0.0,
        );
        scheduler.apply_intent(Intent::Pause);
        assert!(!scheduler.is_playing());
        let tasks = scheduler.apply_intent(Intent::Play { forward: true });
        assert!(scheduler.is_playing());
        assert_eq!(tasks.len(), scheduler.prefetch_cap);
    }
}
