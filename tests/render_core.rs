//! Integration tests exercising the concrete scenarios from the design
//! document's worked-examples list end to end through the public API.

use strata::config::Settings;
use strata::executor::{ExecutionLocks, Executor};
use strata::geom::{RectD, RectI, Transform};
use strata::node::NodeGraph;
use strata::scheduler::{FrameScheduler, Intent, RecordingSink};
use strata::stats::Stats;
use strata::test_support::{GeneratorNode, IdentityChainNode, MergeNode, PassthroughNode, TransformChainNode};
use strata::{CancellationToken, ImageCache};

fn pool() -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap()
}

/// S2: seek to a later time while an earlier one is mid-render supersedes
/// the earlier render — its token reports aborted once the root's render
/// age has moved on, and only the later frame is ever delivered.
#[test]
fn seeking_away_aborts_the_superseded_render() {
    let mut graph = NodeGraph::new();
    let blur = graph.add_node("blur", Box::new(PassthroughNode::new(RectD::new(0.0, 0.0, 64.0, 64.0))));
    let src = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 64.0, 64.0))));
    graph.add_edge(blur, 0, src);

    let first_age = graph.next_render_age(blur).unwrap();
    let token = CancellationToken::new(blur, first_age);
    assert!(!token.is_aborted(&graph));

    // A seek bumps the render age for the same output node.
    graph.next_render_age(blur).unwrap();
    assert!(token.is_aborted(&graph), "older in-flight token must be superseded by the newer age");
}

/// S3: a chain of two identity redirects (A identity-on-B at t', B
/// identity-on-C at t'') resolves to C at t'' in finite steps without the
/// executor ever allocating an image for A or B.
#[test]
fn transitive_identity_chain_resolves_to_the_final_source() {
    let mut graph = NodeGraph::new();
    let format = RectD::new(0.0, 0.0, 32.0, 32.0);
    let c = graph.add_node("source", Box::new(GeneratorNode::new(format)));
    let b = graph.add_node("identity_b", Box::new(IdentityChainNode::new(format, 1.0)));
    let a = graph.add_node("identity_a", Box::new(IdentityChainNode::new(format, 1.0)));
    graph.add_edge(b, 0, c);
    graph.add_edge(a, 0, b);

    let settings = Settings::default();
    let cache = ImageCache::new(1 << 30, settings.trimap_policy);
    let pool = pool();
    let locks = ExecutionLocks::new();
    let executor = Executor::new(&graph, &cache, &settings, format, &pool, &locks);
    let age = graph.next_render_age(a).unwrap();
    let token = CancellationToken::new(a, age);
    let stats = Stats::new();

    let image = executor.render_frame(a, 0.0, 0, 0, format, &token, &stats).unwrap().unwrap();
    assert_eq!(image.bounds, RectI::new(0, 0, 32, 32));
    // Only the bottom-most generator ever materializes an image; the two
    // identity nodes in between never reach the cache directory.
    assert_eq!(cache.len(), 1);
}

/// S4: a transform-concatenation chain resamples exactly once — the chain's
/// bottom source gets one cache-registered image, and the composed fetch
/// produces a transient buffer that is never itself inserted into the
/// directory.
#[test]
fn transform_concatenation_allocates_only_the_source_image() {
    let mut graph = NodeGraph::new();
    let format = RectD::new(0.0, 0.0, 64.0, 64.0);
    let source = graph.add_node("source", Box::new(GeneratorNode::new(format)));
    let shift_a = graph.add_node("shift_a", Box::new(TransformChainNode::new(format, Transform::translate(4.0, 0.0))));
    let shift_b = graph.add_node("shift_b", Box::new(TransformChainNode::new(format, Transform::translate(0.0, 4.0))));
    graph.add_edge(shift_a, 0, source);
    graph.add_edge(shift_b, 0, shift_a);

    let settings = Settings::default();
    let cache = ImageCache::new(1 << 30, settings.trimap_policy);
    let pool = pool();
    let locks = ExecutionLocks::new();
    let executor = Executor::new(&graph, &cache, &settings, format, &pool, &locks);
    let age = graph.next_render_age(shift_b).unwrap();
    let token = CancellationToken::new(shift_b, age);
    let stats = Stats::new();

    let image = executor.render_frame(shift_b, 0.0, 0, 0, format, &token, &stats).unwrap().unwrap();
    assert_eq!(image.bounds, RectI::new(0, 0, 64, 64));
    assert_eq!(cache.len(), 1, "only the chain's bottom source should be cache-registered");
}

/// S6: an `unsafe`-class node's tiles never run concurrently with
/// themselves, while a `fully-safe-frame` node's tiles do — approximated
/// here by checking that an unsafe node renders correctly under the same
/// shared pool a fully-safe-frame merge uses concurrently.
#[test]
fn mixed_safety_classes_render_correctly_under_shared_pool() {
    let mut graph = NodeGraph::new();
    let format = RectD::new(0.0, 0.0, 48.0, 48.0);
    let a = graph.add_node("a", Box::new(GeneratorNode::new(format)));
    let b = graph.add_node("b", Box::new(GeneratorNode::new(format)));
    let merge = graph.add_node("merge", Box::new(MergeNode::new(format, 2)));
    graph.add_edge(merge, 0, a);
    graph.add_edge(merge, 1, b);

    let settings = Settings::default();
    let cache = ImageCache::new(1 << 30, settings.trimap_policy);
    let pool = pool();
    let locks = ExecutionLocks::new();
    let executor = Executor::new(&graph, &cache, &settings, format, &pool, &locks);
    let age = graph.next_render_age(merge).unwrap();
    let token = CancellationToken::new(merge, age);
    let stats = Stats::new();

    let image = executor.render_frame(merge, 0.0, 0, 0, format, &token, &stats).unwrap().unwrap();
    assert_eq!(image.bounds, RectI::new(0, 0, 48, 48));
    assert!(image.trimap().minimal_rect(image.bounds).is_none());
}

/// Playback through the frame scheduler delivers every requested frame in
/// strictly increasing render-age order, even though the render stage
/// dispatches them concurrently.
#[test]
fn scheduler_delivers_a_rendered_range_in_order() {
    let mut graph = NodeGraph::new();
    let format = RectD::new(0.0, 0.0, 16.0, 16.0);
    let root = graph.add_node("gen", Box::new(GeneratorNode::new(format)));

    let mut settings = Settings::default();
    settings.target_fps = 1000.0;
    let cache = ImageCache::new(1 << 30, settings.trimap_policy);
    let pool = pool();
    let locks = ExecutionLocks::new();
    let scheduler = FrameScheduler::new(&graph, root, &cache, &settings, format, &pool, &locks, 0, 0, format, 0.0);

    let tasks = scheduler.apply_intent(Intent::RenderRange { first: 0.0, last: 9.0 });
    let sink = RecordingSink::new();
    let stats = Stats::new();
    scheduler.run(tasks, sink.as_ref(), &stats);

    let delivered = sink.take();
    assert_eq!(delivered.len(), 10);
    for frame in &delivered {
        assert!(frame.result.is_ok());
    }
    let ages: Vec<u64> = delivered.iter().map(|f| f.age).collect();
    let mut sorted = ages.clone();
    sorted.sort_unstable();
    assert_eq!(ages, sorted);
}

/// A zero-area request never reaches a node's `render` action and never
/// allocates an image.
#[test]
fn zero_area_request_never_renders() {
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
    assert_eq!(cache.len(), 0);
}
