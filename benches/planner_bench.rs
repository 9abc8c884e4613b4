//! Benchmarks the two-pass request planner (C3) over a small representative
//! graph: a generator feeding two parallel filters that converge on a merge.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use strata::cancellation::CancellationToken;
use strata::config::Settings;
use strata::geom::RectD;
use strata::node::NodeGraph;
use strata::planner::Planner;
use strata::stats::Stats;
use strata::test_support::{GeneratorNode, MergeNode, PassthroughNode};

fn build_graph() -> (NodeGraph, strata::NodeId, RectD) {
    let format = RectD::new(0.0, 0.0, 1920.0, 1080.0);
    let mut graph = NodeGraph::new();
    let src = graph.add_node("src", Box::new(GeneratorNode::new(format)));
    let blur_a = graph.add_node("blur_a", Box::new(PassthroughNode::new(format)));
    let blur_b = graph.add_node("blur_b", Box::new(PassthroughNode::new(format)));
    let merge = graph.add_node("merge", Box::new(MergeNode::new(format, 2)));
    graph.add_edge(blur_a, 0, src);
    graph.add_edge(blur_b, 0, src);
    graph.add_edge(merge, 0, blur_a);
    graph.add_edge(merge, 1, blur_b);
    (graph, merge, format)
}

fn planner_build_plan(c: &mut Criterion) {
    let (graph, root, format) = build_graph();
    let settings = Settings::default();
    let planner = Planner::new(&graph, format, &settings);
    let age = graph.next_render_age(root).unwrap();
    let token = CancellationToken::new(root, age);
    let stats = Stats::new();

    c.bench_function("planner_build_plan_diamond", |b| {
        b.iter(|| {
            let plan = planner.build_plan(root, black_box(0.0), 0, 0, format, &token, &stats).unwrap();
            black_box(plan.len())
        });
    });
}

criterion_group!(benches, planner_build_plan);
criterion_main!(benches);
