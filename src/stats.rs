//! Per-node timing accumulation, backing the CLI `--stats` flag.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::node::NodeId;

/// A single timed render action against one node, started via
/// [`Stats::start_node`] and finished by dropping the returned
/// [`NodeTimer`].
#[derive(Clone)]
pub struct NodeTimer {
    node: NodeId,
    node_name: Arc<str>,
    started: std::time::Instant,
    stats: Arc<Stats>,
}

impl NodeTimer {
    pub fn finish(self) {
        let elapsed = self.started.elapsed();
        self.stats.record(self.node, &self.node_name, elapsed);
    }
}

#[derive(Default)]
struct Accum {
    calls: u64,
    total: Duration,
}

/// Collects per-node render durations for the lifetime of one CLI
/// invocation. Cheap to clone (it's an `Arc`-backed handle) so it can be
/// threaded through `RenderCtx` into worker threads.
#[derive(Default)]
pub struct Stats {
    by_node: Mutex<FxHashMap<NodeId, (Arc<str>, Accum)>>,
}

impl Stats {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn start_node(self: &Arc<Self>, node: NodeId, name: &str) -> NodeTimer {
        NodeTimer { node, node_name: Arc::from(name), started: std::time::Instant::now(), stats: self.clone() }
    }

    fn record(&self, node: NodeId, name: &str, elapsed: Duration) {
        let mut map = self.by_node.lock();
        let entry = map.entry(node).or_insert_with(|| (Arc::from(name), Accum::default()));
        entry.1.calls += 1;
        entry.1.total += elapsed;
    }

    #[must_use]
    pub fn report(&self) -> Report {
        let map = self.by_node.lock();
        let mut nodes: Vec<NodeReport> = map
            .values()
            .map(|(name, accum)| NodeReport {
                node: name.to_string(),
                calls: accum.calls,
                total_ms: accum.total.as_secs_f64() * 1000.0,
            })
            .collect();
        nodes.sort_by(|a, b| b.total_ms.partial_cmp(&a.total_ms).unwrap_or(std::cmp::Ordering::Equal));
        Report { nodes }
    }
}

/// JSON-serializable timing report, written adjacent to each output file
/// when `--stats` is passed (§6).
#[derive(Debug, Serialize)]
pub struct Report {
    pub nodes: Vec<NodeReport>,
}

#[derive(Debug, Serialize)]
pub struct NodeReport {
    pub node: String,
    pub calls: u64,
    pub total_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::RectD;
    use crate::node::NodeGraph;
    use crate::test_support::GeneratorNode;

    #[test]
    fn report_accumulates_across_calls() {
        let stats = Stats::new();
        let mut graph = NodeGraph::new();
        let n = graph.add_node("gen", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 1.0, 1.0))));
        stats.start_node(n, "gen").finish();
        stats.start_node(n, "gen").finish();
        let report = stats.report();
        assert_eq!(report.nodes.len(), 1);
        assert_eq!(report.nodes[0].calls, 2);
    }
}
