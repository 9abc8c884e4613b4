//! Upstream dependency closure.
//!
//! Before a render begins, walks the root's upstream closure once —
//! ordinary graph input edges plus the declared expression-dependency
//! edges a node's knobs may reference via the `KnobHost` contract — so
//! every reachable node has an installed notion of the active render's
//! `(time, view, age)` available to non-rendering helper calls (parameter
//! evaluation, UI feedback) that run outside the planner/executor's
//! explicit `&RenderCtx` threading.

use rustc_hash::FxHashSet;

use crate::node::{NodeGraph, NodeId};

/// Read-only access to the declared expression-dependency edges a node's
/// parameters may reference, beyond its graph input edges. The knob object
/// model itself is out of scope; this is the minimal surface the dependency
/// tracker needs from it.
pub trait KnobHost {
    /// Other nodes this node's parameters read from via expressions.
    fn expression_dependencies(&self, node: NodeId) -> Vec<NodeId>;
}

/// A `KnobHost` with no expressions at all, for graphs that don't use one.
pub struct NoExpressions;

impl KnobHost for NoExpressions {
    fn expression_dependencies(&self, _node: NodeId) -> Vec<NodeId> {
        Vec::new()
    }
}

pub struct DependencyTracker;

impl DependencyTracker {
    /// Returns every node in `root`'s upstream closure, each exactly once.
    /// The graph is acyclic by construction (checked in
    /// `NodeGraph::add_edge`), so no recursion-depth guard is needed beyond
    /// the visited set.
    #[must_use]
    pub fn closure(graph: &NodeGraph, root: NodeId, knobs: &dyn KnobHost) -> Vec<NodeId> {
        let mut visited = FxHashSet::default();
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            order.push(node);
            let Some(slot) = graph.get(node) else { continue };
            for input in 0..slot.node.input_count() {
                if let Some(source) = graph.input(node, input) {
                    stack.push(source);
                }
            }
            for dep in knobs.expression_dependencies(node) {
                stack.push(dep);
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::RectD;
    use crate::test_support::{GeneratorNode, MergeNode, PassthroughNode};

    #[test]
    fn closure_reaches_every_upstream_node_exactly_once() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node("a", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 1.0, 1.0))));
        let b = graph.add_node("b", Box::new(PassthroughNode::new(RectD::new(0.0, 0.0, 1.0, 1.0))));
        let c = graph.add_node("c", Box::new(MergeNode::new(RectD::new(0.0, 0.0, 1.0, 1.0), 2)));
        graph.add_edge(c, 0, a);
        graph.add_edge(c, 1, b);
        graph.add_edge(b, 0, a);
        let closure = DependencyTracker::closure(&graph, c, &NoExpressions);
        assert_eq!(closure.len(), 3);
        assert!(closure.contains(&a));
        assert!(closure.contains(&b));
        assert!(closure.contains(&c));
    }

    #[test]
    fn expression_dependencies_are_included() {
        struct FakeKnobs;
        impl KnobHost for FakeKnobs {
            fn expression_dependencies(&self, _node: NodeId) -> Vec<NodeId> {
                Vec::new()
            }
        }
        let mut graph = NodeGraph::new();
        let a = graph.add_node("a", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 1.0, 1.0))));
        let closure = DependencyTracker::closure(&graph, a, &FakeKnobs);
        assert_eq!(closure, vec![a]);
    }
}
