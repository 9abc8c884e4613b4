//! Cancellation and render-age versioning.
//!
//! Every render carries a [`CancellationToken`] tying it to the render-age
//! the output node had when the render was launched. A render is aborted
//! the moment it is explicitly superseded or its output node's render age
//! moves on; the token is checked cooperatively at tile boundaries by the
//! executor, never via thread interruption.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::node::{NodeGraph, NodeId};

/// A render's identity for cancellation purposes: which output node it is
/// for, and what that node's render age was when the render was launched.
#[derive(Clone)]
pub struct CancellationToken {
    pub root: NodeId,
    pub render_age: u64,
    user_abort: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new(root: NodeId, render_age: u64) -> Self {
        Self { root, render_age, user_abort: Arc::new(AtomicBool::new(false)) }
    }

    /// Requests cooperative abort of this specific render (e.g. the user
    /// pressed stop, or the viewer disconnected). Distinct from an age
    /// bump, which supersedes rather than cancels.
    pub fn request_abort(&self) {
        self.user_abort.store(true, Ordering::Release);
    }

    /// True if this render should stop: either it was explicitly aborted,
    /// or `root`'s render age has moved past the age this token was issued
    /// for — a newer request for the same output supersedes an older one
    /// in flight.
    #[must_use]
    pub fn is_aborted(&self, graph: &NodeGraph) -> bool {
        if self.user_abort.load(Ordering::Acquire) {
            return true;
        }
        graph.current_render_age(self.root) != self.render_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::RectD;
    use crate::test_support::GeneratorNode;

    #[test]
    fn explicit_abort_is_observed() {
        let mut graph = NodeGraph::new();
        let root = graph.add_node("r", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 1.0, 1.0))));
        let age = graph.next_render_age(root).unwrap();
        let token = CancellationToken::new(root, age);
        assert!(!token.is_aborted(&graph));
        token.request_abort();
        assert!(token.is_aborted(&graph));
    }

    #[test]
    fn superseding_age_bump_aborts_older_token() {
        let mut graph = NodeGraph::new();
        let root = graph.add_node("r", Box::new(GeneratorNode::new(RectD::new(0.0, 0.0, 1.0, 1.0))));
        let age = graph.next_render_age(root).unwrap();
        let token = CancellationToken::new(root, age);
        graph.next_render_age(root).unwrap();
        assert!(token.is_aborted(&graph));
    }
}
