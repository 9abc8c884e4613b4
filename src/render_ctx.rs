//! Render context.
//!
//! # Design Notes
//!
//! Stashing per-thread render arguments in thread-local storage, set up
//! once per tree and read implicitly by every action, makes actions hard
//! to call from anywhere but the one thread that installed the TLS, and
//! silently wrong if called from a thread that never did. The primary path
//! here threads an explicit `&RenderCtx` through every [`crate::node::Node`]
//! action call; TLS (`render_ctx::tls`) is kept only as a narrow
//! compatibility shim for the external knob/expression callback boundary,
//! which cannot be changed to take an extra parameter because it is outside
//! this crate's scope.

use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::node::NodeId;
use crate::planner::FrameRequestMap;
use crate::stats::{NodeTimer, Stats};

bitflags::bitflags! {
    /// Render-mode qualifiers that change node behavior without changing
    /// the requested region.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RenderFlags: u8 {
        /// This call is for analysis only (e.g. a histogram) and its
        /// result must never be cached or shown to the user as a frame.
        const IS_ANALYSIS     = 1 << 0;
        /// Render at reduced quality for interactive feedback.
        const DRAFT_MODE      = 1 << 1;
        /// A paint/rotoscope stroke is actively being drawn; nodes may
        /// skip expensive global recomputation.
        const IS_DURING_STROKE = 1 << 2;
        /// NaN/Inf pixel values should be clamped to 1.0 rather than
        /// propagated.
        const NAN_CLAMP       = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NanHandling {
    Propagate,
    Clamp,
}

impl RenderFlags {
    #[must_use]
    pub fn nan_handling(&self) -> NanHandling {
        if self.contains(RenderFlags::NAN_CLAMP) {
            NanHandling::Clamp
        } else {
            NanHandling::Propagate
        }
    }
}

/// Everything a [`crate::node::Node`] action needs to know about the
/// render it is participating in.
#[derive(Clone)]
pub struct RenderCtx {
    pub time: f64,
    pub view: u32,
    pub mip_level: u32,
    pub scale: f64,
    pub token: CancellationToken,
    pub root: NodeId,
    pub current_node: NodeId,
    pub current_hash: u64,
    pub plan: Arc<FrameRequestMap>,
    pub stats: Arc<Stats>,
    pub flags: RenderFlags,
}

impl RenderCtx {
    #[must_use]
    pub fn for_node(&self, node: NodeId, hash: u64) -> RenderCtx {
        RenderCtx { current_node: node, current_hash: hash, ..self.clone() }
    }

    /// Returns a copy of this context for a different `(time, view)` pair,
    /// e.g. when a recursive fetch follows an identity redirect to a
    /// different time.
    #[must_use]
    pub fn at(&self, time: f64, view: u32) -> RenderCtx {
        RenderCtx { time, view, ..self.clone() }
    }

    /// Returns a copy of this context retargeted at a different mip level
    /// and scale, e.g. when a node must be rendered at full resolution
    /// because it does not declare render-scale support at the originally
    /// requested scale.
    #[must_use]
    pub fn at_mip(&self, mip_level: u32, scale: f64) -> RenderCtx {
        RenderCtx { mip_level, scale, ..self.clone() }
    }

    #[must_use]
    pub fn start_timer(&self, name: &str) -> NodeTimer {
        self.stats.start_node(self.current_node, name)
    }
}

/// Narrow TLS compatibility shim for the external knob/expression callback
/// boundary only — do not reach for this from code inside this crate;
/// take `&RenderCtx` as a parameter instead.
pub mod tls {
    use super::RenderCtx;
    use std::cell::RefCell;

    thread_local! {
        static CURRENT: RefCell<Option<RenderCtx>> = const { RefCell::new(None) };
    }

    /// Installs `ctx` as the active context for the duration of `f`,
    /// restoring whatever was previously installed (supporting nested
    /// expression evaluation) afterwards.
    pub fn scoped<R>(ctx: RenderCtx, f: impl FnOnce() -> R) -> R {
        let previous = CURRENT.with(|c| c.borrow_mut().replace(ctx));
        let result = f();
        CURRENT.with(|c| *c.borrow_mut() = previous);
        result
    }

    /// Reads the currently-installed context, if any. Returns `None` when
    /// called from a thread outside an active `scoped` call, or from a
    /// worker thread render actions were not TLS-installed on.
    #[must_use]
    pub fn current() -> Option<RenderCtx> {
        CURRENT.with(|c| c.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_handling_defaults_to_propagate() {
        assert_eq!(RenderFlags::empty().nan_handling(), NanHandling::Propagate);
    }

    #[test]
    fn tls_scope_restores_previous_value_on_exit() {
        assert!(tls::current().is_none());
    }
}
