//! Tunable policy knobs.
//!
//! Deserialized from a TOML project-settings file via `serde` + `toml`, a
//! plain-struct, file-backed settings layer.

use serde::{Deserialize, Serialize};

/// How an infinite (or partially infinite) region of definition is clipped
/// to a finite rectangle before it can be rendered.
///
/// Clipping against the project format unioned with the union of input
/// RoDs is the default, but this is a policy decision rather than a
/// universal law, so it is exposed rather than hard-coded.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InfiniteRodPolicy {
    /// Clip to `project_format ∪ inputs_union`.
    #[default]
    ProjectFormatUnionInputs,
    /// Clip to the project format only, ignoring input extents.
    ProjectFormatOnly,
    /// Fail the plan instead of clipping (strictest; useful for testing
    /// that a graph never relies on infinite-RoD nodes).
    Fail,
}

/// Whether the executor tracks a three-state trimap (unrendered /
/// rendering / rendered) or a plain two-state bitmap.
///
/// The three-state trimap lets waiting threads distinguish "someone else
/// is already rendering this" from "nobody has started" and wait instead
/// of redoing work, at the cost of extra bookkeeping that is wasted during
/// abort-heavy interactive scrubbing, where renders are cancelled more
/// often than they complete.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrimapPolicy {
    #[default]
    Full,
    Plain,
}

/// Distinguishes a sequential (writer) render, which must stop at the
/// first failure, from an interactive one, which keeps delivering whatever
/// frames succeed.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    Interactive,
    Sequential,
}

/// Top-level tunable settings, loaded once at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ram_budget_bytes: u64,
    pub disk_budget_bytes: u64,
    pub disk_cache_dir: Option<std::path::PathBuf>,
    /// `None` defers to `available_parallelism() - reserve`.
    pub worker_pool_size: Option<usize>,
    pub worker_pool_reserve: usize,
    pub enable_transform_concatenation: bool,
    pub infinite_rod_policy: InfiniteRodPolicy,
    pub trimap_policy: TrimapPolicy,
    pub render_mode: RenderMode,
    /// Upper bound on frames the scheduler will keep in flight ahead of
    /// the viewer during `play()`.
    pub frame_prefetch_cap: usize,
    /// Per-input cap on how many frames of a single continuous
    /// `frames_needed` range the planner will expand into individual
    /// upstream visits, guarding against exponential plan growth when a
    /// wide motion-blur-style range is requested through several stacked
    /// nodes (§4.3 g).
    pub planner_frame_range_cap: usize,
    pub target_fps: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ram_budget_bytes: 2 * 1024 * 1024 * 1024,
            disk_budget_bytes: 16 * 1024 * 1024 * 1024,
            disk_cache_dir: None,
            worker_pool_size: None,
            worker_pool_reserve: 1,
            enable_transform_concatenation: true,
            infinite_rod_policy: InfiniteRodPolicy::default(),
            trimap_policy: TrimapPolicy::default(),
            render_mode: RenderMode::default(),
            frame_prefetch_cap: 4,
            planner_frame_range_cap: 64,
            target_fps: 24.0,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&text)?;
        Ok(settings)
    }

    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
                .saturating_sub(self.worker_pool_reserve)
                .max(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings = toml::from_str("ram_budget_bytes = 1024\n").unwrap();
        assert_eq!(settings.ram_budget_bytes, 1024);
        assert_eq!(settings.target_fps, 24.0);
    }

    #[test]
    fn worker_threads_respects_explicit_override() {
        let mut settings = Settings::default();
        settings.worker_pool_size = Some(3);
        assert_eq!(settings.worker_threads(), 3);
    }
}
