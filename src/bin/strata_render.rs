//! `strata-render`: a thin CLI driver over the render core.
//!
//! Building and populating an actual node graph from a project file is a
//! host responsibility this crate does not implement (project
//! serialization and file I/O readers/writers are external collaborators).
//! This binary demonstrates driving [`strata::scheduler::FrameScheduler`]
//! end to end against a small built-in demo graph, so the render core can
//! be exercised from the command line the way a real host's writer mode
//! would: `render --writer <name> --frames a-b[,c-d] --project <file>`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use strata::config::Settings;
use strata::executor::ExecutionLocks;
use strata::geom::RectD;
use strata::node::NodeGraph;
use strata::scheduler::{DeliveredFrame, FrameScheduler, FrameSink, Intent, RecordingSink};
use strata::stats::Stats;
use strata::test_support::{GeneratorNode, PassthroughNode};

#[derive(Parser)]
#[command(name = "strata-render", about = "Render a frame range from a compositing graph")]
struct Cli {
    /// Directory to write a rolling `strata-render.log` into, in addition to
    /// stderr. Omit to log to stderr only.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Renders a frame range and writes one file per frame.
    Render {
        /// Base name for output files; frame files are `<writer>.<frame>.strata`.
        #[arg(long)]
        writer: String,
        /// Frame ranges, e.g. `1-10` or `1-10,20-30`.
        #[arg(long)]
        frames: String,
        /// Path to a TOML settings file (falls back to defaults if omitted).
        #[arg(long)]
        project: Option<PathBuf>,
        /// Writes a per-node timing report adjacent to each output file.
        #[arg(long)]
        stats: bool,
        /// Directory output files are written into.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn parse_frame_ranges(spec: &str) -> Result<Vec<i64>> {
    let mut frames = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((a, b)) = part.split_once('-') else {
            bail!("invalid frame range `{part}`, expected `a-b`");
        };
        let first: i64 = a.trim().parse().with_context(|| format!("invalid frame range `{part}`"))?;
        let last: i64 = b.trim().parse().with_context(|| format!("invalid frame range `{part}`"))?;
        if last < first {
            bail!("invalid frame range `{part}`: last < first");
        }
        frames.extend(first..=last);
    }
    if frames.is_empty() {
        bail!("no frames requested");
    }
    Ok(frames)
}

/// A small built-in demo graph: a generator feeding a pass-through, 512x512.
/// Stands in for whatever graph the host would have deserialized from
/// `--project`.
fn demo_graph() -> (NodeGraph, strata::NodeId, RectD) {
    let format = RectD::new(0.0, 0.0, 512.0, 512.0);
    let mut graph = NodeGraph::new();
    let src = graph.add_node("generator", Box::new(GeneratorNode::new(format)));
    let root = graph.add_node("writer_input", Box::new(PassthroughNode::new(format)));
    graph.add_edge(root, 0, src);
    (graph, root, format)
}

struct FileSink<'a> {
    writer: &'a str,
    out_dir: &'a std::path::Path,
    write_stats: bool,
    stats: &'a std::sync::Arc<Stats>,
    any_failed: std::sync::atomic::AtomicBool,
}

impl FrameSink for FileSink<'_> {
    fn deliver(&self, frame: DeliveredFrame) {
        match frame.result {
            Ok(Some(image)) => {
                let path = self.out_dir.join(format!("{}.{:06}.strata", self.writer, frame.time as i64));
                if let Err(e) = write_image(&path, &image) {
                    error!(?path, error = %e, "failed writing output frame");
                    self.any_failed.store(true, std::sync::atomic::Ordering::Release);
                    return;
                }
                info!(frame = frame.time, age = frame.age, path = %path.display(), "wrote frame");
                if self.write_stats {
                    let stats_path = self.out_dir.join(format!("{}.{:06}.stats.json", self.writer, frame.time as i64));
                    if let Ok(json) = serde_json::to_vec_pretty(&self.stats.report()) {
                        let _ = std::fs::write(stats_path, json);
                    }
                }
            }
            Ok(None) => {
                warn!(frame = frame.time, "frame window was empty, nothing written");
            }
            Err(e) => {
                error!(frame = frame.time, error = %e, "frame failed");
                self.any_failed.store(true, std::sync::atomic::Ordering::Release);
            }
        }
    }
}

fn write_image(path: &std::path::Path, image: &strata::ImageRef) -> std::io::Result<()> {
    let data = image.read();
    let mut bytes = Vec::with_capacity(16 + data.len() * 4);
    bytes.extend_from_slice(&image.bounds.width().to_le_bytes());
    bytes.extend_from_slice(&image.bounds.height().to_le_bytes());
    bytes.extend_from_slice(&u32::from(image.num_channels).to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    for v in data.iter() {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(path, bytes)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Holding the guard for the whole of `main` keeps the non-blocking
    // writer's background flush thread alive; dropping it early truncates
    // the log on exit.
    let _log_guard = cli.log_dir.as_ref().map(|dir| {
        std::fs::create_dir_all(dir).ok();
        let file_appender = tracing_appender::rolling::never(dir, "strata-render.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .with_ansi(false)
            .init();
        guard
    });
    if cli.log_dir.is_none() {
        tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    }
    match cli.command {
        Command::Render { writer, frames, project, stats, out_dir } => {
            let settings = match project {
                Some(path) => Settings::load(&path).with_context(|| format!("loading project settings from {}", path.display()))?,
                None => Settings::default(),
            };
            std::fs::create_dir_all(&out_dir)?;

            let frame_list = parse_frame_ranges(&frames)?;
            let (graph, root, format) = demo_graph();
            let cache = strata::ImageCache::new(settings.ram_budget_bytes, settings.trimap_policy);
            if let Some(dir) = &settings.disk_cache_dir {
                cache.enable_disk_tier(dir, settings.disk_budget_bytes)?;
            }
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(settings.worker_threads())
                .build()
                .context("building worker pool")?;
            let locks = ExecutionLocks::new();

            let scheduler = FrameScheduler::new(
                &graph, root, &cache, &settings, format, &pool, &locks, 0, 0, format,
                frame_list[0] as f64,
            );
            let run_stats = Stats::new();

            let first = *frame_list.first().unwrap();
            let last = *frame_list.last().unwrap();
            let tasks = scheduler.apply_intent(Intent::RenderRange { first: first as f64, last: last as f64 });

            let recorder = RecordingSink::new();
            scheduler.run(tasks, recorder.as_ref(), &run_stats);
            let delivered = recorder.take();

            let sink = FileSink {
                writer: &writer,
                out_dir: &out_dir,
                write_stats: stats,
                stats: &run_stats,
                any_failed: std::sync::atomic::AtomicBool::new(false),
            };
            let sequential = settings.render_mode == strata::config::RenderMode::Sequential;
            let mut failed = false;
            for frame in delivered {
                let is_err = frame.result.is_err();
                sink.deliver(frame);
                if is_err {
                    failed = true;
                    if sequential {
                        break;
                    }
                }
            }
            if failed || sink.any_failed.load(std::sync::atomic::Ordering::Acquire) {
                bail!("one or more frames failed to render");
            }
            Ok(())
        }
    }
}
