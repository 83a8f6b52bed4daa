//! graph-describe - inspect and dry-run a graph class
//!
//! Loads a YAML or JSON graph class, prepares it and prints the element
//! order with negotiated formats. With `--render` the class is also played
//! through a host-pumped player on a manual device until it ends, and the
//! rendered length and peak level are reported.
//!
//! ## Usage
//!
//! ```text
//! graph-describe <class.yaml> [--root DIR] [--period FRAMES] [--config FILE] [--render]
//! ```
//!
//! Set RUST_LOG=debug for per-element prepare output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use sonance_core::audio::ManualDevice;
use sonance_core::config::{default_config_path, load_config, PlayerConfig};
use sonance_core::element::Element;
use sonance_core::engine::{PlayOptions, Player, PlayerEvent, Threading};
use sonance_core::graph::GraphClass;
use sonance_core::loader::FileSystemLoader;

/// Longest dry run before giving up on a class that never ends
const MAX_RENDER_SECONDS: u64 = 600;

struct Args {
    class: PathBuf,
    root: PathBuf,
    period: Option<usize>,
    config: Option<PathBuf>,
    render: bool,
}

fn parse_args() -> Result<Args> {
    let mut class = None;
    let mut root = PathBuf::from(".");
    let mut period = None;
    let mut config = None;
    let mut render = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--render" => render = true,
            "--root" => root = args.next().map(PathBuf::from).ok_or_else(|| anyhow!("--root needs a directory"))?,
            "--config" => config = Some(args.next().map(PathBuf::from).ok_or_else(|| anyhow!("--config needs a file"))?),
            "--period" => {
                let value = args.next().ok_or_else(|| anyhow!("--period needs a frame count"))?;
                period = Some(value.parse().with_context(|| format!("Invalid period: {value}"))?);
            }
            other if other.starts_with("--") => bail!("Unknown flag: {other}"),
            other => class = Some(PathBuf::from(other)),
        }
    }

    let class = class.ok_or_else(|| {
        anyhow!("usage: graph-describe <class.yaml> [--root DIR] [--period FRAMES] [--config FILE] [--render]")
    })?;
    Ok(Args {
        class,
        root,
        period,
        config,
        render,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let config_path = args.config.clone().unwrap_or_else(|| default_config_path("player.yaml"));
    let mut config: PlayerConfig = load_config(&config_path);
    if let Some(period) = args.period {
        config.period_frames = period;
    }

    let class = GraphClass::load(&args.class)?;
    let loader = Arc::new(FileSystemLoader::new(args.root.clone()));
    describe(&class, &config, &loader)?;

    if args.render {
        render(&class, config, loader, &args.class)?;
    }
    Ok(())
}

fn describe(class: &GraphClass, config: &PlayerConfig, loader: &FileSystemLoader) -> Result<()> {
    let mut graph = class.instantiate()?;
    let format = graph
        .prepare_with(config.period_frames, loader, config.io_strategy)
        .with_context(|| format!("Failed to prepare graph class {}", class.name))?;

    println!("{}", graph.describe());
    println!();
    println!("output format: {format}");
    println!("content hash:  {:016x}", class.content_hash());
    Ok(())
}

fn render(class: &GraphClass, config: PlayerConfig, loader: Arc<FileSystemLoader>, path: &Path) -> Result<()> {
    let config = config.with_threading(Threading::HostPumped);
    let format = config.format;
    let (device, pull) = ManualDevice::new();
    let mut player = Player::new(config, Box::new(device), loader)?;
    let track = player.play(class.clone(), PlayOptions::default())?;

    let max_frames = MAX_RENDER_SECONDS * format.sample_rate as u64;
    let mut frames = 0u64;
    let mut peak = 0.0f32;
    let outcome = loop {
        player.pump_once();
        pull.pull_with(|buffer| {
            frames += buffer.frame_count() as u64;
            peak = peak.max(buffer.peak());
        })?;

        let mut outcome = None;
        while let Some(event) = player.get_event() {
            match event {
                PlayerEvent::TrackFinished(id) if id == track => outcome = Some(Ok(())),
                PlayerEvent::Error { track: id, reason } if id == track => outcome = Some(Err(reason.to_string())),
                other => log::debug!("{other:?}"),
            }
        }
        if let Some(outcome) = outcome {
            break outcome;
        }
        if frames > max_frames {
            break Err(format!("still playing after {MAX_RENDER_SECONDS}s"));
        }
    };

    match outcome {
        Ok(()) => {
            let seconds = frames as f64 / format.sample_rate.max(1) as f64;
            println!("rendered:      {frames} frames ({seconds:.3}s at {format})");
            println!("peak:          {peak:.4}");
            let stats = player.stats();
            println!("clipped:       {} samples", stats.clipped_samples);
            Ok(())
        }
        Err(reason) => bail!("Rendering {:?} failed: {reason}", path),
    }
}
