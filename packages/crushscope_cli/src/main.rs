//! Replays a JSON-lines message log through the visualizer and writes what
//! it ends up showing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crushscope::render::raster::{save_png, RasterConfig};
use crushscope::{Config, Scene, ServerMessage, Visualizer};

#[derive(Parser)]
#[command(name = "crushscope", about = "Replay CRUSH placement simulations")]
struct Cli {
    /// Layout, palette and animation settings (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply every message of a log, animating in between
    Replay {
        /// One server message per line
        log: PathBuf,
        /// Write the final scene as JSON
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Write the final scene as PNG
        #[arg(long)]
        png: Option<PathBuf>,
        /// Pixels per layout unit in the PNG
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        /// Pace animations on the wall clock instead of stepping them
        #[arg(long)]
        realtime: bool,
    },
    /// Apply a log and print the resulting cluster summary
    Summary {
        log: PathBuf,
    },
}

async fn read_log(path: &Path) -> Result<Vec<ServerMessage>> {
    let file = File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut messages = Vec::new();
    let mut number = 0;
    while let Some(line) = lines.next_line().await? {
        number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let message = ServerMessage::decode(&line)
            .with_context(|| format!("{}:{}", path.display(), number))?;
        messages.push(message);
    }
    log::info!("read {} messages from {}", messages.len(), path.display());
    Ok(messages)
}

/// Apply each message, then animate until the gate opens again.
fn step_through(vis: &mut Visualizer<Scene>, messages: Vec<ServerMessage>, frame: Duration) -> Result<()> {
    for message in messages {
        vis.apply(message)?;
        while !vis.ready_for_step() {
            vis.tick(frame);
        }
    }
    while !vis.animator().is_idle() {
        vis.tick(frame);
    }
    Ok(())
}

async fn replay(config: Config, log: &Path, realtime: bool) -> Result<Visualizer<Scene>> {
    let frame = Duration::from_millis(config.animation.frame_ms.max(1));
    let messages = read_log(log).await?;
    let mut vis = Visualizer::new(config, Scene::new())?;

    if !realtime {
        step_through(&mut vis, messages, frame)?;
        return Ok(vis);
    }

    let (tx, rx) = mpsc::channel(16);
    let feeder = tokio::spawn(async move {
        for message in messages {
            if tx.send(message).await.is_err() {
                break;
            }
        }
    });
    vis.run(rx, frame).await?;
    feeder.await.context("log feeder panicked")?;
    Ok(vis)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Replay {
            log,
            snapshot,
            png,
            scale,
            realtime,
        } => {
            if scale <= 0.0 {
                bail!("--scale must be positive, got {}", scale);
            }
            let vis = replay(config, &log, realtime).await?;
            println!("{}", serde_json::to_string_pretty(&vis.cluster().summary())?);

            let scene = vis.into_renderer();
            if let Some(path) = snapshot {
                let json = scene.to_json()?;
                tokio::fs::write(&path, json)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                log::info!("wrote snapshot to {}", path.display());
            }
            if let Some(path) = png {
                let raster = RasterConfig {
                    scale,
                    ..RasterConfig::default()
                };
                save_png(&scene, &raster, &path)?;
                log::info!("wrote {}", path.display());
            }
        }
        Command::Summary { log } => {
            let vis = replay(config, &log, false).await?;
            println!("{}", serde_json::to_string_pretty(&vis.cluster().summary())?);
        }
    }
    Ok(())
}
