use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use rust_live_wallpaper::config::{CanvasSize, Configuration, expand_home};
use rust_live_wallpaper::events::EngineCommand;
use rust_live_wallpaper::media::{DecoderFactory, MediaDecoderFactory, SourceKind};
use rust_live_wallpaper::processing::guard::ResolutionGuard;
use rust_live_wallpaper::processing::layout::compute_layout;
use rust_live_wallpaper::render::viewer;

#[derive(Debug, Parser)]
#[command(
    name = "live-wallpaper",
    version,
    about = "Plays a video or image as a full-screen desktop background"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Background to show at startup (overrides the config)
    #[arg(long, value_name = "PATH")]
    background: Option<PathBuf>,
    /// Print stream info and the computed layout for PATH, then exit
    #[arg(long, value_name = "PATH")]
    probe: Option<PathBuf>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let filter = match verbosity {
        0 => base,
        1 => base.add_directive("rust_live_wallpaper=debug".parse()?),
        _ => base.add_directive("rust_live_wallpaper=trace".parse()?),
    }
    .add_directive("wgpu=warn".parse()?)
    .add_directive("winit=warn".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        background,
        probe,
        verbose,
    } = Args::parse();
    init_tracing(verbose)?;

    let mut cfg = match config.as_deref() {
        Some(path) => Configuration::load(path)?,
        None => Configuration::default()
            .validated()
            .context("invalid default configuration")?,
    };
    if let Some(path) = background {
        cfg.background = Some(expand_home(&path));
    }
    tracing::debug!("effective configuration:\n{:#?}", cfg);

    if let Some(path) = probe {
        return run_probe(&cfg, &expand_home(&path));
    }

    let (command_tx, command_rx) = mpsc::channel::<EngineCommand>(16);
    let cancel = CancellationToken::new();

    // stdin carries text commands; EOF on a terminal (Ctrl-D) shuts down
    {
        let cancel = cancel.clone();
        let command_tx = command_tx.clone();
        let interactive = std::io::stdin().is_terminal();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) if line.trim().is_empty() => {}
                        Ok(Some(line)) => match line.parse::<EngineCommand>() {
                            Ok(command) => {
                                if command_tx.send(command).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => tracing::warn!("{err}"),
                        },
                        Ok(None) => {
                            if interactive {
                                tracing::info!("stdin closed; initiating shutdown");
                                cancel.cancel();
                            } else {
                                tracing::debug!("stdin closed; command input disabled");
                            }
                            break;
                        }
                        Err(err) => {
                            tracing::warn!("stdin watcher failed: {err}");
                            break;
                        }
                    }
                }
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        let control = command_tx.clone();
        tokio::spawn(async move {
            match signal(SignalKind::user_defined1()) {
                Ok(mut sigusr1) => loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = sigusr1.recv() => {
                            if received.is_none() {
                                break;
                            }
                            tracing::info!("SIGUSR1 received; toggling pause");
                            if let Err(err) = control.send(EngineCommand::TogglePause).await {
                                tracing::warn!("failed to forward pause toggle: {err}");
                                break;
                            }
                        }
                    }
                },
                Err(err) => tracing::warn!("failed to register SIGUSR1 handler: {err}"),
            }
        });
    }
    drop(command_tx);

    let initial = cfg.background.clone();
    if let Err(e) = viewer::run_windowed(cfg, initial, command_rx, cancel.clone())
        .context("viewer failed")
    {
        tracing::error!("{e:?}");
    }
    cancel.cancel();
    Ok(())
}

const PROBE_CANVAS: CanvasSize = CanvasSize {
    width: 1920,
    height: 1080,
};

fn run_probe(cfg: &Configuration, path: &Path) -> Result<()> {
    let factory = MediaDecoderFactory::new(cfg.decoder.clone());
    let mut decoder = factory
        .open(path)
        .with_context(|| format!("failed to probe {}", path.display()))?;
    let info = decoder.info();
    decoder.release();

    let canvas = cfg.canvas.unwrap_or(PROBE_CANVAS);
    let guard = ResolutionGuard::evaluate(
        info.width,
        info.height,
        canvas.width,
        canvas.height,
        &cfg.resolution_guard,
    );
    let (frame_w, frame_h) = guard
        .target_size(info.width, info.height)
        .unwrap_or((info.width, info.height));
    let mode = match info.kind {
        SourceKind::Video => cfg.video_fit,
        SourceKind::Image => cfg.image_fit,
    };
    let layout = compute_layout(frame_w, frame_h, canvas.width, canvas.height, mode);

    println!("# probe {}", path.display());
    println!("kind:        {:?}", info.kind);
    println!("native:      {}x{}", info.width, info.height);
    println!("fps:         {:.3}", info.fps);
    println!("frames:      {}", info.frame_count);
    println!("canvas:      {}x{}", canvas.width, canvas.height);
    match guard.target_size(info.width, info.height) {
        Some((w, h)) => println!("guard:       downscale to {w}x{h}"),
        None => println!("guard:       inactive"),
    }
    println!("fit:         {mode}");
    println!(
        "layout:      {}x{} at ({}, {})",
        layout.scaled_width, layout.scaled_height, layout.x_offset, layout.y_offset
    );
    Ok(())
}
