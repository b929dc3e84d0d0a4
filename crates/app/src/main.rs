use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use clap::{Args, Parser, Subcommand};
use flowfield_visualiser_core::{
    AnalysisFrameSource, AudioMetrics, FilterKind, FilterSpec, FlowScene, FrameClock,
    FrameSourceState, GestureGate, GestureKind, GraphConnectionRegistry, ManualFrameScheduler,
    PixelSurface, RecordingSurface, Renderer, Result, SoftwareAudioGraph, SourceId, Surface,
    VisualiserConfig, VisualiserError,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod signal;

use signal::DemoSignal;

const SAMPLE_RATE: u32 = 48_000;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { session, png } => run_live(&session, png.as_deref()),
        Commands::Metrics { session, output } => run_metrics(&session, &output),
    }
}

fn run_live(options: &SessionArgs, png: Option<&Path>) -> Result<()> {
    tracing::info!(
        frames = options.frames,
        width = options.width,
        height = options.height,
        "starting live session"
    );

    let surface = PixelSurface::new(options.width as usize, options.height as usize);
    let report = run_session(options, surface)?;
    tracing::info!(
        rendered = report.frames.len(),
        mean_intensity = report.mean_intensity(),
        "session finished"
    );

    if let Some(path) = png {
        let bytes = report.surface.to_rgba8();
        let image = image::RgbaImage::from_raw(options.width, options.height, bytes)
            .ok_or_else(|| VisualiserError::msg("surface size does not match the image"))?;
        image
            .save(path)
            .map_err(|err| VisualiserError::msg(format!("failed to write {path:?}: {err}")))?;
        tracing::info!(?path, "wrote snapshot");
    }
    Ok(())
}

fn run_metrics(options: &SessionArgs, output: &Path) -> Result<()> {
    tracing::info!(?output, frames = options.frames, "recording frame metrics");
    let surface = RecordingSurface::new(options.width as f32, options.height as f32);
    let report = run_session(options, surface)?;

    let file = std::fs::File::create(output)?;
    serde_json::to_writer_pretty(file, &report.frames)
        .map_err(|err| VisualiserError::msg(format!("failed to write metrics: {err}")))?;
    tracing::info!(rendered = report.frames.len(), "wrote metrics");
    Ok(())
}

/// Per-frame record emitted by the `metrics` command.
#[derive(Debug, Clone, Serialize)]
struct FrameRecord {
    frame: u64,
    time_seconds: f32,
    hue: f32,
    #[serde(flatten)]
    metrics: AudioMetrics,
}

struct SessionReport<S> {
    frames: Vec<FrameRecord>,
    surface: S,
}

impl<S> SessionReport<S> {
    fn mean_intensity(&self) -> f32 {
        if self.frames.is_empty() {
            return 0.0;
        }
        self.frames.iter().map(|f| f.metrics.intensity).sum::<f32>() / self.frames.len() as f32
    }
}

/// State the frame callback renders into.
struct Stage<S: Surface> {
    renderer: Renderer<S>,
    scene: FlowScene,
    clock: FrameClock,
    records: Vec<FrameRecord>,
}

/// Plays the demo signal through an in-memory graph and lets the analysis
/// loop drive the renderer, the way a page would after the first click.
fn run_session<S>(options: &SessionArgs, surface: S) -> Result<SessionReport<S>>
where
    S: Surface + Send + 'static,
{
    let config = match &options.config {
        Some(path) => VisualiserConfig::load(path)?,
        None => VisualiserConfig::default(),
    };

    let graph = Arc::new(SoftwareAudioGraph::new(SAMPLE_RATE));
    let registry = Arc::new(GraphConnectionRegistry::new(graph.clone()));
    let scheduler = Arc::new(ManualFrameScheduler::new());
    let gate = GestureGate::new();
    let source = SourceId::new(options.source.as_str());

    let frame_source = AnalysisFrameSource::new(
        &registry,
        gate.clone(),
        scheduler.clone(),
        Some(source.clone()),
        config.analyser.clone(),
    );
    let outcome = frame_source.initialize();
    tracing::debug!(?outcome, "requested analysis tap");

    let (width, height) = (options.width as f32, options.height as f32);
    let stage = Arc::new(Mutex::new(Stage {
        renderer: Renderer::new(surface, config.render.clone()),
        scene: FlowScene::new(width, height, &config),
        clock: FrameClock::default(),
        records: Vec::new(),
    }));

    let period = FrameClock::frame_period(options.fps);
    let block_len = (SAMPLE_RATE / options.fps.max(1)) as usize;
    let mut signal = DemoSignal::new(SAMPLE_RATE, options.seed);
    let started = Instant::now();

    for frame in 0..options.frames {
        if frame == options.gesture_frame {
            gate.observe(GestureKind::Click);
            if let Some(gain_db) = options.bass_boost {
                let shelf = FilterSpec {
                    kind: FilterKind::LowShelf,
                    frequency: 200.0,
                    gain_db,
                    q: 0.707,
                };
                if let Err(err) = registry.install_filters(&source, &[shelf]) {
                    tracing::warn!(error = %err, "equaliser unavailable");
                }
            }
        }

        if frame_source.state() == FrameSourceState::Initialized {
            let stage = stage.clone();
            let bins = frame_source.frequency_bin_count();
            frame_source.start_loop(move |frequency| {
                let mut stage = stage.lock().unwrap_or_else(PoisonError::into_inner);
                let Stage {
                    renderer,
                    scene,
                    clock,
                    records,
                } = &mut *stage;
                clock.advance(period.as_secs_f32());
                let metrics = renderer.render_frame(scene, frequency, bins);
                records.push(FrameRecord {
                    frame: clock.frames,
                    time_seconds: clock.time_seconds,
                    hue: renderer.hue(),
                    metrics,
                });
            });
        }

        graph.push_samples(&source, &signal.next_block(block_len));
        scheduler.run_frame(period);

        if options.realtime {
            let target = period * (frame + 1);
            if let Some(wait) = target.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
    }

    frame_source.teardown();
    drop(frame_source);
    tracing::debug!(connections = registry.len(), "analysis released");

    let stage = Arc::try_unwrap(stage)
        .map_err(|_| VisualiserError::msg("frame loop still holds the stage"))?
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    Ok(SessionReport {
        frames: stage.records,
        surface: stage.renderer.into_surface(),
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive flow-field visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a session onto a pixel surface.
    Run {
        #[command(flatten)]
        session: SessionArgs,
        /// Write the final frame as a PNG.
        #[arg(long)]
        png: Option<PathBuf>,
    },
    /// Run a session and write per-frame audio metrics as JSON.
    Metrics {
        #[command(flatten)]
        session: SessionArgs,
        /// Output path for the metrics document.
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Number of display frames to simulate.
    #[arg(long, default_value_t = 600)]
    frames: u32,
    #[arg(long, default_value_t = 960)]
    width: u32,
    #[arg(long, default_value_t = 540)]
    height: u32,
    #[arg(long, default_value_t = 60)]
    fps: u32,
    /// Frame at which the simulated user clicks and audio may start.
    #[arg(long, default_value_t = 30)]
    gesture_frame: u32,
    /// Identity of the playable source.
    #[arg(long, default_value = "demo-track")]
    source: String,
    /// Optional low-shelf boost in dB installed by the equaliser after the click.
    #[arg(long)]
    bass_boost: Option<f32>,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Pace frames against the wall clock instead of running flat out.
    #[arg(long)]
    realtime: bool,
}
