// THEORY:
// `zmmagik` is the thin shell around the `zm_magik` library. It owns everything
// the library deliberately does not: argument parsing, the tracing subscriber,
// OpenCV, the network and the async runtime.
//
// Startup is strictly ordered so that every fatal problem surfaces before any
// event is processed: parse flags, load the optional TOML file, apply flag
// overrides, load the object model if one is configured, validate into a
// `RunPlan`, then resolve the event source (a local file or the ZoneMinder API).
// Only then is the orchestrator started.

mod darknet;
mod display;
mod download;
mod opencv_backend;
mod zm_api;

use anyhow::{Context, Result, bail};
use clap::Parser;
use darknet::DarknetDetector;
use display::HighGuiDisplay;
use download::DownloadClipProvider;
use opencv_backend::OpenCvBackend;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zm_magik::core_modules::blend_compositor::BlendArea;
use zm_magik::config::TIME_BOUND_FORMS;
use zm_magik::core_modules::detector::{DetectionType, ObjectDetector};
use zm_magik::event::OrderKey;
use zm_magik::image_sequence::ImageSequenceBackend;
use zm_magik::media::NullObserver;
use zm_magik::{
    ClipProvider, Event, EventSource, FrameObserver, LocalClipProvider, MagikConfig, MonitorId, Orchestrator,
    VideoBackend,
};
use zm_api::ZmClient;

/// Parses a snake_case enum value the same way the TOML file spells it.
fn snake_enum<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("unknown value {raw:?}"))
}

#[derive(Parser, Debug)]
#[command(
    name = "zmmagik",
    version,
    about = "Search, blend and annotate ZoneMinder events"
)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Local video to process instead of querying ZoneMinder
    #[arg(short, long, value_name = "PATH")]
    input: Option<PathBuf>,
    /// Reference image to search for
    #[arg(long, value_name = "PATH")]
    find: Option<PathBuf>,
    /// Polygon of interest, "x1,y1 x2,y2 x3,y3 ..."
    #[arg(long)]
    mask: Option<String>,
    #[arg(long = "skipframes")]
    skip_frames: Option<u32>,
    #[arg(long = "trailframes")]
    trail_frames: Option<u32>,
    /// Seconds between consecutive events in the blend timeline
    #[arg(long = "blenddelay")]
    blend_delay: Option<f64>,
    /// Overrides the frame rate reported by the video
    #[arg(long)]
    fps: Option<f64>,
    /// Template match threshold, 0.7 to 1.0
    #[arg(long)]
    threshold: Option<f32>,
    /// Minimum detector confidence, 0 to 1
    #[arg(long)]
    confidence: Option<f32>,
    /// Keep searching after the first match
    #[arg(short, long)]
    all: bool,
    /// Write matched frames to a video
    #[arg(short, long)]
    write: bool,
    /// Wait for a key after every displayed frame; 'c' continues
    #[arg(long)]
    interactive: bool,

    #[arg(long = "eventid")]
    event_id: Option<u64>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    portal: Option<String>,
    #[arg(long = "apiportal")]
    api_portal: Option<String>,
    /// background_extraction or object_model
    #[arg(long, alias = "detection_type", value_parser = snake_enum::<DetectionType>)]
    detection_type: Option<DetectionType>,
    /// Saved detector output for object_model
    #[arg(long, alias = "detections_file", value_name = "PATH")]
    detections_file: Option<PathBuf>,
    /// Darknet network configuration (.cfg)
    #[arg(long, alias = "config_file", value_name = "PATH")]
    config_file: Option<PathBuf>,
    /// Darknet network weights
    #[arg(long, alias = "weights_file", value_name = "PATH")]
    weights_file: Option<PathBuf>,
    /// Class names, one per line
    #[arg(long, alias = "labels_file", value_name = "PATH")]
    labels_file: Option<PathBuf>,
    /// Darknet meta (.data) file naming the class names file
    #[arg(long, alias = "meta_file", value_name = "PATH")]
    meta_file: Option<PathBuf>,
    /// Run the object model on CUDA
    #[arg(long)]
    gpu: bool,
    #[arg(long, help = format!("Start of the time range: {TIME_BOUND_FORMS}"))]
    from: Option<String>,
    #[arg(long, help = format!("End of the time range: {TIME_BOUND_FORMS}"))]
    to: Option<String>,
    /// Comma separated monitor ids
    #[arg(long, value_delimiter = ',')]
    monitors: Vec<MonitorId>,
    /// Scale factor applied to video, template and mask
    #[arg(long)]
    resize: Option<f64>,
    /// Seconds of each event to process
    #[arg(long)]
    duration: Option<f64>,
    /// Log progress every few hundred frames
    #[arg(long, alias = "show_progress", num_args = 0..=1, default_missing_value = "true")]
    show_progress: Option<bool>,

    #[arg(long = "dumpjson", num_args = 0..=1, default_missing_value = "true")]
    dump_json: Option<bool>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    annotate: Option<bool>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    blend: Option<bool>,
    /// Regex of object labels to keep
    #[arg(long = "detectpattern")]
    detect_pattern: Option<String>,
    #[arg(long = "relevantonly", num_args = 0..=1, default_missing_value = "true")]
    relevant_only: Option<bool>,
    #[arg(long = "drawboxes", num_args = 0..=1, default_missing_value = "true")]
    draw_boxes: Option<bool>,
    #[arg(long = "minblendarea")]
    min_blend_area: Option<f64>,
    #[arg(long = "fontscale")]
    font_scale: Option<f32>,
    /// boxes, foreground or full_frame
    #[arg(long = "blendarea", value_parser = snake_enum::<BlendArea>)]
    blend_area: Option<BlendArea>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    download: Option<bool>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    display: Option<bool>,
    #[arg(long = "objectonly", num_args = 0..=1, default_missing_value = "true")]
    object_only: Option<bool>,
    #[arg(long = "minalarmframes")]
    min_alarm_frames: Option<u32>,
    #[arg(long = "maxalarmframes")]
    max_alarm_frames: Option<u32>,
    #[arg(long = "balanceintensity", num_args = 0..=1, default_missing_value = "true")]
    balance_intensity: Option<bool>,
    /// Look for frames where the reference is present (false: absent)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    present: Option<bool>,
    /// Process all events of one monitor before the next
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    sequential: Option<bool>,
    /// event_id or start_time
    #[arg(long = "orderby", value_parser = snake_enum::<OrderKey>)]
    order_by: Option<OrderKey>,
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    /// Debug logging unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

/// Flag values replace file values only when the flag was given.
macro_rules! override_fields {
    ($config:ident, $cli:ident; set: $($value:ident),+; optional: $($option:ident),+ $(,)?) => {
        $(if let Some(value) = $cli.$value { $config.$value = value; })+
        $(if $cli.$option.is_some() { $config.$option = $cli.$option; })+
    };
}

fn apply_overrides(cli: Cli, config: &mut MagikConfig) {
    if !cli.monitors.is_empty() {
        config.monitors = cli.monitors;
    }
    config.all |= cli.all;
    config.write |= cli.write;
    config.interactive |= cli.interactive;
    config.gpu |= cli.gpu;

    override_fields!(config, cli;
        set: skip_frames, trail_frames, blend_delay, threshold, confidence, detection_type, dump_json,
            annotate, blend, detect_pattern, relevant_only, draw_boxes, min_blend_area, font_scale,
            blend_area, download, display, object_only, balance_intensity, present, sequential,
            order_by, output_dir, show_progress;
        optional: input, find, mask, fps, resize, duration, event_id, from, to, username, password, portal,
            api_portal, detections_file, config_file, weights_file, labels_file, meta_file, min_alarm_frames,
            max_alarm_frames,
    );
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "zmmagik=debug,zm_magik=debug"
    } else {
        "zmmagik=info,zm_magik=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => MagikConfig::load(path)?,
        None => MagikConfig::default(),
    };
    apply_overrides(cli, &mut config);

    let model = config
        .model_files()?
        .map(|files| DarknetDetector::load(&files))
        .transpose()?
        .map(|detector| Box::new(detector) as Box<dyn ObjectDetector>);
    let plan = config.validate_with(model)?;
    let now = chrono::Local::now().naive_local();
    let source = config.event_source(now)?;
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating output directory {}", config.output_dir.display()))?;

    let backend: Box<dyn VideoBackend> = match (&source, config.fps) {
        (EventSource::Local(path), Some(fps)) if path.is_dir() => Box::new(ImageSequenceBackend::new(fps)),
        (EventSource::Local(path), None) if path.is_dir() => {
            bail!("a directory of frames needs --fps, it has no frame rate of its own")
        }
        _ => Box::new(OpenCvBackend::new(config.fps)),
    };

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let (events, mut clips): (Vec<Event>, Box<dyn ClipProvider>) = match source {
        EventSource::Local(path) => {
            info!(path = %path.display(), "processing local video");
            let event = Event::new(0, 0, now, path.to_string_lossy());
            (vec![event], Box::new(LocalClipProvider))
        }
        EventSource::Api(query) => {
            let download = query.download;
            let mut client = ZmClient::new(query)?;
            let events = runtime.block_on(async {
                client.login().await?;
                client.fetch_events().await
            })?;
            info!(events = events.len(), "events retrieved");
            let provider = DownloadClipProvider::new(runtime.handle().clone(), &config.output_dir, download)?;
            (events, Box::new(provider))
        }
    };

    let mut observer: Box<dyn FrameObserver> = if config.display {
        Box::new(HighGuiDisplay::new("zmmagik", config.interactive)?)
    } else {
        Box::new(NullObserver)
    };

    let mut orchestrator = Orchestrator::new(plan, backend.as_ref(), clips.as_mut(), observer.as_mut());
    let summary = orchestrator.run(events)?;

    if let Some(path) = &summary.report.composite {
        info!(path = %path.display(), "blended video written");
    }
    info!(
        "total time: {:.2}s, {} event(s), {} failed",
        summary.elapsed.as_secs_f64(),
        summary.report.events_considered,
        summary.report.events_failed
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = run(cli) {
        error!("{e:#}");
        std::process::exit(1);
    }
}
