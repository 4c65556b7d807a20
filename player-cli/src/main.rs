//! avbridge
//!
//! Plays one or more scripted clips through the full pipeline (memory bridge, decoder
//! session, pumps, mailbox, render sink) and polls it like a host render
//! loop would. Useful for watching the threading and drop behaviour in the
//! logs, and for dumping a converted frame to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use avb_audio::NullOutput;
use avb_common::{AudioMode, Geometry, PixelLayout, PlayerConfig};
use avb_decoder::{AudioSegment, ClipScript, FrameFill, HostGpuMemory, SyntheticBackend};
use avb_player::{
    AudioBackend, OwnedSurface, OwnedSurfaceSink, PlayerDeps, PresentedFrame, VideoChannel,
    VideoHost,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayoutArg {
    Rgba,
    Rgb24,
}

impl From<LayoutArg> for PixelLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Rgba => PixelLayout::Rgba8888,
            LayoutArg::Rgb24 => PixelLayout::Rgb24,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AudioArg {
    /// Pull-thread pump into a null port
    Thread,
    /// Device-clock callback (system device with the `cpal` feature)
    Callback,
    Off,
}

/// Play a synthetic clip through the decoder bridge
#[derive(Parser, Debug)]
#[command(name = "avbridge")]
#[command(version)]
struct Args {
    /// Source paths handed to the decoder, played back to back
    #[arg(default_value = "clip.bik")]
    sources: Vec<PathBuf>,

    /// Number of video frames in the clip
    #[arg(long, default_value = "90")]
    frames: usize,

    #[arg(long, default_value = "320")]
    width: u32,

    #[arg(long, default_value = "180")]
    height: u32,

    /// Clip frame rate; the host polls at twice this
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Output pixel layout (overrides the config file)
    #[arg(long, value_enum)]
    layout: Option<LayoutArg>,

    /// Audio path (overrides the config file)
    #[arg(long, value_enum)]
    audio: Option<AudioArg>,

    /// Solid colour as RRGGBB hex instead of the moving ramp
    #[arg(long)]
    color: Option<String>,

    /// JSON player config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the last presented frame to this PNG
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_color(hex: &str) -> anyhow::Result<FrameFill> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        bail!("colour must be RRGGBB, got {hex:?}");
    }
    let value = u32::from_str_radix(hex, 16).with_context(|| format!("bad colour {hex:?}"))?;
    Ok(FrameFill::from_rgb(
        (value >> 16) as u8,
        (value >> 8) as u8,
        value as u8,
    ))
}

fn build_script(args: &Args, config: &PlayerConfig) -> anyhow::Result<ClipScript> {
    let fps = args.fps.max(1);
    let fill = match &args.color {
        Some(hex) => parse_color(hex)?,
        None => FrameFill::Ramp,
    };
    let mut script = ClipScript::new(Geometry::new(args.width, args.height))
        .with_frame_rate(args.frames, fps)
        .with_frame_interval(Duration::from_secs(1) / fps)
        .with_fill(fill);

    if config.audio.mode != AudioMode::Disabled {
        let block_frames = config.audio.buffer_frames as usize;
        let clip_frames = config.audio.sample_rate as usize * args.frames / fps as usize;
        script = script.with_audio(AudioSegment {
            sample_rate: config.audio.sample_rate,
            channels: config.audio.channels,
            block_frames,
            blocks: clip_frames.div_ceil(block_frames.max(1)),
        });
    }
    Ok(script)
}

fn audio_backend(mode: AudioMode) -> AudioBackend {
    match mode {
        AudioMode::PullThread => AudioBackend::Port(Arc::new(NullOutput::paced())),
        #[cfg(feature = "cpal")]
        AudioMode::PullCallback => AudioBackend::Callback(Arc::new(avb_audio::CpalHost::new())),
        #[cfg(not(feature = "cpal"))]
        AudioMode::PullCallback => {
            AudioBackend::Callback(Arc::new(avb_audio::ClockedHost::new(Arc::new(
                NullOutput::paced(),
            ))))
        }
        AudioMode::Disabled => AudioBackend::None,
    }
}

fn dump_frame(path: &Path, frame: &PresentedFrame<OwnedSurface>) -> anyhow::Result<()> {
    let desc = frame.surface.descriptor;
    let color = match desc.layout {
        PixelLayout::Rgba8888 => image::ExtendedColorType::Rgba8,
        PixelLayout::Rgb24 => image::ExtendedColorType::Rgb8,
    };
    image::save_buffer(
        path,
        &frame.surface.pixels,
        desc.geometry.width,
        desc.geometry.height,
        color,
    )
    .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), timestamp = frame.timestamp, "Dumped frame");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    // RUST_LOG wins over --log-level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    if let Some(layout) = args.layout {
        config.output_layout = layout.into();
    }
    if let Some(audio) = args.audio {
        config.audio.mode = match audio {
            AudioArg::Thread => AudioMode::PullThread,
            AudioArg::Callback => AudioMode::PullCallback,
            AudioArg::Off => AudioMode::Disabled,
        };
    }

    let script = build_script(&args, &config)?;
    let deps = PlayerDeps {
        backend: Arc::new(SyntheticBackend::new(script)),
        gpu_memory: Arc::new(HostGpuMemory::new()),
        audio: audio_backend(config.audio.mode),
        sink: OwnedSurfaceSink,
    };

    let mut host = VideoHost::new();
    host.video_init(config, deps)
        .context("Failed to initialize video player")?;
    let mut channel = VideoChannel::new(host);
    channel.enqueue(args.sources.iter().cloned());

    let poll = Duration::from_secs(1) / (args.fps.max(1) * 2);
    let started = Instant::now();
    let mut presented = 0u64;
    let mut last = None;

    loop {
        if let Err(e) = channel.periodic(false) {
            warn!(error = %e, "Skipping clip");
        }
        if let Some(frame) = channel.read_video_frame() {
            presented += 1;
            last = Some(frame);
        }
        if channel.is_idle() {
            break;
        }
        thread::sleep(poll);
    }

    let player = channel
        .host_mut()
        .player_mut()
        .context("Player disappeared during playback")?;
    if !player.wait_inactive(Duration::from_secs(5)) {
        warn!("Player did not reach inactive state");
    }

    let stats = player.stats();
    info!(
        presented,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Playback finished"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if let Some(path) = &args.dump {
        match &last {
            Some(frame) => dump_frame(path, frame)?,
            None => warn!("No frame was presented, nothing to dump"),
        }
    }

    Ok(())
}
