//! Host-facing player API.
//!
//! [`VideoPlayer`] owns everything that outlives a single playback: the
//! memory bridge, the open audio port, the mailbox, the state cell and the
//! render sink. [`VideoHost`] wraps it in the flat call surface a host
//! application drives (`video_init`, `video_start`, `read_video_frame`, ...),
//! where calls made out of order degrade to no-ops.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use avb_audio::{AudioCallbackHost, AudioOutput, PortFormat, PortId};
use avb_common::{
    AudioError, AudioMode, DecodeError, PlayerConfig, PlayerError, PlayerState, StateCell,
};
use avb_decoder::{DecoderBackend, GpuMemory, MemoryBridge};

use crate::lifecycle::{PlaybackSession, SessionAudio, SessionContext};
use crate::mailbox::FrameMailbox;
use crate::render::{RenderSink, SurfaceDescriptor};
use crate::stats::{PlayerStats, PlayerStatsSnapshot};

const WAIT_POLL: Duration = Duration::from_millis(1);

/// Where decoded audio goes.
#[derive(Clone)]
pub enum AudioBackend {
    /// Push-model device, driven by the pull-thread pump.
    Port(Arc<dyn AudioOutput>),
    /// Device that calls back for each buffer.
    Callback(Arc<dyn AudioCallbackHost>),
    None,
}

/// Collaborators a player is built from.
pub struct PlayerDeps<R> {
    pub backend: Arc<dyn DecoderBackend>,
    pub gpu_memory: Arc<dyn GpuMemory>,
    pub audio: AudioBackend,
    pub sink: R,
}

/// A frame ready for display.
#[derive(Debug)]
pub struct PresentedFrame<S> {
    pub surface: S,
    pub timestamp: u64,
    /// Frames published and replaced since the previous read.
    pub dropped: u32,
}

/// Port opened at init for the pull-thread path.
struct OpenPort {
    output: Arc<dyn AudioOutput>,
    port: PortId,
}

pub struct VideoPlayer<R: RenderSink> {
    config: PlayerConfig,
    backend: Arc<dyn DecoderBackend>,
    memory: Arc<MemoryBridge>,
    audio: SessionAudio,
    port: Option<OpenPort>,
    sink: R,
    state: Arc<StateCell>,
    mailbox: Arc<FrameMailbox>,
    stats: Arc<PlayerStats>,
    session: Option<PlaybackSession>,
}

impl<R: RenderSink> VideoPlayer<R> {
    /// Validate the config, build the memory bridge and set up audio
    /// output. For the pull-thread path the port is opened here, once.
    pub fn init(config: PlayerConfig, deps: PlayerDeps<R>) -> Result<Self, PlayerError> {
        config.validate()?;

        let memory = MemoryBridge::new(deps.gpu_memory, config.gpu_alignment)
            .map_err(DecodeError::from)?;

        let format = PortFormat::from_config(&config.audio);
        let (audio, port) = match (config.audio.mode, deps.audio) {
            (AudioMode::Disabled, _) => (SessionAudio::Off, None),
            (AudioMode::PullThread, AudioBackend::Port(output)) => {
                let port = output.open_port(format)?;
                info!(%port, %format, "Audio port opened");
                (
                    SessionAudio::Thread {
                        output: output.clone(),
                        port,
                        format,
                    },
                    Some(OpenPort { output, port }),
                )
            }
            (AudioMode::PullCallback, AudioBackend::Callback(host)) => {
                (SessionAudio::Callback { host, format }, None)
            }
            (mode, _) => {
                return Err(AudioError::Device(format!(
                    "audio mode {mode:?} has no matching audio backend"
                ))
                .into())
            }
        };

        info!(
            backend = deps.backend.name(),
            max = %config.max_geometry(),
            layout = ?config.output_layout,
            audio = ?config.audio.mode,
            "Video player initialized"
        );

        Ok(Self {
            config,
            backend: deps.backend,
            memory: Arc::new(memory),
            audio,
            port,
            sink: deps.sink,
            state: Arc::new(StateCell::default()),
            mailbox: Arc::new(FrameMailbox::new()),
            stats: Arc::new(PlayerStats::new()),
            session: None,
        })
    }

    /// Start playing `path`. Fails with `Busy` unless the player is
    /// `Inactive`.
    pub fn start(&mut self, path: &Path) -> Result<(), PlayerError> {
        let state = self.state.get();
        if state != PlayerState::Inactive {
            return Err(PlayerError::Busy { state });
        }
        // Previous session already tore down; reap its control thread.
        if let Some(mut previous) = self.session.take() {
            previous.join();
        }

        let ctx = SessionContext {
            config: self.config.clone(),
            backend: self.backend.clone(),
            memory: self.memory.clone(),
            audio: self.audio.clone(),
            state: self.state.clone(),
            mailbox: self.mailbox.clone(),
            stats: self.stats.clone(),
        };
        self.session = Some(PlaybackSession::start(ctx, path)?);
        Ok(())
    }

    /// Request a stop. A no-op unless `Active`.
    pub fn stop(&self) {
        match &self.session {
            Some(session) => {
                session.stop();
            }
            None => debug!("Stop with no session"),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_playing())
    }

    pub fn state(&self) -> PlayerState {
        self.state.get()
    }

    /// Take the newest converted frame, if one arrived since the last
    /// read, and turn it into a sink surface.
    pub fn read_video_frame(&mut self) -> Option<PresentedFrame<R::Surface>> {
        let taken = self.mailbox.take_if_pending()?;
        self.stats.record_dropped(taken.dropped);

        let timestamp = taken.frame.timestamp;
        let descriptor = SurfaceDescriptor::for_frame(&taken.frame);
        let Some(surface) = self.sink.create_surface(taken.frame.data, &descriptor) else {
            warn!(timestamp, geometry = %descriptor.geometry, "Render sink refused frame");
            self.stats.record_rejected();
            return None;
        };
        self.stats.record_presented();
        Some(PresentedFrame {
            surface,
            timestamp,
            dropped: taken.dropped,
        })
    }

    /// Reserved for polling-driven builds; the threaded player has nothing
    /// to do here.
    pub fn periodic_tick(&mut self) {
        trace!(state = %self.state.get(), "Periodic tick");
    }

    /// Block until the player is `Inactive` or `timeout` passes.
    pub fn wait_inactive(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.state.is(PlayerState::Inactive) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL);
        }
        if let Some(session) = self.session.as_mut() {
            session.join();
        }
        true
    }

    pub fn stats(&self) -> PlayerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryBridge {
        &self.memory
    }
}

impl<R: RenderSink> Drop for VideoPlayer<R> {
    fn drop(&mut self) {
        // Dropping the session stops it and waits for teardown.
        self.session = None;
        if let Some(open) = self.port.take() {
            open.output.close_port(open.port);
        }
    }
}

// ---------------------------------------------------------------------------
// VideoHost
// ---------------------------------------------------------------------------

/// Flat host call surface over an optional [`VideoPlayer`].
pub struct VideoHost<R: RenderSink> {
    player: Option<VideoPlayer<R>>,
}

impl<R: RenderSink> Default for VideoHost<R> {
    fn default() -> Self {
        Self { player: None }
    }
}

impl<R: RenderSink> VideoHost<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the player. Re-initializing replaces the previous one.
    pub fn video_init(&mut self, config: PlayerConfig, deps: PlayerDeps<R>) -> Result<(), PlayerError> {
        self.player = None;
        self.player = Some(VideoPlayer::init(config, deps)?);
        Ok(())
    }

    pub fn video_start(&mut self, path: &Path) -> Result<(), PlayerError> {
        self.player
            .as_mut()
            .ok_or(PlayerError::NotInitialized)?
            .start(path)
    }

    pub fn video_stop(&mut self) {
        if let Some(player) = &self.player {
            player.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.player.as_ref().is_some_and(|p| p.is_playing())
    }

    pub fn read_video_frame(&mut self) -> Option<PresentedFrame<R::Surface>> {
        self.player.as_mut()?.read_video_frame()
    }

    pub fn periodic_tick(&mut self) {
        if let Some(player) = self.player.as_mut() {
            player.periodic_tick();
        }
    }

    pub fn player(&self) -> Option<&VideoPlayer<R>> {
        self.player.as_ref()
    }

    pub fn player_mut(&mut self) -> Option<&mut VideoPlayer<R>> {
        self.player.as_mut()
    }
}
