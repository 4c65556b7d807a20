//! Player lifecycle: one [`PlaybackSession`] per `start`.
//!
//! ```text
//!  Inactive --start--> Active --stop / decoder inactive--> Stopping --teardown--> Inactive
//! ```
//!
//! `start` initializes the decoder, adds the source and flips the state to
//! `Active`, then hands everything to a control thread. The decoder's event
//! callback only forwards into a channel; the control thread is the one
//! place that reacts:
//!
//! - manual start: on `StateReady` it enumerates streams, enables video and
//!   audio, starts the decoder and spawns the pumps;
//! - auto start: pumps are spawned straight away.
//!
//! Once the state leaves `Active` (host `stop`, or the video pump seeing the
//! decoder go inactive) the control thread joins the pumps and only then
//! stops and closes the decoder, so no pump can be mid-call during close.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use tracing::{debug, error, info, warn};

use avb_audio::{
    AudioCallbackHost, AudioOutput, AudioPullSource, AudioPump, AudioStream, PortFormat, PortId,
};
use avb_common::{PlayerConfig, PlayerError, PlayerState, StateCell};
use avb_decoder::{
    DecoderBackend, DecoderEvent, DecoderMemory, DecoderSession, EventSink, InitParams,
    PixelConverter, StreamKind,
};

use crate::mailbox::FrameMailbox;
use crate::pump::VideoPump;
use crate::stats::PlayerStats;

/// Messages to the control thread from the host and the pumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Stop,
    PumpExited(&'static str),
}

/// How this session delivers audio.
#[derive(Clone)]
pub enum SessionAudio {
    /// Pull-thread pump into an already-open port.
    Thread {
        output: Arc<dyn AudioOutput>,
        port: PortId,
        format: PortFormat,
    },
    /// Device-driven callback, registered when decode begins.
    Callback {
        host: Arc<dyn AudioCallbackHost>,
        format: PortFormat,
    },
    Off,
}

impl SessionAudio {
    fn enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Everything a session borrows from its player.
#[derive(Clone)]
pub struct SessionContext {
    pub config: PlayerConfig,
    pub backend: Arc<dyn DecoderBackend>,
    pub memory: Arc<dyn DecoderMemory>,
    pub audio: SessionAudio,
    pub state: Arc<StateCell>,
    pub mailbox: Arc<FrameMailbox>,
    pub stats: Arc<PlayerStats>,
}

pub struct PlaybackSession {
    state: Arc<StateCell>,
    decoder: Arc<dyn DecoderSession>,
    control_tx: Sender<Control>,
    control: Option<JoinHandle<()>>,
}

impl PlaybackSession {
    /// Start playing `path`. The state must be `Inactive`.
    pub fn start(ctx: SessionContext, path: &Path) -> Result<Self, PlayerError> {
        let current = ctx.state.get();
        if current != PlayerState::Inactive {
            return Err(PlayerError::Busy { state: current });
        }

        let (event_tx, event_rx) = channel::unbounded();
        let decoder = ctx.backend.init(InitParams {
            memory: ctx.memory.clone(),
            events: EventSink::new(event_tx),
            output_buffers: ctx.config.output_buffers,
            base_priority: ctx.config.base_priority,
            auto_start: ctx.config.auto_start,
        })?;

        if let Err(e) = decoder.add_source(path) {
            error!(error = %e, path = %path.display(), "Failed to add source");
            decoder.close();
            return Err(e.into());
        }

        if !ctx.state.transition(PlayerState::Inactive, PlayerState::Active) {
            decoder.close();
            return Err(PlayerError::Busy {
                state: ctx.state.get(),
            });
        }
        ctx.mailbox.reset();
        ctx.stats.record_session();

        let auto_start = ctx.config.auto_start;
        let (control_tx, control_rx) = channel::unbounded();
        let controller = Controller {
            config: ctx.config,
            state: ctx.state.clone(),
            decoder: decoder.clone(),
            mailbox: ctx.mailbox,
            stats: ctx.stats,
            audio: ctx.audio,
            notify: control_tx.clone(),
            pumps: Vec::new(),
            audio_stream: None,
            launched: false,
        };

        let spawned = thread::Builder::new()
            .name("player-control".to_string())
            .spawn(move || controller.run(event_rx, control_rx));
        let control = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                decoder.close();
                ctx.state.set(PlayerState::Inactive);
                return Err(PlayerError::ThreadSpawn {
                    name: "player-control",
                    source,
                });
            }
        };

        info!(
            path = %path.display(),
            backend = ctx.backend.name(),
            auto_start,
            "Playback started"
        );

        Ok(Self {
            state: ctx.state,
            decoder,
            control_tx,
            control: Some(control),
        })
    }

    /// Request a stop. Returns false if the session was not `Active`.
    /// Teardown completes asynchronously on the control thread.
    pub fn stop(&self) -> bool {
        if self
            .state
            .transition(PlayerState::Active, PlayerState::Stopping)
        {
            info!("Stop requested");
            let _ = self.control_tx.send(Control::Stop);
            true
        } else {
            debug!(state = %self.state.get(), "Stop ignored");
            false
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.is(PlayerState::Active) && self.decoder.is_active()
    }

    /// Wait for the control thread to finish teardown.
    pub fn join(&mut self) {
        if let Some(handle) = self.control.take() {
            if handle.join().is_err() {
                error!("Player control thread panicked");
                self.state.set(PlayerState::Inactive);
            }
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

// ---------------------------------------------------------------------------
// Control thread
// ---------------------------------------------------------------------------

struct Controller {
    config: PlayerConfig,
    state: Arc<StateCell>,
    decoder: Arc<dyn DecoderSession>,
    mailbox: Arc<FrameMailbox>,
    stats: Arc<PlayerStats>,
    audio: SessionAudio,
    notify: Sender<Control>,
    pumps: Vec<JoinHandle<()>>,
    audio_stream: Option<Box<dyn AudioStream>>,
    launched: bool,
}

impl Controller {
    fn run(mut self, events: Receiver<DecoderEvent>, control: Receiver<Control>) {
        debug!("Control loop started");
        if self.config.auto_start {
            self.launch();
        }

        let mut events = events;
        while self.state.is(PlayerState::Active) {
            let mut events_closed = false;
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.on_event(event),
                    Err(_) => events_closed = true,
                },
                recv(control) -> msg => match msg {
                    Ok(Control::Stop) => debug!("Control loop woken by stop"),
                    Ok(Control::PumpExited(name)) => debug!(pump = name, "Pump exited"),
                    Err(_) => break,
                },
            }
            if events_closed {
                debug!("Decoder event channel closed");
                events = channel::never();
            }
        }

        self.teardown();
    }

    fn on_event(&mut self, event: DecoderEvent) {
        match event {
            DecoderEvent::StateReady if !self.launched => self.on_ready(),
            DecoderEvent::StateReady => debug!("Ready event after launch ignored"),
            DecoderEvent::StatePlay => info!("Decoder playing"),
            DecoderEvent::StateStop => info!("Decoder stopped"),
            DecoderEvent::StatePause | DecoderEvent::StateBuffering => {
                debug!(?event, "Decoder state change")
            }
            DecoderEvent::Warning(message) => warn!(%message, "Decoder warning"),
        }
    }

    /// Manual-start path: enable streams, start decode, spawn pumps.
    fn on_ready(&mut self) {
        let count = self.decoder.stream_count();
        info!(streams = count, "Decoder ready");

        let mut video_enabled = false;
        for index in 0..count {
            let Some(info) = self.decoder.stream_info(index) else {
                continue;
            };
            let wanted = match &info.kind {
                StreamKind::Video { geometry, language } => {
                    info!(
                        index,
                        width = geometry.width,
                        height = geometry.height,
                        language = %language,
                        duration_ms = info.duration_ms,
                        "Video stream"
                    );
                    true
                }
                StreamKind::Audio {
                    sample_rate,
                    channels,
                } => {
                    info!(index, sample_rate, channels, "Audio stream");
                    self.audio.enabled()
                }
                StreamKind::Timedtext => {
                    debug!(index, "Skipping timed-text stream");
                    false
                }
            };
            if !wanted {
                continue;
            }
            match self.decoder.enable_stream(index) {
                Ok(()) => {
                    if matches!(info.kind, StreamKind::Video { .. }) {
                        video_enabled = true;
                    }
                }
                Err(e) => warn!(error = %e, index, "Failed to enable stream"),
            }
        }

        if !video_enabled {
            error!("No video stream could be enabled");
            self.abort();
            return;
        }
        if let Err(e) = self.decoder.start() {
            error!(error = %e, "Decoder start failed");
            self.abort();
            return;
        }
        self.launch();
    }

    fn launch(&mut self) {
        self.launched = true;

        let pump = VideoPump {
            state: self.state.clone(),
            decoder: self.decoder.clone(),
            converter: PixelConverter::new(
                self.config.output_layout,
                self.config.max_geometry(),
            ),
            mailbox: self.mailbox.clone(),
            stats: self.stats.clone(),
            idle: self.config.pump_idle(),
        };
        match pump.spawn(self.notify.clone()) {
            Ok(handle) => self.pumps.push(handle),
            Err(e) => {
                error!(error = %e, "Failed to spawn video pump");
                self.abort();
                return;
            }
        }

        match &self.audio {
            SessionAudio::Thread {
                output,
                port,
                format,
            } => {
                let pump = AudioPump {
                    state: self.state.clone(),
                    decoder: self.decoder.clone(),
                    output: output.clone(),
                    port: *port,
                    format: *format,
                    stats: self.stats.audio().clone(),
                };
                match pump.spawn() {
                    Ok(handle) => self.pumps.push(handle),
                    Err(e) => error!(error = %e, "Failed to spawn audio pump, continuing without audio"),
                }
            }
            SessionAudio::Callback { host, format } => {
                let source = Arc::new(AudioPullSource::new(
                    self.state.clone(),
                    self.decoder.clone(),
                    self.stats.audio().clone(),
                ));
                match host.register(source, *format) {
                    Ok(stream) => self.audio_stream = Some(stream),
                    Err(e) => error!(error = %e, "Audio callback registration failed, continuing without audio"),
                }
            }
            SessionAudio::Off => {}
        }

        debug!(pumps = self.pumps.len(), "Pumps launched");
    }

    fn abort(&self) {
        let _ = self
            .state
            .transition(PlayerState::Active, PlayerState::Stopping);
    }

    fn teardown(&mut self) {
        self.abort();

        for handle in self.pumps.drain(..) {
            if handle.join().is_err() {
                error!("Pump thread panicked");
            }
        }
        if let Some(mut stream) = self.audio_stream.take() {
            stream.stop();
        }

        let position_ms = self.decoder.current_time();
        if let Err(e) = self.decoder.stop() {
            debug!(error = %e, "Decoder stop during teardown");
        }
        self.decoder.close();
        self.mailbox.reset();
        self.state.set(PlayerState::Inactive);

        info!(position_ms, stats = ?self.stats.snapshot(), "Playback session finished");
    }
}
