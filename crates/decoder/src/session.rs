//! Decoder session interface.
//!
//! The hardware decoder is an external collaborator: it runs on its own
//! internal threads, allocates through the [`DecoderMemory`] callbacks and
//! reports lifecycle events through an [`EventSink`]. This module defines
//! the seam the player drives it through.
//!
//! ## Start modes
//!
//! With `auto_start` the decoder begins decoding as soon as a source is
//! added. Without it (the default) the decoder raises
//! [`DecoderEvent::StateReady`] once the source is parsed; the player then
//! enumerates streams, enables the ones it wants and calls `start`.
//!
//! Events arrive on whatever thread the decoder chooses. The sink only
//! forwards them into a channel, so the player's control loop is the single
//! place that reacts to them.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crossbeam::channel::Sender;
use tracing::{debug, trace};

use avb_common::{DecodeError, DecodedAudioFrame, DecodedVideoFrame, Geometry};

use crate::memory::DecoderMemory;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Lifecycle notifications raised by the decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecoderEvent {
    /// Decoding stopped.
    StateStop,
    /// Source parsed; streams can be enumerated and enabled.
    StateReady,
    /// Decoding started.
    StatePlay,
    StatePause,
    StateBuffering,
    /// Non-fatal diagnostic from the decoder.
    Warning(String),
}

/// Forwards decoder events into the player's control channel.
///
/// Cheap to clone; safe to call from any decoder thread. Events raised after
/// the player has dropped its receiver are discarded.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<DecoderEvent>,
}

impl EventSink {
    pub fn new(tx: Sender<DecoderEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: DecoderEvent) {
        debug!(?event, "Player event");
        if self.tx.send(event).is_err() {
            trace!("Event receiver gone, dropping event");
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Video {
        geometry: Geometry,
        language: String,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
    },
    Timedtext,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Init + session traits
// ---------------------------------------------------------------------------

/// Parameters for [`DecoderBackend::init`].
#[derive(Clone)]
pub struct InitParams {
    pub memory: Arc<dyn DecoderMemory>,
    pub events: EventSink,
    /// Number of video output frame buffers the decoder rotates through.
    pub output_buffers: u32,
    pub base_priority: u32,
    pub auto_start: bool,
}

impl fmt::Debug for InitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitParams")
            .field("output_buffers", &self.output_buffers)
            .field("base_priority", &format_args!("0x{:x}", self.base_priority))
            .field("auto_start", &self.auto_start)
            .finish_non_exhaustive()
    }
}

/// Factory for decoder sessions.
pub trait DecoderBackend: Send + Sync {
    fn name(&self) -> &str;

    fn init(&self, params: InitParams) -> Result<Arc<dyn DecoderSession>, DecodeError>;
}

/// One open decoder instance.
///
/// All methods take `&self`: the video pump, the audio pump and the
/// lifecycle call in concurrently, and the decoder serializes internally.
/// Polls never block for longer than one decode step.
pub trait DecoderSession: Send + Sync {
    fn add_source(&self, path: &Path) -> Result<(), DecodeError>;

    /// False once the source is exhausted, the session stopped or closed.
    fn is_active(&self) -> bool;

    /// Most recent decoded video frame, if one is ready. The same frame may
    /// be returned by several consecutive polls.
    fn video_frame(&self) -> Option<DecodedVideoFrame>;

    fn audio_frame(&self) -> Option<DecodedAudioFrame>;

    fn stream_count(&self) -> usize;

    fn stream_info(&self, index: usize) -> Option<StreamInfo>;

    fn enable_stream(&self, index: usize) -> Result<(), DecodeError>;

    /// Current playback position in decoder time units.
    fn current_time(&self) -> u64;

    fn start(&self) -> Result<(), DecodeError>;

    fn stop(&self) -> Result<(), DecodeError>;

    /// Release every decoder resource. Idempotent.
    fn close(&self);
}
