//! Software decoder backend driven by a scripted clip.
//!
//! Behaves like the platform decoder from the player's point of view: output
//! surfaces are allocated through the GPU half of the memory bridge at init,
//! a control block through the generic half, and the ready/play events are
//! raised from the decoder's own internal thread. Frames are produced on
//! demand by polls, following a [`ClipScript`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use avb_common::frame::PlaneLayout;
use avb_common::{DecodeError, DecodedAudioFrame, DecodedVideoFrame, Geometry};

use crate::memory::DecoderMemory;
use crate::session::{
    DecoderBackend, DecoderEvent, DecoderSession, EventSink, InitParams, StreamInfo, StreamKind,
};

/// Size of the per-session control block taken from the generic allocator.
const CONTROL_BLOCK_SIZE: usize = 4096;
const CONTROL_BLOCK_ALIGN: usize = 64;

// ---------------------------------------------------------------------------
// Clip script
// ---------------------------------------------------------------------------

/// Pixel content written into each frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFill {
    /// Every pixel has the same luma and chroma.
    Solid { y: u8, u: u8, v: u8 },
    /// Diagonal luma gradient that scrolls by one step per frame,
    /// neutral chroma.
    Ramp,
}

impl FrameFill {
    /// Solid fill for an RGB colour, BT.601 limited range.
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        let (r, g, b) = (r as i32, g as i32, b as i32);
        let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
        let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
        let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
        Self::Solid {
            y: y.clamp(0, 255) as u8,
            u: u.clamp(0, 255) as u8,
            v: v.clamp(0, 255) as u8,
        }
    }
}

/// A run of audio blocks sharing one format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioSegment {
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample frames per block.
    pub block_frames: usize,
    pub blocks: usize,
}

/// What the synthetic decoder plays.
#[derive(Clone, Debug)]
pub struct ClipScript {
    pub geometry: Geometry,
    /// Presentation timestamps of the video frames, in order.
    pub frame_timestamps: Vec<u64>,
    /// Consecutive polls that return the same frame before advancing.
    pub repeat_polls: u32,
    pub fill: FrameFill,
    pub audio: Vec<AudioSegment>,
    /// Keep reporting active after the last frame until stopped.
    pub hold_open: bool,
    /// Delay between `add_source` and the ready event.
    pub ready_delay: Duration,
    /// Minimum wall time between frame advances. Zero advances on every
    /// eligible poll.
    pub frame_interval: Duration,
    /// Make `add_source` fail.
    pub reject_source: bool,
    /// Expose an extra timed-text stream.
    pub text_stream: bool,
}

impl ClipScript {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            frame_timestamps: Vec::new(),
            repeat_polls: 1,
            fill: FrameFill::Ramp,
            audio: Vec::new(),
            hold_open: false,
            ready_delay: Duration::ZERO,
            frame_interval: Duration::ZERO,
            reject_source: false,
            text_stream: false,
        }
    }

    /// `count` frames at `fps`, timestamps in milliseconds.
    pub fn with_frame_rate(mut self, count: usize, fps: u32) -> Self {
        let fps = fps.max(1) as u64;
        self.frame_timestamps = (0..count as u64).map(|i| i * 1000 / fps).collect();
        self
    }

    pub fn with_timestamps(mut self, timestamps: impl Into<Vec<u64>>) -> Self {
        self.frame_timestamps = timestamps.into();
        self
    }

    pub fn with_fill(mut self, fill: FrameFill) -> Self {
        self.fill = fill;
        self
    }

    pub fn with_repeat_polls(mut self, polls: u32) -> Self {
        self.repeat_polls = polls.max(1);
        self
    }

    pub fn with_audio(mut self, segment: AudioSegment) -> Self {
        self.audio.push(segment);
        self
    }

    pub fn hold_open(mut self, hold: bool) -> Self {
        self.hold_open = hold;
        self
    }

    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn rejecting_source(mut self) -> Self {
        self.reject_source = true;
        self
    }

    pub fn with_text_stream(mut self) -> Self {
        self.text_stream = true;
        self
    }

    fn duration_ms(&self) -> u64 {
        self.frame_timestamps.last().copied().unwrap_or(0)
    }

    fn streams(&self) -> Vec<StreamInfo> {
        let mut streams = vec![StreamInfo {
            index: 0,
            kind: StreamKind::Video {
                geometry: self.geometry,
                language: "und".to_string(),
            },
            duration_ms: self.duration_ms(),
        }];
        if let Some(first) = self.audio.first() {
            streams.push(StreamInfo {
                index: streams.len(),
                kind: StreamKind::Audio {
                    sample_rate: first.sample_rate,
                    channels: first.channels,
                },
                duration_ms: self.duration_ms(),
            });
        }
        if self.text_stream {
            streams.push(StreamInfo {
                index: streams.len(),
                kind: StreamKind::Timedtext,
                duration_ms: self.duration_ms(),
            });
        }
        streams
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// [`DecoderBackend`] producing [`SyntheticSession`]s for one script.
#[derive(Clone, Debug)]
pub struct SyntheticBackend {
    script: ClipScript,
}

impl SyntheticBackend {
    pub fn new(script: ClipScript) -> Self {
        Self { script }
    }

    pub fn script(&self) -> &ClipScript {
        &self.script
    }
}

impl DecoderBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn init(&self, params: InitParams) -> Result<Arc<dyn DecoderSession>, DecodeError> {
        let session = SyntheticSession::open(self.script.clone(), params)?;
        Ok(Arc::new(session))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Decoder-owned memory. Addresses are kept as integers so the state can
/// cross threads; they are turned back into pointers only to write or free.
#[derive(Default)]
struct Resources {
    control: Option<usize>,
    surfaces: Vec<usize>,
    surface_len: usize,
}

#[derive(Default)]
struct Playback {
    source: Option<PathBuf>,
    started: bool,
    stopped: bool,
    closed: bool,
    enabled: HashSet<usize>,
    /// Index of the frame currently being served.
    current: Option<usize>,
    served: u32,
    last_advance: Option<Instant>,
    audio_segment: usize,
    audio_block: usize,
}

struct Shared {
    script: ClipScript,
    streams: Vec<StreamInfo>,
    /// Index of the audio stream in `streams`, if the clip has one.
    audio_index: Option<usize>,
    events: EventSink,
    auto_start: bool,
    playback: Mutex<Playback>,
}

impl Shared {
    fn video_exhausted(&self, pb: &Playback) -> bool {
        let next = pb.current.map_or(0, |i| i + 1);
        let current_done = pb.current.is_none() || pb.served >= self.script.repeat_polls;
        next >= self.script.frame_timestamps.len() && current_done
    }

    fn playing(&self, pb: &Playback) -> bool {
        pb.source.is_some() && pb.started && !pb.stopped && !pb.closed
    }

    fn stream_enabled(&self, pb: &Playback, index: usize) -> bool {
        self.auto_start || pb.enabled.contains(&index)
    }
}

/// One open synthetic decoder.
pub struct SyntheticSession {
    shared: Arc<Shared>,
    memory: Arc<dyn DecoderMemory>,
    resources: Mutex<Resources>,
    ready_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticSession {
    fn open(script: ClipScript, params: InitParams) -> Result<Self, DecodeError> {
        if script.geometry.is_empty() {
            return Err(DecodeError::Init(format!(
                "clip geometry {} is empty",
                script.geometry
            )));
        }

        let streams = script.streams();
        let audio_index = streams
            .iter()
            .position(|s| matches!(s.kind, StreamKind::Audio { .. }));
        let session = Self {
            shared: Arc::new(Shared {
                streams,
                audio_index,
                script,
                events: params.events,
                auto_start: params.auto_start,
                playback: Mutex::new(Playback::default()),
            }),
            memory: params.memory,
            resources: Mutex::new(Resources::default()),
            ready_thread: Mutex::new(None),
        };

        // A failure part-way leaves earlier allocations registered in
        // `resources`; dropping the session releases them.
        session.allocate_resources(params.output_buffers.max(1) as usize)?;

        info!(
            geometry = %session.shared.script.geometry,
            frames = session.shared.script.frame_timestamps.len(),
            output_buffers = params.output_buffers,
            base_priority = format_args!("0x{:x}", params.base_priority),
            auto_start = params.auto_start,
            "Synthetic decoder initialized"
        );
        Ok(session)
    }

    fn allocate_resources(&self, buffers: usize) -> Result<(), DecodeError> {
        let surface_len = self.shared.script.geometry.nv12_len();
        let mut res = self.resources.lock();
        res.surface_len = surface_len;

        let control = self.memory.allocate(CONTROL_BLOCK_ALIGN, CONTROL_BLOCK_SIZE)?;
        res.control = Some(control.as_ptr() as usize);

        for _ in 0..buffers {
            let surface = self.memory.allocate_gpu(0, surface_len)?;
            res.surfaces.push(surface.as_ptr() as usize);
        }
        debug!(buffers, surface_len, "Allocated decoder output surfaces");
        Ok(())
    }

    fn release_resources(&self) {
        let mut res = self.resources.lock();
        for address in res.surfaces.drain(..) {
            if let Some(ptr) = NonNull::new(address as *mut u8) {
                if let Err(e) = self.memory.deallocate_gpu(ptr) {
                    warn!(error = %e, "Failed to free output surface");
                }
            }
        }
        if let Some(ptr) = res.control.take().and_then(|a| NonNull::new(a as *mut u8)) {
            if let Err(e) = self.memory.deallocate(ptr) {
                warn!(error = %e, "Failed to free control block");
            }
        }
    }

    /// Render frame `index` into its output surface and copy it out.
    fn render_frame(&self, index: usize, timestamp: u64) -> Option<DecodedVideoFrame> {
        let res = self.resources.lock();
        if res.surfaces.is_empty() {
            return None;
        }
        let address = res.surfaces[index % res.surfaces.len()];
        let geometry = self.shared.script.geometry;
        let len = geometry.nv12_len();

        // SAFETY: `address` is a live surface of `surface_len >= len` bytes
        // allocated by this session, and the resources lock is held, so no
        // other poll and no close can touch it concurrently.
        let surface = unsafe { std::slice::from_raw_parts_mut(address as *mut u8, len) };
        fill_nv12(surface, geometry, self.shared.script.fill, index);

        Some(DecodedVideoFrame {
            data: Arc::from(&surface[..]),
            geometry,
            timestamp,
            planes: PlaneLayout::packed(geometry),
        })
    }
}

fn fill_nv12(dst: &mut [u8], geometry: Geometry, fill: FrameFill, frame_index: usize) {
    let luma_len = geometry.pixel_count();
    let (luma, chroma) = dst.split_at_mut(luma_len);
    match fill {
        FrameFill::Solid { y, u, v } => {
            luma.fill(y);
            for pair in chroma.chunks_exact_mut(2) {
                pair[0] = u;
                pair[1] = v;
            }
        }
        FrameFill::Ramp => {
            let width = geometry.width as usize;
            for (row, line) in luma.chunks_exact_mut(width).enumerate() {
                for (col, px) in line.iter_mut().enumerate() {
                    *px = (16 + (row + col + frame_index * 4) % 220) as u8;
                }
            }
            chroma.fill(128);
        }
    }
}

/// Deterministic sawtooth so tests can recognise the payload.
fn audio_block(segment: &AudioSegment, block: usize) -> Arc<[i16]> {
    let len = segment.block_frames * segment.channels as usize;
    (0..len)
        .map(|i| (((block * len + i) % 256) as i16 - 128) * 64)
        .collect()
}

impl DecoderSession for SyntheticSession {
    fn add_source(&self, path: &Path) -> Result<(), DecodeError> {
        if self.shared.script.reject_source {
            return Err(DecodeError::SourceRejected {
                path: path.to_path_buf(),
                reason: "unsupported container".to_string(),
            });
        }
        {
            let mut pb = self.shared.playback.lock();
            if pb.closed {
                return Err(DecodeError::NoSession);
            }
            pb.source = Some(path.to_path_buf());
            if self.shared.auto_start {
                pb.started = true;
            }
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("synthetic-decoder".into())
            .spawn(move || {
                if !shared.script.ready_delay.is_zero() {
                    thread::sleep(shared.script.ready_delay);
                }
                if shared.auto_start {
                    shared.events.emit(DecoderEvent::StatePlay);
                } else {
                    shared.events.emit(DecoderEvent::StateReady);
                }
            })
            .map_err(|e| DecodeError::Control {
                operation: "add_source",
                reason: e.to_string(),
            })?;
        *self.ready_thread.lock() = Some(handle);

        debug!(path = %path.display(), "Source added");
        Ok(())
    }

    fn is_active(&self) -> bool {
        let pb = self.shared.playback.lock();
        if pb.source.is_none() || pb.stopped || pb.closed {
            return false;
        }
        !(pb.started && !self.shared.script.hold_open && self.shared.video_exhausted(&pb))
    }

    fn video_frame(&self) -> Option<DecodedVideoFrame> {
        let script = &self.shared.script;
        let (index, advanced) = {
            let mut pb = self.shared.playback.lock();
            if !self.shared.playing(&pb) || !self.shared.stream_enabled(&pb, 0) {
                return None;
            }

            match pb.current {
                Some(i) if pb.served < script.repeat_polls => {
                    pb.served += 1;
                    (i, false)
                }
                _ => {
                    let paced = pb
                        .last_advance
                        .is_some_and(|at| at.elapsed() < script.frame_interval);
                    if paced {
                        return None;
                    }
                    let next = pb.current.map_or(0, |i| i + 1);
                    if next >= script.frame_timestamps.len() {
                        return None;
                    }
                    pb.current = Some(next);
                    pb.served = 1;
                    pb.last_advance = Some(Instant::now());
                    (next, true)
                }
            }
        };

        let timestamp = script.frame_timestamps[index];
        if advanced {
            debug!(index, timestamp, "Decoded video frame");
        }
        self.render_frame(index, timestamp)
    }

    fn audio_frame(&self) -> Option<DecodedAudioFrame> {
        let mut pb = self.shared.playback.lock();
        let audio_index = self.shared.audio_index?;
        if !self.shared.playing(&pb) || !self.shared.stream_enabled(&pb, audio_index) {
            return None;
        }

        let segments = &self.shared.script.audio;
        while pb.audio_segment < segments.len()
            && pb.audio_block >= segments[pb.audio_segment].blocks
        {
            pb.audio_segment += 1;
            pb.audio_block = 0;
        }
        let segment = segments.get(pb.audio_segment)?;
        let block = pb.audio_block;
        pb.audio_block += 1;

        let frames_before: usize = segments[..pb.audio_segment]
            .iter()
            .map(|s| s.blocks * s.block_frames)
            .sum::<usize>()
            + block * segment.block_frames;

        Some(DecodedAudioFrame {
            samples: audio_block(segment, block),
            sample_rate: segment.sample_rate,
            channels: segment.channels,
            timestamp: frames_before as u64 * 1000 / segment.sample_rate.max(1) as u64,
        })
    }

    fn stream_count(&self) -> usize {
        self.shared.streams.len()
    }

    fn stream_info(&self, index: usize) -> Option<StreamInfo> {
        self.shared.streams.get(index).cloned()
    }

    fn enable_stream(&self, index: usize) -> Result<(), DecodeError> {
        if index >= self.shared.streams.len() {
            return Err(DecodeError::StreamEnable {
                index,
                reason: format!("only {} streams", self.shared.streams.len()),
            });
        }
        self.shared.playback.lock().enabled.insert(index);
        debug!(index, "Stream enabled");
        Ok(())
    }

    fn current_time(&self) -> u64 {
        let pb = self.shared.playback.lock();
        pb.current
            .map(|i| self.shared.script.frame_timestamps[i])
            .unwrap_or(0)
    }

    fn start(&self) -> Result<(), DecodeError> {
        {
            let mut pb = self.shared.playback.lock();
            if pb.closed {
                return Err(DecodeError::NoSession);
            }
            if pb.source.is_none() {
                return Err(DecodeError::Control {
                    operation: "start",
                    reason: "no source added".to_string(),
                });
            }
            pb.started = true;
        }
        self.shared.events.emit(DecoderEvent::StatePlay);
        Ok(())
    }

    fn stop(&self) -> Result<(), DecodeError> {
        {
            let mut pb = self.shared.playback.lock();
            if pb.closed {
                return Err(DecodeError::NoSession);
            }
            pb.stopped = true;
        }
        self.shared.events.emit(DecoderEvent::StateStop);
        Ok(())
    }

    fn close(&self) {
        {
            let mut pb = self.shared.playback.lock();
            if pb.closed {
                return;
            }
            pb.closed = true;
        }
        if let Some(handle) = self.ready_thread.lock().take() {
            if handle.join().is_err() {
                warn!("Synthetic decoder thread panicked");
            }
        }
        self.release_resources();
        info!("Synthetic decoder closed");
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        self.close();
    }
}
