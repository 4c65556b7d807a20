//! Pull-callback audio path.
//!
//! The output device's own clock asks for each buffer. [`AudioPullSource`]
//! answers with silence unless the player is active and the decoder has a
//! frame ready, in which case the frame's PCM is copied in, truncated to the
//! requested length. A callback never waits on anything but one decoder poll.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use avb_common::{AudioError, DecodedAudioFrame, PlayerState, StateCell};
use avb_decoder::DecoderSession;

use crate::sink::{AudioOutput, PortFormat, PortId};
use crate::stats::AudioStats;

/// Answers the device's buffer requests from the decoder.
pub struct AudioPullSource {
    state: Arc<StateCell>,
    decoder: Arc<dyn DecoderSession>,
    stats: Arc<AudioStats>,
}

impl AudioPullSource {
    pub fn new(
        state: Arc<StateCell>,
        decoder: Arc<dyn DecoderSession>,
        stats: Arc<AudioStats>,
    ) -> Self {
        Self {
            state,
            decoder,
            stats,
        }
    }

    /// Fill `dst` with interleaved samples. Returns how many came from the
    /// decoder; the rest is silence.
    pub fn fill_samples(&self, dst: &mut [i16]) -> usize {
        dst.fill(0);
        let Some(frame) = self.next_frame() else {
            return 0;
        };
        let copied = self.take(&frame, dst.len());
        dst[..copied].copy_from_slice(&frame.samples[..copied]);
        copied
    }

    /// Byte-oriented variant: fills `dst` with little-endian PCM. An odd
    /// trailing byte is left as silence. Returns bytes taken from the decoder.
    pub fn fill(&self, dst: &mut [u8]) -> usize {
        dst.fill(0);
        let Some(frame) = self.next_frame() else {
            return 0;
        };
        let copied = self.take(&frame, dst.len() / 2);
        for (out, sample) in dst.chunks_exact_mut(2).zip(&frame.samples[..copied]) {
            out.copy_from_slice(&sample.to_le_bytes());
        }
        copied * 2
    }

    fn next_frame(&self) -> Option<DecodedAudioFrame> {
        let frame = if self.state.is(PlayerState::Active) && self.decoder.is_active() {
            self.decoder.audio_frame()
        } else {
            None
        };
        if frame.is_none() {
            self.stats.record_silence();
        }
        frame
    }

    /// Record one delivered frame; returns how many samples fit in `capacity`.
    fn take(&self, frame: &DecodedAudioFrame, capacity: usize) -> usize {
        let copied = frame.samples.len().min(capacity);
        if copied < frame.samples.len() {
            let dropped = frame.samples.len() - copied;
            trace!(
                dropped,
                requested = capacity,
                frames = frame.frame_count(),
                "Audio frame truncated"
            );
            self.stats.record_truncated(dropped);
        }
        self.stats.record_frame();
        copied
    }
}

/// A running callback stream. Stopping is idempotent.
pub trait AudioStream: Send {
    fn stop(&mut self);
}

/// A device that drives an [`AudioPullSource`] from its own clock.
pub trait AudioCallbackHost: Send + Sync {
    fn register(
        &self,
        source: Arc<AudioPullSource>,
        format: PortFormat,
    ) -> Result<Box<dyn AudioStream>, AudioError>;
}

// ---------------------------------------------------------------------------
// ClockedHost: callback clock over a push port
// ---------------------------------------------------------------------------

/// Drives pull sources from a dedicated clock thread that writes each
/// filled buffer to a push-model [`AudioOutput`]. The port's blocking
/// `output` call provides the clock.
pub struct ClockedHost {
    output: Arc<dyn AudioOutput>,
}

impl ClockedHost {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self { output }
    }
}

impl AudioCallbackHost for ClockedHost {
    fn register(
        &self,
        source: Arc<AudioPullSource>,
        format: PortFormat,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        let port = self.output.open_port(format)?;
        let running = Arc::new(AtomicBool::new(true));

        let handle = spawn_clock(self.output.clone(), port, format, source, running.clone())
            .map_err(|e| {
                self.output.close_port(port);
                AudioError::Device(format!("failed to spawn audio clock: {e}"))
            })?;

        info!(%port, %format, "Audio callback registered");
        Ok(Box::new(ClockedStream {
            output: self.output.clone(),
            port,
            running,
            handle: Some(handle),
        }))
    }
}

fn spawn_clock(
    output: Arc<dyn AudioOutput>,
    port: PortId,
    format: PortFormat,
    source: Arc<AudioPullSource>,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("audio-clock".to_string())
        .spawn(move || {
            let mut buffer = vec![0i16; format.buffer_samples()];
            while running.load(Ordering::Acquire) {
                source.fill_samples(&mut buffer);
                if let Err(e) = output.output(port, &buffer) {
                    warn!(error = %e, "Audio clock write failed");
                    source.stats.record_error();
                    thread::sleep(format.buffer_duration());
                }
            }
            debug!(%port, "Audio clock exited");
        })
}

struct ClockedStream {
    output: Arc<dyn AudioOutput>,
    port: PortId,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioStream for ClockedStream {
    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        if handle.join().is_err() {
            warn!("Audio clock thread panicked");
        }
        self.output.close_port(self.port);
    }
}

impl Drop for ClockedStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullOutput;
    use avb_common::Geometry;
    use avb_decoder::{
        AudioSegment, ClipScript, DecoderBackend, EventSink, InitParams, MemoryBridge,
        SyntheticBackend,
    };
    use crossbeam::channel;
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn source(block_frames: usize, blocks: usize, state: PlayerState) -> AudioPullSource {
        let script = ClipScript::new(Geometry::new(8, 8))
            .hold_open(true)
            .with_audio(AudioSegment {
                sample_rate: 48_000,
                channels: 2,
                block_frames,
                blocks,
            });
        let (tx, _rx) = channel::unbounded();
        let decoder = SyntheticBackend::new(script)
            .init(InitParams {
                memory: Arc::new(MemoryBridge::host()),
                events: EventSink::new(tx),
                output_buffers: 1,
                base_priority: 0xA0,
                auto_start: true,
            })
            .unwrap();
        decoder.add_source(Path::new("clip.bik")).unwrap();
        AudioPullSource::new(
            Arc::new(StateCell::new(state)),
            decoder,
            Arc::new(AudioStats::new()),
        )
    }

    #[test]
    fn silence_when_player_not_active() {
        let source = source(4, 1, PlayerState::Stopping);
        let mut dst = [0x55u8; 32];
        assert_eq!(source.fill(&mut dst), 0);
        assert!(dst.iter().all(|&b| b == 0));
        assert_eq!(source.stats.snapshot().silence, 1);
    }

    #[test]
    fn short_frame_leaves_tail_silent() {
        // 4 frames x 2 channels = 8 samples = 16 bytes into a 32-byte request.
        let source = source(4, 1, PlayerState::Active);
        let mut dst = [0x55u8; 32];
        assert_eq!(source.fill(&mut dst), 16);
        assert!(dst[..16].iter().any(|&b| b != 0));
        assert!(dst[16..].iter().all(|&b| b == 0));

        // Clip exhausted: next request is pure silence.
        let mut again = [0x55u8; 32];
        assert_eq!(source.fill(&mut again), 0);
        assert!(again.iter().all(|&b| b == 0));
    }

    #[test]
    fn long_frame_is_truncated_to_request() {
        let source = source(64, 1, PlayerState::Active);
        let mut dst = [0i16; 10];
        assert_eq!(source.fill_samples(&mut dst), 10);
        assert_eq!(source.stats.snapshot().truncated_samples, 118);
    }

    #[test]
    fn byte_fill_matches_sample_fill_little_endian() {
        let by_sample = source(4, 1, PlayerState::Active);
        let by_byte = source(4, 1, PlayerState::Active);

        let mut samples = [0i16; 6];
        let mut bytes = [0x55u8; 13];
        assert_eq!(by_sample.fill_samples(&mut samples), 6);
        assert_eq!(by_byte.fill(&mut bytes), 12);

        for (pair, sample) in bytes.chunks_exact(2).zip(samples) {
            assert_eq!(i16::from_le_bytes([pair[0], pair[1]]), sample);
        }
        assert_eq!(bytes[12], 0);
        assert_eq!(by_byte.stats.snapshot().truncated_samples, 2);
    }

    #[test]
    fn clocked_host_drives_source_until_stopped() {
        let output = Arc::new(NullOutput::new());
        let host = ClockedHost::new(output.clone());
        let source = Arc::new(source(4, 3, PlayerState::Active));
        let format = PortFormat {
            buffer_frames: 4,
            sample_rate: 48_000,
            channels: 2,
        };

        let mut stream = host.register(source.clone(), format).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while source.stats.snapshot().frames < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        stream.stop();
        stream.stop();

        assert_eq!(source.stats.snapshot().frames, 3);
        assert_eq!(output.open_ports(), 0);
        assert!(output.buffers_written() >= 3);
    }
}
