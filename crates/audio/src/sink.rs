//! Audio output port interface.
//!
//! A port is opened once with a buffer size and format, reconfigured when the
//! decoded stream's format changes, and fed interleaved signed 16-bit PCM.
//! `output` blocks until the device has room, which is what paces the
//! pull-thread pump.

use std::collections::HashMap;
use std::fmt;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use avb_common::{AudioConfig, AudioError};

/// Buffer size and PCM format of an output port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortFormat {
    /// Sample frames per output call.
    pub buffer_frames: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PortFormat {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            buffer_frames: config.buffer_frames,
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }

    /// Same buffer size, new rate and channel count.
    pub fn with_stream(self, sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            ..self
        }
    }

    pub fn matches(&self, sample_rate: u32, channels: u16) -> bool {
        self.sample_rate == sample_rate && self.channels == channels
    }

    /// Interleaved samples in one buffer.
    pub fn buffer_samples(&self) -> usize {
        self.buffer_frames as usize * self.channels as usize
    }

    /// Wall time one buffer takes to play.
    pub fn buffer_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.buffer_frames as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

impl fmt::Display for PortFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz x{} ({} frames)",
            self.sample_rate, self.channels, self.buffer_frames
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Push-model audio device.
pub trait AudioOutput: Send + Sync {
    fn open_port(&self, format: PortFormat) -> Result<PortId, AudioError>;

    fn set_config(&self, port: PortId, format: PortFormat) -> Result<(), AudioError>;

    /// Queue one buffer of interleaved PCM. May block until the device
    /// has consumed the previous buffer.
    fn output(&self, port: PortId, samples: &[i16]) -> Result<(), AudioError>;

    fn close_port(&self, port: PortId);
}

// ---------------------------------------------------------------------------
// NullOutput
// ---------------------------------------------------------------------------

/// Discards PCM but keeps a record of what it was given.
///
/// With pacing on, `output` sleeps for the buffer's play time so the
/// caller runs at the rate a real device would drain it.
#[derive(Debug, Default)]
pub struct NullOutput {
    pace: bool,
    inner: Mutex<NullInner>,
}

#[derive(Debug, Default)]
struct NullInner {
    next_port: u32,
    ports: HashMap<u32, PortFormat>,
    configs: Vec<PortFormat>,
    buffers: u64,
    samples: u64,
    silent_buffers: u64,
}

impl NullOutput {
    /// Non-blocking sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that blocks for each buffer's play time.
    pub fn paced() -> Self {
        Self {
            pace: true,
            ..Self::default()
        }
    }

    /// Every format passed to `set_config`, in order.
    pub fn config_history(&self) -> Vec<PortFormat> {
        self.inner.lock().configs.clone()
    }

    pub fn buffers_written(&self) -> u64 {
        self.inner.lock().buffers
    }

    pub fn samples_written(&self) -> u64 {
        self.inner.lock().samples
    }

    /// Buffers that were entirely zero.
    pub fn silent_buffers(&self) -> u64 {
        self.inner.lock().silent_buffers
    }

    pub fn open_ports(&self) -> usize {
        self.inner.lock().ports.len()
    }
}

impl AudioOutput for NullOutput {
    fn open_port(&self, format: PortFormat) -> Result<PortId, AudioError> {
        if format.buffer_frames == 0 || format.channels == 0 || format.sample_rate == 0 {
            return Err(AudioError::PortOpen(format!("unsupported format {format}")));
        }
        let mut inner = self.inner.lock();
        inner.next_port += 1;
        let id = inner.next_port;
        inner.ports.insert(id, format);
        debug!(port = id, %format, "Opened null audio port");
        Ok(PortId(id))
    }

    fn set_config(&self, port: PortId, format: PortFormat) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        let Some(current) = inner.ports.get_mut(&port.0) else {
            return Err(AudioError::Config {
                port: port.0,
                reason: "port not open".to_string(),
            });
        };
        *current = format;
        inner.configs.push(format);
        Ok(())
    }

    fn output(&self, port: PortId, samples: &[i16]) -> Result<(), AudioError> {
        let format = {
            let mut inner = self.inner.lock();
            let Some(format) = inner.ports.get(&port.0).copied() else {
                return Err(AudioError::Output {
                    port: port.0,
                    reason: "port not open".to_string(),
                });
            };
            inner.buffers += 1;
            inner.samples += samples.len() as u64;
            if samples.iter().all(|&s| s == 0) {
                inner.silent_buffers += 1;
            }
            format
        };
        if self.pace {
            thread::sleep(format.buffer_duration());
        }
        Ok(())
    }

    fn close_port(&self, port: PortId) {
        if self.inner.lock().ports.remove(&port.0).is_some() {
            debug!(port = port.0, "Closed null audio port");
        }
    }
}
