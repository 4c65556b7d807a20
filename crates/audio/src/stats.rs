use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by whichever audio path is running.
#[derive(Debug, Default)]
pub struct AudioStats {
    frames: AtomicU64,
    silence: AtomicU64,
    reconfigs: AtomicU64,
    truncated_samples: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`AudioStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AudioStatsSnapshot {
    /// Decoded audio frames delivered to the sink.
    pub frames: u64,
    /// Buffers filled with silence because nothing was ready.
    pub silence: u64,
    pub reconfigs: u64,
    /// Decoded samples that did not fit the requested buffer.
    pub truncated_samples: u64,
    pub errors: u64,
}

impl AudioStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_silence(&self) {
        self.silence.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconfig(&self) {
        self.reconfigs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_truncated(&self, samples: usize) {
        self.truncated_samples
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AudioStatsSnapshot {
        AudioStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            silence: self.silence.load(Ordering::Relaxed),
            reconfigs: self.reconfigs.load(Ordering::Relaxed),
            truncated_samples: self.truncated_samples.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
