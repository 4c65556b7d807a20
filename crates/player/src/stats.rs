use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use avb_audio::{AudioStats, AudioStatsSnapshot};

/// Counters for one player, across all of its sessions.
#[derive(Debug, Default)]
pub struct PlayerStats {
    published: AtomicU64,
    presented: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    duplicates: AtomicU64,
    conversion_failures: AtomicU64,
    sessions: AtomicU64,
    audio: Arc<AudioStats>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlayerStatsSnapshot {
    /// Frames the video pump converted and published.
    pub frames_published: u64,
    /// Frames handed to the render sink.
    pub frames_presented: u64,
    /// Frames taken from the mailbox that the render sink refused.
    pub frames_rejected: u64,
    /// Frames replaced in the mailbox before the host read them.
    pub frames_dropped: u64,
    /// Polls that returned an already-seen timestamp.
    pub duplicate_polls: u64,
    pub conversion_failures: u64,
    pub sessions: u64,
    pub audio: AudioStatsSnapshot,
}

impl PlayerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio(&self) -> &Arc<AudioStats> {
        &self.audio
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_presented(&self) {
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, dropped: u32) {
        self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conversion_failure(&self) {
        self.conversion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PlayerStatsSnapshot {
        PlayerStatsSnapshot {
            frames_published: self.published.load(Ordering::Relaxed),
            frames_presented: self.presented.load(Ordering::Relaxed),
            frames_rejected: self.rejected.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            duplicate_polls: self.duplicates.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            audio: self.audio.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes() {
        let stats = PlayerStats::new();
        stats.record_published();
        stats.record_published();
        stats.record_dropped(1);
        stats.record_presented();
        stats.audio().record_silence();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_published, 2);
        assert_eq!(snapshot.frames_dropped, 1);

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["frames_presented"], 1);
        assert_eq!(json["frames_rejected"], 0);
        assert_eq!(json["audio"]["silence"], 1);
    }
}
