//! Queued playback on top of [`VideoHost`].
//!
//! A [`VideoChannel`] holds a queue of clips and advances through it from the
//! host's periodic tick: whenever the player has gone back to `Inactive`,
//! the next queued clip is started.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use avb_common::{PlayerError, PlayerState};

use crate::host::{PresentedFrame, VideoHost};
use crate::render::RenderSink;

pub struct VideoChannel<R: RenderSink> {
    host: VideoHost<R>,
    queue: VecDeque<PathBuf>,
    current: Option<PathBuf>,
}

impl<R: RenderSink> VideoChannel<R> {
    /// Wrap an already initialized host.
    pub fn new(host: VideoHost<R>) -> Self {
        Self {
            host,
            queue: VecDeque::new(),
            current: None,
        }
    }

    pub fn enqueue<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.queue.extend(paths.into_iter().map(Into::into));
        debug!(queued = self.queue.len(), "Clips enqueued");
    }

    /// Drop queued clips. While nothing is playing the head of the queue is
    /// kept, since it has not been started yet.
    pub fn dequeue(&mut self) {
        if self.host.is_playing() {
            self.queue.clear();
        } else {
            self.queue.truncate(1);
        }
    }

    /// Advance the channel. With `force_stop` the queue is dropped and the
    /// current clip stopped instead.
    ///
    /// Returns the start error of the clip that failed; that clip is
    /// discarded and the next tick moves on.
    pub fn periodic(&mut self, force_stop: bool) -> Result<(), PlayerError> {
        if force_stop {
            self.dequeue();
            self.stop();
            return Ok(());
        }

        self.host.periodic_tick();
        if self.host.is_playing() || self.state() != PlayerState::Inactive {
            return Ok(());
        }
        self.current = None;

        let Some(next) = self.queue.pop_front() else {
            return Ok(());
        };
        match self.host.video_start(&next) {
            Ok(()) => {
                info!(path = %next.display(), remaining = self.queue.len(), "Channel started clip");
                self.current = Some(next);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, path = %next.display(), "Channel failed to start clip");
                Err(e)
            }
        }
    }

    pub fn stop(&mut self) {
        self.host.video_stop();
        self.current = None;
    }

    /// Stop and forget everything queued.
    pub fn fadeout(&mut self) {
        self.stop();
        self.queue.clear();
    }

    pub fn read_video_frame(&mut self) -> Option<PresentedFrame<R::Surface>> {
        self.host.read_video_frame()
    }

    pub fn is_playing(&self) -> bool {
        self.host.is_playing()
    }

    /// Nothing queued and no session in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.state() == PlayerState::Inactive
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn host(&self) -> &VideoHost<R> {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut VideoHost<R> {
        &mut self.host
    }

    fn state(&self) -> PlayerState {
        self.host
            .player()
            .map_or(PlayerState::Inactive, |p| p.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use avb_common::{AudioMode, Geometry, PlayerConfig};
    use avb_decoder::{ClipScript, HostGpuMemory, SyntheticBackend};

    use crate::host::{AudioBackend, PlayerDeps};
    use crate::render::OwnedSurfaceSink;

    fn channel(script: ClipScript) -> TestChannel {
        let mut config = PlayerConfig::default();
        config.audio.mode = AudioMode::Disabled;
        let mut host = VideoHost::new();
        host.video_init(
            config,
            PlayerDeps {
                backend: Arc::new(SyntheticBackend::new(script)),
                gpu_memory: Arc::new(HostGpuMemory::new()),
                audio: AudioBackend::None,
                sink: OwnedSurfaceSink,
            },
        )
        .unwrap();
        VideoChannel::new(host)
    }

    type TestChannel = VideoChannel<OwnedSurfaceSink>;

    fn tick_until(channel: &mut TestChannel, mut cond: impl FnMut(&TestChannel) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond(channel) {
            if Instant::now() >= deadline {
                return false;
            }
            channel.periodic(false).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    #[test]
    fn plays_queued_clips_in_order() {
        let script = ClipScript::new(Geometry::new(16, 16)).with_frame_rate(3, 240);
        let mut channel = channel(script);
        channel.enqueue(["a.bik", "b.bik"]);
        assert_eq!(channel.queued(), 2);

        channel.periodic(false).unwrap();
        assert_eq!(channel.current(), Some(Path::new("a.bik")));
        assert_eq!(channel.queued(), 1);

        assert!(tick_until(&mut channel, |c| c.current() == Some(Path::new("b.bik"))));
        assert!(tick_until(&mut channel, |c| c.is_idle()));
        let stats = channel.host().player().unwrap().stats();
        assert_eq!(stats.sessions, 2);
    }

    #[test]
    fn dequeue_keeps_unstarted_head() {
        let mut channel = channel(ClipScript::new(Geometry::new(16, 16)));
        channel.enqueue(["a.bik", "b.bik", "c.bik"]);
        channel.dequeue();
        assert_eq!(channel.queued(), 1);
    }

    #[test]
    fn force_stop_drops_queue_and_stops() {
        let script = ClipScript::new(Geometry::new(16, 16))
            .with_timestamps([0])
            .hold_open(true);
        let mut channel = channel(script);
        channel.enqueue(["a.bik", "b.bik"]);
        channel.periodic(false).unwrap();
        assert!(tick_until(&mut channel, |c| c.is_playing()));

        channel.periodic(true).unwrap();
        assert_eq!(channel.queued(), 0);
        assert!(channel.current().is_none());
        let player = channel.host_mut().player_mut().unwrap();
        assert!(player.wait_inactive(Duration::from_secs(5)));
        assert!(channel.is_idle());
    }

    #[test]
    fn failed_clip_is_discarded() {
        let script = ClipScript::new(Geometry::new(16, 16)).rejecting_source();
        let mut channel = channel(script);
        channel.enqueue(["bad.bik"]);
        assert!(channel.periodic(false).is_err());
        assert!(channel.current().is_none());
        assert!(channel.is_idle());
    }
}
