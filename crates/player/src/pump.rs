//! Video pump: decoder poll -> conversion -> mailbox.
//!
//! Runs on its own thread while the player is `Active`. A frame counts as
//! new only when its timestamp differs from the last one seen, so repeated
//! polls of the same decoder frame cost nothing. When the decoder reports
//! it has gone inactive the pump moves the player to `Stopping` and exits;
//! teardown is left to the lifecycle control thread.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Sender;
use tracing::{debug, error, info, trace};

use avb_common::{ConvertedFrame, Geometry, PlayerState, StateCell};
use avb_decoder::{DecoderSession, PixelConverter};

use crate::lifecycle::Control;
use crate::mailbox::FrameMailbox;
use crate::stats::PlayerStats;

pub struct VideoPump {
    pub state: Arc<StateCell>,
    pub decoder: Arc<dyn DecoderSession>,
    pub converter: PixelConverter,
    pub mailbox: Arc<FrameMailbox>,
    pub stats: Arc<PlayerStats>,
    /// Sleep between empty polls; zero yields instead.
    pub idle: Duration,
}

impl VideoPump {
    /// Run on a new thread; `notify` hears about the exit.
    pub fn spawn(self, notify: Sender<Control>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("video-pump".to_string())
            .spawn(move || {
                self.run();
                let _ = notify.send(Control::PumpExited("video"));
            })
    }

    pub fn run(mut self) {
        info!(layout = ?self.converter.layout(), "Video pump started");
        let mut last_timestamp: Option<u64> = None;
        // Buffer handed back by the mailbox, reused for the next conversion.
        let mut spare: Option<ConvertedFrame> = None;

        while self.state.is(PlayerState::Active) {
            if !self.decoder.is_active() {
                if self
                    .state
                    .transition(PlayerState::Active, PlayerState::Stopping)
                {
                    info!("Decoder went inactive, stopping playback");
                }
                break;
            }

            let Some(frame) = self.decoder.video_frame() else {
                self.idle();
                continue;
            };

            if last_timestamp == Some(frame.timestamp) {
                trace!(timestamp = frame.timestamp, "Same frame as last poll");
                self.stats.record_duplicate();
                self.idle();
                continue;
            }
            last_timestamp = Some(frame.timestamp);

            let mut dst = spare
                .take()
                .unwrap_or_else(|| ConvertedFrame::alloc(Geometry::default(), self.converter.layout()));

            match self.converter.convert(&frame, &mut dst) {
                Ok(()) => {
                    debug!(
                        timestamp = frame.timestamp,
                        width = frame.geometry.width,
                        height = frame.geometry.height,
                        "Frame converted"
                    );
                    self.stats.record_published();
                    spare = self.mailbox.publish(dst);
                }
                Err(e) => {
                    error!(error = %e, timestamp = frame.timestamp, "Frame conversion failed, skipping");
                    self.stats.record_conversion_failure();
                    spare = Some(dst);
                }
            }
        }

        info!(
            contexts_built = self.converter.contexts_built(),
            last_timestamp,
            "Video pump exited"
        );
    }

    fn idle(&self) {
        if self.idle.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(self.idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avb_common::PixelLayout;
    use avb_decoder::{
        ClipScript, DecoderBackend, EventSink, FrameFill, InitParams, MemoryBridge,
        SyntheticBackend,
    };
    use crossbeam::channel;
    use std::path::Path;

    fn decoder(script: ClipScript) -> Arc<dyn DecoderSession> {
        let (tx, _rx) = channel::unbounded();
        let session = SyntheticBackend::new(script)
            .init(InitParams {
                memory: Arc::new(MemoryBridge::host()),
                events: EventSink::new(tx),
                output_buffers: 2,
                base_priority: 0xA0,
                auto_start: true,
            })
            .unwrap();
        session.add_source(Path::new("clip.bik")).unwrap();
        session
    }

    fn pump(decoder: Arc<dyn DecoderSession>, max: Geometry) -> (VideoPump, Arc<StateCell>) {
        let state = Arc::new(StateCell::new(PlayerState::Active));
        (
            VideoPump {
                state: state.clone(),
                decoder,
                converter: PixelConverter::new(PixelLayout::Rgba8888, max),
                mailbox: Arc::new(FrameMailbox::new()),
                stats: Arc::new(PlayerStats::new()),
                idle: Duration::ZERO,
            },
            state,
        )
    }

    #[test]
    fn publishes_each_timestamp_once_and_stops_at_end() {
        let script = ClipScript::new(Geometry::new(16, 8))
            .with_timestamps([0, 33, 66])
            .with_repeat_polls(4)
            .with_fill(FrameFill::from_rgb(0, 0, 255));
        let (pump, state) = pump(decoder(script), Geometry::new(960, 544));
        let mailbox = pump.mailbox.clone();
        let stats = pump.stats.clone();

        pump.run();

        assert!(state.is(PlayerState::Stopping));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_published, 3);
        assert_eq!(snapshot.duplicate_polls, 9);

        let taken = mailbox.take_if_pending().unwrap();
        assert_eq!(taken.frame.timestamp, 66);
        assert_eq!(taken.dropped, 2);
        let px = taken.frame.pixel(0, 0);
        assert!(px[2] > 236 && px[0] < 10 && px[1] < 10, "{px:?}");
    }

    #[test]
    fn oversized_frames_are_skipped_not_published() {
        let script = ClipScript::new(Geometry::new(64, 64)).with_timestamps([0, 33]);
        let (pump, state) = pump(decoder(script), Geometry::new(32, 32));
        let mailbox = pump.mailbox.clone();
        let stats = pump.stats.clone();

        pump.run();

        assert!(state.is(PlayerState::Stopping));
        assert!(mailbox.take_if_pending().is_none());
        assert_eq!(stats.snapshot().conversion_failures, 2);
    }

    #[test]
    fn exits_without_touching_state_once_stopping() {
        let script = ClipScript::new(Geometry::new(8, 8)).hold_open(true);
        let (pump, state) = pump(decoder(script), Geometry::new(960, 544));
        state.set(PlayerState::Stopping);
        pump.run();
        assert!(state.is(PlayerState::Stopping));
    }
}
