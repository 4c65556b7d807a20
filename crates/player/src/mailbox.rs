//! Latest-frame-wins handoff from the video pump to the host.
//!
//! A single slot behind one mutex, plus a count of frames published since
//! the last take. Frames move in by value and out by value, so the
//! critical section is a pointer swap and never touches pixel data.

use parking_lot::Mutex;
use tracing::{trace, warn};

use avb_common::ConvertedFrame;

/// A frame taken from the mailbox.
#[derive(Debug)]
pub struct TakenFrame {
    pub frame: ConvertedFrame,
    /// Frames that were published and replaced before anyone took them.
    pub dropped: u32,
}

#[derive(Default)]
struct Slot {
    frame: Option<ConvertedFrame>,
    pending: u32,
}

#[derive(Default)]
pub struct FrameMailbox {
    slot: Mutex<Slot>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` as the newest one. Returns the unread frame it
    /// displaced, if any, so the producer can reuse its allocation.
    pub fn publish(&self, frame: ConvertedFrame) -> Option<ConvertedFrame> {
        let timestamp = frame.timestamp;
        let mut slot = self.slot.lock();
        slot.pending = slot.pending.saturating_add(1);
        let displaced = slot.frame.replace(frame);
        trace!(timestamp, pending = slot.pending, "Frame published");
        displaced
    }

    /// Take the newest frame if one arrived since the last take.
    pub fn take_if_pending(&self) -> Option<TakenFrame> {
        let (frame, pending) = {
            let mut slot = self.slot.lock();
            if slot.pending == 0 {
                return None;
            }
            let pending = std::mem::take(&mut slot.pending);
            (slot.frame.take()?, pending)
        };

        let dropped = pending - 1;
        if dropped > 0 {
            warn!(dropped, timestamp = frame.timestamp, "Dropped frames between reads");
        }
        Some(TakenFrame { frame, dropped })
    }

    /// Frames published since the last take.
    pub fn pending(&self) -> u32 {
        self.slot.lock().pending
    }

    /// Discard any unread frame.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        slot.frame = None;
        slot.pending = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avb_common::{Geometry, PixelLayout};
    use std::sync::Arc;
    use std::thread;

    fn frame(timestamp: u64, value: u8) -> ConvertedFrame {
        let mut frame = ConvertedFrame::alloc(Geometry::new(2, 2), PixelLayout::Rgba8888);
        frame.data.fill(value);
        frame.timestamp = timestamp;
        frame
    }

    #[test]
    fn empty_mailbox_returns_nothing() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.take_if_pending().is_none());
        assert_eq!(mailbox.pending(), 0);
    }

    #[test]
    fn single_publish_has_no_drops() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.publish(frame(0, 1)).is_none());
        let taken = mailbox.take_if_pending().unwrap();
        assert_eq!(taken.frame.timestamp, 0);
        assert_eq!(taken.dropped, 0);
        assert!(mailbox.take_if_pending().is_none());
    }

    #[test]
    fn latest_frame_wins_with_drop_count() {
        for n in 1..=6u64 {
            let mailbox = FrameMailbox::new();
            for i in 0..n {
                mailbox.publish(frame(i * 33, i as u8));
            }
            let taken = mailbox.take_if_pending().unwrap();
            assert_eq!(taken.frame.timestamp, (n - 1) * 33);
            assert!(taken.frame.data.iter().all(|&b| b == (n - 1) as u8));
            assert_eq!(taken.dropped as u64, n - 1);
            assert!(mailbox.take_if_pending().is_none());
        }
    }

    #[test]
    fn publish_hands_back_displaced_frame() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(0, 1));
        let displaced = mailbox.publish(frame(33, 2)).unwrap();
        assert_eq!(displaced.timestamp, 0);

        mailbox.take_if_pending().unwrap();
        assert!(mailbox.publish(frame(66, 3)).is_none());
    }

    #[test]
    fn reset_clears_pending_frame() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(0, 1));
        mailbox.reset();
        assert!(mailbox.take_if_pending().is_none());
    }

    #[test]
    fn concurrent_publish_and_take_never_tear() {
        let mailbox = Arc::new(FrameMailbox::new());
        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                for i in 0..2000u64 {
                    let geometry = if i % 2 == 0 {
                        Geometry::new(4, 2)
                    } else {
                        Geometry::new(2, 2)
                    };
                    let mut f = ConvertedFrame::alloc(geometry, PixelLayout::Rgb24);
                    f.data.fill((i % 251) as u8);
                    f.timestamp = i;
                    mailbox.publish(f);
                }
            })
        };

        let mut last = None;
        let mut seen = 0u64;
        while !producer.is_finished() || mailbox.pending() > 0 {
            if let Some(taken) = mailbox.take_if_pending() {
                let f = taken.frame;
                assert_eq!(f.data.len(), PixelLayout::Rgb24.frame_len(f.geometry));
                assert!(f.data.iter().all(|&b| b == (f.timestamp % 251) as u8));
                if let Some(prev) = last {
                    assert!(f.timestamp > prev);
                }
                seen += 1 + taken.dropped as u64;
                last = Some(f.timestamp);
            }
        }
        producer.join().unwrap();
        assert_eq!(seen, 2000);
    }
}
