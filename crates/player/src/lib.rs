//! Playback bridge between a threaded decoder and a polling render loop.
//!
//! The decoder runs at its own pace on its own threads. A video pump
//! converts each new frame to packed RGBA/RGB and drops it into a
//! single-slot [`FrameMailbox`]; the host's render loop takes whatever is
//! newest whenever it polls. Audio runs beside it through `avb-audio`.
//!
//! Start with [`VideoPlayer`] (or the flat [`VideoHost`] surface, and
//! [`VideoChannel`] for a queue of clips).

pub mod channel;
pub mod host;
pub mod lifecycle;
pub mod mailbox;
pub mod pump;
pub mod render;
pub mod stats;

pub use channel::VideoChannel;
pub use host::{AudioBackend, PlayerDeps, PresentedFrame, VideoHost, VideoPlayer};
pub use lifecycle::{Control, PlaybackSession, SessionAudio, SessionContext};
pub use mailbox::{FrameMailbox, TakenFrame};
pub use pump::VideoPump;
pub use render::{OwnedSurface, OwnedSurfaceSink, RenderSink, SurfaceDescriptor};
pub use stats::{PlayerStats, PlayerStatsSnapshot};
