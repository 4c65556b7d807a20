//! Audio delivery for the playback bridge.
//!
//! Two ways to get decoded PCM to a device, both with the same contract
//! (never starve the device, never block its clock for longer than one
//! decoder poll):
//!
//! - [`AudioPump`]: a dedicated thread polls the decoder and pushes into an
//!   [`AudioOutput`] port.
//! - [`AudioPullSource`]: the device's clock calls back for each buffer,
//!   registered with an [`AudioCallbackHost`].

mod callback;
#[cfg(feature = "cpal")]
mod cpal_host;
mod pump;
mod sink;
mod stats;

pub use callback::{AudioCallbackHost, AudioPullSource, AudioStream, ClockedHost};
#[cfg(feature = "cpal")]
pub use cpal_host::CpalHost;
pub use pump::AudioPump;
pub use sink::{AudioOutput, NullOutput, PortFormat, PortId};
pub use stats::{AudioStats, AudioStatsSnapshot};
