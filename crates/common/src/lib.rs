//! Shared vocabulary for the avbridge playback pipeline.
//!
//! Every other crate in the workspace depends on this one for:
//!
//! - [`state`]: the player lifecycle enum and its atomic cell.
//! - [`frame`]: decoded/converted frame types and geometry.
//! - [`config`]: `PlayerConfig`, loaded from JSON or built in code.
//! - [`error`]: one `thiserror` enum per failure domain.

pub mod config;
pub mod error;
pub mod frame;
pub mod state;

pub use config::{AudioConfig, AudioMode, PlayerConfig};
pub use error::{AudioError, BridgeError, ConfigError, ConvertError, DecodeError, PlayerError};
pub use frame::{
    ChannelMasks, ConvertedFrame, DecodedAudioFrame, DecodedVideoFrame, Geometry, PixelLayout,
};
pub use state::{PlayerState, StateCell};
