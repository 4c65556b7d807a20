//! Decoder side of the playback bridge: the memory callbacks handed to the
//! decoder, the session interface the player drives, NV12 conversion and a
//! scripted software backend.

pub mod memory;
pub mod session;
pub mod software;
#[cfg(feature = "ffmpeg")]
pub mod sws;
pub mod synthetic;

pub use memory::{DecoderMemory, GpuAccess, GpuBlock, GpuMemory, HostGpuMemory, MemoryBridge};
pub use session::{
    DecoderBackend, DecoderEvent, DecoderSession, EventSink, InitParams, StreamInfo, StreamKind,
};
pub use software::{
    Bt601Factory, Bt601Scaler, DefaultScaler, PixelConverter, Scaler, ScalerFactory,
};
#[cfg(feature = "ffmpeg")]
pub use sws::{SwsFactory, SwsScaler};
pub use synthetic::{AudioSegment, ClipScript, FrameFill, SyntheticBackend};
