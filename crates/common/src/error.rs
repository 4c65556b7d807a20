//! Error types, one enum per failure domain.
//!
//! Pump threads never propagate these to the host; they log and carry on.
//! Only the synchronous host calls (`init`, `start`) return them.

use std::path::PathBuf;

use thiserror::Error;

/// Memory bridge failures (generic heap and GPU-mapped allocations).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("out of memory: {size} bytes at alignment {alignment}")]
    OutOfMemory { size: usize, alignment: usize },

    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    #[error("address 0x{address:x} is not owned by this bridge")]
    UnknownBlock { address: usize },

    #[error("failed to map {size} bytes at 0x{address:x} for GPU access: {reason}")]
    MapFailed {
        address: usize,
        size: usize,
        reason: String,
    },
}

/// Pixel conversion failures. Recovered locally by skipping one publish.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to build conversion context for {width}x{height}: {reason}")]
    ContextCreation {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("frame {width}x{height} exceeds maximum supported {max_width}x{max_height}")]
    GeometryTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("invalid frame geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },

    #[error("source buffer holds {actual} bytes, need {expected}")]
    SourceTooSmall { expected: usize, actual: usize },

    #[error("pixel conversion failed: {reason}")]
    Scale { reason: String },
}

/// Decoder session failures.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decoder initialization failed: {0}")]
    Init(String),

    #[error("decoder rejected source {path:?}: {reason}")]
    SourceRejected { path: PathBuf, reason: String },

    #[error("failed to enable stream {index}: {reason}")]
    StreamEnable { index: usize, reason: String },

    #[error("decoder {operation} failed: {reason}")]
    Control {
        operation: &'static str,
        reason: String,
    },

    #[error("decoder session is closed")]
    NoSession,

    #[error(transparent)]
    Memory(#[from] BridgeError),
}

/// Audio output failures.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to open audio port: {0}")]
    PortOpen(String),

    #[error("failed to configure audio port {port}: {reason}")]
    Config { port: u32, reason: String },

    #[error("audio output on port {port} failed: {reason}")]
    Output { port: u32, reason: String },

    #[error("audio device error: {0}")]
    Device(String),
}

/// Configuration loading/validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced to the host from synchronous player calls.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("a playback session is already running ({state})")]
    Busy { state: crate::PlayerState },

    #[error("video player not initialized")]
    NotInitialized,

    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
