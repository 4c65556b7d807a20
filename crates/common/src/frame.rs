//! Frame types passed between the decoder, the converter and the mailbox.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Frame dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Byte size of a two-plane 4:2:0 buffer at this geometry
    /// (full-size luma plane followed by a half-height interleaved chroma plane).
    pub fn nv12_len(&self) -> usize {
        self.pixel_count() + self.width as usize * (self.height as usize).div_ceil(2)
    }

    pub fn fits_within(&self, max: Geometry) -> bool {
        self.width <= max.width && self.height <= max.height
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Packed output layouts
// ---------------------------------------------------------------------------

/// Bit masks describing where each channel lives inside one packed pixel,
/// read as a little-endian integer. Handed to the render sink verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelMasks {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
    pub alpha: u32,
}

/// Packed channel layout produced by the pixel converter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Four bytes per pixel, R G B A in memory order.
    #[default]
    Rgba8888,
    /// Three bytes per pixel, R G B in memory order.
    Rgb24,
}

impl PixelLayout {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8888 => 4,
            Self::Rgb24 => 3,
        }
    }

    pub const fn channel_masks(self) -> ChannelMasks {
        match self {
            Self::Rgba8888 => ChannelMasks {
                red: 0x0000_00FF,
                green: 0x0000_FF00,
                blue: 0x00FF_0000,
                alpha: 0xFF00_0000,
            },
            Self::Rgb24 => ChannelMasks {
                red: 0x00_00FF,
                green: 0x00_FF00,
                blue: 0xFF_0000,
                alpha: 0,
            },
        }
    }

    /// Row stride in bytes for a tightly packed buffer.
    pub fn pitch(self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel()
    }

    /// Total byte size of a tightly packed buffer.
    pub fn frame_len(self, geometry: Geometry) -> usize {
        geometry.pixel_count() * self.bytes_per_pixel()
    }
}

// ---------------------------------------------------------------------------
// Decoder output
// ---------------------------------------------------------------------------

/// Plane layout of a two-plane luma/chroma frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Row stride of the luma plane in bytes.
    pub luma_pitch: usize,
    /// Row stride of the interleaved chroma plane in bytes.
    pub chroma_pitch: usize,
    /// Byte offset of the chroma plane from the start of the buffer.
    pub chroma_offset: usize,
}

impl PlaneLayout {
    /// Tightly packed layout: both strides equal `width`, chroma immediately
    /// after luma at `width * height`.
    pub fn packed(geometry: Geometry) -> Self {
        Self {
            luma_pitch: geometry.width as usize,
            chroma_pitch: geometry.width as usize,
            chroma_offset: geometry.pixel_count(),
        }
    }
}

/// One decoded video frame as handed out by a decoder poll.
///
/// `data` is the decoder's surface contents. The decoder may recycle the
/// surface on the next poll, so consumers convert it synchronously.
#[derive(Clone)]
pub struct DecodedVideoFrame {
    pub data: Arc<[u8]>,
    pub geometry: Geometry,
    /// Presentation timestamp in decoder units (milliseconds for the
    /// synthetic backend).
    pub timestamp: u64,
    pub planes: PlaneLayout,
}

impl fmt::Debug for DecodedVideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedVideoFrame")
            .field("geometry", &self.geometry)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .field("planes", &self.planes)
            .finish()
    }
}

/// One decoded block of interleaved signed 16-bit PCM.
#[derive(Clone)]
pub struct DecodedAudioFrame {
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: u64,
}

impl DecodedAudioFrame {
    /// Number of sample frames (one sample per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

impl fmt::Debug for DecodedAudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedAudioFrame")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("samples", &self.samples.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Converter output
// ---------------------------------------------------------------------------

/// A packed RGBA/RGB frame owned by whoever holds it.
///
/// Frames move by value from the video pump into the mailbox and from the
/// mailbox to the render sink; no two parties ever alias the same buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct ConvertedFrame {
    pub data: Vec<u8>,
    pub geometry: Geometry,
    pub layout: PixelLayout,
    pub timestamp: u64,
}

impl ConvertedFrame {
    /// Allocate a zeroed frame for the given geometry and layout.
    pub fn alloc(geometry: Geometry, layout: PixelLayout) -> Self {
        Self {
            data: vec![0u8; layout.frame_len(geometry)],
            geometry,
            layout,
            timestamp: 0,
        }
    }

    /// Reuse this frame's allocation for a new geometry/layout. Contents are
    /// unspecified afterwards; the converter overwrites every byte.
    pub fn reshape(&mut self, geometry: Geometry, layout: PixelLayout) {
        self.data.resize(layout.frame_len(geometry), 0);
        self.geometry = geometry;
        self.layout = layout;
    }

    pub fn pitch(&self) -> usize {
        self.layout.pitch(self.geometry.width)
    }

    /// Pixel at `(x, y)` as a channel slice.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.layout.bytes_per_pixel();
        let offset = y as usize * self.pitch() + x as usize * bpp;
        &self.data[offset..offset + bpp]
    }
}

impl fmt::Debug for ConvertedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertedFrame")
            .field("geometry", &self.geometry)
            .field("layout", &self.layout)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_size_for_even_geometry() {
        let g = Geometry::new(960, 544);
        assert_eq!(g.nv12_len(), 960 * 544 * 3 / 2);
    }

    #[test]
    fn packed_plane_layout_places_chroma_after_luma() {
        let g = Geometry::new(64, 32);
        let planes = PlaneLayout::packed(g);
        assert_eq!(planes.luma_pitch, 64);
        assert_eq!(planes.chroma_pitch, 64);
        assert_eq!(planes.chroma_offset, 64 * 32);
    }

    #[test]
    fn layout_sizes() {
        let g = Geometry::new(10, 4);
        assert_eq!(PixelLayout::Rgba8888.frame_len(g), 160);
        assert_eq!(PixelLayout::Rgb24.frame_len(g), 120);
        assert_eq!(PixelLayout::Rgba8888.pitch(10), 40);
    }

    #[test]
    fn rgba_masks_match_memory_order() {
        let masks = PixelLayout::Rgba8888.channel_masks();
        let pixel = u32::from_le_bytes([0x11, 0x22, 0x33, 0x44]);
        assert_eq!(pixel & masks.red, 0x11);
        assert_eq!((pixel & masks.green) >> 8, 0x22);
        assert_eq!((pixel & masks.blue) >> 16, 0x33);
        assert_eq!((pixel & masks.alpha) >> 24, 0x44);
        assert_eq!(PixelLayout::Rgb24.channel_masks().alpha, 0);
    }

    #[test]
    fn reshape_reuses_allocation() {
        let mut frame = ConvertedFrame::alloc(Geometry::new(8, 8), PixelLayout::Rgba8888);
        frame.reshape(Geometry::new(4, 4), PixelLayout::Rgb24);
        assert_eq!(frame.data.len(), 48);
        assert!(frame.data.capacity() >= 256);
        assert_eq!(frame.pitch(), 12);
    }

    #[test]
    fn audio_frame_counts() {
        let frame = DecodedAudioFrame {
            samples: Arc::from(vec![1i16, -1, 2, -2]),
            sample_rate: 48_000,
            channels: 2,
            timestamp: 0,
        };
        assert_eq!(frame.frame_count(), 2);

        let silent = DecodedAudioFrame { channels: 0, ..frame };
        assert_eq!(silent.frame_count(), 0);
    }
}
