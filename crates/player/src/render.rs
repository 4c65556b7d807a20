//! Render sink seam: turns a packed pixel buffer into whatever the host
//! draws with.

use avb_common::{ChannelMasks, ConvertedFrame, Geometry, PixelLayout};

/// Geometry and channel layout of a packed buffer handed to a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    pub geometry: Geometry,
    pub layout: PixelLayout,
    pub bytes_per_pixel: usize,
    /// Row stride in bytes.
    pub pitch: usize,
    pub masks: ChannelMasks,
}

impl SurfaceDescriptor {
    pub fn new(geometry: Geometry, layout: PixelLayout) -> Self {
        Self {
            geometry,
            layout,
            bytes_per_pixel: layout.bytes_per_pixel(),
            pitch: layout.pitch(geometry.width),
            masks: layout.channel_masks(),
        }
    }

    pub fn for_frame(frame: &ConvertedFrame) -> Self {
        Self::new(frame.geometry, frame.layout)
    }
}

/// Host rendering layer. Takes ownership of the pixels; returning `None`
/// means the sink could not build a surface this time.
pub trait RenderSink {
    type Surface;

    fn create_surface(
        &mut self,
        pixels: Vec<u8>,
        descriptor: &SurfaceDescriptor,
    ) -> Option<Self::Surface>;
}

/// A surface that is just the buffer and its description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnedSurface {
    pub pixels: Vec<u8>,
    pub descriptor: SurfaceDescriptor,
}

impl OwnedSurface {
    /// Channel bytes of pixel `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.descriptor.bytes_per_pixel;
        let offset = y as usize * self.descriptor.pitch + x as usize * bpp;
        &self.pixels[offset..offset + bpp]
    }
}

/// Default sink: keeps the buffer as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnedSurfaceSink;

impl RenderSink for OwnedSurfaceSink {
    type Surface = OwnedSurface;

    fn create_surface(
        &mut self,
        pixels: Vec<u8>,
        descriptor: &SurfaceDescriptor,
    ) -> Option<OwnedSurface> {
        let expected = descriptor.pitch * descriptor.geometry.height as usize;
        if pixels.len() < expected {
            return None;
        }
        Some(OwnedSurface {
            pixels,
            descriptor: *descriptor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_for_rgb24() {
        let desc = SurfaceDescriptor::new(Geometry::new(10, 4), PixelLayout::Rgb24);
        assert_eq!(desc.bytes_per_pixel, 3);
        assert_eq!(desc.pitch, 30);
        assert_eq!(desc.masks.red, 0x0000FF);
        assert_eq!(desc.masks.alpha, 0);
    }

    #[test]
    fn owned_sink_rejects_short_buffer() {
        let desc = SurfaceDescriptor::new(Geometry::new(2, 2), PixelLayout::Rgba8888);
        let mut sink = OwnedSurfaceSink;
        assert!(sink.create_surface(vec![0; 15], &desc).is_none());

        let surface = sink.create_surface((0..16).collect(), &desc).unwrap();
        assert_eq!(surface.pixel(1, 1), &[12, 13, 14, 15]);
    }
}
