//! libswscale conversion contexts.
//!
//! Each [`SwsScaler`] owns one swscale context plus preallocated input and
//! output frames for its geometry. Source planes are copied row by row into
//! the input frame and the packed result is copied back out honouring the
//! output stride.

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::util::frame::video::Video as VideoFrame;

use avb_common::frame::PlaneLayout;
use avb_common::{ConvertError, ConvertedFrame, Geometry, PixelLayout};

use crate::software::{Scaler, ScalerFactory};

fn target_format(layout: PixelLayout) -> Pixel {
    match layout {
        PixelLayout::Rgba8888 => Pixel::RGBA,
        PixelLayout::Rgb24 => Pixel::RGB24,
    }
}

/// NV12 to packed RGB converter backed by libswscale.
pub struct SwsScaler {
    geometry: Geometry,
    layout: PixelLayout,
    context: ScalingContext,
    input: VideoFrame,
    output: VideoFrame,
}

// SAFETY: the swscale context and both frames are owned exclusively by this
// scaler and only touched through `&mut self`; libswscale keeps no
// thread-local state tied to a context.
unsafe impl Send for SwsScaler {}

impl SwsScaler {
    pub fn new(geometry: Geometry, layout: PixelLayout) -> Result<Self, ConvertError> {
        let creation_error = |reason: String| ConvertError::ContextCreation {
            width: geometry.width,
            height: geometry.height,
            reason,
        };
        if geometry.is_empty() || geometry.width % 2 != 0 || geometry.height % 2 != 0 {
            return Err(creation_error(
                "4:2:0 input needs non-zero even dimensions".to_string(),
            ));
        }

        let format = target_format(layout);
        let context = ScalingContext::get(
            Pixel::NV12,
            geometry.width,
            geometry.height,
            format,
            geometry.width,
            geometry.height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|e| creation_error(e.to_string()))?;

        Ok(Self {
            geometry,
            layout,
            context,
            input: VideoFrame::new(Pixel::NV12, geometry.width, geometry.height),
            output: VideoFrame::new(format, geometry.width, geometry.height),
        })
    }

    fn fill_input(&mut self, src: &[u8], planes: PlaneLayout) {
        let width = self.geometry.width as usize;
        let height = self.geometry.height as usize;

        let luma_stride = self.input.stride(0);
        let luma = self.input.data_mut(0);
        for y in 0..height {
            let from = y * planes.luma_pitch;
            luma[y * luma_stride..y * luma_stride + width].copy_from_slice(&src[from..from + width]);
        }

        let chroma_stride = self.input.stride(1);
        let chroma = self.input.data_mut(1);
        for y in 0..height / 2 {
            let from = planes.chroma_offset + y * planes.chroma_pitch;
            chroma[y * chroma_stride..y * chroma_stride + width]
                .copy_from_slice(&src[from..from + width]);
        }
    }
}

impl Scaler for SwsScaler {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn layout(&self) -> PixelLayout {
        self.layout
    }

    fn scale(
        &mut self,
        src: &[u8],
        planes: PlaneLayout,
        dst: &mut ConvertedFrame,
    ) -> Result<(), ConvertError> {
        self.fill_input(src, planes);
        self.context
            .run(&self.input, &mut self.output)
            .map_err(|e| ConvertError::Scale {
                reason: e.to_string(),
            })?;

        dst.reshape(self.geometry, self.layout);
        let row_bytes = dst.pitch();
        let stride = self.output.stride(0);
        let packed = self.output.data(0);
        if stride == row_bytes {
            dst.data.copy_from_slice(&packed[..dst.data.len()]);
        } else {
            for (y, row) in dst.data.chunks_exact_mut(row_bytes).enumerate() {
                row.copy_from_slice(&packed[y * stride..y * stride + row_bytes]);
            }
        }
        Ok(())
    }
}

/// Factory producing [`SwsScaler`] contexts.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwsFactory;

impl ScalerFactory for SwsFactory {
    fn create(
        &mut self,
        geometry: Geometry,
        layout: PixelLayout,
    ) -> Result<Box<dyn Scaler>, ConvertError> {
        Ok(Box::new(SwsScaler::new(geometry, layout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use avb_common::DecodedVideoFrame;

    use crate::software::PixelConverter;

    fn solid_nv12(geometry: Geometry, y: u8, u: u8, v: u8) -> DecodedVideoFrame {
        let mut data = vec![y; geometry.pixel_count()];
        for _ in 0..geometry.pixel_count() / 4 {
            data.push(u);
            data.push(v);
        }
        DecodedVideoFrame {
            data: Arc::from(data),
            geometry,
            timestamp: 5,
            planes: PlaneLayout::packed(geometry),
        }
    }

    fn assert_near(actual: &[u8], expected: &[u8]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!(a.abs_diff(*e) <= 6, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn default_converter_uses_swscale() {
        let g = Geometry::new(32, 16);
        let mut converter = PixelConverter::new(PixelLayout::Rgba8888, Geometry::new(960, 544));
        let mut dst = ConvertedFrame::alloc(Geometry::new(2, 2), PixelLayout::Rgba8888);

        converter.convert(&solid_nv12(g, 81, 90, 240), &mut dst).unwrap();

        assert_eq!(dst.geometry, g);
        assert_eq!(dst.timestamp, 5);
        assert_eq!(dst.data.len(), 32 * 16 * 4);
        assert_near(dst.pixel(0, 0), &[255, 0, 0, 255]);
        assert_near(dst.pixel(31, 15), &[255, 0, 0, 255]);
    }

    #[test]
    fn solid_colors_rgb24() {
        let g = Geometry::new(32, 16);
        let mut converter =
            PixelConverter::with_factory(SwsFactory, PixelLayout::Rgb24, Geometry::new(960, 544));
        let mut dst = ConvertedFrame::alloc(g, PixelLayout::Rgb24);

        let cases = [
            ((235, 128, 128), [255, 255, 255]),
            ((16, 128, 128), [0, 0, 0]),
            ((145, 54, 34), [0, 255, 0]),
            ((41, 240, 110), [0, 0, 255]),
        ];
        for ((y, u, v), expected) in cases {
            converter.convert(&solid_nv12(g, y, u, v), &mut dst).unwrap();
            assert_eq!(dst.data.len(), 32 * 16 * 3);
            assert_near(dst.pixel(7, 9), &expected);
        }
        assert_eq!(converter.contexts_built(), 1);
    }

    #[test]
    fn padded_source_rows_are_skipped() {
        let g = Geometry::new(16, 8);
        let pitch = 32;
        let mut data = vec![0u8; pitch * 8 + pitch * 4];
        for y in 0..8 {
            data[y * pitch..y * pitch + 16].fill(235);
        }
        for y in 0..4 {
            let row = pitch * 8 + y * pitch;
            data[row..row + 16].fill(128);
        }
        let frame = DecodedVideoFrame {
            data: Arc::from(data),
            geometry: g,
            timestamp: 0,
            planes: PlaneLayout {
                luma_pitch: pitch,
                chroma_offset: pitch * 8,
                chroma_pitch: pitch,
            },
        };
        let mut converter = PixelConverter::with_factory(
            SwsFactory,
            PixelLayout::Rgba8888,
            Geometry::new(960, 544),
        );
        let mut dst = ConvertedFrame::alloc(g, PixelLayout::Rgba8888);
        converter.convert(&frame, &mut dst).unwrap();
        assert_near(dst.pixel(15, 7), &[255, 255, 255, 255]);
    }

    #[test]
    fn odd_dimensions_fail_context_creation() {
        assert!(matches!(
            SwsScaler::new(Geometry::new(15, 8), PixelLayout::Rgba8888),
            Err(ConvertError::ContextCreation { width: 15, .. })
        ));
    }
}
