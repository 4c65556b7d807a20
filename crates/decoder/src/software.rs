//! CPU NV12 -> packed RGBA/RGB24 conversion.
//!
//! A [`Scaler`] is a conversion context built for one geometry and output
//! layout. Building it is the expensive step, so [`PixelConverter`] keeps
//! exactly one cached context and rebuilds it only when a frame's geometry
//! differs from the cached one.
//!
//! With the `ffmpeg` feature (on by default) contexts come from libswscale
//! via [`crate::sws::SwsFactory`]. [`Bt601Factory`] is the dependency-free
//! fallback: BT.601 limited-range lookup tables, used when the crate is
//! built without `ffmpeg`.
//!
//! Source layout is two planes: `width * height` luma bytes, then a
//! half-height plane of interleaved U/V pairs. Destination rows are tightly
//! packed (`width * bytes_per_pixel`).

use tracing::{debug, error};

use avb_common::frame::PlaneLayout;
use avb_common::{ConvertError, ConvertedFrame, DecodedVideoFrame, Geometry, PixelLayout};

/// Factory used by [`PixelConverter::new`].
#[cfg(feature = "ffmpeg")]
pub type DefaultScaler = crate::sws::SwsFactory;
/// Factory used by [`PixelConverter::new`].
#[cfg(not(feature = "ffmpeg"))]
pub type DefaultScaler = Bt601Factory;

// ---------------------------------------------------------------------------
// Context traits
// ---------------------------------------------------------------------------

/// A conversion context fixed to one geometry and output layout.
pub trait Scaler: Send {
    fn geometry(&self) -> Geometry;

    fn layout(&self) -> PixelLayout;

    /// Convert `src` into `dst`, reshaping `dst` to this context's geometry
    /// and layout. `src` has been bounds-checked by the caller.
    ///
    /// On error `dst` must be left untouched.
    fn scale(
        &mut self,
        src: &[u8],
        planes: PlaneLayout,
        dst: &mut ConvertedFrame,
    ) -> Result<(), ConvertError>;
}

/// Builds conversion contexts.
pub trait ScalerFactory: Send {
    fn create(
        &mut self,
        geometry: Geometry,
        layout: PixelLayout,
    ) -> Result<Box<dyn Scaler>, ConvertError>;
}

// ---------------------------------------------------------------------------
// BT.601 context
// ---------------------------------------------------------------------------

/// Fixed-point (8 fractional bits) BT.601 limited-range coefficients.
const Y_GAIN: i32 = 298;
const RV: i32 = 409;
const GU: i32 = 100;
const GV: i32 = 208;
const BU: i32 = 516;

/// BT.601 NV12 converter with precomputed lookup tables.
pub struct Bt601Scaler {
    geometry: Geometry,
    layout: PixelLayout,
    luma: [i32; 256],
    red_v: [i32; 256],
    green_u: [i32; 256],
    green_v: [i32; 256],
    blue_u: [i32; 256],
    /// Byte offset of each column's U sample inside a chroma row.
    chroma_column: Vec<usize>,
}

impl Bt601Scaler {
    pub fn new(geometry: Geometry, layout: PixelLayout) -> Result<Self, ConvertError> {
        if geometry.is_empty() || geometry.width % 2 != 0 || geometry.height % 2 != 0 {
            return Err(ConvertError::ContextCreation {
                width: geometry.width,
                height: geometry.height,
                reason: "4:2:0 input needs non-zero even dimensions".to_string(),
            });
        }

        let mut luma = [0i32; 256];
        let mut red_v = [0i32; 256];
        let mut green_u = [0i32; 256];
        let mut green_v = [0i32; 256];
        let mut blue_u = [0i32; 256];
        for i in 0..256i32 {
            let idx = i as usize;
            luma[idx] = Y_GAIN * (i - 16) + 128;
            red_v[idx] = RV * (i - 128);
            green_u[idx] = GU * (i - 128);
            green_v[idx] = GV * (i - 128);
            blue_u[idx] = BU * (i - 128);
        }

        let chroma_column = (0..geometry.width as usize).map(|x| x & !1).collect();

        Ok(Self {
            geometry,
            layout,
            luma,
            red_v,
            green_u,
            green_v,
            blue_u,
            chroma_column,
        })
    }
}

#[inline]
fn clip(value: i32) -> u8 {
    (value >> 8).clamp(0, 255) as u8
}

impl Scaler for Bt601Scaler {
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
        dst.reshape(self.geometry, self.layout);
        let dst = &mut dst.data;
        let width = self.geometry.width as usize;
        let height = self.geometry.height as usize;
        let bpp = self.layout.bytes_per_pixel();
        let dst_pitch = width * bpp;

        for y in 0..height {
            let luma_row = &src[y * planes.luma_pitch..y * planes.luma_pitch + width];
            let chroma_start = planes.chroma_offset + (y / 2) * planes.chroma_pitch;
            let chroma_row = &src[chroma_start..chroma_start + width];
            let out_row = &mut dst[y * dst_pitch..(y + 1) * dst_pitch];

            for (x, out) in out_row.chunks_exact_mut(bpp).enumerate() {
                let c = self.luma[luma_row[x] as usize];
                let uv = self.chroma_column[x];
                let u = chroma_row[uv] as usize;
                let v = chroma_row[uv + 1] as usize;

                out[0] = clip(c + self.red_v[v]);
                out[1] = clip(c - self.green_u[u] - self.green_v[v]);
                out[2] = clip(c + self.blue_u[u]);
                if bpp == 4 {
                    out[3] = 0xFF;
                }
            }
        }
        Ok(())
    }
}

/// Factory producing [`Bt601Scaler`] contexts.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bt601Factory;

impl ScalerFactory for Bt601Factory {
    fn create(
        &mut self,
        geometry: Geometry,
        layout: PixelLayout,
    ) -> Result<Box<dyn Scaler>, ConvertError> {
        Ok(Box::new(Bt601Scaler::new(geometry, layout)?))
    }
}

// ---------------------------------------------------------------------------
// PixelConverter
// ---------------------------------------------------------------------------

/// Converts decoded frames into packed buffers, caching one context keyed
/// by geometry.
pub struct PixelConverter<F: ScalerFactory = DefaultScaler> {
    factory: F,
    layout: PixelLayout,
    max: Geometry,
    cached: Option<Box<dyn Scaler>>,
    contexts_built: u64,
}

impl PixelConverter<DefaultScaler> {
    pub fn new(layout: PixelLayout, max: Geometry) -> Self {
        Self::with_factory(DefaultScaler::default(), layout, max)
    }
}

impl<F: ScalerFactory> PixelConverter<F> {
    pub fn with_factory(factory: F, layout: PixelLayout, max: Geometry) -> Self {
        Self {
            factory,
            layout,
            max,
            cached: None,
            contexts_built: 0,
        }
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Geometry of the cached context, if any.
    pub fn cached_geometry(&self) -> Option<Geometry> {
        self.cached.as_ref().map(|ctx| ctx.geometry())
    }

    /// Number of contexts constructed so far.
    pub fn contexts_built(&self) -> u64 {
        self.contexts_built
    }

    /// Convert `frame` into `dst`, reshaping `dst` to the frame's geometry.
    ///
    /// On error `dst` is left untouched and the caller treats the cycle as
    /// "no new frame".
    pub fn convert(
        &mut self,
        frame: &DecodedVideoFrame,
        dst: &mut ConvertedFrame,
    ) -> Result<(), ConvertError> {
        let geometry = frame.geometry;
        self.check_source(frame)?;

        let scaler = self.context_for(geometry)?;
        scaler.scale(&frame.data, frame.planes, dst)?;
        dst.timestamp = frame.timestamp;
        Ok(())
    }

    fn check_source(&self, frame: &DecodedVideoFrame) -> Result<(), ConvertError> {
        let g = frame.geometry;
        if g.is_empty() || g.width % 2 != 0 || g.height % 2 != 0 {
            return Err(ConvertError::InvalidGeometry {
                width: g.width,
                height: g.height,
            });
        }
        if !g.fits_within(self.max) {
            return Err(ConvertError::GeometryTooLarge {
                width: g.width,
                height: g.height,
                max_width: self.max.width,
                max_height: self.max.height,
            });
        }

        let planes = frame.planes;
        let width = g.width as usize;
        let height = g.height as usize;
        if planes.luma_pitch < width || planes.chroma_pitch < width {
            return Err(ConvertError::InvalidGeometry {
                width: g.width,
                height: g.height,
            });
        }
        let luma_end = (height - 1) * planes.luma_pitch + width;
        let chroma_end = planes.chroma_offset + (height / 2 - 1) * planes.chroma_pitch + width;
        let expected = luma_end.max(chroma_end);
        if frame.data.len() < expected {
            return Err(ConvertError::SourceTooSmall {
                expected,
                actual: frame.data.len(),
            });
        }
        Ok(())
    }

    fn context_for(&mut self, geometry: Geometry) -> Result<&mut Box<dyn Scaler>, ConvertError> {
        let reusable = self
            .cached
            .as_ref()
            .is_some_and(|ctx| ctx.geometry() == geometry && ctx.layout() == self.layout);

        if !reusable {
            // Release the old context before building its replacement.
            self.cached = None;
            match self.factory.create(geometry, self.layout) {
                Ok(ctx) => {
                    self.contexts_built += 1;
                    debug!(%geometry, layout = ?self.layout, "Built conversion context");
                    self.cached = Some(ctx);
                }
                Err(e) => {
                    error!(error = %e, %geometry, "Conversion context creation failed");
                    return Err(e);
                }
            }
        }

        self.cached.as_mut().ok_or(ConvertError::ContextCreation {
            width: geometry.width,
            height: geometry.height,
            reason: "context missing after build".to_string(),
        })
    }
}
