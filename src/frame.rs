// frame.rs — One camera exposure: integer samples + complex working copy.
//
// Cameras deliver 8, 16 or (rarely) 32-bit samples. The correlation engine
// only ever works on complex f32 values (real = intensity, imag = 0), so the
// bit depth is a closed set of variants dispatched exactly once, when a
// frame is built. After that nothing downstream knows or cares which depth
// the camera used, except the range-stretch filter, which needs the full
// scale of the original samples.

use num_complex::Complex32;

use crate::image::{Image, Sample};

/// Sample depth of a source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDepth {
    U8,
    U16,
    U32,
}

impl SampleDepth {
    pub fn bits(self) -> u32 {
        match self {
            SampleDepth::U8 => 8,
            SampleDepth::U16 => 16,
            SampleDepth::U32 => 32,
        }
    }

    /// Largest representable intensity for this depth.
    pub fn full_scale(self) -> f32 {
        match self {
            SampleDepth::U8 => u8::FULL_SCALE,
            SampleDepth::U16 => u16::FULL_SCALE,
            SampleDepth::U32 => u32::FULL_SCALE,
        }
    }
}

/// Raw samples of a frame, tagged by depth.
#[derive(Debug, Clone)]
pub enum FrameData {
    U8(Image<u8>),
    U16(Image<u16>),
    U32(Image<u32>),
}

impl FrameData {
    pub fn depth(&self) -> SampleDepth {
        match self {
            FrameData::U8(_) => SampleDepth::U8,
            FrameData::U16(_) => SampleDepth::U16,
            FrameData::U32(_) => SampleDepth::U32,
        }
    }

    pub fn width(&self) -> usize {
        match self {
            FrameData::U8(img) => img.width(),
            FrameData::U16(img) => img.width(),
            FrameData::U32(img) => img.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            FrameData::U8(img) => img.height(),
            FrameData::U16(img) => img.height(),
            FrameData::U32(img) => img.height(),
        }
    }

    /// Convert to the complex working format.
    pub fn to_complex(&self) -> Vec<Complex32> {
        fn convert<T: Sample>(img: &Image<T>) -> Vec<Complex32> {
            img.as_slice()
                .iter()
                .map(|&v| Complex32::new(v.to_f32(), 0.0))
                .collect()
        }
        match self {
            FrameData::U8(img) => convert(img),
            FrameData::U16(img) => convert(img),
            FrameData::U32(img) => convert(img),
        }
    }
}

impl From<Image<u8>> for FrameData {
    fn from(img: Image<u8>) -> Self {
        FrameData::U8(img)
    }
}

impl From<Image<u16>> for FrameData {
    fn from(img: Image<u16>) -> Self {
        FrameData::U16(img)
    }
}

impl From<Image<u32>> for FrameData {
    fn from(img: Image<u32>) -> Self {
        FrameData::U32(img)
    }
}

/// A loaded frame ready for correlation.
///
/// `samples` is the complex working copy, row-major, row 0 = bottom of the
/// picture. Pre-filters mutate it in place; the raw samples are not kept.
#[derive(Debug)]
pub struct Frame {
    width: usize,
    height: usize,
    depth: SampleDepth,
    samples: Vec<Complex32>,
}

impl Clone for Frame {
    fn clone(&self) -> Self {
        Frame {
            width: self.width,
            height: self.height,
            depth: self.depth,
            samples: self.samples.clone(),
        }
    }

    /// Reuses `self`'s sample storage when it is large enough.
    fn clone_from(&mut self, source: &Self) {
        self.width = source.width;
        self.height = source.height;
        self.depth = source.depth;
        self.samples.clone_from(&source.samples);
    }
}

impl Frame {
    pub fn new(data: &FrameData) -> Self {
        Frame {
            width: data.width(),
            height: data.height(),
            depth: data.depth(),
            samples: data.to_complex(),
        }
    }

    /// Build directly from an image of any supported depth.
    pub fn from_image<I: Into<FrameData>>(img: I) -> Self {
        Frame::new(&img.into())
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn depth(&self) -> SampleDepth {
        self.depth
    }

    pub fn samples(&self) -> &[Complex32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [Complex32] {
        &mut self.samples
    }

    /// Intensity at (x, y).
    #[inline]
    pub fn intensity(&self, x: usize, y: usize) -> f32 {
        self.samples[y * self.width + x].re
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_keeps_raw_intensity() {
        let img = Image::<u16>::from_vec(2, 1, vec![0, 40000]);
        let frame = Frame::from_image(img);
        assert_eq!(frame.depth(), SampleDepth::U16);
        assert_eq!(frame.samples()[1], Complex32::new(40000.0, 0.0));
        assert_eq!(frame.samples()[0].im, 0.0);
    }

    #[test]
    fn depth_full_scale() {
        assert_eq!(SampleDepth::U8.full_scale(), 255.0);
        assert_eq!(SampleDepth::U16.full_scale(), 65535.0);
        assert_eq!(SampleDepth::U32.bits(), 32);
    }

    #[test]
    fn clone_from_reuses_storage() {
        let mut dst = Frame::from_image(Image::<u8>::from_vec(2, 2, vec![1, 2, 3, 4]));
        let src = Frame::from_image(Image::<u16>::from_vec(2, 2, vec![9, 8, 7, 6]));
        let before = dst.samples().as_ptr();
        dst.clone_from(&src);
        assert_eq!(dst.samples().as_ptr(), before);
        assert_eq!(dst.depth(), SampleDepth::U16);
        assert_eq!(dst.intensity(1, 1), 6.0);
    }

    #[test]
    fn u32_frames_convert() {
        let img = Image::<u32>::from_vec(1, 1, vec![1_000_000]);
        let frame = Frame::from_image(img);
        assert_eq!(frame.intensity(0, 0), 1_000_000.0);
    }
}
