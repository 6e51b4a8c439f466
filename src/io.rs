// io.rs — Loading frames from image files.
//
// Decoding is delegated to the `image` crate. 8-bit greyscale stays U8,
// 16-bit greyscale stays U16; every other layout (RGB, RGBA, float) is
// reduced to 16-bit luma. Rows are flipped so that sample 0 is the
// bottom-left pixel, the orientation the vector grid is expressed in.

use std::path::Path;

use image::DynamicImage;
use log::debug;

use crate::error::Result;
use crate::frame::{Frame, FrameData};
use crate::image::Image;

/// Decode the image at `path` into a frame.
pub fn load_frame(path: &Path) -> Result<Frame> {
    let decoded = image::open(path)?;
    let data = frame_data(decoded);
    debug!(
        "[ripiv] loaded {} ({}×{}, {:?})",
        path.display(),
        data.width(),
        data.height(),
        data.depth()
    );
    Ok(Frame::new(&data))
}

/// Convert a decoded image, flipping rows to bottom-up order.
pub fn frame_data(decoded: DynamicImage) -> FrameData {
    match decoded {
        DynamicImage::ImageLuma8(buf) => {
            let (w, h) = (buf.width() as usize, buf.height() as usize);
            let mut img = Image::from_vec(w, h, buf.into_raw());
            img.flip_vertical();
            FrameData::U8(img)
        }
        other => {
            let buf = other.into_luma16();
            let (w, h) = (buf.width() as usize, buf.height() as usize);
            let mut img = Image::from_vec(w, h, buf.into_raw());
            img.flip_vertical();
            FrameData::U16(img)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SampleDepth;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};

    #[test]
    fn luma8_keeps_depth_and_flips() {
        // Top row bright, bottom row dark.
        let buf = GrayImage::from_fn(3, 2, |_, y| Luma([if y == 0 { 200 } else { 10 }]));
        let data = frame_data(DynamicImage::ImageLuma8(buf));
        assert_eq!(data.depth(), SampleDepth::U8);
        let frame = Frame::new(&data);
        // Sample row 0 is the picture's bottom row.
        assert_eq!(frame.intensity(0, 0), 10.0);
        assert_eq!(frame.intensity(2, 1), 200.0);
    }

    #[test]
    fn luma16_keeps_depth() {
        let buf: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(2, 2, |x, _| Luma([if x == 0 { 40000 } else { 7 }]));
        let data = frame_data(DynamicImage::ImageLuma16(buf));
        assert_eq!(data.depth(), SampleDepth::U16);
        let frame = Frame::new(&data);
        assert_eq!(frame.intensity(0, 0), 40000.0);
        assert_eq!(frame.intensity(1, 1), 7.0);
    }

    #[test]
    fn rgb_reduces_to_luma16() {
        let buf = RgbImage::from_fn(4, 4, |_, _| Rgb([255, 255, 255]));
        let data = frame_data(DynamicImage::ImageRgb8(buf));
        assert_eq!(data.depth(), SampleDepth::U16);
        assert_eq!((data.width(), data.height()), (4, 4));
        assert!(Frame::new(&data).intensity(3, 3) > 65000.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_frame(Path::new("/nonexistent/ripiv/frame.tif")).is_err());
    }
}
