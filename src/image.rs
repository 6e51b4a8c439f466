// image.rs — Packed integer sample grids, as decoded from a camera file.
//
// `Image<T>` holds one exposure before it becomes a `Frame`. Rows are
// packed back to back (row y starts at y * width), which is the layout
// `Frame::new` and the GPU upload both read directly.
//
// Row 0 is the BOTTOM of the picture. Decoders produce top-down rows and
// `io::frame_data` calls `flip_vertical` once, so that V is positive
// upward in the vector output.

/// Integer sample types a camera can deliver.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    /// Brightest representable value.
    const FULL_SCALE: f32;

    fn to_f32(self) -> f32;
}

macro_rules! impl_sample {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            const FULL_SCALE: f32 = <$t>::MAX as f32;

            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }
        }
    )*};
}

// u32 → f32 drops bits above 2^24, far past any sensor's dynamic range.
impl_sample!(u8, u16, u32);

/// Row-major `width`×`height` samples, no padding.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T: Sample> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T: Sample> Image<T> {
    /// # Panics
    /// If `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(data.len(), width * height, "{width}×{height} image needs {} samples", width * height);
        Image { width, height, data }
    }

    /// Sample at (x, y) is `f(x, y)`.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Image { width, height, data }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> T {
        assert!(x < self.width && y < self.height, "({x}, {y}) outside {}×{}", self.width, self.height);
        self.data[y * self.width + x]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Swap top and bottom rows in place.
    pub fn flip_vertical(&mut self) {
        let w = self.width;
        let mut rows = self.data.chunks_exact_mut(w.max(1));
        while let (Some(top), Some(bottom)) = (rows.next(), rows.next_back()) {
            top.swap_with_slice(bottom);
        }
    }
}
