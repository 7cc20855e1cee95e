// image.rs: Row-major image container and packed-RGB helpers.
//
// Every pixel buffer that crosses the host/device boundary is a flat,
// row-major Vec with no row padding: element (x, y) lives at y * width + x.
// That is exactly the layout the blur kernel indexes, so an Image's slice
// can be uploaded as-is.
//
// Colour images use one packed u32 per pixel:
//
//   bit:   31..24   23..16   15..8    7..0
//          unused   red      green    blue        (0x00RRGGBB)
//
// Decoding and encoding of image files is delegated to the `image` crate.

use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Pixel Trait
// ---------------------------------------------------------------------------

/// Trait for types that can be stored in an [`Image`].
///
/// `Copy + Default` lets `Image::new` zero-fill; `Send + Sync + 'static`
/// lets images move freely between threads and into device buffers.
pub trait Pixel: Copy + Default + Send + Sync + 'static {}

impl Pixel for u8 {}
impl Pixel for u32 {}
impl Pixel for f32 {}

// ---------------------------------------------------------------------------
// Packed RGB
// ---------------------------------------------------------------------------

/// Pack 8-bit channels into `0x00RRGGBB`.
#[inline]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Split `0x00RRGGBB` into `[r, g, b]`. The top byte is ignored.
#[inline]
pub fn unpack_rgb(p: u32) -> [u8; 3] {
    [(p >> 16) as u8, (p >> 8) as u8, p as u8]
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// A 2D image with runtime dimensions, generic over pixel type `T`.
pub struct Image<T: Pixel> {
    /// Pixel data in row-major order. Length = width * height.
    data: Vec<T>,
    width: usize,
    height: usize,
}

/// Colour image, one packed `0x00RRGGBB` value per pixel.
pub type RgbImage = Image<u32>;

// Manual Clone: this is a deep copy of the pixel buffer.
impl<T: Pixel> Clone for Image<T> {
    fn clone(&self) -> Self {
        Image {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

impl<T: Pixel> Image<T> {
    /// Create a zero-initialized image with the given dimensions.
    pub fn new(width: usize, height: usize) -> Self {
        Image {
            data: vec![T::default(); width * height],
            width,
            height,
        }
    }

    /// Create an image filled with one value.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Image {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    /// Create an image from an existing row-major pixel vector.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image { data, width, height }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of pixels.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the pixel value at (x, y). x is column, y is row.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.width + x]
    }

    /// Set the pixel at (x, y).
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.bounds_check(x, y);
        self.data[y * self.width + x] = value;
    }

    /// Borrow a single row as a slice.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    /// Iterate over all pixels as `(x, y, value)` tuples.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        self.data
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i % self.width, i / self.width, v))
    }

    /// The pixel buffer, row-major.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

// Debug formatting for small images in tests.
impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Image<{}> {{ {}×{} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
        )?;
        for y in 0..self.height.min(8) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(16) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.get(x, y))?;
            }
            if self.width > 16 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

impl<T: Pixel + PartialEq> PartialEq for Image<T> {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.data == other.data
    }
}

// ---------------------------------------------------------------------------
// Colour image I/O
// ---------------------------------------------------------------------------

impl Image<u32> {
    /// Decode an image file (any format the `image` crate recognises) into
    /// packed RGB. Alpha is discarded.
    pub fn load_rgb(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let decoded = ::image::open(path).map_err(|source| Error::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_rgb8(&decoded.to_rgb8()))
    }

    /// Convert from the `image` crate's 8-bit RGB buffer.
    pub fn from_rgb8(src: &::image::RgbImage) -> Self {
        let data = src
            .pixels()
            .map(|p| pack_rgb(p.0[0], p.0[1], p.0[2]))
            .collect();
        Image::from_vec(src.width() as usize, src.height() as usize, data)
    }

    /// Convert to the `image` crate's 8-bit RGB buffer for encoding.
    pub fn to_rgb8(&self) -> ::image::RgbImage {
        let mut out = ::image::RgbImage::new(self.width as u32, self.height as u32);
        for (dst, &p) in out.pixels_mut().zip(self.data.iter()) {
            *dst = ::image::Rgb(unpack_rgb(p));
        }
        out
    }

    /// Encode to a file; the format follows the extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.to_rgb8().save(path).map_err(|source| Error::Encode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Largest absolute per-channel difference between two images of equal
    /// size.
    ///
    /// # Panics
    /// Panics if the dimensions differ.
    pub fn max_channel_diff(&self, other: &Self) -> u8 {
        assert!(
            self.width == other.width && self.height == other.height,
            "image sizes differ: {}×{} vs {}×{}",
            self.width,
            self.height,
            other.width,
            other.height,
        );
        self.data
            .iter()
            .zip(other.data.iter())
            .flat_map(|(&a, &b)| {
                let (a, b) = (unpack_rgb(a), unpack_rgb(b));
                (0..3).map(move |c| a[c].abs_diff(b[c]))
            })
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let p = pack_rgb(0x12, 0x34, 0x56);
        assert_eq!(p, 0x0012_3456);
        assert_eq!(unpack_rgb(p), [0x12, 0x34, 0x56]);
        // Top byte is ignored on unpack.
        assert_eq!(unpack_rgb(0xFF12_3456), [0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_row_major_layout() {
        //  [10, 20, 30]
        //  [40, 50, 60]
        let img = Image::from_vec(3, 2, vec![10u8, 20, 30, 40, 50, 60]);
        assert_eq!(img.get(2, 0), 30);
        assert_eq!(img.get(0, 1), 40);
        assert_eq!(img.row(1), &[40, 50, 60]);
    }

    #[test]
    fn test_pixels_iterator_coordinates() {
        let img = Image::from_vec(2, 2, vec![1u32, 2, 3, 4]);
        let collected: Vec<_> = img.pixels().collect();
        assert_eq!(collected, vec![(0, 0, 1), (1, 0, 2), (0, 1, 3), (1, 1, 4)]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_bounds() {
        let img: Image<u8> = Image::new(4, 4);
        img.get(4, 0);
    }

    #[test]
    fn test_rgb8_conversion() {
        let mut src = ::image::RgbImage::new(2, 1);
        src.put_pixel(0, 0, ::image::Rgb([255, 0, 0]));
        src.put_pixel(1, 0, ::image::Rgb([1, 2, 3]));
        let img = RgbImage::from_rgb8(&src);
        assert_eq!(img.as_slice(), &[0x00FF_0000, 0x0001_0203]);
        assert_eq!(img.to_rgb8(), src);
    }

    #[test]
    fn test_max_channel_diff() {
        let a = RgbImage::from_vec(2, 1, vec![pack_rgb(10, 20, 30), pack_rgb(0, 0, 0)]);
        let b = RgbImage::from_vec(2, 1, vec![pack_rgb(11, 20, 30), pack_rgb(0, 3, 0)]);
        assert_eq!(a.max_channel_diff(&b), 3);
        assert_eq!(a.max_channel_diff(&a), 0);
    }

    #[test]
    fn test_load_missing_file_is_decode_error() {
        let err = RgbImage::load_rgb("does/not/exist.jpg").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
