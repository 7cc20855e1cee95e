// convolution.rs: Convolution kernels and the host reference filter.
//
// The host filter is the authority the device filter is validated against.
// Both compute, for every output pixel and each of the R, G, B channels:
//
//   acc = Σ_{ky < kh, kx < kw}  w[ky * kw + kx] · src(x + kx − ox, y + ky − oy)
//   out = floor(clamp(acc, 0, 255) + 0.5)
//
// where (ox, oy) is the kernel origin. Weights are applied as a correlation
// (not flipped); every kernel built here is symmetric so the two coincide.
//
// BORDER HANDLING is explicit, never implied:
//   EdgePolicy::Clamp    - out-of-range taps read the nearest edge pixel.
//   EdgePolicy::ZeroFill - a pixel whose footprint leaves the image is 0.
// The device kernel receives the same policy through its EDGE_POLICY define.

use std::fmt;

use serde::Deserialize;

use crate::image::{pack_rgb, unpack_rgb, RgbImage};

/// How taps that fall outside the image are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgePolicy {
    /// Replicate edge pixels.
    #[default]
    Clamp,
    /// Border pixels whose footprint does not fit are written as 0.
    ZeroFill,
}

impl EdgePolicy {
    /// Value of the `EDGE_POLICY` define in `blur.wgsl`.
    pub fn define_value(self) -> u32 {
        match self {
            EdgePolicy::Clamp => 0,
            EdgePolicy::ZeroFill => 1,
        }
    }

    /// Inverse of [`EdgePolicy::define_value`].
    pub fn from_define(v: &str) -> Option<Self> {
        match v.trim() {
            "0" => Some(EdgePolicy::Clamp),
            "1" => Some(EdgePolicy::ZeroFill),
            _ => None,
        }
    }
}

impl fmt::Display for EdgePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgePolicy::Clamp => write!(f, "clamp"),
            EdgePolicy::ZeroFill => write!(f, "zero-fill"),
        }
    }
}

/// A named weighted-averaging filter. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionKernel {
    name: String,
    width: usize,
    height: usize,
    origin: (usize, usize),
    /// Row-major, `width * height` entries.
    weights: Vec<f32>,
}

impl ConvolutionKernel {
    /// Build a kernel from explicit weights.
    ///
    /// # Panics
    /// Panics if `weights.len() != width * height`, a dimension is zero, or
    /// the origin lies outside the footprint.
    pub fn new(
        name: impl Into<String>,
        width: usize,
        height: usize,
        origin: (usize, usize),
        weights: Vec<f32>,
    ) -> Self {
        assert!(width > 0 && height > 0, "kernel dimensions must be positive");
        assert_eq!(
            weights.len(),
            width * height,
            "kernel needs {} weights, got {}",
            width * height,
            weights.len()
        );
        assert!(
            origin.0 < width && origin.1 < height,
            "origin {origin:?} outside {width}×{height} footprint"
        );
        ConvolutionKernel {
            name: name.into(),
            width,
            height,
            origin,
            weights,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `(ox, oy)`: the tap that lands on the output pixel.
    pub fn origin(&self) -> (usize, usize) {
        self.origin
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}

/// Normalised `size × size` box blur: every weight is `1 / size²`, origin at
/// the centre.
///
/// # Examples
/// ```
/// let k = gpu_dispatch::convolution::box_blur(5);
/// assert_eq!(k.weights().len(), 25);
/// assert_eq!(k.origin(), (2, 2));
/// assert_eq!(k.name(), "Blur 5x5");
/// ```
///
/// # Panics
/// Panics if `size` is even or zero.
pub fn box_blur(size: usize) -> ConvolutionKernel {
    assert!(size % 2 == 1, "box blur size must be odd (got {size})");
    let n = size * size;
    let value = 1.0 / n as f32;
    ConvolutionKernel::new(
        format!("Blur {size}x{size}"),
        size,
        size,
        (size / 2, size / 2),
        vec![value; n],
    )
}

/// Sizes offered by the blur demo.
pub const BLUR_SIZES: [usize; 7] = [3, 5, 7, 9, 11, 13, 15];

/// Box blurs for sizes 3, 5, …, 15, in order.
pub fn blur_family() -> Vec<ConvolutionKernel> {
    BLUR_SIZES.iter().map(|&s| box_blur(s)).collect()
}

/// Convert an accumulated channel sum back to 8 bits.
#[inline]
pub fn quantize(acc: f32) -> u8 {
    (acc.clamp(0.0, 255.0) + 0.5).floor() as u8
}

/// Compute one output pixel of the convolution.
///
/// `src` is a row-major packed RGB buffer of `width × height`; `weights` is
/// row-major `kw × kh` with origin `(ox, oy)`. `(x, y)` must be inside the
/// image; surplus work-items are filtered out by the caller.
#[allow(clippy::too_many_arguments)]
pub fn convolve_pixel(
    src: &[u32],
    width: usize,
    height: usize,
    weights: &[f32],
    (kw, kh): (usize, usize),
    (ox, oy): (usize, usize),
    edge: EdgePolicy,
    x: usize,
    y: usize,
) -> u32 {
    let (w, h) = (width as isize, height as isize);
    let (x0, y0) = (x as isize - ox as isize, y as isize - oy as isize);

    if edge == EdgePolicy::ZeroFill
        && (x0 < 0 || y0 < 0 || x0 + kw as isize > w || y0 + kh as isize > h)
    {
        return 0;
    }

    let mut acc = [0.0f32; 3];
    for ky in 0..kh {
        let sy = (y0 + ky as isize).clamp(0, h - 1) as usize;
        let row = &src[sy * width..(sy + 1) * width];
        for kx in 0..kw {
            let sx = (x0 + kx as isize).clamp(0, w - 1) as usize;
            let wv = weights[ky * kw + kx];
            let [r, g, b] = unpack_rgb(row[sx]);
            acc[0] += wv * r as f32;
            acc[1] += wv * g as f32;
            acc[2] += wv * b as f32;
        }
    }
    pack_rgb(quantize(acc[0]), quantize(acc[1]), quantize(acc[2]))
}

/// Host reference convolution of a packed RGB image.
///
/// # Panics
/// Panics if `src` is empty.
pub fn convolve_rgb(src: &RgbImage, kernel: &ConvolutionKernel, edge: EdgePolicy) -> RgbImage {
    assert!(!src.is_empty(), "cannot convolve an empty image");
    let (w, h) = (src.width(), src.height());
    let data = src.as_slice();
    let mut out = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            out.push(convolve_pixel(
                data,
                w,
                h,
                kernel.weights(),
                (kernel.width(), kernel.height()),
                kernel.origin(),
                edge,
                x,
                y,
            ));
        }
    }
    RgbImage::from_vec(w, h, out)
}
