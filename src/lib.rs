// gpu-dispatch: host-side orchestration of data-parallel kernels.
//
// Session → Program → DeviceBuffer → run → download, written once against a
// `Backend` trait with a wgpu implementation and a CPU-emulated one. Two
// pipelines sit on top: elementwise array addition and a box-blur image
// filter checked against a host reference convolution.

pub mod error;
pub mod partition;
pub mod image;
pub mod convolution;
pub mod kernels;
pub mod gpu;

pub mod array_add;
pub mod blur;
pub mod presentation;
pub mod config;

pub use error::{Error, Result};
