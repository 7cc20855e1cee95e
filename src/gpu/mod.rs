// gpu/mod.rs: Accelerator host orchestration.
//
// The host drives a kernel through a fixed sequence:
//
//   Session::open      → platform + device, context + in-order queue
//   Program::compile   → kernel source + defines → compiled unit
//   DeviceBuffer::*    → host → device (copy or pinned)
//   Program::run       → bind args, round-up partition, enqueue, wait
//   DeviceBuffer::to_vec / download → device → host (blocking)
//
// Every step is written once against `backend::Backend`. `device.rs` is the
// wgpu implementation; `host.rs` emulates a device on the CPU and counts
// every acquire/release, which is what the lifecycle tests run against.
//
// Ownership carries the release discipline. Programs and buffers borrow
// their session, so the session cannot be closed while they exist, and each
// owner releases its handle in `Drop` on every exit path.

pub mod backend;
pub mod buffer;
pub mod device;
pub mod dispatch;
pub mod host;
pub mod program;
pub mod session;

pub use backend::{Backend, DeviceInfo, PlatformInfo};
pub use buffer::{Access, DeviceBuffer, Element, ElementKind, TransferMode};
pub use device::{DeviceProfile, WgpuBackend};
pub use dispatch::{Arg, Scalar};
pub use host::{HostBackend, ResourceKind, ResourceLedger};
pub use program::Program;
pub use session::Session;
