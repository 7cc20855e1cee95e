// gpu/backend.rs: The compute capability set every accelerator API provides.
//
// Session, Program, DeviceBuffer and dispatch are written once against this
// trait. A backend supplies:
//
//   platforms / open_device / release_device       - discovery, context + queue
//   build_program / release_program                - compile kernel source
//   create_buffer / write / read / release_buffer  - device memory
//   enqueue                                        - bind, dispatch, wait
//
// Two implementations live next to this file:
//   device.rs - wgpu (Vulkan / Metal / DX12 / GL).
//   host.rs   - CPU emulation with a resource ledger, the reference used in
//               tests that must run without a GPU.
//
// Handles are plain associated types. The backend never sees lifetimes; the
// owner types in session.rs / program.rs / buffer.rs hold the handles and
// call the release methods exactly once from `Drop`. Release consumes the
// handle, so a released handle cannot be named again.

use std::fmt;

use crate::error::{Error, Result};
use crate::gpu::buffer::{Access, BufferDesc};
use crate::gpu::dispatch::Scalar;
use crate::kernels::{CompileOptions, KernelSource};
use crate::partition::WorkPartition;

/// One enumerable device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    /// Backend-specific device class, e.g. "DiscreteGpu" or "Cpu".
    pub kind: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// A group of devices driven by one runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub devices: Vec<DeviceInfo>,
}

/// An argument after validation, as handed to [`Backend::enqueue`].
pub enum BoundArg<'a, B: Backend + ?Sized> {
    Buffer {
        handle: &'a B::Buffer,
        access: Access,
        len: usize,
    },
    Scalar(Scalar),
}

/// Accelerator runtime operations. See the module docs.
pub trait Backend {
    /// An opened device with its context and in-order queue.
    type Device;
    /// A compiled kernel ready to dispatch.
    type Program;
    /// Device memory.
    type Buffer;

    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Enumerate platforms and their devices.
    fn platforms(&self) -> Result<Vec<PlatformInfo>>;

    /// Open device `device` of platform `platform`.
    ///
    /// Returns `Err(Error::DeviceUnavailable)` if there are no platforms, an
    /// index is out of range, or the driver rejects context/queue creation.
    fn open_device(&self, platform: usize, device: usize) -> Result<(Self::Device, DeviceInfo)>;

    fn release_device(&self, device: Self::Device);

    /// Compile `source` with `options`. Failures carry the backend's
    /// diagnostic log as `Error::Compile`.
    fn build_program(
        &self,
        device: &Self::Device,
        source: &KernelSource,
        options: &CompileOptions,
    ) -> Result<Self::Program>;

    fn release_program(&self, device: &Self::Device, program: Self::Program);

    /// Allocate `desc.size_bytes()` bytes, optionally initialised from `init`
    /// (whose length is then exactly `desc.size_bytes()`).
    fn create_buffer(
        &self,
        device: &Self::Device,
        desc: &BufferDesc,
        init: Option<&[u8]>,
    ) -> Result<Self::Buffer>;

    /// Overwrite the whole buffer. Blocks until the write is visible.
    fn write_buffer(&self, device: &Self::Device, buffer: &Self::Buffer, data: &[u8]) -> Result<()>;

    /// Read the whole buffer. Returns only after the full transfer completed.
    fn read_buffer(&self, device: &Self::Device, buffer: &Self::Buffer, out: &mut [u8]) -> Result<()>;

    fn release_buffer(&self, device: &Self::Device, buffer: Self::Buffer);

    /// Dispatch `program` over `partition` with `args` (already validated
    /// against the program's signature) and block until it completes.
    fn enqueue(
        &self,
        device: &Self::Device,
        program: &Self::Program,
        args: &[BoundArg<'_, Self>],
        partition: &WorkPartition,
    ) -> Result<()>;
}

/// Pick `(platform, device)` from an enumeration, with the
/// `DeviceUnavailable` messages every backend reports.
pub fn select_device(
    platforms: &[PlatformInfo],
    platform: usize,
    device: usize,
) -> Result<&DeviceInfo> {
    if platforms.is_empty() {
        return Err(Error::DeviceUnavailable("no compute platforms found".into()));
    }
    let p = platforms.get(platform).ok_or_else(|| {
        Error::DeviceUnavailable(format!(
            "platform index {platform} out of range ({} platform(s) found)",
            platforms.len()
        ))
    })?;
    p.devices.get(device).ok_or_else(|| {
        Error::DeviceUnavailable(format!(
            "device index {device} out of range for platform `{}` ({} device(s) found)",
            p.name,
            p.devices.len()
        ))
    })
}
