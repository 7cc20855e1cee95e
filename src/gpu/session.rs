// gpu/session.rs: An opened device with its context and command queue.
//
// Everything else in the gpu layer borrows a Session: programs and buffers
// hold `&Session`, so the borrow checker rejects closing a session while
// any of its programs or buffers is still alive. Release order is therefore
// always buffers/programs first, device last.
//
// Each session carries a process-unique id. Buffers stamp it into their
// binding view so a buffer from one session cannot be bound to a program
// from another.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::gpu::backend::{Backend, DeviceInfo};
use crate::gpu::buffer::{Access, DeviceBuffer, Element};
use crate::gpu::program::Program;
use crate::kernels::{CompileOptions, KernelSource};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Device, context and in-order queue for one `(platform, device)` pair.
pub struct Session<'b, B: Backend> {
    backend: &'b B,
    device: Option<B::Device>,
    info: DeviceInfo,
    platform: usize,
    id: u64,
}

impl<'b, B: Backend> Session<'b, B> {
    /// Open device `device` of platform `platform`.
    ///
    /// # Errors
    /// `Error::DeviceUnavailable` if either index is out of range or the
    /// driver refuses the device.
    pub fn open(backend: &'b B, platform: usize, device: usize) -> Result<Self> {
        let (handle, info) = backend.open_device(platform, device)?;
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "[{}] session {id}: platform {platform}, device {device}: {info}",
            backend.name()
        );
        Ok(Session {
            backend,
            device: Some(handle),
            info,
            platform,
            id,
        })
    }

    /// Compile a kernel for this session's device.
    pub fn compile(&self, source: &KernelSource, options: &CompileOptions) -> Result<Program<'_, B>> {
        Program::compile(self, source, options)
    }

    /// Copy `data` into a new device buffer.
    pub fn upload<T: Element>(&self, data: &[T], access: Access) -> Result<DeviceBuffer<'_, 'static, B, T>> {
        DeviceBuffer::upload(self, data, access)
    }

    /// Allocate a zeroed device buffer of `len` elements.
    pub fn alloc<T: Element>(&self, len: usize, access: Access) -> Result<DeviceBuffer<'_, 'static, B, T>> {
        DeviceBuffer::alloc(self, len, access)
    }

    /// Pin read-only host memory for the lifetime of the returned buffer.
    pub fn pin<'h, T: Element>(&self, host: &'h [T]) -> Result<DeviceBuffer<'_, 'h, B, T>> {
        DeviceBuffer::pin(self, host)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn platform_index(&self) -> usize {
        self.platform
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> &'b B {
        self.backend
    }

    pub(crate) fn device(&self) -> &B::Device {
        // Only `Drop` takes the device.
        self.device.as_ref().expect("device present until drop")
    }

    /// Release the device now. Equivalent to dropping the session.
    pub fn close(self) {}
}

impl<B: Backend> Drop for Session<'_, B> {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            log::debug!("[{}] session {}: released", self.backend.name(), self.id);
            self.backend.release_device(device);
        }
    }
}

impl<B: Backend> fmt::Debug for Session<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend.name())
            .field("id", &self.id)
            .field("platform", &self.platform)
            .field("device", &self.info)
            .finish()
    }
}
