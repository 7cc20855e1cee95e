// gpu/buffer.rs: Device buffers and host/device transfer.
//
// TRANSFER MODES
// ──────────────
//   Copy   - the device gets its own copy of the host data at creation.
//            The host slice is free to change or drop afterwards.
//
//   Pinned - the device buffer is initialised straight from host memory
//            (wgpu: mapped-at-creation, no staging copy) and keeps a borrow
//            of that memory for as long as it lives. The borrow checker
//            then guarantees what the mode requires: the host slice stays
//            alive and nobody else mutates it while the buffer exists.
//
// The lifetime `'h` on `DeviceBuffer` is that host borrow. Copy-mode
// buffers use `'static` because they borrow nothing.
//
// Downloads block until the device has acknowledged the full transfer.

use std::fmt;
use std::marker::PhantomData;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::gpu::backend::Backend;
use crate::gpu::dispatch::{Arg, BufferRef};
use crate::gpu::session::Session;

/// How a kernel may access a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    /// Whether a kernel may write through this access mode.
    pub fn writable(self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

/// Element type stored in a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    F32,
    U32,
    I32,
}

/// Host types that can live in a device buffer. All are 4 bytes wide,
/// which keeps every buffer a multiple of wgpu's copy alignment.
pub trait Element: bytemuck::Pod + Default + fmt::Debug + Send + Sync {
    const KIND: ElementKind;
}

impl Element for f32 {
    const KIND: ElementKind = ElementKind::F32;
}

impl Element for u32 {
    const KIND: ElementKind = ElementKind::U32;
}

impl Element for i32 {
    const KIND: ElementKind = ElementKind::I32;
}

/// Buffer initialisation strategy. See the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    #[default]
    Copy,
    Pinned,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Copy => write!(f, "copy"),
            TransferMode::Pinned => write!(f, "pinned"),
        }
    }
}

/// What the backend needs to allocate a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub len: usize,
    pub element: ElementKind,
    pub access: Access,
    pub mode: TransferMode,
}

impl BufferDesc {
    pub fn size_bytes(&self) -> usize {
        self.len * 4
    }
}

/// The host memory a pinned buffer aliases.
enum HostBinding<'h, T> {
    Detached,
    Shared(&'h [T]),
    Exclusive(&'h mut [T]),
}

/// A region of device memory holding `len` elements of `T`.
///
/// Borrows the [`Session`] that created it and releases itself on drop.
pub struct DeviceBuffer<'s, 'h, B: Backend, T: Element> {
    session: &'s Session<'s, B>,
    handle: Option<B::Buffer>,
    desc: BufferDesc,
    host: HostBinding<'h, T>,
    _elem: PhantomData<T>,
}

impl<'s, B: Backend, T: Element> DeviceBuffer<'s, 'static, B, T> {
    /// Allocate and copy `data` (copy mode).
    pub fn upload(session: &'s Session<'s, B>, data: &[T], access: Access) -> Result<Self> {
        Self::create(session, data.len(), access, TransferMode::Copy, Some(data), HostBinding::Detached)
    }

    /// Allocate uninitialised (zeroed) device storage, typically for outputs.
    pub fn alloc(session: &'s Session<'s, B>, len: usize, access: Access) -> Result<Self> {
        Self::create(session, len, access, TransferMode::Copy, None, HostBinding::Detached)
    }
}

impl<'s, 'h, B: Backend, T: Element> DeviceBuffer<'s, 'h, B, T> {
    /// Pin read-only host data (pinned mode). The host slice stays borrowed
    /// until the buffer drops.
    pub fn pin(session: &'s Session<'s, B>, host: &'h [T]) -> Result<Self> {
        Self::create(
            session,
            host.len(),
            Access::ReadOnly,
            TransferMode::Pinned,
            Some(host),
            HostBinding::Shared(host),
        )
    }

    /// Pin writable host data. Kernel writes reach the host slice through
    /// [`DeviceBuffer::sync_host`].
    pub fn pin_mut(session: &'s Session<'s, B>, host: &'h mut [T], access: Access) -> Result<Self> {
        let mut buf = Self::create(
            session,
            host.len(),
            access,
            TransferMode::Pinned,
            Some(&*host),
            HostBinding::Detached,
        )?;
        buf.host = HostBinding::Exclusive(host);
        Ok(buf)
    }

    /// Upload `data` with the given mode. Pinned mode borrows `data`.
    pub fn with_mode(
        session: &'s Session<'s, B>,
        data: &'h [T],
        access: Access,
        mode: TransferMode,
    ) -> Result<Self> {
        match mode {
            TransferMode::Copy => Self::create(session, data.len(), access, mode, Some(data), HostBinding::Detached),
            TransferMode::Pinned if access.writable() => Err(Error::Transfer(
                "a writable pinned buffer needs exclusive host memory; use pin_mut".into(),
            )),
            TransferMode::Pinned => Self::pin(session, data),
        }
    }

    fn create(
        session: &'s Session<'s, B>,
        len: usize,
        access: Access,
        mode: TransferMode,
        init: Option<&[T]>,
        host: HostBinding<'h, T>,
    ) -> Result<Self> {
        if len == 0 {
            return Err(Error::Transfer("cannot allocate a zero-length buffer".into()));
        }
        let desc = BufferDesc { len, element: T::KIND, access, mode };
        let init_bytes = init.map(|d| bytemuck::cast_slice::<T, u8>(d));
        let handle = session.backend().create_buffer(session.device(), &desc, init_bytes)?;
        log::debug!("buffer: {len} × {:?} {access:?} ({mode})", T::KIND);
        Ok(DeviceBuffer {
            session,
            handle: Some(handle),
            desc,
            host,
            _elem: PhantomData,
        })
    }

    /// Overwrite the whole buffer from host data (blocking).
    pub fn write(&mut self, data: &[T]) -> Result<()> {
        self.check_len(data.len())?;
        self.session
            .backend()
            .write_buffer(self.session.device(), self.handle(), bytemuck::cast_slice(data))
    }

    /// Read the whole buffer into `dest` (blocking).
    ///
    /// Returns `Err(Error::Transfer)` if `dest.len() != self.len()`.
    pub fn download(&self, dest: &mut [T]) -> Result<()> {
        self.check_len(dest.len())?;
        self.session
            .backend()
            .read_buffer(self.session.device(), self.handle(), bytemuck::cast_slice_mut(dest))
    }

    /// Read the whole buffer into a new Vec (blocking).
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut out = vec![T::default(); self.desc.len];
        self.download(&mut out)?;
        Ok(out)
    }

    /// Refresh the pinned host slice from device memory and return it.
    ///
    /// Only buffers made with [`DeviceBuffer::pin_mut`] have a writable host
    /// view; anything else is `Err(Error::Transfer)`.
    pub fn sync_host(&mut self) -> Result<&[T]> {
        let session = self.session;
        let backend = session.backend();
        let device = session.device();
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| Error::Transfer("buffer already released".into()))?;
        match &mut self.host {
            HostBinding::Exclusive(host) => {
                backend.read_buffer(device, handle, bytemuck::cast_slice_mut(&mut **host))?;
                Ok(&**host)
            }
            _ => Err(Error::Transfer("buffer has no writable pinned host memory".into())),
        }
    }

    /// The host slice this buffer aliases, if pinned.
    pub fn pinned_host(&self) -> Option<&[T]> {
        match &self.host {
            HostBinding::Detached => None,
            HostBinding::Shared(h) => Some(*h),
            HostBinding::Exclusive(h) => Some(&**h),
        }
    }

    /// Bind as a kernel argument.
    pub fn arg(&self) -> Arg<'_, B> {
        Arg::Buffer(BufferRef {
            handle: self.handle(),
            element: self.desc.element,
            access: self.desc.access,
            len: self.desc.len,
            session_id: self.session.id(),
        })
    }

    pub fn len(&self) -> usize {
        self.desc.len
    }

    pub fn is_empty(&self) -> bool {
        self.desc.len == 0
    }

    pub fn access(&self) -> Access {
        self.desc.access
    }

    pub fn mode(&self) -> TransferMode {
        self.desc.mode
    }

    fn handle(&self) -> &B::Buffer {
        // Only `Drop` takes the handle.
        self.handle.as_ref().expect("handle present until drop")
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.desc.len {
            return Err(Error::Transfer(format!(
                "host slice has {len} elements, device buffer has {}",
                self.desc.len
            )));
        }
        Ok(())
    }
}

impl<B: Backend, T: Element> Drop for DeviceBuffer<'_, '_, B, T> {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            self.session.backend().release_buffer(self.session.device(), h);
        }
    }
}

impl<B: Backend, T: Element> fmt::Debug for DeviceBuffer<'_, '_, B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.desc.len)
            .field("element", &self.desc.element)
            .field("access", &self.desc.access)
            .field("mode", &self.desc.mode)
            .field("session", &self.session.id())
            .finish()
    }
}
