// gpu/host.rs: CPU emulation of the accelerator runtime.
//
// HostBackend implements `Backend` without any driver. Kernels are native
// Rust functions registered by entry point; `build_program` still runs the
// full placeholder preparation so a bad define fails exactly as it would on
// a GPU. Every work-item of the rounded-up global extent is executed,
// surplus items included, so kernels must guard their ids the same way the
// WGSL versions do.
//
// RESOURCE LEDGER
// ───────────────
// Every acquire and release of a device, program or buffer is counted.
// Releasing something twice, releasing an unknown handle, or releasing a
// device while its programs/buffers are still live is recorded as a
// violation. Tests assert `ledger().balanced()` after a session closes.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::convolution::{convolve_pixel, EdgePolicy};
use crate::error::{Error, Result};
use crate::gpu::backend::{select_device, Backend, BoundArg, DeviceInfo, PlatformInfo};
use crate::gpu::buffer::{Access, BufferDesc};
use crate::gpu::dispatch::Scalar;
use crate::kernels::{CompileOptions, KernelSource};
use crate::partition::WorkPartition;

/// A native kernel body, called once per work-item.
pub type NativeKernel = fn(&WorkItem, &mut KernelArgs<'_>);

/// Ids of one work-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub global: [usize; 2],
    pub local: [usize; 2],
    pub group: [usize; 2],
    pub global_size: [usize; 2],
}

impl WorkItem {
    /// Row-major linear global id.
    pub fn linear_id(&self) -> usize {
        self.global[0] + self.global[1] * self.global_size[0]
    }
}

enum HostArg {
    Buffer { words: Vec<u32>, access: Access },
    Scalar(Scalar),
}

/// Arguments as seen by a native kernel.
pub struct KernelArgs<'a> {
    args: Vec<HostArg>,
    defines: &'a CompileOptions,
}

impl KernelArgs<'_> {
    fn words(&self, i: usize) -> &[u32] {
        match &self.args[i] {
            HostArg::Buffer { words, .. } => words,
            HostArg::Scalar(s) => panic!("argument {i} is scalar {s:?}, not a buffer"),
        }
    }

    fn words_mut(&mut self, i: usize) -> &mut [u32] {
        match &mut self.args[i] {
            HostArg::Buffer { words, access } => {
                assert!(access.writable(), "kernel wrote to read-only argument {i}");
                words
            }
            HostArg::Scalar(s) => panic!("argument {i} is scalar {s:?}, not a buffer"),
        }
    }

    pub fn f32(&self, i: usize) -> &[f32] {
        bytemuck::cast_slice(self.words(i))
    }

    pub fn f32_mut(&mut self, i: usize) -> &mut [f32] {
        bytemuck::cast_slice_mut(self.words_mut(i))
    }

    pub fn u32(&self, i: usize) -> &[u32] {
        self.words(i)
    }

    pub fn u32_mut(&mut self, i: usize) -> &mut [u32] {
        self.words_mut(i)
    }

    pub fn scalar(&self, i: usize) -> Scalar {
        match &self.args[i] {
            HostArg::Scalar(s) => *s,
            HostArg::Buffer { .. } => panic!("argument {i} is a buffer, not a scalar"),
        }
    }

    pub fn int2(&self, i: usize) -> [i32; 2] {
        match self.scalar(i) {
            Scalar::Int2(v) => v,
            other => panic!("argument {i} is {other:?}, not Int2"),
        }
    }

    /// A compile-time define of the program being run.
    pub fn define(&self, key: &str) -> Option<&str> {
        self.defines.get(key)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Device,
    Program,
    Buffer,
}

/// Acquire/release bookkeeping. See the module docs.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    acquired: BTreeMap<ResourceKind, usize>,
    released: BTreeMap<ResourceKind, usize>,
    live: HashSet<(ResourceKind, u64)>,
    violations: Vec<String>,
}

impl ResourceLedger {
    fn acquire(&mut self, kind: ResourceKind, id: u64) {
        *self.acquired.entry(kind).or_default() += 1;
        self.live.insert((kind, id));
    }

    fn release(&mut self, kind: ResourceKind, id: u64) {
        if self.live.remove(&(kind, id)) {
            *self.released.entry(kind).or_default() += 1;
        } else {
            self.violations.push(format!("{kind:?} {id} released but not live"));
        }
    }

    pub fn acquired(&self, kind: ResourceKind) -> usize {
        self.acquired.get(&kind).copied().unwrap_or(0)
    }

    pub fn released(&self, kind: ResourceKind) -> usize {
        self.released.get(&kind).copied().unwrap_or(0)
    }

    pub fn live(&self, kind: ResourceKind) -> usize {
        self.live.iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Everything acquired was released exactly once, in a legal order.
    pub fn balanced(&self) -> bool {
        self.live.is_empty() && self.violations.is_empty()
    }
}

impl fmt::Display for ResourceLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in [ResourceKind::Device, ResourceKind::Program, ResourceKind::Buffer] {
            write!(
                f,
                "{kind:?}: {}/{} released; ",
                self.released(kind),
                self.acquired(kind)
            )?;
        }
        write!(f, "{} violation(s)", self.violations.len())
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HostDevice {
    id: u64,
}

pub struct HostProgram {
    id: u64,
    entry_point: String,
    kernel: NativeKernel,
    options: CompileOptions,
}

#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
}

#[derive(Default)]
struct HostState {
    next_id: u64,
    /// Buffer storage keyed by buffer id, with the owning device id.
    buffers: HashMap<u64, (u64, Vec<u32>)>,
    /// Live program/buffer ids per device id.
    children: HashMap<u64, usize>,
    ledger: ResourceLedger,
}

impl HostState {
    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

// ---------------------------------------------------------------------------
// HostBackend
// ---------------------------------------------------------------------------

/// CPU backend with a configurable platform/device topology.
pub struct HostBackend {
    platforms: Vec<PlatformInfo>,
    kernels: HashMap<String, NativeKernel>,
    state: RefCell<HostState>,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    /// One platform with one device, and the built-in kernels registered.
    pub fn new() -> Self {
        Self::with_topology(&[1])
    }

    /// `devices[p]` devices on platform `p`. An empty slice models a machine
    /// with no compute platforms.
    pub fn with_topology(devices: &[usize]) -> Self {
        let platforms = devices
            .iter()
            .enumerate()
            .map(|(p, &n)| PlatformInfo {
                name: format!("Host platform {p}"),
                devices: (0..n)
                    .map(|d| DeviceInfo {
                        name: format!("Host device {p}.{d}"),
                        kind: "Cpu".into(),
                    })
                    .collect(),
            })
            .collect();
        let mut backend = HostBackend {
            platforms,
            kernels: HashMap::new(),
            state: RefCell::new(HostState::default()),
        };
        backend.register("add_arrays", add_arrays_kernel);
        backend.register("blur", blur_kernel);
        backend
    }

    /// Register (or replace) the native body for `entry_point`.
    pub fn register(&mut self, entry_point: impl Into<String>, kernel: NativeKernel) -> &mut Self {
        self.kernels.insert(entry_point.into(), kernel);
        self
    }

    /// Snapshot of the acquire/release bookkeeping.
    pub fn ledger(&self) -> ResourceLedger {
        self.state.borrow().ledger.clone()
    }

    fn adopt_child(state: &mut HostState, device: u64, kind: ResourceKind) -> u64 {
        let id = state.fresh_id();
        state.ledger.acquire(kind, id);
        *state.children.entry(device).or_default() += 1;
        id
    }

    fn drop_child(state: &mut HostState, device: u64, kind: ResourceKind, id: u64) {
        state.ledger.release(kind, id);
        if let Some(n) = state.children.get_mut(&device) {
            *n = n.saturating_sub(1);
        }
    }
}

impl Backend for HostBackend {
    type Device = HostDevice;
    type Program = HostProgram;
    type Buffer = HostBuffer;

    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>> {
        Ok(self.platforms.clone())
    }

    fn open_device(&self, platform: usize, device: usize) -> Result<(HostDevice, DeviceInfo)> {
        let info = select_device(&self.platforms, platform, device)?.clone();
        let mut state = self.state.borrow_mut();
        let id = state.fresh_id();
        state.ledger.acquire(ResourceKind::Device, id);
        state.children.insert(id, 0);
        Ok((HostDevice { id }, info))
    }

    fn release_device(&self, device: HostDevice) {
        let mut state = self.state.borrow_mut();
        let live = state.children.remove(&device.id).unwrap_or(0);
        if live > 0 {
            state.ledger.violations.push(format!(
                "Device {} released with {live} live program(s)/buffer(s)",
                device.id
            ));
        }
        state.ledger.release(ResourceKind::Device, device.id);
    }

    fn build_program(
        &self,
        device: &HostDevice,
        source: &KernelSource,
        options: &CompileOptions,
    ) -> Result<HostProgram> {
        let reserved = [("WG_X", "1".to_string()), ("WG_Y", "1".to_string())];
        let text = source.prepare(options, &reserved)?;
        let entry = source.entry_point();
        if !text.contains(&format!("fn {entry}(")) {
            return Err(source.compile_error(format!(
                "{}: entry point `{entry}` not found",
                source.label()
            )));
        }
        let kernel = *self.kernels.get(entry).ok_or_else(|| {
            source.compile_error(format!("no native implementation registered for `{entry}`"))
        })?;
        let mut state = self.state.borrow_mut();
        let id = Self::adopt_child(&mut state, device.id, ResourceKind::Program);
        Ok(HostProgram {
            id,
            entry_point: entry.to_string(),
            kernel,
            options: options.clone(),
        })
    }

    fn release_program(&self, device: &HostDevice, program: HostProgram) {
        let mut state = self.state.borrow_mut();
        Self::drop_child(&mut state, device.id, ResourceKind::Program, program.id);
    }

    fn create_buffer(
        &self,
        device: &HostDevice,
        desc: &BufferDesc,
        init: Option<&[u8]>,
    ) -> Result<HostBuffer> {
        let mut words = vec![0u32; desc.len];
        if let Some(bytes) = init {
            if bytes.len() != desc.size_bytes() {
                return Err(Error::Transfer(format!(
                    "initial data is {} bytes, buffer is {}",
                    bytes.len(),
                    desc.size_bytes()
                )));
            }
            bytemuck::cast_slice_mut(&mut words).copy_from_slice(bytes);
        }
        let mut state = self.state.borrow_mut();
        let id = Self::adopt_child(&mut state, device.id, ResourceKind::Buffer);
        state.buffers.insert(id, (device.id, words));
        Ok(HostBuffer { id })
    }

    fn write_buffer(&self, _device: &HostDevice, buffer: &HostBuffer, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let (_, words) = state
            .buffers
            .get_mut(&buffer.id)
            .ok_or_else(|| Error::Transfer(format!("buffer {} is not live", buffer.id)))?;
        if data.len() != words.len() * 4 {
            return Err(Error::Transfer(format!(
                "write of {} bytes into a {}-byte buffer",
                data.len(),
                words.len() * 4
            )));
        }
        bytemuck::cast_slice_mut(words.as_mut_slice()).copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, _device: &HostDevice, buffer: &HostBuffer, out: &mut [u8]) -> Result<()> {
        let state = self.state.borrow();
        let (_, words) = state
            .buffers
            .get(&buffer.id)
            .ok_or_else(|| Error::Transfer(format!("buffer {} is not live", buffer.id)))?;
        if out.len() != words.len() * 4 {
            return Err(Error::Transfer(format!(
                "read of {} bytes from a {}-byte buffer",
                out.len(),
                words.len() * 4
            )));
        }
        out.copy_from_slice(bytemuck::cast_slice(words.as_slice()));
        Ok(())
    }

    fn release_buffer(&self, device: &HostDevice, buffer: HostBuffer) {
        let mut state = self.state.borrow_mut();
        state.buffers.remove(&buffer.id);
        Self::drop_child(&mut state, device.id, ResourceKind::Buffer, buffer.id);
    }

    fn enqueue(
        &self,
        device: &HostDevice,
        program: &HostProgram,
        args: &[BoundArg<'_, Self>],
        partition: &WorkPartition,
    ) -> Result<()> {
        // Move the bound buffers out of storage for the duration of the run.
        let mut state = self.state.borrow_mut();
        let mut taken = Vec::new();
        let mut host_args = Vec::with_capacity(args.len());
        let mut failure = None;
        for arg in args {
            match arg {
                BoundArg::Buffer { handle, access, .. } => match state.buffers.remove(&handle.id) {
                    Some((owner, words)) if owner == device.id => {
                        taken.push(Some((handle.id, owner)));
                        host_args.push(HostArg::Buffer { words, access: *access });
                    }
                    Some(entry) => {
                        state.buffers.insert(handle.id, entry);
                        failure = Some(format!("buffer {} belongs to another device", handle.id));
                        break;
                    }
                    None => {
                        // A read-only repeat of a buffer taken earlier in this call
                        // gets a copy; only the first binding is written back.
                        let earlier = taken
                            .iter()
                            .zip(host_args.iter().filter(|a| matches!(a, HostArg::Buffer { .. })))
                            .find(|(t, _)| matches!(t, Some((id, _)) if *id == handle.id))
                            .and_then(|(_, a)| match a {
                                HostArg::Buffer { words, access } => Some((words.clone(), *access)),
                                HostArg::Scalar(_) => None,
                            });
                        match earlier {
                            Some((words, first)) if !first.writable() && !access.writable() => {
                                taken.push(None);
                                host_args.push(HostArg::Buffer { words, access: *access });
                            }
                            _ => {
                                failure = Some(format!("buffer {} bound twice or not live", handle.id));
                                break;
                            }
                        }
                    }
                },
                BoundArg::Scalar(s) => host_args.push(HostArg::Scalar(*s)),
            }
        }
        drop(state);

        let mut kargs = KernelArgs {
            args: host_args,
            defines: &program.options,
        };
        if failure.is_none() {
            let global = partition.global();
            let local = partition.local();
            let global_size = [global.x(), global.y()];
            // A panicking kernel is a failed dispatch; the buffers are still
            // restored below.
            let grid = panic::catch_unwind(AssertUnwindSafe(|| {
                for gy in 0..global.y() {
                    for gx in 0..global.x() {
                        let item = WorkItem {
                            global: [gx, gy],
                            local: [gx % local.x(), gy % local.y()],
                            group: [gx / local.x(), gy / local.y()],
                            global_size,
                        };
                        (program.kernel)(&item, &mut kargs);
                    }
                }
            }));
            if let Err(payload) = grid {
                let msg = payload
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| payload.downcast_ref::<&str>().copied())
                    .unwrap_or("native kernel panicked");
                failure = Some(format!("kernel aborted: {msg}"));
            }
        }

        let mut state = self.state.borrow_mut();
        let buffers = kargs.args.into_iter().filter_map(|a| match a {
            HostArg::Buffer { words, .. } => Some(words),
            HostArg::Scalar(_) => None,
        });
        for (slot, words) in taken.into_iter().zip(buffers) {
            if let Some((id, owner)) = slot {
                state.buffers.insert(id, (owner, words));
            }
        }
        match failure {
            Some(msg) => Err(Error::Dispatch(format!("`{}`: {msg}", program.entry_point))),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in native kernels
// ---------------------------------------------------------------------------

fn add_arrays_kernel(item: &WorkItem, args: &mut KernelArgs) {
    let gid = item.linear_id();
    let n = args.f32(0).len().min(args.f32(1).len()).min(args.f32(2).len());
    if gid >= n {
        return;
    }
    let sum = args.f32(0)[gid] + args.f32(1)[gid];
    args.f32_mut(2)[gid] = sum;
}

fn blur_kernel(item: &WorkItem, args: &mut KernelArgs) {
    let [w, h] = args.int2(3);
    let [kw, kh] = args.int2(4);
    let [ox, oy] = args.int2(5);
    let [x, y] = item.global;
    if x >= w as usize || y >= h as usize {
        return;
    }
    let edge = args
        .define("EDGE_POLICY")
        .and_then(EdgePolicy::from_define)
        .unwrap_or_default();
    let value = convolve_pixel(
        args.u32(0),
        w as usize,
        h as usize,
        args.f32(1),
        (kw as usize, kh as usize),
        (ox as usize, oy as usize),
        edge,
        x,
        y,
    );
    args.u32_mut(2)[y * w as usize + x] = value;
}
