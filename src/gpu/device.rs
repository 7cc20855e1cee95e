// gpu/device.rs: wgpu implementation of `Backend`.
//
// PLATFORMS AND DEVICES:
// A "platform" is one wgpu graphics backend that has at least one adapter,
// in the fixed order Vulkan, Metal, DX12, GL. A "device" is an adapter
// index within that backend. `(0, 0)` is therefore the first adapter of
// the first backend present on the machine.
//
// DEVICE LIMITS:
// We request *lower* limits than the hardware actually supports when
// running under a non-Native profile. wgpu validates every dispatch against
// the requested limits, so violations that would fail on a Raspberry Pi
// are caught at dev time on the laptop.
//
// WORKGROUP SIZES:
// naga does not accept `override` expressions in `@workgroup_size`, so the
// local extent is substituted into the WGSL source (`{{WG_X}}`, `{{WG_Y}}`).
// One pipeline is built per distinct local extent and cached on the
// program. `build_program` compiles the 1×1 variant up front inside a
// validation error scope so a broken kernel fails at compile time with
// naga's diagnostic.
//
// BINDINGS:
// Buffer parameters bind at their ordinal among buffer parameters (0, 1,
// ...). All scalar parameters are packed into a single uniform block at the
// next binding, in declaration order, with WGSL alignment.
//
// LARGE 1-D DISPATCHES:
// A 1-D grid with more work-groups than `max_compute_workgroups_per_dimension`
// is folded into 2-D. Kernels compute their linear id as
// `id.x + id.y * num_workgroups.x * WG_X` and guard it against the buffer
// length, so the extra items of the fold are surplus like any other.
//
// PINNED TRANSFERS:
// wgpu cannot alias host memory. A pinned buffer is created
// mapped-at-creation and filled straight from the host slice, with no
// staging copy through the queue. The host-binding guarantees of pinned
// mode are enforced by the borrow in `DeviceBuffer`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use wgpu::util::DeviceExt;

use crate::error::{Error, Result};
use crate::gpu::backend::{select_device, Backend, BoundArg, DeviceInfo, PlatformInfo};
use crate::gpu::buffer::{BufferDesc, TransferMode};
use crate::gpu::dispatch::pack_scalars;
use crate::kernels::{CompileOptions, KernelSource, Param};
use crate::partition::WorkPartition;

/// Hardware profile controlling the device limits requested.
///
/// Use `Native` for the adapter's defaults. Use `RaspberryPi` to simulate
/// RPi 4/5 constraints: wgpu rejects any dispatch that exceeds the RPi's
/// actual Vulkan limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceProfile {
    #[default]
    Native,
    /// Broadcom VideoCore VI/VII under the V3DV driver.
    RaspberryPi,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

/// Platform order. Only backends with at least one adapter are listed.
const PLATFORMS: [(wgpu::Backends, &str); 4] = [
    (wgpu::Backends::VULKAN, "Vulkan"),
    (wgpu::Backends::METAL, "Metal"),
    (wgpu::Backends::DX12, "DX12"),
    (wgpu::Backends::GL, "GL"),
];

/// The wgpu runtime. Owns the `wgpu::Instance`; every session borrows it,
/// so the instance outlives all devices created from it.
pub struct WgpuBackend {
    instance: wgpu::Instance,
    profile: DeviceProfile,
}

/// An opened adapter: device, queue and the limits actually requested.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
    adapter: wgpu::AdapterInfo,
}

/// A compiled kernel and its per-local-extent pipelines.
pub struct WgpuProgram {
    source: KernelSource,
    options: CompileOptions,
    bgl: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: RefCell<HashMap<(u32, u32), wgpu::ComputePipeline>>,
}

pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl Default for WgpuBackend {
    fn default() -> Self {
        Self::new(DeviceProfile::Native)
    }
}

impl WgpuBackend {
    pub fn new(profile: DeviceProfile) -> Self {
        // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER keeps translation layers such
        // as dzn (D3D12 → Vulkan on WSL2) visible; they run compute fine.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        });
        WgpuBackend { instance, profile }
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Non-empty backends in platform order, with their adapters.
    fn enumerate(&self) -> Vec<(&'static str, Vec<wgpu::Adapter>)> {
        PLATFORMS
            .iter()
            .map(|&(backends, name)| (name, self.instance.enumerate_adapters(backends)))
            .filter(|(_, adapters)| !adapters.is_empty())
            .collect()
    }

    fn pipeline(
        &self,
        device: &WgpuDevice,
        program: &WgpuProgram,
        wg: (u32, u32),
    ) -> Result<wgpu::ComputePipeline> {
        let reserved = [("WG_X", wg.0.to_string()), ("WG_Y", wg.1.to_string())];
        let text = program.source.prepare(&program.options, &reserved)?;

        device.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.source.label()),
            source: wgpu::ShaderSource::Wgsl(text.into()),
        });
        let pipeline = device
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(program.source.entry_point()),
                layout: Some(&program.pipeline_layout),
                module: &module,
                entry_point: program.source.entry_point(),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        match pollster::block_on(device.device.pop_error_scope()) {
            Some(e) => Err(program.source.compile_error(e.to_string())),
            None => Ok(pipeline),
        }
    }

    fn wait(&self, device: &WgpuDevice) {
        device.device.poll(wgpu::Maintain::Wait);
    }
}

// ============================================================
// Dispatch geometry
// ============================================================

/// Work-group counts for `partition`, folding oversized 1-D grids into 2-D.
///
/// Returns `Err(Error::Dispatch)` if the grid cannot be expressed within
/// `max_per_dim` groups per dimension.
pub fn workgroup_counts(partition: &WorkPartition, max_per_dim: u32) -> Result<[u32; 3]> {
    let [gx, gy] = partition.groups();
    let max = max_per_dim as usize;
    if partition.problem().rank() == 1 && gx > max {
        let rows = gx.div_ceil(max);
        if rows > max {
            return Err(Error::Dispatch(format!(
                "{partition}: {gx} work-groups exceed {max}×{max}"
            )));
        }
        return Ok([max_per_dim, rows as u32, 1]);
    }
    if gx > max || gy > max {
        return Err(Error::Dispatch(format!(
            "{partition}: {gx}×{gy} work-groups exceed the per-dimension limit of {max}"
        )));
    }
    Ok([gx as u32, gy as u32, 1])
}

fn check_local_extent(partition: &WorkPartition, limits: &wgpu::Limits) -> Result<(u32, u32)> {
    let local = partition.local();
    let (x, y) = (local.x() as u64, local.y() as u64);
    if x > limits.max_compute_workgroup_size_x as u64
        || y > limits.max_compute_workgroup_size_y as u64
        || x * y > limits.max_compute_invocations_per_workgroup as u64
    {
        return Err(Error::Dispatch(format!(
            "local extent {local} exceeds device limits ({}×{}, {} invocations)",
            limits.max_compute_workgroup_size_x,
            limits.max_compute_workgroup_size_y,
            limits.max_compute_invocations_per_workgroup
        )));
    }
    Ok((x as u32, y as u32))
}

// ============================================================
// Backend impl
// ============================================================

impl Backend for WgpuBackend {
    type Device = WgpuDevice;
    type Program = WgpuProgram;
    type Buffer = WgpuBuffer;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>> {
        Ok(self
            .enumerate()
            .into_iter()
            .map(|(name, adapters)| PlatformInfo {
                name: name.to_string(),
                devices: adapters
                    .iter()
                    .map(|a| {
                        let info = a.get_info();
                        DeviceInfo {
                            name: info.name,
                            kind: format!("{:?}", info.device_type),
                        }
                    })
                    .collect(),
            })
            .collect())
    }

    fn open_device(&self, platform: usize, device: usize) -> Result<(WgpuDevice, DeviceInfo)> {
        let platforms = self.platforms()?;
        for p in &platforms {
            for d in &p.devices {
                log::debug!("[wgpu] adapter: {} / {d}", p.name);
            }
        }
        let info = select_device(&platforms, platform, device)?.clone();
        let adapter = self
            .enumerate()
            .into_iter()
            .nth(platform)
            .and_then(|(_, adapters)| adapters.into_iter().nth(device))
            .ok_or_else(|| Error::DeviceUnavailable(format!("adapter {info} disappeared")))?;
        let adapter_info = adapter.get_info();

        // Auto-detect RPi when the caller asked for Native but the adapter is V3D.
        let profile = match self.profile {
            DeviceProfile::Native if adapter_info.name.to_ascii_lowercase().contains("v3d") => {
                log::info!("[wgpu] V3D adapter detected, using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };
        let limits = limits_for_profile(profile);

        let (dev, queue): (wgpu::Device, wgpu::Queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("gpu-dispatch"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| Error::DeviceUnavailable(format!("{info}: {e}")))?;
        dev.on_uncaptured_error(Box::new(|e: wgpu::Error| log::error!("[wgpu] uncaptured error: {e}")));

        log::info!(
            "[wgpu] opened {} ({:?}, {:?}), profile {profile}",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );
        Ok((
            WgpuDevice {
                device: dev,
                queue,
                limits,
                adapter: adapter_info,
            },
            info,
        ))
    }

    fn release_device(&self, device: WgpuDevice) {
        self.wait(&device);
        log::debug!("[wgpu] released {}", device.adapter.name);
    }

    fn build_program(
        &self,
        device: &WgpuDevice,
        source: &KernelSource,
        options: &CompileOptions,
    ) -> Result<WgpuProgram> {
        let mut entries = Vec::new();
        let mut has_scalars = false;
        for param in source.signature() {
            match param {
                Param::Buffer { access, .. } => entries.push(wgpu::BindGroupLayoutEntry {
                    binding: entries.len() as u32,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: !access.writable() },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }),
                Param::Scalar { .. } => has_scalars = true,
            }
        }
        if has_scalars {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: entries.len() as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }

        let bgl = device.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(source.entry_point()),
            entries: &entries,
        });
        let pipeline_layout = device.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(source.entry_point()),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let program = WgpuProgram {
            source: source.clone(),
            options: options.clone(),
            bgl,
            pipeline_layout,
            pipelines: RefCell::new(HashMap::new()),
        };
        let first = self.pipeline(device, &program, (1, 1))?;
        program.pipelines.borrow_mut().insert((1, 1), first);
        Ok(program)
    }

    fn release_program(&self, _device: &WgpuDevice, program: WgpuProgram) {
        log::debug!(
            "[wgpu] released `{}` ({} pipeline(s))",
            program.source.entry_point(),
            program.pipelines.borrow().len()
        );
    }

    fn create_buffer(
        &self,
        device: &WgpuDevice,
        desc: &BufferDesc,
        init: Option<&[u8]>,
    ) -> Result<WgpuBuffer> {
        let size = desc.size_bytes() as u64;
        let max = (device.limits.max_storage_buffer_binding_size as u64).min(device.limits.max_buffer_size);
        if size > max {
            return Err(Error::Transfer(format!(
                "{size}-byte buffer exceeds the device limit of {max} bytes"
            )));
        }
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        let pinned = desc.mode == TransferMode::Pinned && init.is_some();

        device.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = device.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size,
            usage,
            mapped_at_creation: pinned,
        });
        if let Some(oom) = pollster::block_on(device.device.pop_error_scope()) {
            return Err(Error::Transfer(format!("allocation of {size} bytes failed: {oom}")));
        }

        match init {
            Some(bytes) if pinned => {
                buffer.slice(..).get_mapped_range_mut().copy_from_slice(bytes);
                buffer.unmap();
            }
            Some(bytes) => {
                device.queue.write_buffer(&buffer, 0, bytes);
                device.queue.submit(std::iter::empty());
                self.wait(device);
            }
            None => {}
        }
        Ok(WgpuBuffer { buffer, size })
    }

    fn write_buffer(&self, device: &WgpuDevice, buffer: &WgpuBuffer, data: &[u8]) -> Result<()> {
        if data.len() as u64 != buffer.size {
            return Err(Error::Transfer(format!(
                "write of {} bytes into a {}-byte buffer",
                data.len(),
                buffer.size
            )));
        }
        device.queue.write_buffer(&buffer.buffer, 0, data);
        device.queue.submit(std::iter::empty());
        self.wait(device);
        Ok(())
    }

    fn read_buffer(&self, device: &WgpuDevice, buffer: &WgpuBuffer, out: &mut [u8]) -> Result<()> {
        if out.len() as u64 != buffer.size {
            return Err(Error::Transfer(format!(
                "read of {} bytes from a {}-byte buffer",
                out.len(),
                buffer.size
            )));
        }
        let readback = device.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: buffer.size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &readback, 0, buffer.size);
        device.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.wait(device);
        rx.recv()
            .map_err(|_| Error::Transfer("readback callback never fired".into()))?
            .map_err(|e| Error::Transfer(format!("readback map failed: {e}")))?;

        out.copy_from_slice(&slice.get_mapped_range());
        readback.unmap();
        Ok(())
    }

    fn release_buffer(&self, _device: &WgpuDevice, buffer: WgpuBuffer) {
        buffer.buffer.destroy();
    }

    fn enqueue(
        &self,
        device: &WgpuDevice,
        program: &WgpuProgram,
        args: &[BoundArg<'_, Self>],
        partition: &WorkPartition,
    ) -> Result<()> {
        let wg = check_local_extent(partition, &device.limits)?;
        let counts = workgroup_counts(partition, device.limits.max_compute_workgroups_per_dimension)?;

        if !program.pipelines.borrow().contains_key(&wg) {
            let pipeline = self.pipeline(device, program, wg)?;
            program.pipelines.borrow_mut().insert(wg, pipeline);
        }
        let pipelines = program.pipelines.borrow();
        let pipeline = pipelines
            .get(&wg)
            .ok_or_else(|| Error::Dispatch(format!("no pipeline for local extent {wg:?}")))?;

        let scalars = pack_scalars(args.iter().filter_map(|a| match a {
            BoundArg::Scalar(s) => Some(s),
            BoundArg::Buffer { .. } => None,
        }));
        let uniform = (!scalars.is_empty()).then(|| {
            device.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("scalar arguments"),
                contents: &scalars,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = args
            .iter()
            .filter_map(|a| match a {
                BoundArg::Buffer { handle, .. } => Some(&handle.buffer),
                BoundArg::Scalar(_) => None,
            })
            .enumerate()
            .map(|(i, b)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: b.as_entire_binding(),
            })
            .collect();
        if let Some(u) = &uniform {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: u.as_entire_binding(),
            });
        }

        device.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = device.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.source.entry_point()),
            layout: &program.bgl,
            entries: &entries,
        });
        let mut encoder = device.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(program.source.entry_point()),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(program.source.entry_point()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(counts[0], counts[1], counts[2]);
        }
        device.queue.submit(std::iter::once(encoder.finish()));
        let scope = pollster::block_on(device.device.pop_error_scope());
        self.wait(device);
        match scope {
            Some(e) => Err(Error::Dispatch(format!("`{}`: {e}", program.source.entry_point()))),
            None => Ok(()),
        }
    }
}

// ============================================================
// Limits helpers
// ============================================================

/// Build wgpu limits for the given profile.
fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),

        DeviceProfile::RaspberryPi => wgpu::Limits {
            // VideoCore VI/VII: vulkaninfo reports 256 max invocations.
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_texture_dimension_2d: 4096,
            // 128 MiB of the RPi's shared RAM for storage buffers.
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Extent;

    // Tests that need an adapter live in tests/test_wgpu.rs behind #[ignore].

    #[test]
    fn test_rpi_limits_cap_invocations() {
        let limits = limits_for_profile(DeviceProfile::RaspberryPi);
        assert_eq!(limits.max_compute_invocations_per_workgroup, 256);
        assert_eq!(limits.max_compute_workgroup_size_x, 256);
    }

    #[test]
    fn test_native_limits_are_default() {
        assert_eq!(limits_for_profile(DeviceProfile::Native), wgpu::Limits::default());
    }

    #[test]
    fn test_largest_blur_fits_rpi() {
        // 15×15 = 225 invocations.
        let p = WorkPartition::for_image(640, 480, 15, 15).unwrap();
        let limits = limits_for_profile(DeviceProfile::RaspberryPi);
        assert_eq!(check_local_extent(&p, &limits).unwrap(), (15, 15));

        let p = WorkPartition::for_image(640, 480, 17, 17).unwrap();
        assert!(matches!(check_local_extent(&p, &limits), Err(Error::Dispatch(_))));
    }

    #[test]
    fn test_workgroup_counts_2d() {
        // 752×480 with 7×7 groups → ceil(752/7) = 108, ceil(480/7) = 69.
        let p = WorkPartition::for_image(752, 480, 7, 7).unwrap();
        assert_eq!(workgroup_counts(&p, 65535).unwrap(), [108, 69, 1]);
    }

    #[test]
    fn test_workgroup_counts_folds_large_1d() {
        let p = WorkPartition::linear(10_000_000);
        let [x, y, z] = workgroup_counts(&p, 65535).unwrap();
        assert_eq!((x, z), (65535, 1));
        assert_eq!(y, 153); // ceil(10_000_000 / 65535)
        assert!(x as usize * y as usize >= 10_000_000);
    }

    #[test]
    fn test_workgroup_counts_2d_overflow() {
        let p = WorkPartition::new(Extent::d2(70_000, 4), Extent::d2(1, 1)).unwrap();
        assert!(matches!(workgroup_counts(&p, 65535), Err(Error::Dispatch(_))));
    }

    #[test]
    fn test_profile_deserialises_kebab_case() {
        #[derive(Deserialize)]
        struct W {
            profile: DeviceProfile,
        }
        let w: W = toml::from_str("profile = \"raspberry-pi\"").unwrap();
        assert_eq!(w.profile, DeviceProfile::RaspberryPi);
    }
}
