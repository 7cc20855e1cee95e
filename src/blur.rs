// blur.rs: Device image blur and the kernel-selection pipeline.
//
// `DeviceBlur` compiles the blur kernel and uploads the convolution weights
// once; `filter` can then be called any number of times. `BlurDemo` is what
// a presentation shell drives: it offers the kernel names and, for each
// selection, runs the host reference and the device path on the source
// image and reports both images with their timings.
//
// Each selection opens a fresh session and recompiles, so every selection
// exercises the full acquire/release sequence. Only `filter` is inside the
// device timing; session setup and compilation are not.

use std::time::{Duration, Instant};

use crate::convolution::{blur_family, convolve_rgb, ConvolutionKernel, EdgePolicy};
use crate::error::{Error, Result};
use crate::gpu::{Access, Backend, DeviceBuffer, Program, Scalar, Session, TransferMode};
use crate::image::RgbImage;
use crate::kernels::{self, CompileOptions};
use crate::partition::WorkPartition;

/// Largest per-channel difference tolerated between host and device output.
pub const CHANNEL_TOLERANCE: u8 = 1;

/// A compiled blur for one convolution kernel.
pub struct DeviceBlur<'s, B: Backend> {
    session: &'s Session<'s, B>,
    program: Program<'s, B>,
    weights: DeviceBuffer<'s, 'static, B, f32>,
    kernel: ConvolutionKernel,
}

impl<'s, B: Backend> DeviceBlur<'s, B> {
    /// Compile the blur kernel for `kernel` and upload its weights.
    ///
    /// `defines` are passed through to the compiler; `EDGE_POLICY` is always
    /// set from `edge`.
    pub fn new(
        session: &'s Session<'s, B>,
        kernel: &ConvolutionKernel,
        edge: EdgePolicy,
        defines: &CompileOptions,
    ) -> Result<Self> {
        let options = defines
            .clone()
            .merged(&CompileOptions::new().define("EDGE_POLICY", edge.define_value()));
        let program = Program::compile(session, &kernels::blur(), &options)?;
        let mut weights = DeviceBuffer::alloc(session, kernel.weights().len(), Access::ReadOnly)?;
        weights.write(kernel.weights())?;
        Ok(DeviceBlur {
            session,
            program,
            weights,
            kernel: kernel.clone(),
        })
    }

    /// Convolve `src` on the device. The input is bound with `mode`.
    pub fn filter(&self, src: &RgbImage, mode: TransferMode) -> Result<RgbImage> {
        let (w, h) = (src.width(), src.height());
        let (kw, kh) = (self.kernel.width(), self.kernel.height());
        let (ox, oy) = self.kernel.origin();

        let input = DeviceBuffer::with_mode(self.session, src.as_slice(), Access::ReadOnly, mode)?;
        let output = DeviceBuffer::<B, u32>::alloc(self.session, src.len(), Access::WriteOnly)?;
        let partition = WorkPartition::for_image(w, h, kw, kh)?;

        self.program.run(
            &[
                input.arg(),
                self.weights.arg(),
                output.arg(),
                Scalar::int2(w, h)?.into(),
                Scalar::int2(kw, kh)?.into(),
                Scalar::int2(ox, oy)?.into(),
            ],
            &partition,
        )?;
        Ok(RgbImage::from_vec(w, h, output.to_vec()?))
    }
}

/// Everything the shell shows for one selection.
#[derive(Debug, Clone)]
pub struct BlurOutcome {
    pub kernel_name: String,
    pub host_label: String,
    pub device_label: String,
    pub host_image: RgbImage,
    pub device_image: RgbImage,
    pub host_time: Duration,
    pub device_time: Duration,
    pub max_channel_diff: u8,
}

impl BlurOutcome {
    /// Host and device images agree within [`CHANNEL_TOLERANCE`].
    pub fn agrees(&self) -> bool {
        self.max_channel_diff <= CHANNEL_TOLERANCE
    }
}

/// `"Host: 12.34 ms"`.
pub fn timing_label(what: &str, elapsed: Duration) -> String {
    format!("{what}: {:.2} ms", elapsed.as_secs_f64() * 1e3)
}

/// Host-vs-device blur comparison over the box-blur family.
pub struct BlurDemo<'b, B: Backend> {
    backend: &'b B,
    platform: usize,
    device: usize,
    source: RgbImage,
    kernels: Vec<ConvolutionKernel>,
    edge: EdgePolicy,
    mode: TransferMode,
    defines: CompileOptions,
    selected: Option<usize>,
}

impl<'b, B: Backend> BlurDemo<'b, B> {
    /// Demo over `source` using platform 0, device 0, clamp edges and copy
    /// transfers.
    pub fn new(backend: &'b B, source: RgbImage) -> Self {
        BlurDemo {
            backend,
            platform: 0,
            device: 0,
            source,
            kernels: blur_family(),
            edge: EdgePolicy::default(),
            mode: TransferMode::default(),
            defines: CompileOptions::new(),
            selected: None,
        }
    }

    pub fn on_device(mut self, platform: usize, device: usize) -> Self {
        self.platform = platform;
        self.device = device;
        self
    }

    pub fn edge_policy(mut self, edge: EdgePolicy) -> Self {
        self.edge = edge;
        self
    }

    pub fn transfer(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn defines(mut self, defines: CompileOptions) -> Self {
        self.defines = defines;
        self
    }

    /// Replace the kernel family offered to the shell.
    pub fn with_kernels(mut self, kernels: Vec<ConvolutionKernel>) -> Self {
        self.kernels = kernels;
        self
    }

    /// Names of the selectable kernels, in selection-index order.
    pub fn kernel_names(&self) -> Vec<String> {
        self.kernels.iter().map(|k| k.name().to_string()).collect()
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn source(&self) -> &RgbImage {
        &self.source
    }

    /// Run host and device blur for kernel `index`.
    ///
    /// # Errors
    /// `Error::ArgumentBinding` for an out-of-range index; otherwise whatever
    /// the session, compile, transfer or dispatch step reports.
    pub fn on_kernel_selected(&mut self, index: usize) -> Result<BlurOutcome> {
        let kernel = self.kernels.get(index).ok_or_else(|| {
            Error::ArgumentBinding(format!(
                "kernel index {index} out of range ({} kernels)",
                self.kernels.len()
            ))
        })?;
        if self.source.is_empty() {
            return Err(Error::Transfer("source image has no pixels".into()));
        }

        let start = Instant::now();
        let host_image = convolve_rgb(&self.source, kernel, self.edge);
        let host_time = start.elapsed();

        let session = Session::open(self.backend, self.platform, self.device)?;
        let blur = DeviceBlur::new(&session, kernel, self.edge, &self.defines)?;
        let start = Instant::now();
        let device_image = blur.filter(&self.source, self.mode)?;
        let device_time = start.elapsed();
        drop(blur);
        session.close();

        let max_channel_diff = host_image.max_channel_diff(&device_image);
        let outcome = BlurOutcome {
            kernel_name: kernel.name().to_string(),
            host_label: timing_label("Host", host_time),
            device_label: timing_label("Device", device_time),
            host_image,
            device_image,
            host_time,
            device_time,
            max_channel_diff,
        };
        log::info!(
            "{}: {}, {} (edge {}, {})",
            outcome.kernel_name,
            outcome.host_label,
            outcome.device_label,
            self.edge,
            self.mode
        );
        if !outcome.agrees() {
            log::warn!(
                "{}: host and device differ by up to {} per channel",
                outcome.kernel_name,
                max_channel_diff
            );
        }
        self.selected = Some(index);
        Ok(outcome)
    }
}
