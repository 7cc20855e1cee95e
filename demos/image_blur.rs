// Box blur on the host and on a compute device, side by side.
//
// Each selected kernel is run through the host reference convolution and
// the device kernel; both images are written to the output directory and
// the timings are printed.
//
//   cargo run --release --example image_blur -- --image sunset.jpg
//   cargo run --example image_blur -- --backend host --kernel 0 --kernel 3

mod common;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use common::{DeviceArgs, EdgeArg};
use gpu_dispatch::blur::BlurDemo;
use gpu_dispatch::config::{BackendKind, DemoConfig};
use gpu_dispatch::gpu::{Backend, HostBackend, WgpuBackend};
use gpu_dispatch::image::RgbImage;
use gpu_dispatch::presentation::{run_selections, FilePresenter};

#[derive(Parser, Debug)]
#[command(name = "image_blur")]
#[command(about = "Compare host and device box blur")]
struct Cli {
    #[command(flatten)]
    device: DeviceArgs,

    /// Input image (any format the image crate decodes)
    #[arg(long)]
    image: Option<PathBuf>,

    /// Directory for the output PNGs
    #[arg(long)]
    out: Option<PathBuf>,

    /// Border handling, identical on host and device
    #[arg(long, value_enum)]
    edge: Option<EdgeArg>,

    /// Kernel index to run (repeatable); all kernels if omitted
    #[arg(long = "kernel")]
    kernels: Vec<usize>,
}

fn run<B: Backend>(backend: &B, cfg: &DemoConfig, cli: &Cli) -> Result<()> {
    if cli.device.list {
        return common::list_platforms(backend);
    }
    let image = RgbImage::load_rgb(&cfg.image_path)?;
    log::info!(
        "{}: {}×{}",
        cfg.image_path.display(),
        image.width(),
        image.height()
    );

    let mut demo = BlurDemo::new(backend, image)
        .on_device(cfg.platform_index, cfg.device_index)
        .edge_policy(cfg.edge_policy)
        .transfer(cfg.transfer)
        .defines(cfg.compile_options());
    let selections: Vec<usize> = if cli.kernels.is_empty() {
        (0..demo.kernel_names().len()).collect()
    } else {
        cli.kernels.clone()
    };

    let mut presenter = FilePresenter::new(&cfg.output_dir);
    let outcomes = run_selections(&mut demo, &mut presenter, &selections)
        .context("blur pipeline")?;

    for o in &outcomes {
        println!(
            "{:<10} {:>18} {:>18}   max channel diff {}",
            o.kernel_name, o.host_label, o.device_label, o.max_channel_diff
        );
    }
    println!("images written to {}", presenter.dir().display());
    Ok(())
}

fn main() -> Result<()> {
    common::init_logging();
    let cli = Cli::parse();
    let mut cfg = cli.device.resolve()?;
    if let Some(path) = &cli.image {
        cfg.image_path = path.clone();
    }
    if let Some(out) = &cli.out {
        cfg.output_dir = out.clone();
    }
    if let Some(edge) = cli.edge {
        cfg.edge_policy = common::edge_policy(edge);
    }
    cfg.validate()?;

    match cfg.backend {
        BackendKind::Wgpu => run(&WgpuBackend::new(cfg.profile), &cfg, &cli),
        BackendKind::Host => run(&HostBackend::new(), &cfg, &cli),
    }
}
