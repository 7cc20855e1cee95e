// Elementwise addition of two large f32 arrays on a compute device.
//
//   cargo run --release --example array_addition
//   cargo run --example array_addition -- --backend host --len 1000

mod common;

use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;

use common::DeviceArgs;
use gpu_dispatch::array_add::{add_arrays, first_mismatch};
use gpu_dispatch::config::{BackendKind, DemoConfig};
use gpu_dispatch::gpu::{Backend, HostBackend, Session, WgpuBackend};

#[derive(Parser, Debug)]
#[command(name = "array_addition")]
#[command(about = "c[i] = a[i] + b[i] with a[i] = b[i] = i")]
struct Cli {
    #[command(flatten)]
    device: DeviceArgs,

    /// Number of elements
    #[arg(long)]
    len: Option<usize>,
}

fn run<B: Backend>(backend: &B, cfg: &DemoConfig, list: bool) -> Result<()> {
    if list {
        return common::list_platforms(backend);
    }
    let n = cfg.array_len;
    let a: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let b = a.clone();

    let session = Session::open(backend, cfg.platform_index, cfg.device_index)
        .context("opening compute device")?;

    let start = Instant::now();
    let c = add_arrays(&session, &a, &b, cfg.transfer).context("array addition")?;
    let elapsed = start.elapsed();
    log::info!(
        "added {n} elements in {:.2} ms ({} transfer)",
        elapsed.as_secs_f64() * 1e3,
        cfg.transfer
    );

    if let Some((i, v)) = first_mismatch(&a, &b, &c) {
        log::warn!("c[{i}] = {v}, expected {}", a[i] + b[i]);
        bail!("result mismatch at index {i}");
    }
    log::info!("result verified");
    println!("c[..{}] = {:?}", n.min(10), &c[..n.min(10)]);
    Ok(())
}

fn main() -> Result<()> {
    common::init_logging();
    let cli = Cli::parse();
    let mut cfg = cli.device.resolve()?;
    if let Some(len) = cli.len {
        cfg.array_len = len;
    }
    cfg.validate()?;

    match cfg.backend {
        BackendKind::Wgpu => run(&WgpuBackend::new(cfg.profile), &cfg, cli.device.list),
        BackendKind::Host => run(&HostBackend::new(), &cfg, cli.device.list),
    }
}
