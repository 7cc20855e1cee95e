// Command-line handling shared by the demos.

#![allow(dead_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use gpu_dispatch::config::{BackendKind, DemoConfig};
use gpu_dispatch::convolution::EdgePolicy;
use gpu_dispatch::gpu::{Backend, DeviceProfile, TransferMode};
use gpu_dispatch::kernels::CompileOptions;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum BackendArg {
    Wgpu,
    Host,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ProfileArg {
    Native,
    RaspberryPi,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TransferArg {
    Copy,
    Pinned,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum EdgeArg {
    Clamp,
    ZeroFill,
}

/// Device selection flags. Each one overrides the config file.
#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Compute backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Platform index
    #[arg(long)]
    pub platform: Option<usize>,

    /// Device index within the platform
    #[arg(long)]
    pub device: Option<usize>,

    /// Device limits profile (wgpu only)
    #[arg(long, value_enum)]
    pub profile: Option<ProfileArg>,

    /// How input buffers are bound to host memory
    #[arg(long, value_enum)]
    pub transfer: Option<TransferArg>,

    /// Extra compile define, KEY=VALUE (repeatable)
    #[arg(long = "define", short = 'D')]
    pub defines: Vec<String>,

    /// Print the available platforms and devices, then exit
    #[arg(long)]
    pub list: bool,
}

impl DeviceArgs {
    /// Load the config file (if any), then apply the flags.
    pub fn resolve(&self) -> Result<DemoConfig> {
        let mut cfg = match &self.config {
            Some(path) => DemoConfig::load(path)?,
            None => DemoConfig::default(),
        };
        if let Some(b) = self.backend {
            cfg.backend = match b {
                BackendArg::Wgpu => BackendKind::Wgpu,
                BackendArg::Host => BackendKind::Host,
            };
        }
        if let Some(p) = self.platform {
            cfg.platform_index = p;
        }
        if let Some(d) = self.device {
            cfg.device_index = d;
        }
        if let Some(p) = self.profile {
            cfg.profile = match p {
                ProfileArg::Native => DeviceProfile::Native,
                ProfileArg::RaspberryPi => DeviceProfile::RaspberryPi,
            };
        }
        if let Some(t) = self.transfer {
            cfg.transfer = match t {
                TransferArg::Copy => TransferMode::Copy,
                TransferArg::Pinned => TransferMode::Pinned,
            };
        }
        let defines = CompileOptions::parse(self.defines.as_slice()).context("parsing --define")?;
        for (k, v) in defines.iter() {
            cfg.defines.insert(k.to_string(), v.to_string());
        }
        Ok(cfg)
    }
}

pub fn edge_policy(arg: EdgeArg) -> EdgePolicy {
    match arg {
        EdgeArg::Clamp => EdgePolicy::Clamp,
        EdgeArg::ZeroFill => EdgePolicy::ZeroFill,
    }
}

pub fn init_logging() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
}

/// Print every platform and device the backend can see.
pub fn list_platforms<B: Backend>(backend: &B) -> Result<()> {
    let platforms = backend.platforms()?;
    if platforms.is_empty() {
        println!("[{}] no compute platforms found", backend.name());
    }
    for (p, platform) in platforms.iter().enumerate() {
        println!("[{}] platform {p}: {}", backend.name(), platform.name);
        for (d, device) in platform.devices.iter().enumerate() {
            println!("    device {d}: {device}");
        }
    }
    Ok(())
}
