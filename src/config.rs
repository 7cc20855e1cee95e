// config.rs: Demo configuration.
//
// Loaded from an optional TOML file; every field has a default so an empty
// file (or none at all) is valid. Command-line flags in the demos override
// individual fields after loading.
//
//   backend        = "wgpu"         # or "host"
//   platform_index = 0
//   device_index   = 0
//   profile        = "native"       # or "raspberry-pi"
//   transfer       = "copy"         # or "pinned"
//   edge_policy    = "clamp"        # or "zero-fill"
//   image_path     = "sunset.jpg"
//   output_dir     = "blur-output"
//   array_len      = 10000000
//
//   [defines]
//   SOME_KEY = "value"

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::convolution::EdgePolicy;
use crate::error::{Error, Result};
use crate::gpu::{DeviceProfile, TransferMode};
use crate::kernels::CompileOptions;

/// Which `Backend` implementation the demos run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Wgpu,
    Host,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Wgpu => write!(f, "wgpu"),
            BackendKind::Host => write!(f, "host"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    pub backend: BackendKind,
    pub platform_index: usize,
    pub device_index: usize,
    pub profile: DeviceProfile,
    pub transfer: TransferMode,
    pub edge_policy: EdgePolicy,
    pub defines: BTreeMap<String, String>,
    pub image_path: PathBuf,
    pub output_dir: PathBuf,
    pub array_len: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            backend: BackendKind::Wgpu,
            platform_index: 0,
            device_index: 0,
            profile: DeviceProfile::Native,
            transfer: TransferMode::Copy,
            edge_policy: EdgePolicy::Clamp,
            defines: BTreeMap::new(),
            image_path: PathBuf::from("sunset.jpg"),
            output_dir: PathBuf::from("blur-output"),
            array_len: 10_000_000,
        }
    }
}

impl DemoConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: DemoConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_path.as_os_str().is_empty() {
            return Err(Error::Config("image_path must not be empty".into()));
        }
        if self.array_len == 0 {
            return Err(Error::Config("array_len must be at least 1".into()));
        }
        Ok(())
    }

    /// The `[defines]` table as compile options.
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions::from(self.defines.clone())
    }
}
