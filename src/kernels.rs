// kernels.rs: Kernel sources, their parameter signatures, and compile options.
//
// A kernel is WGSL text plus an entry point plus the ordered list of
// parameters the entry point expects. The signature is what argument binding
// is checked against before anything reaches the backend.
//
// PLACEHOLDERS
// ────────────
// Sources may contain `{{NAME}}` tokens. Compile options substitute them
// before the backend sees the text. `WG_X` and `WG_Y` are reserved: the
// backend fills them from the local extent of each dispatch, because naga
// does not accept `override` expressions inside `@workgroup_size`.
// Anything still in braces after substitution is a compile error.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::gpu::buffer::{Access, ElementKind};

/// Placeholders owned by the backend.
pub const RESERVED_DEFINES: [&str; 2] = ["WG_X", "WG_Y"];

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Type of a by-value kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    U32,
    I32,
    F32,
    /// Pair of `i32`, WGSL `vec2<i32>`.
    Int2,
}

impl ScalarKind {
    /// (size, alignment) in bytes under WGSL uniform layout rules.
    pub fn layout(self) -> (usize, usize) {
        match self {
            ScalarKind::U32 | ScalarKind::I32 | ScalarKind::F32 => (4, 4),
            ScalarKind::Int2 => (8, 8),
        }
    }
}

/// One declared kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Buffer {
        name: String,
        element: ElementKind,
        access: Access,
    },
    Scalar {
        name: String,
        kind: ScalarKind,
    },
}

impl Param {
    pub fn buffer(name: impl Into<String>, element: ElementKind, access: Access) -> Self {
        Param::Buffer { name: name.into(), element, access }
    }

    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Param::Scalar { name: name.into(), kind }
    }

    pub fn name(&self) -> &str {
        match self {
            Param::Buffer { name, .. } | Param::Scalar { name, .. } => name,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Buffer { name, element, access } => {
                write!(f, "{name}: buffer<{element:?}, {access:?}>")
            }
            Param::Scalar { name, kind } => write!(f, "{name}: {kind:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Compile options
// ---------------------------------------------------------------------------

/// `{{KEY}}` → value substitutions applied before compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    defines: BTreeMap<String, String>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one define.
    pub fn define(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.defines.insert(key.into(), value.to_string());
        self
    }

    /// Parse `KEY=VALUE` strings, as given on a command line.
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let mut opts = Self::new();
        for item in items {
            let item = item.as_ref();
            let (k, v) = item
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("define `{item}` is not KEY=VALUE")))?;
            opts = opts.define(k.trim(), v.trim());
        }
        Ok(opts)
    }

    /// Merge `other` over `self`; `other` wins on conflicts.
    pub fn merged(mut self, other: &CompileOptions) -> Self {
        for (k, v) in &other.defines {
            self.defines.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.defines.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<BTreeMap<String, String>> for CompileOptions {
    fn from(defines: BTreeMap<String, String>) -> Self {
        CompileOptions { defines }
    }
}

// ---------------------------------------------------------------------------
// KernelSource
// ---------------------------------------------------------------------------

/// Kernel text, entry point and parameter signature.
#[derive(Debug, Clone)]
pub struct KernelSource {
    label: String,
    text: Cow<'static, str>,
    entry_point: String,
    signature: Vec<Param>,
}

impl KernelSource {
    pub fn new(
        label: impl Into<String>,
        text: impl Into<Cow<'static, str>>,
        entry_point: impl Into<String>,
        signature: Vec<Param>,
    ) -> Self {
        KernelSource {
            label: label.into(),
            text: text.into(),
            entry_point: entry_point.into(),
            signature,
        }
    }

    /// Read kernel text from a file.
    pub fn from_file(
        path: impl AsRef<Path>,
        entry_point: impl Into<String>,
        signature: Vec<Param>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(path.display().to_string(), text, entry_point, signature))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn signature(&self) -> &[Param] {
        &self.signature
    }

    /// Substitute user defines, then the backend's reserved ones, and reject
    /// any placeholder left over.
    pub fn prepare(&self, options: &CompileOptions, reserved: &[(&str, String)]) -> Result<String> {
        let mut text = self.text.to_string();
        for (key, value) in options.iter() {
            if RESERVED_DEFINES.contains(&key) {
                return Err(self.compile_error(format!(
                    "define `{key}` is reserved for the work-group size"
                )));
            }
            text = text.replace(&format!("{{{{{key}}}}}"), value);
        }
        for (key, value) in reserved {
            text = text.replace(&format!("{{{{{key}}}}}"), value);
        }
        if let Some(start) = text.find("{{") {
            let rest = &text[start + 2..];
            let name = rest.split("}}").next().unwrap_or(rest);
            let line = text[..start].matches('\n').count() + 1;
            return Err(self.compile_error(format!(
                "{}:{line}: unresolved placeholder `{{{{{name}}}}}`; pass it as a define",
                self.label
            )));
        }
        Ok(text)
    }

    /// Build a `CompileError` for this kernel.
    pub fn compile_error(&self, log: impl Into<String>) -> Error {
        Error::Compile {
            entry: self.entry_point.clone(),
            log: log.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in kernels
// ---------------------------------------------------------------------------

/// Elementwise `c[i] = a[i] + b[i]` over `f32`.
pub fn add_arrays() -> KernelSource {
    KernelSource::new(
        "add_arrays.wgsl",
        include_str!("shaders/add_arrays.wgsl"),
        "add_arrays",
        vec![
            Param::buffer("a", ElementKind::F32, Access::ReadOnly),
            Param::buffer("b", ElementKind::F32, Access::ReadOnly),
            Param::buffer("c", ElementKind::F32, Access::ReadWrite),
        ],
    )
}

/// Packed-RGB convolution. Requires the `EDGE_POLICY` define.
pub fn blur() -> KernelSource {
    KernelSource::new(
        "blur.wgsl",
        include_str!("shaders/blur.wgsl"),
        "blur",
        vec![
            Param::buffer("input", ElementKind::U32, Access::ReadOnly),
            Param::buffer("weights", ElementKind::F32, Access::ReadOnly),
            Param::buffer("output", ElementKind::U32, Access::WriteOnly),
            Param::scalar("image_size", ScalarKind::Int2),
            Param::scalar("kernel_size", ScalarKind::Int2),
            Param::scalar("kernel_origin", ScalarKind::Int2),
        ],
    )
}
