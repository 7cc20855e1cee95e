// error.rs: Error taxonomy shared by every layer of the crate.
//
// Nothing here is retried. Each layer returns the specific kind with the
// backend's diagnostic text attached and the caller decides what to do.

use std::path::PathBuf;

/// Errors from device discovery, compilation, transfer, dispatch and image I/O.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No platform/device at the requested indices, or the driver refused
    /// to create a context/queue for it.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Kernel source rejected by the backend. `log` is the backend's
    /// diagnostic output, unmodified.
    #[error("failed to compile kernel `{entry}`:\n{log}")]
    Compile { entry: String, log: String },

    /// Wrong argument count, order, kind, element type or access mode.
    #[error("argument binding: {0}")]
    ArgumentBinding(String),

    /// Enqueue or execution failure reported by the backend.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// Buffer allocation, write or read failure.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Input image could not be read or decoded.
    #[error("cannot decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },

    /// Output image could not be encoded or written.
    #[error("cannot write image {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },

    /// Kernel source file could not be read.
    #[error("cannot read kernel source {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or unreadable configuration.
    #[error("configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
