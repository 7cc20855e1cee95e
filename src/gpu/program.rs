// gpu/program.rs: A kernel compiled for one session's device.

use std::fmt;

use crate::error::Result;
use crate::gpu::backend::Backend;
use crate::gpu::dispatch::{self, Arg};
use crate::gpu::session::Session;
use crate::kernels::{CompileOptions, KernelSource, Param};
use crate::partition::WorkPartition;

/// Compiled kernel plus the signature its arguments are checked against.
/// Released when dropped.
pub struct Program<'s, B: Backend> {
    session: &'s Session<'s, B>,
    handle: Option<B::Program>,
    entry_point: String,
    signature: Vec<Param>,
}

impl<'s, B: Backend> Program<'s, B> {
    /// Compile `source` for `session`'s device.
    ///
    /// # Errors
    /// `Error::Compile` with the backend's diagnostic log.
    pub fn compile(
        session: &'s Session<'s, B>,
        source: &KernelSource,
        options: &CompileOptions,
    ) -> Result<Self> {
        let handle = session.backend().build_program(session.device(), source, options)?;
        log::debug!(
            "compiled `{}` from {} ({} define(s))",
            source.entry_point(),
            source.label(),
            options.iter().count()
        );
        Ok(Program {
            session,
            handle: Some(handle),
            entry_point: source.entry_point().to_string(),
            signature: source.signature().to_vec(),
        })
    }

    /// Bind `args` and dispatch over `partition`, blocking until done.
    pub fn run(&self, args: &[Arg<'_, B>], partition: &WorkPartition) -> Result<()> {
        dispatch::run(self, args, partition)
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn signature(&self) -> &[Param] {
        &self.signature
    }

    pub fn session(&self) -> &'s Session<'s, B> {
        self.session
    }

    pub(crate) fn handle(&self) -> &B::Program {
        self.handle.as_ref().expect("program present until drop")
    }
}

impl<B: Backend> Drop for Program<'_, B> {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            self.session.backend().release_program(self.session.device(), h);
        }
    }
}

impl<B: Backend> fmt::Debug for Program<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("entry_point", &self.entry_point)
            .field("signature", &self.signature)
            .field("session", &self.session.id())
            .finish()
    }
}
