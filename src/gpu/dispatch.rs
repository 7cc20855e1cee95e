// gpu/dispatch.rs: Argument binding and kernel dispatch.
//
// Arguments are positional and must match the program's signature exactly:
// same count, same order, same kind. A buffer argument must additionally
// have the declared element type, an access mode at least as permissive as
// the kernel needs, and belong to the same session as the program.
//
// Every mismatch is an `ArgumentBinding` error raised here, before anything
// is submitted to the device. The backend only ever sees validated
// `BoundArg`s.

use std::fmt;

use crate::error::{Error, Result};
use crate::gpu::backend::{Backend, BoundArg};
use crate::gpu::buffer::{Access, ElementKind};
use crate::gpu::program::Program;
use crate::kernels::{Param, ScalarKind};
use crate::partition::WorkPartition;

/// A by-value kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    U32(u32),
    I32(i32),
    F32(f32),
    Int2([i32; 2]),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::U32(_) => ScalarKind::U32,
            Scalar::I32(_) => ScalarKind::I32,
            Scalar::F32(_) => ScalarKind::F32,
            Scalar::Int2(_) => ScalarKind::Int2,
        }
    }

    /// Little-endian bytes as laid out in a WGSL uniform.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Scalar::U32(v) => v.to_le_bytes().to_vec(),
            Scalar::I32(v) => v.to_le_bytes().to_vec(),
            Scalar::F32(v) => v.to_le_bytes().to_vec(),
            Scalar::Int2(v) => v.iter().flat_map(|c| c.to_le_bytes()).collect(),
        }
    }

    /// `Int2` from two usize values, as used for image and kernel extents.
    pub fn int2(x: usize, y: usize) -> Result<Self> {
        let cvt = |v: usize| {
            i32::try_from(v).map_err(|_| Error::ArgumentBinding(format!("{v} does not fit in i32")))
        };
        Ok(Scalar::Int2([cvt(x)?, cvt(y)?]))
    }
}

/// A borrowed view of a device buffer for binding.
pub struct BufferRef<'a, B: Backend> {
    pub handle: &'a B::Buffer,
    pub element: ElementKind,
    pub access: Access,
    pub len: usize,
    pub session_id: u64,
}

/// One positional kernel argument.
pub enum Arg<'a, B: Backend> {
    Buffer(BufferRef<'a, B>),
    Scalar(Scalar),
}

impl<B: Backend> From<Scalar> for Arg<'_, B> {
    fn from(s: Scalar) -> Self {
        Arg::Scalar(s)
    }
}

impl<B: Backend> fmt::Debug for Arg<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Buffer(b) => write!(
                f,
                "buffer<{:?}, {:?}>[{}] (session {})",
                b.element, b.access, b.len, b.session_id
            ),
            Arg::Scalar(s) => write!(f, "{s:?}"),
        }
    }
}

/// Check `args` against `signature` and produce what the backend binds.
pub fn bind_arguments<'a, B: Backend>(
    entry: &str,
    signature: &[Param],
    args: &[Arg<'a, B>],
    session_id: u64,
) -> Result<Vec<BoundArg<'a, B>>> {
    if args.len() != signature.len() {
        return Err(Error::ArgumentBinding(format!(
            "`{entry}` takes {} argument(s), {} given",
            signature.len(),
            args.len()
        )));
    }

    let mut bound = Vec::with_capacity(args.len());
    for (index, (param, arg)) in signature.iter().zip(args).enumerate() {
        let fail = |what: String| {
            Err(Error::ArgumentBinding(format!(
                "`{entry}` argument {index} ({param}): {what}"
            )))
        };
        match (param, arg) {
            (Param::Buffer { element, access, .. }, Arg::Buffer(buf)) => {
                if buf.session_id != session_id {
                    return fail("buffer belongs to a different session".into());
                }
                if buf.element != *element {
                    return fail(format!("buffer holds {:?}", buf.element));
                }
                if access.writable() && !buf.access.writable() {
                    return fail(format!("kernel writes but buffer is {:?}", buf.access));
                }
                // Read-only aliases are fine; a write must not alias anything.
                let aliased = bound.iter().any(|b: &BoundArg<'a, B>| match b {
                    BoundArg::Buffer { handle, access: earlier, .. } => {
                        std::ptr::eq(*handle, buf.handle) && (earlier.writable() || access.writable())
                    }
                    BoundArg::Scalar(_) => false,
                });
                if aliased {
                    return fail("buffer is already bound to an earlier argument and one binding writes".into());
                }
                bound.push(BoundArg::Buffer {
                    handle: buf.handle,
                    access: *access,
                    len: buf.len,
                });
            }
            (Param::Scalar { kind, .. }, Arg::Scalar(s)) => {
                if s.kind() != *kind {
                    return fail(format!("got {:?}", s.kind()));
                }
                bound.push(BoundArg::Scalar(*s));
            }
            (Param::Buffer { .. }, Arg::Scalar(s)) => {
                return fail(format!("expected a buffer, got scalar {s:?}"));
            }
            (Param::Scalar { .. }, Arg::Buffer(_)) => {
                return fail("expected a scalar, got a buffer".into());
            }
        }
    }
    Ok(bound)
}

/// Pack scalar arguments into one uniform block using WGSL layout rules.
/// The result is padded to a multiple of 16 bytes; empty when there are no
/// scalars.
pub fn pack_scalars<'a, I>(scalars: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Scalar>,
{
    let mut out = Vec::new();
    for s in scalars {
        let (_, align) = s.kind().layout();
        out.resize(out.len().next_multiple_of(align), 0);
        out.extend_from_slice(&s.to_bytes());
    }
    if !out.is_empty() {
        out.resize(out.len().next_multiple_of(16), 0);
    }
    out
}

/// Bind `args` to `program` and run it over `partition`, blocking until the
/// device has finished.
///
/// A partition whose problem extent is empty is a no-op.
pub fn run<B: Backend>(
    program: &Program<'_, B>,
    args: &[Arg<'_, B>],
    partition: &WorkPartition,
) -> Result<()> {
    let session = program.session();
    let bound = bind_arguments(
        program.entry_point(),
        program.signature(),
        args,
        session.id(),
    )?;
    if partition.problem().is_empty() {
        log::debug!("dispatch `{}`: empty problem, skipped", program.entry_point());
        return Ok(());
    }
    log::debug!("dispatch `{}`: {partition}", program.entry_point());
    session
        .backend()
        .enqueue(session.device(), program.handle(), &bound, partition)
}
