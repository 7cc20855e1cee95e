// array_add.rs: Elementwise addition of two f32 arrays on a device.

use crate::error::{Error, Result};
use crate::gpu::{Access, Backend, DeviceBuffer, Session, TransferMode};
use crate::kernels::{self, CompileOptions};
use crate::partition::WorkPartition;

/// `c[i] = a[i] + b[i]`, computed by the `add_arrays` kernel.
///
/// Inputs are bound with `mode`; the output is a read-write device buffer.
/// The partition is 1-D with a local extent of one work-item.
pub fn add_arrays<B: Backend>(
    session: &Session<'_, B>,
    a: &[f32],
    b: &[f32],
    mode: TransferMode,
) -> Result<Vec<f32>> {
    if a.len() != b.len() {
        return Err(Error::ArgumentBinding(format!(
            "input lengths differ: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new())?;
    let a_buf = DeviceBuffer::with_mode(session, a, Access::ReadOnly, mode)?;
    let b_buf = DeviceBuffer::with_mode(session, b, Access::ReadOnly, mode)?;
    let c_buf = session.alloc::<f32>(a.len(), Access::ReadWrite)?;

    program.run(
        &[a_buf.arg(), b_buf.arg(), c_buf.arg()],
        &WorkPartition::linear(a.len()),
    )?;
    c_buf.to_vec()
}

/// Index and value of the first element that is not `a[i] + b[i]`.
pub fn first_mismatch(a: &[f32], b: &[f32], c: &[f32]) -> Option<(usize, f32)> {
    a.iter()
        .zip(b)
        .zip(c)
        .position(|((x, y), z)| x + y != *z)
        .map(|i| (i, c[i]))
}
