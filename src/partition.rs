// partition.rs: Work-partition grid for N-D kernel dispatch.
//
// A dispatch covers a problem of natural extent E with work-groups of local
// extent L. The global extent is E rounded UP to the next multiple of L in
// each dimension, so every element gets a work-item and no work-group is
// partial:
//
//   E = 10, L = 3  →  global = 12   (items 10 and 11 are surplus)
//   E =  9, L = 3  →  global =  9
//
// The surplus work-items still execute. Kernels must guard their global id
// against the true extent before touching memory:
//
//   if gid >= arrayLength(&c) { return; }
//
// Extents are at most two-dimensional: the array-add kernel is 1-D and the
// blur kernel is 2-D. That covers every kernel this crate dispatches.

use std::fmt;

use crate::error::{Error, Result};

/// Round `extent` up to the next multiple of `local`.
///
/// Returns `extent` unchanged when it is already a multiple.
///
/// # Examples
/// ```
/// use gpu_dispatch::partition::round_up;
/// assert_eq!(round_up(10, 3), 12);
/// assert_eq!(round_up(9, 3), 9);
/// assert_eq!(round_up(1, 4), 4);
/// ```
///
/// # Panics
/// Panics if `local == 0`.
#[inline]
pub fn round_up(extent: usize, local: usize) -> usize {
    assert!(local > 0, "local extent must be positive");
    let r = extent % local;
    if r == 0 {
        extent
    } else {
        extent + (local - r)
    }
}

/// A 1-D or 2-D extent. Unused dimensions are 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    dims: [usize; 2],
    rank: usize,
}

impl Extent {
    pub fn d1(x: usize) -> Self {
        Extent { dims: [x, 1], rank: 1 }
    }

    pub fn d2(x: usize, y: usize) -> Self {
        Extent { dims: [x, y], rank: 2 }
    }

    /// Number of meaningful dimensions (1 or 2).
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn x(&self) -> usize {
        self.dims[0]
    }

    #[inline]
    pub fn y(&self) -> usize {
        self.dims[1]
    }

    /// Extent along dimension `i` (0 or 1). Dimensions past the rank are 1.
    #[inline]
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Total number of work-items covered.
    pub fn len(&self) -> usize {
        self.dims[0] * self.dims[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank {
            1 => write!(f, "{}", self.dims[0]),
            _ => write!(f, "{}×{}", self.dims[0], self.dims[1]),
        }
    }
}

/// The grid for one dispatch: true problem extent, local group extent and
/// the rounded-up global extent.
///
/// Invariant: `global.dim(i) % local.dim(i) == 0` and
/// `problem.dim(i) <= global.dim(i) < problem.dim(i) + local.dim(i)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPartition {
    problem: Extent,
    local: Extent,
    global: Extent,
}

impl WorkPartition {
    /// Partition `problem` into groups of `local`.
    ///
    /// Returns `Err(Error::Dispatch)` if the ranks differ or any local
    /// dimension is zero.
    pub fn new(problem: Extent, local: Extent) -> Result<Self> {
        if problem.rank() != local.rank() {
            return Err(Error::Dispatch(format!(
                "problem extent {problem} is {}-D but local extent {local} is {}-D",
                problem.rank(),
                local.rank()
            )));
        }
        if local.x() == 0 || local.y() == 0 {
            return Err(Error::Dispatch(format!(
                "local extent {local} has a zero dimension"
            )));
        }
        let gx = round_up(problem.x(), local.x());
        let gy = round_up(problem.y(), local.y());
        let global = match problem.rank() {
            1 => Extent::d1(gx),
            _ => Extent::d2(gx, gy),
        };
        Ok(WorkPartition { problem, local, global })
    }

    /// 1-D partition with one work-item per group, as used for array add.
    pub fn linear(len: usize) -> Self {
        WorkPartition {
            problem: Extent::d1(len),
            local: Extent::d1(1),
            global: Extent::d1(len),
        }
    }

    /// 2-D partition over an image whose local extent is the convolution
    /// kernel footprint.
    pub fn for_image(
        width: usize,
        height: usize,
        kernel_width: usize,
        kernel_height: usize,
    ) -> Result<Self> {
        Self::new(
            Extent::d2(width, height),
            Extent::d2(kernel_width, kernel_height),
        )
    }

    #[inline]
    pub fn problem(&self) -> Extent {
        self.problem
    }

    #[inline]
    pub fn local(&self) -> Extent {
        self.local
    }

    #[inline]
    pub fn global(&self) -> Extent {
        self.global
    }

    /// Number of work-groups along each dimension (`global / local`).
    pub fn groups(&self) -> [usize; 2] {
        [
            self.global.x() / self.local.x(),
            self.global.y() / self.local.y(),
        ]
    }

    /// Work-items beyond the problem extent that kernels must ignore.
    pub fn surplus(&self) -> usize {
        self.global.len() - self.problem.len()
    }
}

impl fmt::Display for WorkPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "problem {} → global {} in groups of {}",
            self.problem, self.global, self.local
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_examples() {
        assert_eq!(round_up(10, 3), 12);
        assert_eq!(round_up(9, 3), 9);
        assert_eq!(round_up(1, 4), 4);
        assert_eq!(round_up(0, 7), 0);
    }

    #[test]
    #[should_panic(expected = "positive")]
    fn test_round_up_zero_local_panics() {
        round_up(5, 0);
    }

    #[test]
    fn test_image_partition_rounds_each_dimension() {
        // 752×480 image, 7×7 blur: 752 = 107*7 + 3, 480 = 68*7 + 4.
        let p = WorkPartition::for_image(752, 480, 7, 7).unwrap();
        assert_eq!(p.global(), Extent::d2(756, 483));
        assert_eq!(p.groups(), [108, 69]);
        assert_eq!(p.surplus(), 756 * 483 - 752 * 480);
    }

    #[test]
    fn test_linear_partition_has_no_surplus() {
        let p = WorkPartition::linear(10_000_000);
        assert_eq!(p.global(), Extent::d1(10_000_000));
        assert_eq!(p.local(), Extent::d1(1));
        assert_eq!(p.surplus(), 0);
    }

    #[test]
    fn test_rank_mismatch_rejected() {
        let err = WorkPartition::new(Extent::d1(10), Extent::d2(2, 2)).unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)));
    }

    #[test]
    fn test_zero_local_rejected() {
        let err = WorkPartition::new(Extent::d2(10, 10), Extent::d2(3, 0)).unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)));
    }

    #[test]
    fn test_display() {
        let p = WorkPartition::for_image(10, 9, 3, 3).unwrap();
        assert_eq!(p.to_string(), "problem 10×9 → global 12×9 in groups of 3×3");
    }
}
