use std::fmt;

use crate::error::{ComputeError, ComputeResult};

/// Fixed-capacity list of tensor dimensions.
///
/// Dimensions live inline, so shapes are `Copy` and never allocate. Only the
/// first `rank` entries are meaningful; the rest stay zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: [usize; Shape::MAX_RANK],
    rank: usize,
}

impl Shape {
    /// Maximum rank of a tensor.
    pub const MAX_RANK: usize = 8;

    /// Creates a shape from a dimension list.
    pub fn new(dims: &[usize]) -> ComputeResult<Self> {
        if dims.len() > Self::MAX_RANK {
            return Err(ComputeError::RankExceeded {
                rank: dims.len(),
                max: Self::MAX_RANK,
            });
        }
        let mut data = [0; Self::MAX_RANK];
        data[..dims.len()].copy_from_slice(dims);
        Ok(Self {
            dims: data,
            rank: dims.len(),
        })
    }

    /// Rank-3 shape, used for workgroup sizes and thread counts.
    pub const fn xyz(x: usize, y: usize, z: usize) -> Self {
        Self {
            dims: [x, y, z, 0, 0, 0, 0, 0],
            rank: 3,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.rank]
    }

    /// Number of elements. Any zero dimension gives 0; rank 0 gives 1.
    ///
    /// Saturates at `usize::MAX`; use `try_num_elements` where overflow matters.
    pub fn num_elements(&self) -> usize {
        self.try_num_elements().unwrap_or(usize::MAX)
    }

    /// Number of elements, or `None` if the product overflows `usize`.
    pub fn try_num_elements(&self) -> Option<usize> {
        self.dims()
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Returns the dimension at `axis`, or `None` past the rank.
    pub fn get(&self, axis: usize) -> Option<usize> {
        self.dims().get(axis).copied()
    }

    /// Returns the three axes of a rank-3 shape.
    pub fn as_xyz(&self) -> Option<[usize; 3]> {
        match self.dims() {
            [x, y, z] => Some([*x, *y, *z]),
            _ => None,
        }
    }
}

impl std::ops::Index<usize> for Shape {
    type Output = usize;

    fn index(&self, axis: usize) -> &usize {
        &self.dims()[axis]
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = ComputeError;

    fn try_from(dims: &[usize]) -> ComputeResult<Self> {
        Self::new(dims)
    }
}

impl<const N: usize> TryFrom<[usize; N]> for Shape {
    type Error = ComputeError;

    fn try_from(dims: [usize; N]) -> ComputeResult<Self> {
        Self::new(&dims)
    }
}

/// Renders as a bare comma-separated list (`256, 1, 1`) so the text can be
/// dropped straight into shader source.
impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, dim) in self.dims().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", dim)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.dims()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_elements_is_product() {
        let shape = Shape::new(&[2, 3, 4]).unwrap();
        assert_eq!(shape.num_elements(), 24);
        assert_eq!(shape.rank(), 3);
    }

    #[test]
    fn test_zero_dimension_has_no_elements() {
        let shape = Shape::new(&[5, 0, 7]).unwrap();
        assert_eq!(shape.num_elements(), 0);
    }

    #[test]
    fn test_full_rank_shape() {
        let shape = Shape::new(&[2; 8]).unwrap();
        assert_eq!(shape.rank(), Shape::MAX_RANK);
        assert_eq!(shape.num_elements(), 256);
    }

    #[test]
    fn test_element_count_overflow() {
        let shape = Shape::new(&[1 << 62, 4]).unwrap();
        assert_eq!(shape.try_num_elements(), None);
        assert_eq!(shape.num_elements(), usize::MAX);

        let threads = Shape::xyz(usize::MAX, 2, 1);
        assert_eq!(threads.try_num_elements(), None);

        // A zero axis wins even when the other axes would overflow.
        let empty = Shape::new(&[0, usize::MAX, usize::MAX]).unwrap();
        assert_eq!(empty.try_num_elements(), Some(0));
    }

    #[test]
    fn test_rank_over_limit_is_rejected() {
        let err = Shape::new(&[1; 9]).unwrap_err();
        assert!(matches!(err, ComputeError::RankExceeded { rank: 9, max: 8 }));
    }

    #[test]
    fn test_scalar_shape() {
        let shape = Shape::new(&[]).unwrap();
        assert_eq!(shape.rank(), 0);
        assert_eq!(shape.num_elements(), 1);
        assert_eq!(shape.to_string(), "");
    }

    #[test]
    fn test_display_has_no_brackets() {
        assert_eq!(Shape::xyz(256, 1, 1).to_string(), "256, 1, 1");
        assert_eq!(Shape::new(&[7]).unwrap().to_string(), "7");
    }

    #[test]
    fn test_inactive_dims_do_not_affect_equality() {
        let a = Shape::new(&[4, 4]).unwrap();
        let b = Shape::try_from([4usize, 4]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get(2), None);
        assert_eq!(a[1], 4);
    }

    #[test]
    fn test_as_xyz() {
        assert_eq!(Shape::xyz(8, 4, 2).as_xyz(), Some([8, 4, 2]));
        assert_eq!(Shape::new(&[8, 4]).unwrap().as_xyz(), None);
    }
}
