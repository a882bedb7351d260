use crate::error::{Result, TensorError};
use std::fmt;

/// Maximum tensor rank accepted by the graph engine.
pub const MAX_DIMS: usize = 4;

/// A tensor shape, wrapping a vector of dimension sizes (outermost first).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape from a vector of dimensions.
    ///
    /// # Panics
    /// Panics if more than `MAX_DIMS` dimensions are given.
    pub fn new(dims: Vec<usize>) -> Self {
        assert!(
            dims.len() <= MAX_DIMS,
            "shape {:?} has more than {} dimensions",
            dims,
            MAX_DIMS
        );
        Shape { dims }
    }

    /// Fallible variant of [`Shape::new`].
    pub fn try_new(dims: Vec<usize>) -> Result<Self> {
        if dims.len() > MAX_DIMS {
            return Err(TensorError::TooManyDims(dims.len()));
        }
        Ok(Shape { dims })
    }

    /// Create a shape from a slice of dimensions.
    pub fn from_slice(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the size of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Returns a reference to the underlying dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Length of the innermost (fastest varying) dimension.
    ///
    /// This is the "leading dimension" in the graph engine's terms; for a
    /// matmul output it is the number of output features.
    pub fn cols(&self) -> usize {
        self.dims.last().copied().unwrap_or(1)
    }

    /// Number of rows, i.e. the product of every dimension but the innermost.
    pub fn rows(&self) -> usize {
        match self.dims.split_last() {
            Some((_, outer)) => outer.iter().product(),
            None => 1,
        }
    }

    /// True when every dimension outside the innermost two is 1, so the
    /// tensor can be treated as a plain `[rows, cols]` matrix.
    pub fn is_matrix(&self) -> bool {
        let outer = self.dims.len().saturating_sub(2);
        self.dims[..outer].iter().all(|&d| d == 1)
    }

    /// Computes row-major contiguous strides for this shape.
    ///
    /// For a shape [d0, d1, d2], the strides are [d1*d2, d2, 1].
    pub fn strides(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            return vec![];
        }
        let mut strides = vec![0usize; self.dims.len()];
        strides[self.dims.len() - 1] = 1;
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Checks if the given strides correspond to a contiguous (row-major) layout
    /// for this shape.
    pub fn is_contiguous(&self, strides: &[usize]) -> bool {
        if strides.len() != self.dims.len() {
            return false;
        }
        let expected = self.strides();
        strides == expected.as_slice()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_slice(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_shape() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.dim(0), 2);
        assert_eq!(s.dim(2), 4);
        assert_eq!(s.to_string(), "[2, 3, 4]");
    }

    #[test]
    fn test_strides() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.strides(), vec![12, 4, 1]);
    }

    #[test]
    fn test_is_contiguous() {
        let s = Shape::new(vec![2, 3, 4]);
        assert!(s.is_contiguous(&[12, 4, 1]));
        assert!(!s.is_contiguous(&[12, 1, 4]));
        assert!(!s.is_contiguous(&[4, 1]));
    }

    #[test]
    fn test_scalar_shape() {
        let s = Shape::new(vec![]);
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1); // product of empty = 1
        assert_eq!(s.rows(), 1);
        assert_eq!(s.cols(), 1);
        assert!(s.is_matrix());
    }

    #[test]
    fn test_rows_cols() {
        let s = Shape::new(vec![1, 1, 8, 64]);
        assert_eq!(s.rows(), 8);
        assert_eq!(s.cols(), 64);
        assert!(s.is_matrix());

        let batched = Shape::new(vec![2, 8, 64]);
        assert_eq!(batched.rows(), 16);
        assert!(!batched.is_matrix());
    }

    #[test]
    fn test_rank_limit() {
        assert!(Shape::try_new(vec![1, 1, 1, 1]).is_ok());
        assert!(matches!(
            Shape::try_new(vec![1, 1, 1, 1, 1]),
            Err(TensorError::TooManyDims(5))
        ));
    }

    #[test]
    #[should_panic]
    fn test_new_rank_limit_panics() {
        let _s = Shape::new(vec![1, 2, 3, 4, 5]);
    }
}
