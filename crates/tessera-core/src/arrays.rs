//! Dense multi-dimensional arrays, used as the device-assignment grids of tiled partition schemes.

use thiserror::Error;

/// Error type for [`DenseArray`] construction.
#[derive(Error, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DenseArrayError {
    /// Error returned when the number of provided values does not match the product of the extents.
    #[error("extents {extents:?} require {expected} element(s), but got {actual}")]
    ElementCountMismatch { extents: Vec<usize>, expected: usize, actual: usize },
}

/// Dense N-dimensional array stored as a flat vector in row-major order.
///
/// A [`DenseArray`] with an empty extent list is a scalar holding exactly one value. Equality and
/// hashing compare the extents and the stored values, which makes the type usable as part of a
/// map or cache key.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DenseArray<T> {
    extents: Vec<usize>,
    values: Vec<T>,
}

impl<T: Copy> DenseArray<T> {
    /// Creates a dense array from per-axis extents and row-major values.
    pub fn new(extents: Vec<usize>, values: Vec<T>) -> Result<Self, DenseArrayError> {
        let expected = extents.iter().product::<usize>();
        if values.len() != expected {
            return Err(DenseArrayError::ElementCountMismatch { extents, expected, actual: values.len() });
        }
        Ok(Self { extents, values })
    }

    /// Creates a dense array with every element set to `value`.
    pub fn from_elem(extents: Vec<usize>, value: T) -> Self {
        let len = extents.iter().product::<usize>();
        Self { extents, values: vec![value; len] }
    }

    /// Number of axes of this array.
    #[inline]
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    /// Per-axis extents of this array.
    #[inline]
    pub fn extents(&self) -> &[usize] {
        self.extents.as_slice()
    }

    /// Extent of this array along `axis`.
    ///
    /// # Panics
    ///
    /// Panics if `axis >= self.rank()`.
    #[inline]
    pub fn extent(&self, axis: usize) -> usize {
        self.extents[axis]
    }

    /// Total number of elements in this array.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` iff this array holds no elements (i.e., some extent is zero).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flat row-major view of the stored values.
    #[inline]
    pub fn values(&self) -> &[T] {
        self.values.as_slice()
    }

    /// Returns the element at the multi-dimensional `index`, or `None` if the index has the wrong
    /// rank or is out of bounds along any axis.
    pub fn get(&self, index: &[usize]) -> Option<T> {
        self.linear_index(index).map(|linear| self.values[linear])
    }

    /// Returns the multi-dimensional coordinate of the first element equal to `value`, searching
    /// in row-major order.
    pub fn position_of(&self, value: T) -> Option<Vec<usize>>
    where
        T: PartialEq,
    {
        self.values.iter().position(|v| *v == value).map(|linear| self.coordinate_of(linear))
    }

    /// Returns `true` iff some element of this array equals `value`.
    pub fn contains(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        self.values.contains(&value)
    }

    fn linear_index(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.extents.len() {
            return None;
        }
        let mut linear = 0usize;
        for (coordinate, extent) in index.iter().zip(self.extents.iter()) {
            if coordinate >= extent {
                return None;
            }
            linear = linear * extent + coordinate;
        }
        Some(linear)
    }

    fn coordinate_of(&self, mut linear: usize) -> Vec<usize> {
        let mut coordinate = vec![0usize; self.extents.len()];
        for axis in (0..self.extents.len()).rev() {
            let extent = self.extents[axis];
            coordinate[axis] = linear % extent;
            linear /= extent;
        }
        coordinate
    }
}
