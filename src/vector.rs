//! The vector representations a batch manager knows how to reduce.

use std::ops::{Deref, DerefMut};

use ndarray::Array1;

/// A value with a length.
pub trait Vector {
    /// Returns the amount of elements of the vector.
    fn dimension(&self) -> usize;
}

/// A vector whose elements live in one contiguous buffer.
pub trait Contiguous: Vector {
    /// Returns the elements in logical order, `None` if they aren't stored contiguously.
    fn storage(&self) -> Option<&[f32]>;

    /// Returns the elements in logical order, `None` if they aren't stored contiguously.
    fn storage_mut(&mut self) -> Option<&mut [f32]>;
}

/// A dense, heap allocated vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseVector {
    values: Vec<f32>,
}

impl DenseVector {
    /// Creates a new `DenseVector`.
    ///
    /// # Arguments
    /// * `values` - The elements of the vector.
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Creates a new `DenseVector` of `dim` zeros.
    pub fn zeros(dim: usize) -> Self {
        Self::new(vec![0.; dim])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.values
    }
}

impl From<Vec<f32>> for DenseVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

impl Deref for DenseVector {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl DerefMut for DenseVector {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.values
    }
}

impl Vector for DenseVector {
    fn dimension(&self) -> usize {
        self.values.len()
    }
}

impl Contiguous for DenseVector {
    fn storage(&self) -> Option<&[f32]> {
        Some(self.values.as_slice())
    }

    fn storage_mut(&mut self) -> Option<&mut [f32]> {
        Some(self.values.as_mut_slice())
    }
}

impl Vector for Vec<f32> {
    fn dimension(&self) -> usize {
        self.len()
    }
}

impl Contiguous for Vec<f32> {
    fn storage(&self) -> Option<&[f32]> {
        Some(self.as_slice())
    }

    fn storage_mut(&mut self) -> Option<&mut [f32]> {
        Some(self.as_mut_slice())
    }
}

impl Vector for Array1<f32> {
    fn dimension(&self) -> usize {
        self.len()
    }
}

impl Contiguous for Array1<f32> {
    fn storage(&self) -> Option<&[f32]> {
        self.as_slice()
    }

    fn storage_mut(&mut self) -> Option<&mut [f32]> {
        self.as_slice_mut()
    }
}

/// A vector split in an ordered list of blocks.
///
/// Its dimension is the sum of the dimensions of its blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedVector<V> {
    blocks: Vec<V>,
}

impl<V: Vector> PartitionedVector<V> {
    /// Creates a new `PartitionedVector`.
    ///
    /// # Arguments
    /// * `blocks` - The blocks of the vector, in order.
    pub fn new(blocks: Vec<V>) -> Self {
        Self { blocks }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, i: usize) -> Option<&V> {
        self.blocks.get(i)
    }

    pub fn blocks(&self) -> &[V] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [V] {
        &mut self.blocks
    }

    pub fn into_blocks(self) -> Vec<V> {
        self.blocks
    }
}

impl<V: Vector> From<Vec<V>> for PartitionedVector<V> {
    fn from(blocks: Vec<V>) -> Self {
        Self::new(blocks)
    }
}

impl<V: Vector> Vector for PartitionedVector<V> {
    fn dimension(&self) -> usize {
        self.blocks.iter().map(Vector::dimension).sum()
    }
}
