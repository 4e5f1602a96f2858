//! Shared-immutable tensor handle.
//!
//! The engine transports tensors between stages but never looks inside
//! them. Once a tensor is enqueued its payload is logically frozen: fan-out
//! to multiple downstream inputs shares the same `Arc` allocation instead
//! of copying, and no stage may mutate a tensor it does not own.

use std::sync::Arc;

/// An n-dimensional array of `f32` values with a cheaply clonable,
/// shared-immutable payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Arc<[f32]>,
}

impl Tensor {
    /// Create a tensor from a shape and flat data buffer.
    /// Returns `None` if the buffer length does not match the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Option<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return None;
        }
        Some(Self {
            shape,
            data: data.into(),
        })
    }

    /// Create a rank-1 tensor from a flat vector.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data: data.into(),
        }
    }

    /// Create a rank-0 (scalar) tensor.
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            data: Arc::from([value]),
        }
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len: usize = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len.max(1)].into(),
        }
    }

    /// The tensor's shape. Empty for scalars.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat view of the payload.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Whether `other` shares this tensor's payload allocation.
    pub fn shares_data(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
