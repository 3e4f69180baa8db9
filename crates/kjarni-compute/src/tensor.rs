use std::fmt;

use wgpu::BufferUsages;

use crate::arena::Index;
use crate::dtype::DType;
use crate::shape::Shape;

/// Identifies a tensor inside the pool that allocated it.
///
/// Carries the owning pool's id and the arena generation, so a tensor used
/// after `free` or with a different pool is detected instead of aliasing a
/// recycled buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId {
    pub(crate) pool: u32,
    pub(crate) index: Index,
}

impl TensorId {
    pub fn pool(&self) -> u32 {
        self.pool
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{}.{}@pool{}",
            self.index.slot, self.index.generation, self.pool
        )
    }
}

impl fmt::Debug for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Caller-side handle to a pooled device buffer plus its shape.
///
/// Cheap to copy. The buffer itself stays in the `TensorPool`; look it up with
/// `TensorPool::buffer`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tensor {
    id: TensorId,
    shape: Shape,
    dtype: DType,
    size: u64,
    usage: BufferUsages,
}

impl Tensor {
    pub(crate) fn new(
        id: TensorId,
        shape: Shape,
        dtype: DType,
        size: u64,
        usage: BufferUsages,
    ) -> Self {
        Self {
            id,
            shape,
            dtype,
            size,
            usage,
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }
    pub fn shape(&self) -> &Shape {
        &self.shape
    }
    pub fn dtype(&self) -> DType {
        self.dtype
    }
    pub fn usage(&self) -> BufferUsages {
        self.usage
    }
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }
    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }
    /// Exact byte size: element count times element width.
    pub fn size_in_bytes(&self) -> u64 {
        self.size
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
