use std::fmt;

use crate::error::{ComputeError, ComputeResult};

/// Element type of a tensor, also used as the shader precision tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    #[default]
    F32,
    F16,
    U32,
    I32,
}

impl DType {
    /// Width of one element in bytes.
    pub fn size_of(&self) -> usize {
        match self {
            DType::F32 | DType::U32 | DType::I32 => 4,
            DType::F16 => 2,
        }
    }

    /// WGSL spelling, substituted for `{{precision}}`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::U32 => "u32",
            DType::I32 => "i32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host element types that can be copied to and from tensors.
pub trait GpuDType: bytemuck::Pod {
    const DTYPE: DType;
}

impl GpuDType for f32 {
    const DTYPE: DType = DType::F32;
}
impl GpuDType for u32 {
    const DTYPE: DType = DType::U32;
}
impl GpuDType for i32 {
    const DTYPE: DType = DType::I32;
}

/// Rejects host data whose element type differs from the tensor's.
pub(crate) fn check_host_dtype<T: GpuDType>(tensor: DType) -> ComputeResult<()> {
    if T::DTYPE != tensor {
        return Err(ComputeError::DTypeMismatch {
            host: T::DTYPE,
            tensor,
        });
    }
    Ok(())
}
