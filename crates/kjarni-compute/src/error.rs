//! Error types for kjarni-compute.

use std::time::Duration;
use thiserror::Error;

use crate::dtype::DType;
use crate::kernel_pool::KernelId;
use crate::tensor::TensorId;

/// Errors that can occur while driving the compute runtime.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// No adapter matched the requested options.
    #[error("Failed to acquire a WebGPU adapter: {0}")]
    AdapterRequest(#[from] wgpu::RequestAdapterError),

    /// The adapter refused to create a device.
    #[error("Failed to acquire a WebGPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// A shape was declared with more dimensions than `Shape::MAX_RANK`.
    #[error("Shape rank {rank} exceeds the maximum rank of {max}")]
    RankExceeded { rank: usize, max: usize },

    /// Kernel thread counts must be given as an (x, y, z) shape.
    #[error("Thread-count shape must have rank 3, got rank {rank}")]
    InvalidThreadShape { rank: usize },

    /// Shader workgroup sizes must be rank 3 with no zero axis.
    #[error("Invalid workgroup shape [{shape}]: expected rank 3 with non-zero axes")]
    InvalidWorkgroupShape { shape: String },

    /// Element count or byte size does not fit, or exceeds the device buffer limit.
    #[error("Tensor of shape [{shape}] and dtype {dtype} is too large (device limit: {max} bytes)")]
    TensorTooLarge { shape: String, dtype: DType, max: u64 },

    /// Host element type does not match the tensor's dtype.
    #[error("Host data of type {host} does not match tensor dtype {tensor}")]
    DTypeMismatch { host: DType, tensor: DType },

    /// The buffer lacks a usage flag the operation needs.
    #[error("Buffer usage {actual:?} is missing {required:?} needed for {operation}")]
    MissingUsage {
        operation: &'static str,
        required: wgpu::BufferUsages,
        actual: wgpu::BufferUsages,
    },

    /// The id refers to a freed slot, or to a tensor that was never in this pool.
    #[error("Tensor {0} is not live in this pool (freed or never allocated)")]
    StaleTensor(TensorId),

    /// The tensor was allocated by a different pool.
    #[error("Tensor {id} belongs to pool {owner}, not pool {pool}")]
    ForeignTensor { id: TensorId, owner: u32, pool: u32 },

    /// The kernel id refers to a removed kernel.
    #[error("Kernel {0} is not live in this pool")]
    StaleKernel(KernelId),

    /// The kernel's command buffer was consumed by an earlier submission.
    #[error("Kernel {0} has no recorded command buffer; reset it before dispatching again")]
    CommandBufferConsumed(KernelId),

    /// Compute pipeline compilation raised a validation error.
    #[error("Failed to create compute pipeline '{label}': {message}")]
    PipelineCreation { label: String, message: String },

    /// Bind group or bind group layout creation raised a validation error.
    #[error("Failed to create bind group '{label}': {message}")]
    BindGroupCreation { label: String, message: String },

    /// A transfer did not fit the tensor or violated copy alignment.
    #[error("Invalid transfer of {requested} bytes for a buffer of {available} bytes: {reason}")]
    TransferSize {
        requested: u64,
        available: u64,
        reason: &'static str,
    },

    /// Mapping the staging buffer failed.
    #[error("Failed to map staging buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    /// Pumping device events failed.
    #[error("Device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    /// The sending side of a completion signal went away without resolving it.
    #[error("Completion signal for '{operation}' was dropped before it resolved")]
    SignalDropped { operation: String },

    /// The wait deadline expired.
    #[error("GPU operation '{operation}' timed out after {:.2}s (limit: {:.2}s)", .elapsed.as_secs_f64(), .timeout.as_secs_f64())]
    Timeout {
        operation: String,
        elapsed: Duration,
        timeout: Duration,
    },

    /// The wait was abandoned through its cancellation token.
    #[error("Wait for '{operation}' was cancelled")]
    Cancelled { operation: String },
}

/// Result type for kjarni-compute operations.
pub type ComputeResult<T> = Result<T, ComputeError>;
