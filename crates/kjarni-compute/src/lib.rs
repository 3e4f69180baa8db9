//! Kjarni Compute: a small GPU compute runtime on top of wgpu.
//!
//! A [`ComputeContext`] owns the device plus two pools: tensors (device
//! buffers with a shape and element type) and kernels (compiled compute passes
//! bound to tensors). Work is submitted without blocking and completes through
//! one-shot signals that the caller waits on by pumping device events.
//!
//! ```no_run
//! use kjarni_compute::{create_shader, templates, ComputeContext, DType, Shape};
//!
//! # fn main() -> kjarni_compute::ComputeResult<()> {
//! let mut ctx = ComputeContext::new()?;
//! let input = ctx.create_tensor_with_data(Shape::new(&[4])?, DType::F32, &[0.1f32, 0.2, 0.3, 0.4])?;
//! let output = ctx.create_tensor(Shape::new(&[4])?, DType::F32)?;
//! let shader = create_shader(templates::GELU, Shape::xyz(256, 1, 1), DType::F32)?;
//! let kernel = ctx.create_kernel(&shader, &[input, output], Shape::xyz(4, 1, 1), None)?;
//! let mut done = ctx.dispatch(kernel)?;
//! ctx.wait(&mut done)?;
//! let result = ctx.read_f32(&output)?;
//! # Ok(())
//! # }
//! ```

mod arena;
pub mod config;
pub mod context;
mod dispatch;
pub mod dtype;
pub mod error;
pub mod kernel;
pub mod kernel_pool;
pub mod shader;
pub mod shape;
pub mod signal;
pub mod tensor;
pub mod tensor_pool;
mod transfer;
pub mod wait;

#[cfg(test)]
mod tests;

pub use config::ContextConfig;
pub use context::ComputeContext;
pub use dtype::{DType, GpuDType};
pub use error::{ComputeError, ComputeResult};
pub use kernel::{BindingKind, BindingPlan, BindingSlot, Kernel};
pub use kernel_pool::{KernelId, KernelPool};
pub use shader::{create_shader, substitute, templates, ShaderCode};
pub use shape::Shape;
pub use signal::{completion_signal, CompletionNotifier, CompletionSignal};
pub use tensor::{Tensor, TensorId};
pub use tensor_pool::TensorPool;
pub use wait::{CancelToken, WaitOptions};
