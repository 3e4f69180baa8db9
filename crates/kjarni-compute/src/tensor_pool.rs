use std::sync::atomic::{AtomicU32, Ordering};

use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use crate::arena::Arena;
use crate::dtype::{check_host_dtype, DType, GpuDType};
use crate::error::{ComputeError, ComputeResult};
use crate::shape::Shape;
use crate::tensor::{Tensor, TensorId};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(0);

/// Usage flags for tensors created without an explicit usage.
pub const DEFAULT_TENSOR_USAGE: BufferUsages = BufferUsages::STORAGE
    .union(BufferUsages::COPY_DST)
    .union(BufferUsages::COPY_SRC);

struct TensorEntry {
    buffer: Buffer,
    tensor: Tensor,
}

/// Owns the device buffers behind every `Tensor` it hands out.
///
/// Buffers are released by `free` or, for whatever is left, when the pool is
/// dropped. Freed ids stay invalid forever; reusing one is reported as
/// `ComputeError::StaleTensor` rather than touching another tensor's memory.
pub struct TensorPool {
    id: u32,
    device: wgpu::Device,
    queue: wgpu::Queue,
    log_target: String,
    entries: Arena<TensorEntry>,
    allocated_bytes: u64,
}

impl TensorPool {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, log_target: impl Into<String>) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            device,
            queue,
            log_target: log_target.into(),
            entries: Arena::new(),
            allocated_bytes: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Allocates a storage tensor with the default usage flags.
    pub fn create(&mut self, shape: Shape, dtype: DType) -> ComputeResult<Tensor> {
        self.create_with_usage(shape, dtype, DEFAULT_TENSOR_USAGE, "kjarni tensor")
    }

    /// Allocates a tensor of `dtype.size_of() * shape.num_elements()` bytes.
    pub fn create_with_usage(
        &mut self,
        shape: Shape,
        dtype: DType,
        usage: BufferUsages,
        label: &str,
    ) -> ComputeResult<Tensor> {
        let size = tensor_byte_size(shape, dtype, self.device.limits().max_buffer_size)?;
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some(label),
            // Allocation is rounded up so padded queue writes always fit.
            size: wgpu::util::align_to(size, wgpu::COPY_BUFFER_ALIGNMENT),
            usage,
            mapped_at_creation: false,
        });

        let pool = self.id;
        let handle = move |index| Tensor::new(TensorId { pool, index }, shape, dtype, size, usage);
        let index = self.entries.insert_with(|index| TensorEntry {
            buffer,
            tensor: handle(index),
        });
        let tensor = handle(index);

        self.allocated_bytes += size;
        log::debug!(
            target: self.log_target.as_str(),
            "allocated tensor {} shape=[{}] dtype={} ({} bytes, pool total {:.2}MB)",
            tensor.id(),
            shape,
            dtype,
            size,
            self.allocated_bytes as f64 / 1_048_576.0
        );
        Ok(tensor)
    }

    /// Allocates a tensor and immediately queues a write of `data` into it.
    ///
    /// The write is ordered before any later submission on the same queue;
    /// there is no explicit wait.
    pub fn create_with_data<T: GpuDType>(
        &mut self,
        shape: Shape,
        dtype: DType,
        data: &[T],
    ) -> ComputeResult<Tensor> {
        check_host_dtype::<T>(dtype)?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let needed = tensor_byte_size(shape, dtype, u64::MAX)?;
        check_write_len(bytes.len() as u64, needed)?;

        let tensor = self.create(shape, dtype)?;
        self.write(&tensor, bytes)?;
        Ok(tensor)
    }

    /// Queues a write of `bytes` to the start of the tensor's buffer.
    pub fn write(&self, tensor: &Tensor, bytes: &[u8]) -> ComputeResult<()> {
        let buffer = self.buffer(tensor)?;
        check_usage("upload", tensor.usage(), BufferUsages::COPY_DST)?;
        check_write_len(bytes.len() as u64, tensor.size_in_bytes())?;
        write_padded(&self.queue, buffer, bytes);
        Ok(())
    }

    /// Destroys the tensor's buffer and forgets it.
    ///
    /// A tensor that was already freed, or that came from another pool, is
    /// left alone and reported as an error.
    pub fn free(&mut self, tensor: &Tensor) -> ComputeResult<()> {
        self.check_owner(tensor.id())?;
        let Some(entry) = self.entries.remove(tensor.id().index) else {
            log::warn!(
                target: self.log_target.as_str(),
                "tried to free tensor {} that is not in the pool (double free?)",
                tensor.id()
            );
            return Err(ComputeError::StaleTensor(tensor.id()));
        };
        entry.buffer.destroy();
        self.allocated_bytes -= entry.tensor.size_in_bytes();
        log::debug!(
            target: self.log_target.as_str(),
            "freed tensor {} ({} bytes)",
            tensor.id(),
            entry.tensor.size_in_bytes()
        );
        Ok(())
    }

    /// Looks up the device buffer behind a tensor.
    pub fn buffer(&self, tensor: &Tensor) -> ComputeResult<&Buffer> {
        self.buffer_by_id(tensor.id())
    }

    pub fn buffer_by_id(&self, id: TensorId) -> ComputeResult<&Buffer> {
        self.check_owner(id)?;
        match self.entries.get(id.index) {
            Some(entry) => Ok(&entry.buffer),
            None => {
                log::warn!(target: self.log_target.as_str(), "tensor {} is not in the pool", id);
                Err(ComputeError::StaleTensor(id))
            }
        }
    }

    pub fn contains(&self, tensor: &Tensor) -> bool {
        tensor.id().pool == self.id && self.entries.contains(tensor.id().index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently held by live tensors.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Handles to every live tensor.
    pub fn tensors(&self) -> Vec<Tensor> {
        self.entries.values().map(|e| e.tensor).collect()
    }

    fn check_owner(&self, id: TensorId) -> ComputeResult<()> {
        if id.pool != self.id {
            log::warn!(
                target: self.log_target.as_str(),
                "tensor {} belongs to pool {}, not pool {}",
                id,
                id.pool,
                self.id
            );
            return Err(ComputeError::ForeignTensor {
                id,
                owner: id.pool,
                pool: self.id,
            });
        }
        Ok(())
    }
}

impl Drop for TensorPool {
    fn drop(&mut self) {
        // Snapshot first: `free` mutates the table.
        let live = self.entries.indices();
        for index in live {
            let id = TensorId {
                pool: self.id,
                index,
            };
            if let Some(tensor) = self.entries.get(index).map(|e| e.tensor) {
                let _ = self.free(&tensor);
                log::trace!(target: self.log_target.as_str(), "released tensor {} on pool teardown", id);
            }
        }
    }
}

/// Byte size of a `shape`/`dtype` tensor, capped at `max` bytes.
pub(crate) fn tensor_byte_size(shape: Shape, dtype: DType, max: u64) -> ComputeResult<u64> {
    shape
        .try_num_elements()
        .and_then(|n| n.checked_mul(dtype.size_of()))
        .and_then(|bytes| u64::try_from(bytes).ok())
        .filter(|&bytes| wgpu::util::align_to(bytes, wgpu::COPY_BUFFER_ALIGNMENT) <= max)
        .ok_or_else(|| ComputeError::TensorTooLarge {
            shape: shape.to_string(),
            dtype,
            max,
        })
}

pub(crate) fn check_usage(
    operation: &'static str,
    actual: BufferUsages,
    required: BufferUsages,
) -> ComputeResult<()> {
    if !actual.contains(required) {
        return Err(ComputeError::MissingUsage {
            operation,
            required,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn check_write_len(requested: u64, available: u64) -> ComputeResult<()> {
    if requested > available {
        return Err(ComputeError::TransferSize {
            requested,
            available,
            reason: "data is larger than the destination buffer",
        });
    }
    Ok(())
}

/// Queues a write, zero-padding the tail to the copy alignment.
pub(crate) fn write_padded(queue: &wgpu::Queue, buffer: &Buffer, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    let aligned = wgpu::util::align_to(bytes.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize;
    if aligned == bytes.len() {
        queue.write_buffer(buffer, 0, bytes);
    } else {
        let mut padded = bytes.to_vec();
        padded.resize(aligned, 0);
        queue.write_buffer(buffer, 0, &padded);
    }
}
