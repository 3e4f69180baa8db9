use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use futures::executor::block_on;
use wgpu::{DeviceDescriptor, Features, InstanceDescriptor, RequestAdapterOptions};

use crate::config::ContextConfig;
use crate::dtype::{DType, GpuDType};
use crate::error::{ComputeError, ComputeResult};
use crate::kernel_pool::KernelPool;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::tensor_pool::TensorPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Instance,
    Adapter,
    Device,
    Queue,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleKind::Instance => "instance",
            HandleKind::Adapter => "adapter",
            HandleKind::Device => "device",
            HandleKind::Queue => "queue",
        })
    }
}

/// A device-API handle that logs its release.
pub(crate) struct Released<T> {
    inner: T,
    kind: HandleKind,
    log_target: String,
}

impl<T> Released<T> {
    fn new(kind: HandleKind, inner: T, log_target: &str) -> Self {
        Self {
            inner,
            kind,
            log_target: log_target.to_string(),
        }
    }
}

impl<T> Deref for Released<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> Drop for Released<T> {
    fn drop(&mut self) {
        log::debug!(target: self.log_target.as_str(), "releasing {}", self.kind);
    }
}

/// Instance, adapter, device and queue.
///
/// Fields drop in declaration order, so release runs queue, device, adapter,
/// instance: the reverse of acquisition.
pub(crate) struct DeviceHandles<I, A, D, Q> {
    pub queue: Released<Q>,
    pub device: Released<D>,
    pub adapter: Released<A>,
    pub instance: Released<I>,
}

/// Acquires the handles in order. If a step fails, whatever was already
/// acquired is released in reverse order and later handles are never touched.
pub(crate) fn acquire_handles<I, A, D, Q, E>(
    log_target: &str,
    instance: impl FnOnce() -> I,
    adapter: impl FnOnce(&I) -> Result<A, E>,
    device: impl FnOnce(&A) -> Result<(D, Q), E>,
) -> Result<DeviceHandles<I, A, D, Q>, E> {
    let instance = Released::new(HandleKind::Instance, instance(), log_target);

    log::info!(target: log_target, "requesting adapter");
    let adapter = match adapter(&instance) {
        Ok(adapter) => Released::new(HandleKind::Adapter, adapter, log_target),
        Err(e) => {
            log::warn!(target: log_target, "adapter request failed; device and queue were never acquired");
            return Err(e);
        }
    };

    log::info!(target: log_target, "requesting device");
    let (device, queue) = match device(&adapter) {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!(target: log_target, "device request failed; device and queue were never acquired");
            return Err(e);
        }
    };

    Ok(DeviceHandles {
        queue: Released::new(HandleKind::Queue, queue, log_target),
        device: Released::new(HandleKind::Device, device, log_target),
        adapter,
        instance,
    })
}

/// Owns the WebGPU handles plus the tensor and kernel pools built on them.
///
/// All device interaction goes through one `&mut ComputeContext` on one
/// thread. Dropping the context frees every pooled tensor and kernel, then
/// releases queue, device, adapter and instance in that order.
pub struct ComputeContext {
    config: ContextConfig,
    // Declaration order is teardown order.
    pub(crate) tensors: TensorPool,
    pub(crate) kernels: KernelPool,
    handles: DeviceHandles<wgpu::Instance, wgpu::Adapter, wgpu::Device, wgpu::Queue>,
}

impl ComputeContext {
    /// Creates a context with `ContextConfig::from_env()`.
    pub fn new() -> ComputeResult<Self> {
        Self::with_config(ContextConfig::from_env())
    }

    pub fn with_config(config: ContextConfig) -> ComputeResult<Self> {
        let target = config.log_target.clone();

        let handles = acquire_handles(
            &target,
            || {
                wgpu::Instance::new(&InstanceDescriptor {
                    backends: config.backends,
                    backend_options: wgpu::BackendOptions {
                        noop: wgpu::NoopBackendOptions {
                            enable: config.backends.contains(wgpu::Backends::NOOP),
                        },
                        ..Default::default()
                    },
                    ..Default::default()
                })
            },
            |instance| {
                block_on(instance.request_adapter(&RequestAdapterOptions {
                    power_preference: config.power_preference,
                    force_fallback_adapter: config.force_fallback_adapter,
                    compatible_surface: None,
                }))
                .map_err(ComputeError::from)
            },
            |adapter| {
                let info = adapter.get_info();
                log::info!(
                    target: target.as_str(),
                    "adapter: {} ({:?}, {:?})",
                    info.name,
                    info.backend,
                    info.device_type
                );
                block_on(adapter.request_device(&DeviceDescriptor {
                    label: Some(&config.device_label),
                    required_features: Features::empty(),
                    required_limits: adapter.limits(),
                    ..Default::default()
                }))
                .map_err(ComputeError::from)
            },
        )?;

        install_device_callbacks(&handles.device, &target);

        let tensors = TensorPool::new(
            handles.device.deref().clone(),
            handles.queue.deref().clone(),
            target.clone(),
        );
        let kernels = KernelPool::new(target.clone());

        log::info!(target: target.as_str(), "compute context ready");
        Ok(Self {
            config,
            tensors,
            kernels,
            handles,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.handles.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.handles.queue
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.handles.adapter
    }

    pub fn instance(&self) -> &wgpu::Instance {
        &self.handles.instance
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub(crate) fn log_target(&self) -> &str {
        &self.config.log_target
    }

    pub fn tensor_pool(&self) -> &TensorPool {
        &self.tensors
    }

    pub fn tensor_pool_mut(&mut self) -> &mut TensorPool {
        &mut self.tensors
    }

    pub fn kernel_pool(&self) -> &KernelPool {
        &self.kernels
    }

    pub fn kernel_pool_mut(&mut self) -> &mut KernelPool {
        &mut self.kernels
    }

    pub fn create_tensor(&mut self, shape: Shape, dtype: DType) -> ComputeResult<Tensor> {
        self.tensors.create(shape, dtype)
    }

    /// Allocates a tensor and queues an upload of `data` into it.
    pub fn create_tensor_with_data<T: GpuDType>(
        &mut self,
        shape: Shape,
        dtype: DType,
        data: &[T],
    ) -> ComputeResult<Tensor> {
        self.tensors.create_with_data(shape, dtype, data)
    }

    pub fn free_tensor(&mut self, tensor: &Tensor) -> ComputeResult<()> {
        self.tensors.free(tensor)
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.tensors.allocated_bytes()
    }

    pub fn print_memory_usage(&self) {
        log::info!(
            target: self.log_target(),
            "gpu memory: {:.2}MB in {} tensors, {} kernels",
            self.tensors.allocated_bytes() as f64 / 1_048_576.0,
            self.tensors.len(),
            self.kernels.len()
        );
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        log::info!(target: self.config.log_target.as_str(), "destroying context");
        // Flush callbacks still pending for submitted work.
        let _ = self.handles.device.poll(wgpu::PollType::Poll);
    }
}

/// Routes device errors nobody captured in a scope to the log instead of
/// wgpu's default handler, which panics.
fn install_device_callbacks(device: &wgpu::Device, log_target: &str) {
    let target = log_target.to_string();
    device.on_uncaptured_error(Arc::new(move |error| {
        log::error!(target: target.as_str(), "uncaptured device error: {}", error);
    }));
    let target = log_target.to_string();
    device.set_device_lost_callback(move |reason, message| {
        if reason == wgpu::DeviceLostReason::Destroyed {
            log::info!(target: target.as_str(), "device destroyed: {}", message);
        } else {
            log::error!(target: target.as_str(), "device lost ({:?}): {}", reason, message);
        }
    });
}
