//! Kernel construction: binding layout, bind group, pipeline, dispatch size.
//!
//! Tensors bind to slots `0..N` in the order given. Parameters, when present,
//! bind as a single uniform buffer at slot `N`.


use std::num::NonZeroU64;

use futures::executor::block_on;
use wgpu::{
    BindGroupLayoutEntry, BindingType, BufferBindingType, BufferDescriptor, BufferUsages,
    ShaderStages,
};

use crate::context::ComputeContext;
use crate::error::{ComputeError, ComputeResult};
use crate::kernel_pool::KernelId;
use crate::shader::ShaderCode;
use crate::shape::Shape;
use crate::tensor::{Tensor, TensorId};
use crate::tensor_pool::write_padded;

/// Every kernel template declares this entry point.
pub const ENTRY_POINT: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Storage,
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlot {
    pub binding: u32,
    pub kind: BindingKind,
    /// Byte size bound to the slot, rounded up to 4 bytes.
    pub size: u64,
}

/// Slot layout for a kernel, derived from tensor sizes and the params blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingPlan {
    slots: Vec<BindingSlot>,
}

impl BindingPlan {
    /// Buffer bindings must be a multiple of 4 bytes, so odd-sized tensors
    /// (e.g. three `f16`s) bind their padded allocation.
    pub fn new(tensor_sizes: &[u64], params_size: Option<u64>) -> Self {
        let aligned = |size| wgpu::util::align_to(size, wgpu::COPY_BUFFER_ALIGNMENT);
        let mut slots: Vec<BindingSlot> = tensor_sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| BindingSlot {
                binding: i as u32,
                kind: BindingKind::Storage,
                size: aligned(size),
            })
            .collect();
        if let Some(size) = params_size {
            slots.push(BindingSlot {
                binding: tensor_sizes.len() as u32,
                kind: BindingKind::Uniform,
                size: aligned(size),
            });
        }
        Self { slots }
    }

    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Binding index of the params uniform, if any.
    pub fn params_binding(&self) -> Option<u32> {
        self.slots
            .iter()
            .find(|s| s.kind == BindingKind::Uniform)
            .map(|s| s.binding)
    }

    pub fn layout_entries(&self) -> Vec<BindGroupLayoutEntry> {
        self.slots.iter().map(layout_entry).collect()
    }
}

fn layout_entry(slot: &BindingSlot) -> BindGroupLayoutEntry {
    let ty = match slot.kind {
        BindingKind::Storage => BufferBindingType::Storage { read_only: false },
        BindingKind::Uniform => BufferBindingType::Uniform,
    };
    BindGroupLayoutEntry {
        binding: slot.binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(slot.size),
        },
        count: None,
    }
}

/// Per-axis `ceil(threads / workgroup)`.
pub fn workgroup_count(threads: &Shape, workgroup: &Shape) -> ComputeResult<[u32; 3]> {
    let threads = threads.as_xyz().ok_or(ComputeError::InvalidThreadShape {
        rank: threads.rank(),
    })?;
    let workgroup = workgroup
        .as_xyz()
        .filter(|axes| axes.iter().all(|&n| n > 0))
        .ok_or_else(|| ComputeError::InvalidWorkgroupShape {
            shape: workgroup.to_string(),
        })?;

    let mut count = [0u32; 3];
    for axis in 0..3 {
        let groups = threads[axis].div_ceil(workgroup[axis]);
        count[axis] = u32::try_from(groups).unwrap_or(u32::MAX);
    }
    Ok(count)
}

/// A compiled compute pass bound to a fixed set of buffers.
pub struct Kernel {
    label: String,
    buffers: Vec<wgpu::Buffer>,
    plan: BindingPlan,
    tensors: Vec<TensorId>,
    threads: Shape,
    workgroups: [u32; 3],
    bind_group: wgpu::BindGroup,
    pipeline: wgpu::ComputePipeline,
    command_buffer: Option<wgpu::CommandBuffer>,
}

impl Kernel {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bound buffers in binding order; the params uniform, if any, is last.
    pub fn buffers(&self) -> &[wgpu::Buffer] {
        &self.buffers
    }

    pub fn buffer_sizes(&self) -> impl Iterator<Item = u64> + '_ {
        self.plan.slots().iter().map(|s| s.size)
    }

    pub fn binding_plan(&self) -> &BindingPlan {
        &self.plan
    }

    pub fn tensors(&self) -> &[TensorId] {
        &self.tensors
    }

    pub fn threads(&self) -> &Shape {
        &self.threads
    }

    pub fn workgroups(&self) -> [u32; 3] {
        self.workgroups
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    /// False once the recorded pass has been submitted.
    pub fn is_recorded(&self) -> bool {
        self.command_buffer.is_some()
    }

    pub(crate) fn take_command_buffer(&mut self) -> Option<wgpu::CommandBuffer> {
        self.command_buffer.take()
    }

    /// Records begin pass, set pipeline, set bind group 0, dispatch, end pass.
    pub(crate) fn record(&mut self, device: &wgpu::Device) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&self.label),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            let [x, y, z] = self.workgroups;
            pass.dispatch_workgroups(x, y, z);
        }
        self.command_buffer = Some(encoder.finish());
    }
}

impl ComputeContext {
    /// Builds a kernel over `tensors` and stores it in the kernel pool.
    ///
    /// `threads` is the total invocation count per axis and must be rank 3.
    /// `params`, if given, is copied into a dedicated uniform buffer bound
    /// after the last tensor.
    pub fn create_kernel(
        &mut self,
        shader: &ShaderCode,
        tensors: &[Tensor],
        threads: Shape,
        params: Option<&[u8]>,
    ) -> ComputeResult<KernelId> {
        let workgroups = workgroup_count(&threads, shader.workgroup_size())?;
        let label = self.kernels.next_label();
        let device = self.device().clone();

        let mut buffers = Vec::with_capacity(tensors.len() + 1);
        for tensor in tensors {
            buffers.push(self.tensors.buffer(tensor)?.clone());
        }
        let sizes: Vec<u64> = tensors.iter().map(|t| t.size_in_bytes()).collect();

        let params_len = params.map(|p| p.len() as u64);
        if let Some(bytes) = params {
            let buffer = device.create_buffer(&BufferDescriptor {
                label: Some(&format!("{} params", label)),
                size: wgpu::util::align_to(bytes.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT),
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            write_padded(self.queue(), &buffer, bytes);
            buffers.push(buffer);
        }
        let plan = BindingPlan::new(&sizes, params_len);

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&label),
            entries: &plan.layout_entries(),
        });
        let entries: Vec<wgpu::BindGroupEntry> = plan
            .slots()
            .iter()
            .zip(&buffers)
            .map(|(slot, buffer)| wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: 0,
                    size: NonZeroU64::new(slot.size),
                }),
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&label),
            layout: &layout,
            entries: &entries,
        });
        if let Some(err) = block_on(device.pop_error_scope()) {
            return Err(ComputeError::BindGroupCreation {
                label,
                message: err.to_string(),
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(shader.source().into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = block_on(device.pop_error_scope()) {
            return Err(ComputeError::PipelineCreation {
                label,
                message: err.to_string(),
            });
        }

        let mut kernel = Kernel {
            label,
            buffers,
            plan,
            tensors: tensors.iter().map(|t| t.id()).collect(),
            threads,
            workgroups,
            bind_group,
            pipeline,
            command_buffer: None,
        };
        kernel.record(&device);

        log::debug!(
            target: self.log_target(),
            "built {}: {} bindings, threads [{}], workgroups {:?}",
            kernel.label,
            kernel.plan.len(),
            threads,
            workgroups
        );
        Ok(self.kernels.insert(kernel))
    }

    /// `create_kernel` with a typed parameter struct.
    pub fn create_kernel_with_params<P: bytemuck::Pod>(
        &mut self,
        shader: &ShaderCode,
        tensors: &[Tensor],
        threads: Shape,
        params: &P,
    ) -> ComputeResult<KernelId> {
        self.create_kernel(shader, tensors, threads, Some(bytemuck::bytes_of(params)))
    }

    pub fn kernel(&self, id: KernelId) -> ComputeResult<&Kernel> {
        self.kernels.get(id)
    }
}
