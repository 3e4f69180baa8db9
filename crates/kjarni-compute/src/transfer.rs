//! Host/device transfers.
//!
//! Uploads are queue writes and return immediately. Readback copies into a
//! staging buffer and then walks a small state machine, one step per device
//! notification, while the calling thread pumps events:
//!
//! `Submitted` -> `QueueDone` -> `Mapping` -> `Resolved`

use futures::channel::oneshot;
use wgpu::{BufferDescriptor, BufferUsages};

use crate::context::ComputeContext;
use crate::dtype::{check_host_dtype, GpuDType};
use crate::error::{ComputeError, ComputeResult};
use crate::signal::{completion_signal, CompletionSignal};
use crate::tensor::Tensor;
use crate::tensor_pool::{check_usage, check_write_len, write_padded};
use crate::wait::{pump_until, EventPump, WaitOptions};

type MapResult = Result<(), wgpu::BufferAsyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadbackState {
    /// Copy submitted, waiting for the queue.
    Submitted,
    /// Queue finished the copy; the map request has not been issued yet.
    QueueDone,
    /// Map requested, waiting for the map callback.
    Mapping,
    /// Bytes copied out and staging unmapped.
    Resolved,
}

impl ReadbackState {
    pub fn next(self) -> Self {
        match self {
            ReadbackState::Submitted => ReadbackState::QueueDone,
            ReadbackState::QueueDone => ReadbackState::Mapping,
            ReadbackState::Mapping | ReadbackState::Resolved => ReadbackState::Resolved,
        }
    }
}

/// The mappable side of a readback.
pub(crate) trait Staging {
    /// Starts an asynchronous read map; `done` fires from the device callback.
    fn request_map(&self, done: oneshot::Sender<MapResult>);
    /// Copies the mapped bytes into `out` and unmaps.
    fn copy_mapped(&self, out: &mut [u8]);
}

impl Staging for wgpu::Buffer {
    fn request_map(&self, done: oneshot::Sender<MapResult>) {
        self.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = done.send(result);
        });
    }

    fn copy_mapped(&self, out: &mut [u8]) {
        {
            let view = self.slice(..).get_mapped_range();
            out.copy_from_slice(&view[..out.len()]);
        }
        self.unmap();
    }
}

pub(crate) struct ReadbackOp<'a, S> {
    staging: S,
    out: &'a mut [u8],
    state: ReadbackState,
    work_done: CompletionSignal,
    mapped: Option<oneshot::Receiver<MapResult>>,
}

impl<'a, S: Staging> ReadbackOp<'a, S> {
    pub fn new(staging: S, out: &'a mut [u8], work_done: CompletionSignal) -> Self {
        Self {
            staging,
            out,
            state: ReadbackState::Submitted,
            work_done,
            mapped: None,
        }
    }

    pub fn state(&self) -> ReadbackState {
        self.state
    }

    /// Advances as far as the notifications received so far allow.
    /// Returns `true` once resolved.
    pub fn step(&mut self) -> ComputeResult<bool> {
        loop {
            let advanced = match self.state {
                ReadbackState::Submitted => self.work_done.try_resolve()?,
                ReadbackState::QueueDone => {
                    let (sender, receiver) = oneshot::channel();
                    self.staging.request_map(sender);
                    self.mapped = Some(receiver);
                    true
                }
                ReadbackState::Mapping => self.poll_map()?,
                ReadbackState::Resolved => return Ok(true),
            };
            if !advanced {
                return Ok(false);
            }
            self.state = self.state.next();
        }
    }

    fn poll_map(&mut self) -> ComputeResult<bool> {
        let Some(receiver) = self.mapped.as_mut() else {
            return Ok(false);
        };
        match receiver.try_recv() {
            Ok(Some(result)) => {
                result?;
                self.staging.copy_mapped(self.out);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(oneshot::Canceled) => Err(ComputeError::SignalDropped {
                operation: "readback map".to_string(),
            }),
        }
    }

    pub fn drive<P: EventPump + ?Sized>(
        &mut self,
        pump: &P,
        options: &WaitOptions,
    ) -> ComputeResult<()> {
        pump_until(pump, options, "readback", || self.step())
    }
}

fn check_readback_len(requested: u64, available: u64) -> ComputeResult<()> {
    if requested % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(ComputeError::TransferSize {
            requested,
            available,
            reason: "readback length must be a multiple of 4 bytes",
        });
    }
    if requested > available {
        return Err(ComputeError::TransferSize {
            requested,
            available,
            reason: "output is larger than the tensor",
        });
    }
    Ok(())
}

impl ComputeContext {
    /// Copies the first `out.len()` bytes of `tensor` into `out`.
    ///
    /// Blocks, pumping device events, until the copy is done or the
    /// configured wait options give up.
    pub fn to_cpu(&self, tensor: &Tensor, out: &mut [u8]) -> ComputeResult<()> {
        let source = self.tensors.buffer(tensor)?;
        check_usage("readback", tensor.usage(), BufferUsages::COPY_SRC)?;
        let size = out.len() as u64;
        check_readback_len(size, tensor.size_in_bytes())?;
        if out.is_empty() {
            return Ok(());
        }

        let device = self.device();
        let staging = device.create_buffer(&BufferDescriptor {
            label: Some("kjarni readback staging"),
            size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("kjarni readback"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue().submit(Some(encoder.finish()));

        let (notifier, work_done) = completion_signal(format!("readback {}", tensor.id()));
        self.queue().on_submitted_work_done(move || notifier.notify());

        log::trace!(target: self.log_target(), "reading back {} bytes of {}", size, tensor.id());
        let mut op = ReadbackOp::new(staging, out, work_done);
        op.drive(device, &self.config().wait)
    }

    /// Reads the whole tensor back as `T`s.
    pub fn read_vec<T: GpuDType>(&self, tensor: &Tensor) -> ComputeResult<Vec<T>> {
        check_host_dtype::<T>(tensor.dtype())?;
        let len = tensor.size_in_bytes() as usize / std::mem::size_of::<T>();
        let mut out = vec![T::zeroed(); len];
        self.to_cpu(tensor, bytemuck::cast_slice_mut(&mut out))?;
        Ok(out)
    }

    pub fn read_f32(&self, tensor: &Tensor) -> ComputeResult<Vec<f32>> {
        self.read_vec::<f32>(tensor)
    }

    /// Queues a write of `data` to the start of `tensor`. Does not wait.
    pub fn to_gpu<T: GpuDType>(&self, data: &[T], tensor: &Tensor) -> ComputeResult<()> {
        check_host_dtype::<T>(tensor.dtype())?;
        self.tensors.write(tensor, bytemuck::cast_slice(data))
    }

    /// Queues a write into a buffer the pool does not manage.
    pub fn write_buffer(&self, data: &[u8], buffer: &wgpu::Buffer) -> ComputeResult<()> {
        check_usage("upload", buffer.usage(), BufferUsages::COPY_DST)?;
        let padded = wgpu::util::align_to(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        check_write_len(padded, buffer.size())?;
        write_padded(self.queue(), buffer, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeStaging {
        bytes: Vec<u8>,
        pending: RefCell<Option<oneshot::Sender<MapResult>>>,
        map_requests: Cell<usize>,
        unmapped: Cell<bool>,
    }

    impl FakeStaging {
        fn complete_map(&self, result: MapResult) {
            if let Some(sender) = self.pending.borrow_mut().take() {
                let _ = sender.send(result);
            }
        }
    }

    impl Staging for &FakeStaging {
        fn request_map(&self, done: oneshot::Sender<MapResult>) {
            self.map_requests.set(self.map_requests.get() + 1);
            *self.pending.borrow_mut() = Some(done);
        }

        fn copy_mapped(&self, out: &mut [u8]) {
            out.copy_from_slice(&self.bytes[..out.len()]);
            self.unmapped.set(true);
        }
    }

    #[test]
    fn test_states_advance_in_order() {
        assert_eq!(ReadbackState::Submitted.next(), ReadbackState::QueueDone);
        assert_eq!(ReadbackState::QueueDone.next(), ReadbackState::Mapping);
        assert_eq!(ReadbackState::Mapping.next(), ReadbackState::Resolved);
        assert_eq!(ReadbackState::Resolved.next(), ReadbackState::Resolved);
    }

    #[test]
    fn test_readback_walks_every_state() {
        let staging = FakeStaging {
            bytes: vec![1, 2, 3, 4, 5, 6, 7, 8],
            ..Default::default()
        };
        let mut out = [0u8; 8];
        let (notifier, work_done) = completion_signal("readback");
        let mut op = ReadbackOp::new(&staging, &mut out, work_done);

        assert!(!op.step().unwrap());
        assert_eq!(op.state(), ReadbackState::Submitted);
        assert_eq!(staging.map_requests.get(), 0);

        notifier.notify();
        assert!(!op.step().unwrap());
        assert_eq!(op.state(), ReadbackState::Mapping);
        assert_eq!(staging.map_requests.get(), 1);

        assert!(!op.step().unwrap());
        assert_eq!(op.state(), ReadbackState::Mapping);

        staging.complete_map(Ok(()));
        assert!(op.step().unwrap());
        assert_eq!(op.state(), ReadbackState::Resolved);
        assert!(op.step().unwrap());
        assert_eq!(staging.map_requests.get(), 1);

        drop(op);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(staging.unmapped.get());
    }

    #[test]
    fn test_map_failure_is_reported() {
        let staging = FakeStaging::default();
        let mut out = [0u8; 4];
        let (notifier, work_done) = completion_signal("readback");
        let mut op = ReadbackOp::new(&staging, &mut out, work_done);

        notifier.notify();
        op.step().unwrap();
        staging.complete_map(Err(wgpu::BufferAsyncError));
        assert!(matches!(op.step(), Err(ComputeError::Map(_))));
        assert!(!staging.unmapped.get());
    }

    #[test]
    fn test_readback_length_rules() {
        assert!(check_readback_len(16, 16).is_ok());
        assert!(check_readback_len(8, 16).is_ok());
        assert!(matches!(
            check_readback_len(6, 16),
            Err(ComputeError::TransferSize { requested: 6, .. })
        ));
        assert!(matches!(
            check_readback_len(20, 16),
            Err(ComputeError::TransferSize { requested: 20, available: 16, .. })
        ));
    }
}
