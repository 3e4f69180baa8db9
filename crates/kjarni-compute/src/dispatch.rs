//! Submission and completion of recorded kernels.

use crate::context::ComputeContext;
use crate::error::{ComputeError, ComputeResult};
use crate::kernel_pool::KernelId;
use crate::signal::{completion_signal, CompletionNotifier, CompletionSignal};
use crate::wait::{wait_for_signal, WaitOptions};

impl ComputeContext {
    /// Submits the kernel's recorded pass and arranges for `notifier` to fire
    /// once the queue has finished it. Returns without waiting.
    ///
    /// The command buffer is consumed; call `reset_command_buffer` before
    /// dispatching the same kernel again.
    pub fn dispatch_kernel(
        &mut self,
        id: KernelId,
        notifier: CompletionNotifier,
    ) -> ComputeResult<()> {
        let kernel = self.kernels.get(id)?;
        for &tensor in kernel.tensors() {
            self.tensors.buffer_by_id(tensor)?;
        }

        let kernel = self.kernels.get_mut(id)?;
        let command_buffer = kernel
            .take_command_buffer()
            .ok_or(ComputeError::CommandBufferConsumed(id))?;
        let workgroups = kernel.workgroups();

        log::trace!(
            target: self.log_target(),
            "dispatching {} workgroups {:?}",
            id,
            workgroups
        );
        self.queue().submit(Some(command_buffer));
        self.queue().on_submitted_work_done(move || notifier.notify());
        Ok(())
    }

    /// `dispatch_kernel` with a fresh signal pair; wait on the returned signal.
    pub fn dispatch(&mut self, id: KernelId) -> ComputeResult<CompletionSignal> {
        let (notifier, signal) = completion_signal(format!("dispatch {}", id));
        self.dispatch_kernel(id, notifier)?;
        Ok(signal)
    }

    /// Re-records the kernel's pass so it can be dispatched again.
    pub fn reset_command_buffer(&mut self, id: KernelId) -> ComputeResult<()> {
        let device = self.device().clone();
        self.kernels.get_mut(id)?.record(&device);
        Ok(())
    }

    /// Blocks until `signal` resolves, with the configured wait options.
    pub fn wait(&self, signal: &mut CompletionSignal) -> ComputeResult<()> {
        self.wait_with(signal, &self.config().wait)
    }

    pub fn wait_with(
        &self,
        signal: &mut CompletionSignal,
        options: &WaitOptions,
    ) -> ComputeResult<()> {
        wait_for_signal(self.device(), signal, options)
    }
}
