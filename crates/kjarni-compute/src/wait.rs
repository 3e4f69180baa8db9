//! Cooperative waiting on the device timeline.
//!
//! Device callbacks only fire while someone polls the device, so waiting is
//! a loop on the controlling thread: check, pump pending events, check again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ComputeError, ComputeResult};
use crate::signal::CompletionSignal;

/// Cancels a wait from another thread or from inside a callback.
///
/// Cancelling only abandons the wait; work already submitted still runs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Limits for a cooperative wait. The default waits indefinitely.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Give up with `ComputeError::Timeout` after this long.
    pub timeout: Option<Duration>,
    /// Sleep between pumps. `None` spins.
    pub poll_interval: Option<Duration>,
    /// Checked once per iteration.
    pub cancel: Option<CancelToken>,
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Something that can run one round of pending device-event processing.
pub trait EventPump {
    fn pump(&self) -> ComputeResult<()>;
}

impl EventPump for wgpu::Device {
    fn pump(&self) -> ComputeResult<()> {
        self.poll(wgpu::PollType::Poll)?;
        Ok(())
    }
}

/// Runs `step` until it reports completion, pumping events in between.
pub fn pump_until<P, F>(
    pump: &P,
    options: &WaitOptions,
    operation: &str,
    mut step: F,
) -> ComputeResult<()>
where
    P: EventPump + ?Sized,
    F: FnMut() -> ComputeResult<bool>,
{
    let start = Instant::now();

    loop {
        if step()? {
            return Ok(());
        }

        if let Some(token) = &options.cancel {
            if token.is_cancelled() {
                return Err(ComputeError::Cancelled {
                    operation: operation.to_string(),
                });
            }
        }

        if let Some(timeout) = options.timeout {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(ComputeError::Timeout {
                    operation: operation.to_string(),
                    elapsed,
                    timeout,
                });
            }
        }

        pump.pump()?;

        if let Some(interval) = options.poll_interval {
            std::thread::sleep(interval);
        }
    }
}

/// Blocks the calling thread until `signal` resolves.
pub fn wait_for_signal<P>(
    pump: &P,
    signal: &mut CompletionSignal,
    options: &WaitOptions,
) -> ComputeResult<()>
where
    P: EventPump + ?Sized,
{
    let operation = signal.label().to_string();
    pump_until(pump, options, &operation, || signal.try_resolve())
}
