use std::fmt;

use crate::arena::{Arena, Index};
use crate::error::{ComputeError, ComputeResult};
use crate::kernel::Kernel;

/// Handle to a kernel owned by a `KernelPool`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId {
    pub(crate) index: Index,
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel#{}.{}", self.index.slot, self.index.generation)
    }
}

impl fmt::Debug for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Owns every built kernel of one context.
pub struct KernelPool {
    log_target: String,
    entries: Arena<Kernel>,
    built: u64,
}

impl KernelPool {
    pub fn new(log_target: impl Into<String>) -> Self {
        Self {
            log_target: log_target.into(),
            entries: Arena::new(),
            built: 0,
        }
    }

    pub(crate) fn next_label(&mut self) -> String {
        self.built += 1;
        format!("kernel {}", self.built)
    }

    pub(crate) fn insert(&mut self, kernel: Kernel) -> KernelId {
        KernelId {
            index: self.entries.insert(kernel),
        }
    }

    pub fn get(&self, id: KernelId) -> ComputeResult<&Kernel> {
        self.entries
            .get(id.index)
            .ok_or_else(|| stale(&self.log_target, id))
    }

    pub fn get_mut(&mut self, id: KernelId) -> ComputeResult<&mut Kernel> {
        self.entries
            .get_mut(id.index)
            .ok_or_else(|| stale(&self.log_target, id))
    }

    /// Drops one kernel. Its pipeline, bind group and params buffer go with it;
    /// bound tensors stay in their pool.
    pub fn remove(&mut self, id: KernelId) -> ComputeResult<()> {
        match self.entries.remove(id.index) {
            Some(kernel) => {
                log::debug!(target: self.log_target.as_str(), "removed {} ({})", id, kernel.label());
                Ok(())
            }
            None => Err(stale(&self.log_target, id)),
        }
    }

    pub fn contains(&self, id: KernelId) -> bool {
        self.entries.contains(id.index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn stale(log_target: &str, id: KernelId) -> ComputeError {
    log::warn!(target: log_target, "{} is not in the kernel pool", id);
    ComputeError::StaleKernel(id)
}

impl Drop for KernelPool {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            log::debug!(
                target: self.log_target.as_str(),
                "releasing {} kernels on pool teardown",
                self.entries.len()
            );
        }
    }
}
