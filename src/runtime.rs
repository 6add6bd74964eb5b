//! # Compute runtime
//!
//! The parts of the external compute runtime this crate talks to: device discovery, the device
//! memory cache, and the thread-local gradient tracking mode.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::cell::Cell;

use crate::tensor::Device;

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait ComputeRuntime {
    /// Number of CUDA devices visible to the process.
    fn cuda_device_count(&self) -> usize;

    /// Releases cached, currently unused memory held by the allocator of `device`.
    fn empty_cache(&self, device: Device);

    fn cuda_is_available(&self) -> bool {
        self.cuda_device_count() > 0
    }
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Runtime with no accelerators. Every cache release is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuRuntime;

/// Restores the previous gradient mode when dropped.
#[must_use]
pub struct NoGradGuard {
    prev: bool,
}

thread_local! {
    static GRAD_ENABLED: Cell<bool> = Cell::new(true);
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl ComputeRuntime for CpuRuntime {
    fn cuda_device_count(&self) -> usize {
        0
    }

    fn empty_cache(&self, _device: Device) {}
}

impl NoGradGuard {
    pub fn new() -> Self {
        let prev = GRAD_ENABLED.with(|g| g.replace(false));
        Self { prev }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        let prev = self.prev;
        GRAD_ENABLED.with(|g| g.set(prev));
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Whether operations on this thread currently record gradients.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Runs `f` with gradient tracking disabled.
pub fn no_grad<T, F: FnOnce() -> T>(f: F) -> T {
    let _guard = NoGradGuard::new();
    f()
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_grad_scopes_and_restores() {
        assert!(is_grad_enabled());
        let inner = no_grad(|| {
            let nested = no_grad(is_grad_enabled);
            (is_grad_enabled(), nested)
        });
        assert_eq!(inner, (false, false));
        assert!(is_grad_enabled());
    }

    #[test]
    fn cpu_runtime_has_no_cuda() {
        assert!(!CpuRuntime.cuda_is_available());
    }
}
