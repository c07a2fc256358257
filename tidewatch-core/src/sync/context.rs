//! Runtime execution-context tracking
//!
//! The board crate marks the executor as started once tasks are spawned,
//! and every interrupt handler that touches a shared resource holds an
//! [`InterruptScope`] for its duration.

use portable_atomic::{AtomicBool, AtomicU8, Ordering};
use tidewatch_hal::ExecutionContext;

/// Atomics-backed [`ExecutionContext`]
pub struct RuntimeContext {
    scheduler_running: AtomicBool,
    interrupt_depth: AtomicU8,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeContext {
    /// Context before the executor starts, outside any interrupt
    pub const fn new() -> Self {
        Self {
            scheduler_running: AtomicBool::new(false),
            interrupt_depth: AtomicU8::new(0),
        }
    }

    /// Record that the executor is now running tasks
    pub fn mark_scheduler_started(&self) {
        self.scheduler_running.store(true, Ordering::Release);
    }

    /// Enter interrupt context until the returned scope is dropped
    ///
    /// Scopes nest, matching nested interrupt priorities.
    pub fn enter_interrupt(&self) -> InterruptScope<'_> {
        self.interrupt_depth.fetch_add(1, Ordering::AcqRel);
        InterruptScope { ctx: self }
    }
}

impl ExecutionContext for RuntimeContext {
    fn is_scheduler_running(&self) -> bool {
        self.scheduler_running.load(Ordering::Acquire)
    }

    fn is_in_interrupt(&self) -> bool {
        self.interrupt_depth.load(Ordering::Acquire) > 0
    }
}

/// Marks the current code as running inside an interrupt handler
pub struct InterruptScope<'a> {
    ctx: &'a RuntimeContext,
}

impl Drop for InterruptScope<'_> {
    fn drop(&mut self) {
        self.ctx.interrupt_depth.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_context_may_not_block() {
        let ctx = RuntimeContext::new();
        assert!(!ctx.is_scheduler_running());
        assert!(!ctx.may_block());

        ctx.mark_scheduler_started();
        assert!(ctx.may_block());
    }

    #[test]
    fn test_interrupt_scopes_nest() {
        let ctx = RuntimeContext::new();
        ctx.mark_scheduler_started();

        {
            let _outer = ctx.enter_interrupt();
            assert!(ctx.is_in_interrupt());
            {
                let _inner = ctx.enter_interrupt();
                assert!(!ctx.may_block());
            }
            assert!(ctx.is_in_interrupt());
        }

        assert!(!ctx.is_in_interrupt());
        assert!(ctx.may_block());
    }
}
