//! Execution context queries
//!
//! Code that may suspend (mutex waits, DMA completion waits) has to know
//! whether it is allowed to. Interrupt handlers and code running before the
//! executor starts must never wait.

/// Reports the execution state of the caller
pub trait ExecutionContext {
    /// Whether the task scheduler/executor has started
    fn is_scheduler_running(&self) -> bool;

    /// Whether the caller is running inside an interrupt handler
    fn is_in_interrupt(&self) -> bool;

    /// Whether the caller may suspend waiting for another task
    fn may_block(&self) -> bool {
        self.is_scheduler_running() && !self.is_in_interrupt()
    }
}

impl<C: ExecutionContext + ?Sized> ExecutionContext for &C {
    fn is_scheduler_running(&self) -> bool {
        (**self).is_scheduler_running()
    }

    fn is_in_interrupt(&self) -> bool {
        (**self).is_in_interrupt()
    }
}
