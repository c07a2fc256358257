//! Host-side peripheral simulators
//!
//! Used by the driver tests here and, through the `mock` feature, by the
//! storage tests downstream. They keep an operation log and support fault
//! injection so error paths can be exercised.

mod i2c;
mod qspi;

pub use i2c::{BusOp, MockI2cMemory};
pub use qspi::MockQspiFlash;

use std::cell::Cell;
use std::rc::Rc;

use tidewatch_hal::{ExecutionContext, OutputPin};

/// Error returned by the mock buses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBusError;

/// Fixed execution context
#[derive(Debug, Clone, Copy)]
pub struct MockContext {
    /// Reported scheduler state
    pub scheduler_running: bool,
    /// Reported interrupt state
    pub in_interrupt: bool,
}

impl MockContext {
    /// Task context with the scheduler running
    pub const fn running() -> Self {
        Self {
            scheduler_running: true,
            in_interrupt: false,
        }
    }

    /// Before the scheduler starts
    pub const fn boot() -> Self {
        Self {
            scheduler_running: false,
            in_interrupt: false,
        }
    }
}

impl ExecutionContext for MockContext {
    fn is_scheduler_running(&self) -> bool {
        self.scheduler_running
    }

    fn is_in_interrupt(&self) -> bool {
        self.in_interrupt
    }
}

/// Output pin whose level can be observed by a simulated device
pub struct MockPin {
    level: Rc<Cell<bool>>,
    transitions: usize,
}

impl Default for MockPin {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPin {
    /// Pin starting low
    pub fn new() -> Self {
        Self {
            level: Rc::new(Cell::new(false)),
            transitions: 0,
        }
    }

    /// Shared handle to the pin level
    pub fn line(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.level)
    }

    /// Number of level changes so far
    pub fn transitions(&self) -> usize {
        self.transitions
    }

    fn drive(&mut self, high: bool) {
        if self.level.get() != high {
            self.transitions += 1;
        }
        self.level.set(high);
    }
}

impl OutputPin for MockPin {
    fn set_high(&mut self) {
        self.drive(true);
    }

    fn set_low(&mut self) {
        self.drive(false);
    }

    fn is_set_high(&self) -> bool {
        self.level.get()
    }
}

/// Delay that returns immediately, keeping a running total
#[derive(Debug, Default)]
pub struct NoopDelay {
    total_ns: u64,
}

impl NoopDelay {
    /// Create a delay with nothing accumulated
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all requested delays in milliseconds
    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}

impl embedded_hal::delay::DelayNs for NoopDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}
