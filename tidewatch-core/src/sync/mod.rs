//! Exclusive access to shared drivers and services
//!
//! Every peripheral driver and persistent-state service is wrapped in a
//! [`Guarded`] at startup and handed out by reference. Callers acquire an
//! [`Access`] token per operation; dropping the token releases the lock, so
//! early returns and `?` can never leak it.
//!
//! Interrupt handlers and code that runs before the executor starts must
//! not suspend. [`Guarded::guard`] takes the caller's [`ExecutionContext`]
//! and only waits for the mutex when suspending is allowed; otherwise it
//! takes the lock only if it is free right now.

mod context;

pub use context::{InterruptScope, RuntimeContext};

use core::ops::{Deref, DerefMut};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use tidewatch_hal::ExecutionContext;

/// Lock acquisition errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LockError {
    /// The resource was held while the caller was not allowed to wait
    ///
    /// Interrupt and pre-scheduler callers are expected to be the only
    /// user of a resource at that moment; hitting this means they were not.
    Contended,
}

/// A named value behind a mutex
///
/// Built with a `const fn`, so it can live in a `static` next to the
/// other shared resources.
pub struct Guarded<M: RawMutex, T> {
    name: &'static str,
    inner: Mutex<M, T>,
}

impl<M: RawMutex, T> Guarded<M, T> {
    /// Wrap `value` under `name`
    pub const fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
        }
    }

    /// Resource name, for logging
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire from task context, waiting as long as it takes
    pub async fn lock(&self) -> Access<'_, M, T> {
        Access {
            name: self.name,
            guard: self.inner.lock().await,
        }
    }

    /// Acquire only if nobody holds the resource right now
    pub fn try_lock(&self) -> Result<Access<'_, M, T>, LockError> {
        self.inner
            .try_lock()
            .map(|guard| Access {
                name: self.name,
                guard,
            })
            .map_err(|_| LockError::Contended)
    }

    /// Acquire according to the caller's execution context
    ///
    /// Waits like [`lock`](Self::lock) when the scheduler is running and
    /// the caller is not an interrupt handler. In any other context this
    /// never suspends and behaves like [`try_lock`](Self::try_lock).
    pub async fn guard<C: ExecutionContext>(
        &self,
        ctx: &C,
    ) -> Result<Access<'_, M, T>, LockError> {
        if ctx.may_block() {
            Ok(self.lock().await)
        } else {
            self.try_lock()
        }
    }

    /// Direct access when the wrapper itself is exclusively borrowed
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Unwrap the value
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Exclusive access token
///
/// Dereferences to the wrapped value. The lock is released when the token
/// is dropped.
pub struct Access<'a, M: RawMutex, T> {
    name: &'static str,
    guard: MutexGuard<'a, M, T>,
}

impl<M: RawMutex, T> Access<'_, M, T> {
    /// Name of the resource this token grants access to
    ///
    /// An associated function so it never shadows a method of `T`.
    pub fn name(this: &Self) -> &'static str {
        this.name
    }
}

impl<M: RawMutex, T> Deref for Access<'_, M, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<M: RawMutex, T> DerefMut for Access<'_, M, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
