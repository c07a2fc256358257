//! DMA completion slot
//!
//! One slot per EEPROM instance. The task starting a DMA transfer claims
//! the slot and waits on it; the I2C controller's transfer-complete
//! interrupt calls [`DmaCompletion::notify_from_isr`] to wake it.
//!
//! ```text
//! task                         I2C ISR
//! ────                         ───────
//! begin()  (claims slot)
//! start DMA ─────────────────▶ transfer runs
//! wait(kind) ...               notify_from_isr(kind)
//!     ◀──────────────────────── signal
//! finish() (frees slot)
//! ```

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicBool, Ordering};

/// Direction of a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferKind {
    /// Memory read (RX complete)
    Read,
    /// Memory write (TX complete)
    Write,
}

/// Single-slot completion channel between a task and the bus ISR
///
/// Meant to live in a `static` alongside the I2C peripheral so the
/// interrupt handler can reach it without going through the driver lock.
pub struct DmaCompletion<M: RawMutex> {
    pending: AtomicBool,
    signal: Signal<M, TransferKind>,
}

impl<M: RawMutex> Default for DmaCompletion<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> DmaCompletion<M> {
    /// Create an idle slot
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            signal: Signal::new(),
        }
    }

    /// Whether a transfer is outstanding
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Report a finished transfer from interrupt context
    ///
    /// Returns `false` (and does nothing) if no transfer was outstanding.
    pub fn notify_from_isr(&self, kind: TransferKind) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.signal.signal(kind);
        true
    }

    /// Claim the slot before starting a transfer
    ///
    /// Fails if another transfer is still outstanding. Any stale
    /// notification left from an earlier transfer is discarded.
    pub(crate) fn begin(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.signal.reset();
        true
    }

    /// Wait for the completion of a `kind` transfer
    ///
    /// Notifications for the other direction are ignored. There is no
    /// timeout: a lost interrupt stalls the caller.
    pub(crate) async fn wait(&self, kind: TransferKind) {
        while self.signal.wait().await != kind {}
    }

    /// Release the slot
    pub(crate) fn finish(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_notify_without_request_is_ignored() {
        let completion: DmaCompletion<NoopRawMutex> = DmaCompletion::new();
        assert!(!completion.notify_from_isr(TransferKind::Read));
        assert!(!completion.signal.signaled());
    }

    #[test]
    fn test_single_slot() {
        let completion: DmaCompletion<NoopRawMutex> = DmaCompletion::new();
        assert!(completion.begin());
        assert!(completion.is_pending());
        assert!(!completion.begin());

        completion.finish();
        assert!(completion.begin());
    }

    #[test]
    fn test_wait_matches_kind() {
        let completion: DmaCompletion<NoopRawMutex> = DmaCompletion::new();
        assert!(completion.begin());
        assert!(completion.notify_from_isr(TransferKind::Write));

        block_on(completion.wait(TransferKind::Write));
        completion.finish();
        assert!(!completion.is_pending());
    }

    #[test]
    fn test_begin_discards_stale_notification() {
        let completion: DmaCompletion<NoopRawMutex> = DmaCompletion::new();
        assert!(completion.begin());
        completion.notify_from_isr(TransferKind::Read);
        completion.finish();

        assert!(completion.begin());
        assert!(!completion.signal.signaled());
    }
}
