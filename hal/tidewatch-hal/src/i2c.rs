//! I2C memory-access abstractions
//!
//! Serial EEPROMs are accessed with a 16-bit memory address sent after the
//! device address. The bus controller does the addressing itself, so the
//! trait exposes whole memory transactions rather than raw bus writes.

use core::future::Future;

/// I2C bus master with memory-addressed transfers
///
/// Two transfer styles are offered:
///
/// - Direct transfers block the caller until the bus is done or the
///   timeout expires.
/// - DMA transfers only *start* the transaction and return immediately.
///   Completion is reported by the controller's interrupt handler, which
///   the driver on top of this trait listens for. The caller must keep
///   `buf`/`data` alive and untouched until that notification arrives.
pub trait I2cMemory {
    /// Error type for I2C operations
    type Error;

    /// Read `buf.len()` bytes starting at `mem_address`, blocking
    ///
    /// # Arguments
    /// * `device` - Device address (8-bit form, R/W bit clear)
    /// * `mem_address` - 16-bit memory address inside the device
    /// * `buf` - Buffer to read into
    /// * `timeout_ms` - Upper bound for the whole transaction
    fn mem_read(
        &mut self,
        device: u8,
        mem_address: u16,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<(), Self::Error>;

    /// Write `data` starting at `mem_address`, blocking
    fn mem_write(
        &mut self,
        device: u8,
        mem_address: u16,
        data: &[u8],
        timeout_ms: u32,
    ) -> Result<(), Self::Error>;

    /// Start a DMA read into `buf`
    fn start_mem_read_dma(
        &mut self,
        device: u8,
        mem_address: u16,
        buf: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Start a DMA write of `data`
    fn start_mem_write_dma(
        &mut self,
        device: u8,
        mem_address: u16,
        data: &[u8],
    ) -> Result<(), Self::Error>;

    /// Wait until the device acknowledges its address again
    ///
    /// EEPROMs NAK their address while the internal write cycle runs.
    /// Implementations poll the address (yielding between attempts) until
    /// it is acknowledged or `timeout_ms` elapses.
    fn wait_ready(
        &mut self,
        device: u8,
        timeout_ms: u32,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}
