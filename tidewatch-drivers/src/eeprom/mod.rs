//! 24LC512 serial EEPROM driver
//!
//! 64 KiB, 128-byte write pages, write-protect pin active high.
//!
//! Transfers of at least [`MIN_DMA_TRANSFER_SIZE`] bytes issued once the
//! scheduler is running go through DMA and suspend the calling task until
//! the bus interrupt reports completion. Everything else uses a direct,
//! blocking transfer bounded by [`OP_TIMEOUT_MS`].
//!
//! The driver keeps a single outstanding DMA request. Callers reach it
//! through a `Guarded` lock, so only one task at a time is ever inside.

mod dma;

pub use dma::{DmaCompletion, TransferKind};

use embassy_sync::blocking_mutex::raw::RawMutex;
use tidewatch_core::state::{DeviceStatus, ErrorCode};
use tidewatch_core::traits::{ByteMemory, MemoryError};
use tidewatch_hal::{ExecutionContext, I2cMemory, OutputPin};

/// Device address on the bus (8-bit form)
pub const I2C_ADDRESS: u8 = 0xA0;

/// Device capacity
pub const EEPROM_SIZE_BYTES: usize = 65_536;

/// Write page size
pub const EEPROM_PAGE_SIZE_BYTES: usize = 128;

/// Number of write pages
pub const EEPROM_PAGE_COUNT: usize = EEPROM_SIZE_BYTES / EEPROM_PAGE_SIZE_BYTES;

/// Transfers of this many bytes or more use DMA
pub const MIN_DMA_TRANSFER_SIZE: usize = 64;

/// Timeout for direct transfers and write-cycle polling
pub const OP_TIMEOUT_MS: u32 = 1_000;

/// EEPROM driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    /// Transfer extends past the end of the device
    OutOfRange,
    /// Write is larger than a page or crosses a page boundary
    PageOverflow,
    /// Bus transfer failed
    Bus,
    /// A DMA transfer is already outstanding
    Busy,
}

impl From<EepromError> for MemoryError {
    fn from(e: EepromError) -> Self {
        match e {
            EepromError::OutOfRange => MemoryError::OutOfRange,
            EepromError::PageOverflow => MemoryError::PageOverflow,
            EepromError::Bus => MemoryError::Bus,
            EepromError::Busy => MemoryError::Busy,
        }
    }
}

/// Check that `[address, address + len)` lies inside the device
fn check_range(address: usize, len: usize) -> Result<u16, EepromError> {
    match address.checked_add(len) {
        Some(end) if end <= EEPROM_SIZE_BYTES => {
            u16::try_from(address).map_err(|_| EepromError::OutOfRange)
        }
        _ => Err(EepromError::OutOfRange),
    }
}

/// Check range and the page rule for a write
fn check_write(address: usize, len: usize) -> Result<u16, EepromError> {
    let mem_address = check_range(address, len)?;
    if len > EEPROM_PAGE_SIZE_BYTES || address % EEPROM_PAGE_SIZE_BYTES + len > EEPROM_PAGE_SIZE_BYTES
    {
        return Err(EepromError::PageOverflow);
    }
    Ok(mem_address)
}

/// 24LC512 EEPROM
///
/// - `B`: I2C bus with memory-addressed transfers
/// - `P`: write-protect pin (high = protected)
/// - `C`: execution context, decides between DMA and direct transfers
pub struct Eeprom<'a, M: RawMutex, B, P, C> {
    bus: B,
    write_protect: P,
    context: C,
    completion: &'a DmaCompletion<M>,
    status: &'a DeviceStatus,
}

impl<'a, M, B, P, C> Eeprom<'a, M, B, P, C>
where
    M: RawMutex,
    B: I2cMemory,
    P: OutputPin,
    C: ExecutionContext,
{
    /// Create a new EEPROM driver
    ///
    /// The device starts write-protected. `completion` must be the slot
    /// the I2C interrupt handler notifies.
    pub fn new(
        bus: B,
        write_protect: P,
        context: C,
        completion: &'a DmaCompletion<M>,
        status: &'a DeviceStatus,
    ) -> Self {
        let mut eeprom = Self {
            bus,
            write_protect,
            context,
            completion,
            status,
        };
        eeprom.disable_writes();
        eeprom
    }

    /// Protect the device and verify it answers
    ///
    /// Reads page 0 over the direct path. On failure the device error is
    /// latched as [`ErrorCode::Eeprom`].
    pub fn initialize(&mut self) -> Result<(), EepromError> {
        self.disable_writes();

        let mut page = [0u8; EEPROM_PAGE_SIZE_BYTES];
        if self
            .bus
            .mem_read(I2C_ADDRESS, 0, &mut page, OP_TIMEOUT_MS)
            .is_err()
        {
            error!("EEPROM test read failed");
            self.status.set_error(ErrorCode::Eeprom);
            return Err(EepromError::Bus);
        }

        info!("EEPROM ready");
        Ok(())
    }

    /// Read `buf.len()` bytes starting at `address`
    pub async fn read_bytes(&mut self, address: usize, buf: &mut [u8]) -> Result<(), EepromError> {
        let mem_address = check_range(address, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }

        if !self.use_dma(buf.len()) {
            return self
                .bus
                .mem_read(I2C_ADDRESS, mem_address, buf, OP_TIMEOUT_MS)
                .map_err(|_| {
                    warn!("EEPROM read at {} failed", address);
                    EepromError::Bus
                });
        }

        if !self.completion.begin() {
            return Err(EepromError::Busy);
        }
        if self
            .bus
            .start_mem_read_dma(I2C_ADDRESS, mem_address, buf)
            .is_err()
        {
            self.completion.finish();
            warn!("EEPROM DMA read at {} failed to start", address);
            return Err(EepromError::Bus);
        }
        self.completion.wait(TransferKind::Read).await;
        self.completion.finish();

        trace!("EEPROM DMA read {} bytes at {}", buf.len(), address);
        Ok(())
    }

    /// Write `data` at `address`
    ///
    /// The write must stay within one page. Returns once the device has
    /// finished its internal write cycle.
    pub async fn write_bytes(&mut self, address: usize, data: &[u8]) -> Result<(), EepromError> {
        let mem_address = check_write(address, data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        if self.use_dma(data.len()) {
            if !self.completion.begin() {
                return Err(EepromError::Busy);
            }
            if self
                .bus
                .start_mem_write_dma(I2C_ADDRESS, mem_address, data)
                .is_err()
            {
                self.completion.finish();
                warn!("EEPROM DMA write at {} failed to start", address);
                return Err(EepromError::Bus);
            }
            self.completion.wait(TransferKind::Write).await;
            self.completion.finish();
        } else if self
            .bus
            .mem_write(I2C_ADDRESS, mem_address, data, OP_TIMEOUT_MS)
            .is_err()
        {
            warn!("EEPROM write at {} failed", address);
            return Err(EepromError::Bus);
        }

        self.bus
            .wait_ready(I2C_ADDRESS, OP_TIMEOUT_MS)
            .await
            .map_err(|_| {
                warn!("EEPROM write cycle at {} timed out", address);
                EepromError::Bus
            })
    }

    /// Read one whole page
    pub async fn read_page(
        &mut self,
        page: usize,
        buf: &mut [u8; EEPROM_PAGE_SIZE_BYTES],
    ) -> Result<(), EepromError> {
        self.read_bytes(page * EEPROM_PAGE_SIZE_BYTES, buf).await
    }

    /// Write up to one page of data at the start of `page`
    pub async fn write_page(&mut self, page: usize, data: &[u8]) -> Result<(), EepromError> {
        if page >= EEPROM_PAGE_COUNT {
            return Err(EepromError::OutOfRange);
        }
        self.write_bytes(page * EEPROM_PAGE_SIZE_BYTES, data).await
    }

    /// Write `data` across consecutive pages starting at `start_page`
    ///
    /// Stops at the first page that fails; earlier pages stay written.
    pub async fn write_multiple_pages(
        &mut self,
        start_page: usize,
        data: &[u8],
    ) -> Result<(), EepromError> {
        check_range(start_page * EEPROM_PAGE_SIZE_BYTES, data.len())?;

        for (offset, chunk) in data.chunks(EEPROM_PAGE_SIZE_BYTES).enumerate() {
            self.write_page(start_page + offset, chunk).await?;
        }
        Ok(())
    }

    /// Release write protection
    pub fn enable_writes(&mut self) {
        self.write_protect.set_low();
    }

    /// Engage write protection
    pub fn disable_writes(&mut self) {
        self.write_protect.set_high();
    }

    /// Whether write protection is engaged
    pub fn is_write_protected(&self) -> bool {
        self.write_protect.is_set_high()
    }

    /// Get a reference to the bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Get a mutable reference to the bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    fn use_dma(&self, len: usize) -> bool {
        len >= MIN_DMA_TRANSFER_SIZE && self.context.is_scheduler_running()
    }
}

impl<M, B, P, C> ByteMemory for Eeprom<'_, M, B, P, C>
where
    M: RawMutex,
    B: I2cMemory,
    P: OutputPin,
    C: ExecutionContext,
{
    const CAPACITY: usize = EEPROM_SIZE_BYTES;
    const PAGE_SIZE: usize = EEPROM_PAGE_SIZE_BYTES;

    async fn read_bytes(&mut self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        Ok(Eeprom::read_bytes(self, address, buf).await?)
    }

    async fn write_bytes(&mut self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        Ok(Eeprom::write_bytes(self, address, data).await?)
    }

    async fn write_page(&mut self, page: usize, data: &[u8]) -> Result<(), MemoryError> {
        Ok(Eeprom::write_page(self, page, data).await?)
    }

    async fn write_multiple_pages(
        &mut self,
        start_page: usize,
        data: &[u8],
    ) -> Result<(), MemoryError> {
        Ok(Eeprom::write_multiple_pages(self, start_page, data).await?)
    }

    fn enable_writes(&mut self) {
        Eeprom::enable_writes(self);
    }

    fn disable_writes(&mut self) {
        Eeprom::disable_writes(self);
    }
}
