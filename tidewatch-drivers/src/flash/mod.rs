//! W25Q64 QSPI NOR flash driver
//!
//! The chip normally sits in memory-mapped mode so reads are plain slice
//! accesses. Programming and erasing leave memory-mapped mode, run the
//! indirect command sequence and map the chip again afterwards.

pub(crate) mod commands;

use embedded_hal::delay::DelayNs;
use tidewatch_core::state::{DeviceStatus, ErrorCode};
use tidewatch_core::traits::{BlockMemory, MemoryError};
use tidewatch_hal::{QspiBus, QspiCommand, QspiLines};

use commands::*;

/// Usable flash size
pub const FLASH_SIZE_BYTES: usize = 1 << 22;

/// Program page size
pub const FLASH_PAGE_SIZE: usize = 256;

/// Erase sector size
pub const FLASH_SECTOR_SIZE: usize = 4096;

/// Number of program pages
pub const FLASH_PAGE_COUNT: usize = FLASH_SIZE_BYTES / FLASH_PAGE_SIZE;

/// Number of erase sectors
pub const FLASH_SECTOR_COUNT: usize = FLASH_SIZE_BYTES / FLASH_SECTOR_SIZE;

/// Settling time after a software reset
const RESET_DELAY_MS: u32 = 1;

/// Settling time after switching to quad mode or memory-mapped mode
const MODE_SWITCH_DELAY_MS: u32 = 100;

/// Flash driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Page or sector index past the end of the chip
    OutOfRange,
    /// Data does not fit in one page
    TooLong,
    /// QSPI transfer or status poll failed
    Bus,
    /// Not in memory-mapped mode
    NotMapped,
    /// Mapped read-back after bring-up returned zeros
    TestFailed,
}

impl From<FlashError> for MemoryError {
    fn from(e: FlashError) -> Self {
        match e {
            FlashError::OutOfRange => MemoryError::OutOfRange,
            FlashError::TooLong => MemoryError::PageOverflow,
            FlashError::Bus | FlashError::TestFailed => MemoryError::Bus,
            FlashError::NotMapped => MemoryError::NotMapped,
        }
    }
}

/// W25Q64 on a QSPI controller
pub struct W25qFlash<'a, Q, D> {
    qspi: Q,
    delay: D,
    status: &'a DeviceStatus,
}

impl<'a, Q, D> W25qFlash<'a, Q, D>
where
    Q: QspiBus,
    D: DelayNs,
{
    /// Create a new flash driver
    ///
    /// Call [`initialize`](Self::initialize) before use.
    pub fn new(qspi: Q, delay: D, status: &'a DeviceStatus) -> Self {
        Self {
            qspi,
            delay,
            status,
        }
    }

    /// Reset the chip, enable quad I/O and enter memory-mapped mode
    ///
    /// On failure the device error is latched as [`ErrorCode::Flash`].
    pub fn initialize(&mut self) -> Result<(), FlashError> {
        match self.bring_up() {
            Ok(()) => {
                info!("Flash ready");
                Ok(())
            }
            Err(e) => {
                error!("Flash bring-up failed: {:?}", e);
                self.status.set_error(ErrorCode::Flash);
                Err(e)
            }
        }
    }

    /// The whole memory-mapped chip
    pub fn mapped(&self) -> Result<&[u8], FlashError> {
        self.qspi
            .mapped()
            .and_then(|window| window.get(..FLASH_SIZE_BYTES))
            .ok_or(FlashError::NotMapped)
    }

    /// Memory-mapped contents of one page
    pub fn page(&self, page: usize) -> Result<&[u8], FlashError> {
        if page >= FLASH_PAGE_COUNT {
            return Err(FlashError::OutOfRange);
        }
        let start = page * FLASH_PAGE_SIZE;
        Ok(&self.mapped()?[start..start + FLASH_PAGE_SIZE])
    }

    /// Program `data` at the start of `page`
    ///
    /// The page must have been erased; programming only clears bits.
    pub fn write_page(&mut self, page: usize, data: &[u8]) -> Result<(), FlashError> {
        if page >= FLASH_PAGE_COUNT {
            return Err(FlashError::OutOfRange);
        }
        if data.len() > FLASH_PAGE_SIZE {
            return Err(FlashError::TooLong);
        }

        let address = (page * FLASH_PAGE_SIZE) as u32;
        self.unmapped(|flash| flash.program(address, data))
    }

    /// Erase one 4 KiB sector
    pub fn erase_sector(&mut self, sector: usize) -> Result<(), FlashError> {
        if sector >= FLASH_SECTOR_COUNT {
            return Err(FlashError::OutOfRange);
        }

        let address = (sector * FLASH_SECTOR_SIZE) as u32;
        self.unmapped(|flash| flash.erase(&QspiCommand::addressed(SECTOR_ERASE, address)))
    }

    /// Erase the whole chip
    pub fn erase_chip(&mut self) -> Result<(), FlashError> {
        self.unmapped(|flash| flash.erase(&QspiCommand::instruction(CHIP_ERASE)))
    }

    /// Get a reference to the QSPI bus
    pub fn qspi(&self) -> &Q {
        &self.qspi
    }

    /// Get a mutable reference to the QSPI bus
    pub fn qspi_mut(&mut self) -> &mut Q {
        &mut self.qspi
    }

    fn bring_up(&mut self) -> Result<(), FlashError> {
        self.reset_chip()?;
        self.delay.delay_ms(RESET_DELAY_MS);
        self.wait_ready()?;
        self.write_enable()?;
        self.configure_quad()?;
        self.delay.delay_ms(MODE_SWITCH_DELAY_MS);
        self.enable_memory_mapped()?;
        self.test_read()
    }

    /// Run a write-side operation outside memory-mapped mode
    fn unmapped(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<(), FlashError>,
    ) -> Result<(), FlashError> {
        if self.qspi.disable_memory_mapped().is_err() {
            self.status.set_error(ErrorCode::Flash);
            return Err(FlashError::Bus);
        }

        if let Err(e) = op(self) {
            warn!("Flash operation failed: {:?}", e);
            self.status.set_error(ErrorCode::Flash);
            // Best effort to keep reads working
            let _ = self.enable_memory_mapped();
            return Err(e);
        }

        self.enable_memory_mapped()
    }

    fn cmd(&mut self, cmd: &QspiCommand) -> Result<(), FlashError> {
        self.qspi.command(cmd).map_err(|_| FlashError::Bus)
    }

    fn reset_chip(&mut self) -> Result<(), FlashError> {
        self.cmd(&QspiCommand::instruction(RESET_ENABLE))?;
        self.cmd(&QspiCommand::instruction(RESET_DEVICE))
    }

    fn write_enable(&mut self) -> Result<(), FlashError> {
        self.cmd(&QspiCommand::instruction(WRITE_ENABLE))?;
        self.qspi
            .auto_poll(&QspiCommand::register(READ_STATUS_1, 1), SR1_WEL, SR1_WEL)
            .map_err(|_| FlashError::Bus)
    }

    fn wait_ready(&mut self) -> Result<(), FlashError> {
        self.qspi
            .auto_poll(&QspiCommand::register(READ_STATUS_1, 1), SR1_BUSY, 0)
            .map_err(|_| FlashError::Bus)
    }

    fn read_register(&mut self, instruction: u8) -> Result<u8, FlashError> {
        let mut value = [0u8; 1];
        self.cmd(&QspiCommand::register(instruction, 1))?;
        self.qspi
            .receive(&mut value)
            .map_err(|_| FlashError::Bus)?;
        Ok(value[0])
    }

    fn write_register(&mut self, instruction: u8, value: u8) -> Result<(), FlashError> {
        self.cmd(&QspiCommand::register(instruction, 1))?;
        self.qspi.transmit(&[value]).map_err(|_| FlashError::Bus)
    }

    /// Set QE in SR2 and maximum output drive in SR3 (volatile writes)
    fn configure_quad(&mut self) -> Result<(), FlashError> {
        let sr2 = self.read_register(READ_STATUS_2)?;
        self.cmd(&QspiCommand::instruction(VOLATILE_SR_WRITE_ENABLE))?;
        self.write_register(WRITE_STATUS_2, sr2 | SR2_QE)?;

        let sr3 = self.read_register(READ_STATUS_3)?;
        self.cmd(&QspiCommand::instruction(VOLATILE_SR_WRITE_ENABLE))?;
        self.write_register(WRITE_STATUS_3, sr3 & SR3_DRIVE_MASK)
    }

    fn enable_memory_mapped(&mut self) -> Result<(), FlashError> {
        let read = QspiCommand {
            instruction: FAST_READ_QUAD_IO,
            address: Some(0),
            address_lines: QspiLines::Quad,
            alternate: Some(QUAD_READ_MODE_BITS),
            dummy_cycles: QUAD_READ_DUMMY_CYCLES,
            data_lines: QspiLines::Quad,
            data_len: 0,
        };
        self.qspi
            .enable_memory_mapped(&read)
            .map_err(|_| FlashError::Bus)
    }

    /// A dead or unpowered chip reads back as zeros
    fn test_read(&self) -> Result<(), FlashError> {
        let window = self.mapped()?;
        if window[..4] == [0, 0, 0, 0] {
            return Err(FlashError::TestFailed);
        }
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let program = QspiCommand {
            instruction: QUAD_PAGE_PROGRAM,
            address: Some(address),
            address_lines: QspiLines::Single,
            alternate: None,
            dummy_cycles: 0,
            data_lines: QspiLines::Quad,
            data_len: data.len(),
        };

        self.write_enable()?;
        self.cmd(&program)?;
        self.qspi.transmit(data).map_err(|_| FlashError::Bus)?;
        self.wait_ready()
    }

    fn erase(&mut self, cmd: &QspiCommand) -> Result<(), FlashError> {
        self.write_enable()?;
        self.cmd(cmd)?;
        self.wait_ready()
    }
}

impl<Q, D> BlockMemory for W25qFlash<'_, Q, D>
where
    Q: QspiBus,
    D: DelayNs,
{
    const PAGE_SIZE: usize = FLASH_PAGE_SIZE;
    const PAGE_COUNT: usize = FLASH_PAGE_COUNT;
    const SECTOR_SIZE: usize = FLASH_SECTOR_SIZE;

    fn page(&self, page: usize) -> Result<&[u8], MemoryError> {
        Ok(W25qFlash::page(self, page)?)
    }

    fn write_page(&mut self, page: usize, data: &[u8]) -> Result<(), MemoryError> {
        Ok(W25qFlash::write_page(self, page, data)?)
    }

    fn erase_sector(&mut self, sector: usize) -> Result<(), MemoryError> {
        Ok(W25qFlash::erase_sector(self, sector)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockQspiFlash, NoopDelay};

    fn flash(status: &DeviceStatus) -> W25qFlash<'_, MockQspiFlash, NoopDelay> {
        W25qFlash::new(MockQspiFlash::new(), NoopDelay::new(), status)
    }

    #[test]
    fn test_initialize_enters_quad_mapped_mode() {
        let status = DeviceStatus::new();
        let mut flash = flash(&status);

        assert_eq!(flash.initialize(), Ok(()));
        assert!(flash.qspi().is_mapped());
        assert_eq!(flash.qspi().reset_count(), 1);
        assert_ne!(flash.qspi().status_register(1) & SR2_QE, 0);
        assert_eq!(flash.qspi().status_register(2) & !SR3_DRIVE_MASK, 0);
        assert_eq!(flash.mapped().map(<[u8]>::len), Ok(FLASH_SIZE_BYTES));
        assert!(flash.delay.total_ms() >= 101);
        assert!(!status.has_error());
    }

    #[test]
    fn test_initialize_detects_dead_chip() {
        let status = DeviceStatus::new();
        let mut flash = flash(&status);
        flash.qspi_mut().memory_mut()[..4].fill(0);

        assert_eq!(flash.initialize(), Err(FlashError::TestFailed));
        assert_eq!(status.error(), ErrorCode::Flash);
    }

    #[test]
    fn test_reads_need_mapped_mode() {
        let status = DeviceStatus::new();
        let flash = flash(&status);
        assert_eq!(flash.page(0), Err(FlashError::NotMapped));
    }

    #[test]
    fn test_write_page_programs_and_remaps() {
        let status = DeviceStatus::new();
        let mut flash = flash(&status);
        flash.initialize().unwrap();

        let data = [0x12u8, 0x34, 0x56, 0x78];
        assert_eq!(flash.write_page(7, &data), Ok(()));
        assert!(flash.qspi().is_mapped());

        let page = flash.page(7).unwrap();
        assert_eq!(&page[..4], &data);
        assert!(page[4..].iter().all(|&b| b == 0xFF));
        assert_eq!(flash.qspi().program_count(), 1);
    }

    #[test]
    fn test_erase_sector_restores_ones() {
        let status = DeviceStatus::new();
        let mut flash = flash(&status);
        flash.initialize().unwrap();

        flash.write_page(16, &[0u8; FLASH_PAGE_SIZE]).unwrap();
        assert_eq!(flash.page(16).unwrap()[0], 0);

        // Page 16 is the first page of sector 1
        flash.erase_sector(1).unwrap();
        assert!(flash.page(16).unwrap().iter().all(|&b| b == 0xFF));
        assert_eq!(flash.qspi().erase_count(), 1);
    }

    #[test]
    fn test_erase_chip() {
        let status = DeviceStatus::new();
        let mut flash = flash(&status);
        flash.initialize().unwrap();

        flash.write_page(FLASH_PAGE_COUNT - 1, &[0u8; 8]).unwrap();
        flash.erase_chip().unwrap();
        assert!(flash.mapped().unwrap().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_range_checks() {
        let status = DeviceStatus::new();
        let mut flash = flash(&status);
        flash.initialize().unwrap();

        assert_eq!(flash.write_page(FLASH_PAGE_COUNT, &[0]), Err(FlashError::OutOfRange));
        assert_eq!(
            flash.write_page(0, &[0u8; FLASH_PAGE_SIZE + 1]),
            Err(FlashError::TooLong)
        );
        assert_eq!(flash.erase_sector(FLASH_SECTOR_COUNT), Err(FlashError::OutOfRange));
        assert_eq!(flash.page(FLASH_PAGE_COUNT), Err(FlashError::OutOfRange));
        assert_eq!(flash.qspi().program_count(), 0);
        assert!(!status.has_error());
    }

    #[test]
    fn test_program_failure_latches_error_and_remaps() {
        let status = DeviceStatus::new();
        let mut flash = flash(&status);
        flash.initialize().unwrap();
        flash.qspi_mut().fail_program(true);

        assert_eq!(flash.write_page(0, &[0u8; 4]), Err(FlashError::Bus));
        assert_eq!(status.error(), ErrorCode::Flash);
        assert!(flash.qspi().is_mapped());
    }

    #[test]
    fn test_block_memory_trait() {
        fn first_byte<F: BlockMemory>(flash: &F, page: usize) -> Result<u8, MemoryError> {
            Ok(flash.page(page)?[0])
        }

        let status = DeviceStatus::new();
        let mut flash = flash(&status);
        assert_eq!(first_byte(&flash, 0), Err(MemoryError::NotMapped));

        flash.initialize().unwrap();
        BlockMemory::write_page(&mut flash, 3, &[0x42]).unwrap();
        assert_eq!(first_byte(&flash, 3), Ok(0x42));
    }
}
