//! Simulated W25Q64 behind a QSPI controller

use std::vec;
use std::vec::Vec;

use tidewatch_hal::{QspiBus, QspiCommand};

use super::MockBusError;
use crate::flash::commands::*;
use crate::flash::{FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE, FLASH_SIZE_BYTES};

/// In-memory NOR flash that interprets the W25Q command set
///
/// Programming can only clear bits, erasing sets a whole sector back to
/// 0xFF. Like the real controller, indirect commands are refused while
/// memory-mapped mode is active.
pub struct MockQspiFlash {
    memory: Vec<u8>,
    mapped: bool,
    pending: Option<QspiCommand>,
    reset_enabled: bool,
    volatile_sr_enabled: bool,
    status: [u8; 3],
    fail_program: bool,
    resets: usize,
    programs: usize,
    erases: usize,
}

impl Default for MockQspiFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl MockQspiFlash {
    /// Erased chip, quad mode off, not mapped
    pub fn new() -> Self {
        Self {
            memory: vec![0xFF; FLASH_SIZE_BYTES],
            mapped: false,
            pending: None,
            reset_enabled: false,
            volatile_sr_enabled: false,
            status: [0, 0, 0x60],
            fail_program: false,
            resets: 0,
            programs: 0,
            erases: 0,
        }
    }

    /// Chip contents
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Chip contents, for preloading or corrupting
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// Whether memory-mapped mode is active
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Status register `index` (0-based: SR1, SR2, SR3)
    pub fn status_register(&self, index: usize) -> u8 {
        self.status[index]
    }

    /// Number of completed resets
    pub fn reset_count(&self) -> usize {
        self.resets
    }

    /// Number of page programs carried out
    pub fn program_count(&self) -> usize {
        self.programs
    }

    /// Number of sector or chip erases carried out
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    /// Make page programs fail on the data phase
    pub fn fail_program(&mut self, fail: bool) {
        self.fail_program = fail;
    }

    fn write_enabled(&self) -> bool {
        self.status[0] & SR1_WEL != 0
    }

    fn program(&mut self, address: usize, data: &[u8]) {
        let page_start = address - address % FLASH_PAGE_SIZE;
        for (i, byte) in data.iter().enumerate() {
            // Page program wraps inside the page
            let offset = (address - page_start + i) % FLASH_PAGE_SIZE;
            self.memory[page_start + offset] &= byte;
        }
    }
}

impl QspiBus for MockQspiFlash {
    type Error = MockBusError;

    fn command(&mut self, cmd: &QspiCommand) -> Result<(), Self::Error> {
        if self.mapped {
            return Err(MockBusError);
        }

        match cmd.instruction {
            RESET_ENABLE => self.reset_enabled = true,
            RESET_DEVICE => {
                if self.reset_enabled {
                    self.status[0] = 0;
                    self.reset_enabled = false;
                    self.resets += 1;
                }
            }
            WRITE_ENABLE => self.status[0] |= SR1_WEL,
            VOLATILE_SR_WRITE_ENABLE => self.volatile_sr_enabled = true,
            SECTOR_ERASE => {
                let address = cmd.address.ok_or(MockBusError)? as usize;
                if self.write_enabled() {
                    let start = address - address % FLASH_SECTOR_SIZE;
                    self.memory[start..start + FLASH_SECTOR_SIZE].fill(0xFF);
                    self.status[0] &= !SR1_WEL;
                    self.erases += 1;
                }
            }
            CHIP_ERASE => {
                if self.write_enabled() {
                    self.memory.fill(0xFF);
                    self.status[0] &= !SR1_WEL;
                    self.erases += 1;
                }
            }
            _ if cmd.data_len > 0 => self.pending = Some(*cmd),
            _ => return Err(MockBusError),
        }
        Ok(())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let cmd = self.pending.take().ok_or(MockBusError)?;
        if data.len() != cmd.data_len {
            return Err(MockBusError);
        }

        match cmd.instruction {
            QUAD_PAGE_PROGRAM => {
                if self.fail_program {
                    return Err(MockBusError);
                }
                let address = cmd.address.ok_or(MockBusError)? as usize;
                if self.write_enabled() {
                    self.program(address, data);
                    self.status[0] &= !SR1_WEL;
                    self.programs += 1;
                }
            }
            WRITE_STATUS_2 | WRITE_STATUS_3 => {
                if self.volatile_sr_enabled || self.write_enabled() {
                    let index = if cmd.instruction == WRITE_STATUS_2 { 1 } else { 2 };
                    self.status[index] = data[0];
                    self.volatile_sr_enabled = false;
                }
            }
            _ => return Err(MockBusError),
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        let cmd = self.pending.take().ok_or(MockBusError)?;
        let value = match cmd.instruction {
            READ_STATUS_1 => self.status[0],
            READ_STATUS_2 => self.status[1],
            READ_STATUS_3 => self.status[2],
            _ => return Err(MockBusError),
        };
        buf.fill(value);
        Ok(())
    }

    fn auto_poll(&mut self, cmd: &QspiCommand, mask: u8, matched: u8) -> Result<(), Self::Error> {
        if self.mapped || cmd.instruction != READ_STATUS_1 {
            return Err(MockBusError);
        }
        // Operations complete instantly, so the first poll is final
        if self.status[0] & mask == matched {
            Ok(())
        } else {
            Err(MockBusError)
        }
    }

    fn enable_memory_mapped(&mut self, cmd: &QspiCommand) -> Result<(), Self::Error> {
        if cmd.instruction != FAST_READ_QUAD_IO || self.status[1] & SR2_QE == 0 {
            return Err(MockBusError);
        }
        self.mapped = true;
        Ok(())
    }

    fn disable_memory_mapped(&mut self) -> Result<(), Self::Error> {
        self.mapped = false;
        Ok(())
    }

    fn mapped(&self) -> Option<&[u8]> {
        self.mapped.then_some(self.memory.as_slice())
    }
}
