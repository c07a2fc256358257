//! Simulated 24LC512 on a memory-addressed I2C bus

use std::cell::Cell;
use std::rc::Rc;
use std::vec;
use std::vec::Vec;

use embassy_sync::blocking_mutex::raw::RawMutex;
use tidewatch_hal::I2cMemory;

use super::MockBusError;
use crate::eeprom::{DmaCompletion, TransferKind, EEPROM_SIZE_BYTES};

/// One transaction seen by the mock bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    /// Memory read
    Read {
        /// Start address
        address: u16,
        /// Byte count
        len: usize,
        /// Whether it went through DMA
        dma: bool,
    },
    /// Memory write
    Write {
        /// Start address
        address: u16,
        /// Byte count
        len: usize,
        /// Whether it went through DMA
        dma: bool,
    },
}

/// In-memory EEPROM behind a simulated I2C controller
///
/// DMA transfers complete immediately and report through the
/// [`DmaCompletion`] slot, as the transfer-complete interrupt would.
/// When a write-protect line is attached, writes while it is high are
/// acknowledged but not stored, like the real chip.
pub struct MockI2cMemory<'a, M: RawMutex> {
    cells: Vec<u8>,
    completion: &'a DmaCompletion<M>,
    write_protect: Option<Rc<Cell<bool>>>,
    ops: Vec<BusOp>,
    fail_reads: bool,
    fail_writes_after: Option<usize>,
    writes: usize,
    protected_writes: usize,
}

impl<'a, M: RawMutex> MockI2cMemory<'a, M> {
    /// Blank (all 0xFF) device
    pub fn new(completion: &'a DmaCompletion<M>) -> Self {
        Self {
            cells: vec![0xFF; EEPROM_SIZE_BYTES],
            completion,
            write_protect: None,
            ops: Vec::new(),
            fail_reads: false,
            fail_writes_after: None,
            writes: 0,
            protected_writes: 0,
        }
    }

    /// Attach the write-protect line (see [`MockPin::line`](super::MockPin::line))
    pub fn with_write_protect(mut self, line: Rc<Cell<bool>>) -> Self {
        self.write_protect = Some(line);
        self
    }

    /// Device contents
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Device contents, for preloading or corrupting
    pub fn cells_mut(&mut self) -> &mut [u8] {
        &mut self.cells
    }

    /// Transactions so far
    pub fn ops(&self) -> &[BusOp] {
        &self.ops
    }

    /// Forget the transaction log
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Number of accepted write transactions
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Accepted writes that the chip dropped because it was protected
    pub fn protected_writes(&self) -> usize {
        self.protected_writes
    }

    /// Make every read fail
    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Fail every write once `count` writes have been accepted
    pub fn fail_writes_after(&mut self, count: usize) {
        self.fail_writes_after = Some(count);
    }

    /// Remove all injected failures
    pub fn clear_failures(&mut self) {
        self.fail_reads = false;
        self.fail_writes_after = None;
    }

    fn read(&mut self, address: u16, buf: &mut [u8], dma: bool) -> Result<(), MockBusError> {
        if self.fail_reads {
            return Err(MockBusError);
        }
        self.ops.push(BusOp::Read {
            address,
            len: buf.len(),
            dma,
        });

        let start = usize::from(address);
        buf.copy_from_slice(&self.cells[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: u16, data: &[u8], dma: bool) -> Result<(), MockBusError> {
        if self.fail_writes_after.is_some_and(|limit| self.writes >= limit) {
            return Err(MockBusError);
        }
        self.ops.push(BusOp::Write {
            address,
            len: data.len(),
            dma,
        });
        self.writes += 1;

        if self.write_protect.as_ref().is_some_and(|line| line.get()) {
            self.protected_writes += 1;
            return Ok(());
        }

        let start = usize::from(address);
        self.cells[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl<M: RawMutex> I2cMemory for MockI2cMemory<'_, M> {
    type Error = MockBusError;

    fn mem_read(
        &mut self,
        _device: u8,
        mem_address: u16,
        buf: &mut [u8],
        _timeout_ms: u32,
    ) -> Result<(), Self::Error> {
        self.read(mem_address, buf, false)
    }

    fn mem_write(
        &mut self,
        _device: u8,
        mem_address: u16,
        data: &[u8],
        _timeout_ms: u32,
    ) -> Result<(), Self::Error> {
        self.write(mem_address, data, false)
    }

    fn start_mem_read_dma(
        &mut self,
        _device: u8,
        mem_address: u16,
        buf: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.read(mem_address, buf, true)?;
        self.completion.notify_from_isr(TransferKind::Read);
        Ok(())
    }

    fn start_mem_write_dma(
        &mut self,
        _device: u8,
        mem_address: u16,
        data: &[u8],
    ) -> Result<(), Self::Error> {
        self.write(mem_address, data, true)?;
        self.completion.notify_from_isr(TransferKind::Write);
        Ok(())
    }

    async fn wait_ready(&mut self, _device: u8, _timeout_ms: u32) -> Result<(), Self::Error> {
        Ok(())
    }
}
