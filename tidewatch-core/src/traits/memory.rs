//! Non-volatile memory traits
//!
//! [`ByteMemory`] is a byte-addressable serial EEPROM written in pages
//! behind a write-protect line. [`BlockMemory`] is NOR flash that must be
//! erased per sector and is read through a memory-mapped window.

use core::future::Future;
use core::ops::{Deref, DerefMut};

/// Errors from non-volatile memory operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemoryError {
    /// Address range exceeds the device
    OutOfRange,
    /// Write larger than a page or crossing a page boundary
    PageOverflow,
    /// Transfer failed on the bus
    Bus,
    /// Another asynchronous transfer is still outstanding
    Busy,
    /// Memory-mapped view is not available
    NotMapped,
    /// No free space left
    Full,
}

/// Byte-addressable, page-written memory
pub trait ByteMemory {
    /// Device size in bytes
    const CAPACITY: usize;

    /// Write page size in bytes
    const PAGE_SIZE: usize;

    /// Read `buf.len()` bytes starting at `address`
    fn read_bytes(
        &mut self,
        address: usize,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(), MemoryError>>;

    /// Write `data` at `address`, within a single page
    fn write_bytes(
        &mut self,
        address: usize,
        data: &[u8],
    ) -> impl Future<Output = Result<(), MemoryError>>;

    /// Write up to one page of data at the start of page `page`
    fn write_page(
        &mut self,
        page: usize,
        data: &[u8],
    ) -> impl Future<Output = Result<(), MemoryError>>;

    /// Write `data` across consecutive pages starting at `start_page`
    ///
    /// Stops at the first failing page.
    fn write_multiple_pages(
        &mut self,
        start_page: usize,
        data: &[u8],
    ) -> impl Future<Output = Result<(), MemoryError>>;

    /// Release the write protection
    fn enable_writes(&mut self);

    /// Engage the write protection
    fn disable_writes(&mut self);
}

/// Sector-erased memory with a memory-mapped read view
pub trait BlockMemory {
    /// Program page size in bytes
    const PAGE_SIZE: usize;

    /// Number of program pages
    const PAGE_COUNT: usize;

    /// Erase sector size in bytes
    const SECTOR_SIZE: usize;

    /// Memory-mapped contents of one page
    fn page(&self, page: usize) -> Result<&[u8], MemoryError>;

    /// Program one page (bits can only be cleared)
    fn write_page(&mut self, page: usize, data: &[u8]) -> Result<(), MemoryError>;

    /// Erase one sector back to all-ones
    fn erase_sector(&mut self, sector: usize) -> Result<(), MemoryError>;
}

/// Write-protect bracket for a [`ByteMemory`]
///
/// Writes are enabled on creation and disabled again when dropped, so every
/// exit path leaves the device protected.
pub struct WriteEnable<'a, E: ByteMemory> {
    memory: &'a mut E,
}

impl<'a, E: ByteMemory> WriteEnable<'a, E> {
    /// Enable writes on `memory` for the lifetime of the bracket
    pub fn new(memory: &'a mut E) -> Self {
        memory.enable_writes();
        Self { memory }
    }
}

impl<E: ByteMemory> Deref for WriteEnable<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.memory
    }
}

impl<E: ByteMemory> DerefMut for WriteEnable<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.memory
    }
}

impl<E: ByteMemory> Drop for WriteEnable<'_, E> {
    fn drop(&mut self) {
        self.memory.disable_writes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    /// Mock byte memory that rejects writes while protected
    struct MockMemory {
        cells: [u8; 16],
        writable: bool,
    }

    impl ByteMemory for MockMemory {
        const CAPACITY: usize = 16;
        const PAGE_SIZE: usize = 4;

        async fn read_bytes(&mut self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
            let end = address + buf.len();
            buf.copy_from_slice(self.cells.get(address..end).ok_or(MemoryError::OutOfRange)?);
            Ok(())
        }

        async fn write_bytes(&mut self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
            if !self.writable {
                return Err(MemoryError::Bus);
            }
            let end = address + data.len();
            self.cells
                .get_mut(address..end)
                .ok_or(MemoryError::OutOfRange)?
                .copy_from_slice(data);
            Ok(())
        }

        async fn write_page(&mut self, page: usize, data: &[u8]) -> Result<(), MemoryError> {
            self.write_bytes(page * Self::PAGE_SIZE, data).await
        }

        async fn write_multiple_pages(
            &mut self,
            start_page: usize,
            data: &[u8],
        ) -> Result<(), MemoryError> {
            for (i, chunk) in data.chunks(Self::PAGE_SIZE).enumerate() {
                self.write_page(start_page + i, chunk).await?;
            }
            Ok(())
        }

        fn enable_writes(&mut self) {
            self.writable = true;
        }

        fn disable_writes(&mut self) {
            self.writable = false;
        }
    }

    #[test]
    fn test_write_enable_bracket() {
        let mut memory = MockMemory {
            cells: [0xFF; 16],
            writable: false,
        };

        block_on(async {
            {
                let mut bracket = WriteEnable::new(&mut memory);
                assert!(bracket.writable);
                bracket.write_multiple_pages(1, &[1, 2, 3, 4, 5]).await.unwrap();
            }
            assert!(!memory.writable);
            assert_eq!(memory.write_bytes(0, &[0]).await, Err(MemoryError::Bus));

            let mut buf = [0u8; 6];
            memory.read_bytes(4, &mut buf).await.unwrap();
            assert_eq!(buf, [1, 2, 3, 4, 5, 0xFF]);
        });
    }

    #[test]
    fn test_write_enable_released_on_error() {
        async fn failing(memory: &mut MockMemory) -> Result<(), MemoryError> {
            let mut bracket = WriteEnable::new(memory);
            bracket.write_bytes(15, &[0, 0]).await?;
            Ok(())
        }

        let mut memory = MockMemory {
            cells: [0xFF; 16],
            writable: false,
        };
        assert_eq!(block_on(failing(&mut memory)), Err(MemoryError::OutOfRange));
        assert!(!memory.writable);
    }
}
