//! W25Q instruction set and status bits

pub const RESET_ENABLE: u8 = 0x66;
pub const RESET_DEVICE: u8 = 0x99;
pub const WRITE_ENABLE: u8 = 0x06;
pub const VOLATILE_SR_WRITE_ENABLE: u8 = 0x50;
pub const READ_STATUS_1: u8 = 0x05;
pub const READ_STATUS_2: u8 = 0x35;
pub const WRITE_STATUS_2: u8 = 0x31;
pub const READ_STATUS_3: u8 = 0x15;
pub const WRITE_STATUS_3: u8 = 0x11;
pub const SECTOR_ERASE: u8 = 0x20;
pub const CHIP_ERASE: u8 = 0xC7;
pub const QUAD_PAGE_PROGRAM: u8 = 0x32;
pub const FAST_READ_QUAD_IO: u8 = 0xEB;

/// Status register 1: erase/program in progress
pub const SR1_BUSY: u8 = 0x01;
/// Status register 1: write enable latch
pub const SR1_WEL: u8 = 0x02;
/// Status register 2: quad enable
pub const SR2_QE: u8 = 0x02;
/// Status register 3: keeps everything but DRV1:0 (strongest drive)
pub const SR3_DRIVE_MASK: u8 = 0x9F;

/// Mode bits sent after the address in fast quad reads
pub const QUAD_READ_MODE_BITS: u8 = 0xFF;
/// Dummy cycles for fast quad I/O reads
pub const QUAD_READ_DUMMY_CYCLES: u8 = 4;
