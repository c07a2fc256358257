//! Quad-SPI bus abstractions
//!
//! Models the indirect/auto-polling/memory-mapped controller found on
//! STM32 parts. A command phase is described by [`QspiCommand`]; the data
//! phase (if any) follows with [`QspiBus::transmit`] or [`QspiBus::receive`].

/// Number of lines used by one phase of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QspiLines {
    /// Phase is skipped
    None,
    /// Classic single-line SPI
    Single,
    /// Four data lines
    Quad,
}

/// One QSPI command phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QspiCommand {
    /// Instruction byte (always sent on a single line)
    pub instruction: u8,
    /// 24-bit address, if the command has an address phase
    pub address: Option<u32>,
    /// Lines used for the address phase
    pub address_lines: QspiLines,
    /// Alternate byte sent after the address (mode bits)
    pub alternate: Option<u8>,
    /// Dummy clock cycles between address and data
    pub dummy_cycles: u8,
    /// Lines used for the data phase
    pub data_lines: QspiLines,
    /// Number of bytes in the data phase
    pub data_len: usize,
}

impl QspiCommand {
    /// Instruction-only command (no address, no data)
    pub const fn instruction(instruction: u8) -> Self {
        Self {
            instruction,
            address: None,
            address_lines: QspiLines::None,
            alternate: None,
            dummy_cycles: 0,
            data_lines: QspiLines::None,
            data_len: 0,
        }
    }

    /// Register read/write: instruction followed by `len` single-line bytes
    pub const fn register(instruction: u8, len: usize) -> Self {
        Self {
            data_lines: QspiLines::Single,
            data_len: len,
            ..Self::instruction(instruction)
        }
    }

    /// Instruction with a single-line 24-bit address and no data
    pub const fn addressed(instruction: u8, address: u32) -> Self {
        Self {
            address: Some(address),
            address_lines: QspiLines::Single,
            ..Self::instruction(instruction)
        }
    }
}

/// Quad-SPI bus master
pub trait QspiBus {
    /// Error type for QSPI operations
    type Error;

    /// Send the instruction/address/alternate/dummy phases of a command
    ///
    /// Commands with `data_len == 0` complete here.
    fn command(&mut self, cmd: &QspiCommand) -> Result<(), Self::Error>;

    /// Data phase: send bytes for the preceding command
    fn transmit(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Data phase: receive bytes for the preceding command
    fn receive(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Repeatedly issue `cmd` (a one-byte register read) until
    /// `value & mask == matched`, or fail on timeout
    fn auto_poll(&mut self, cmd: &QspiCommand, mask: u8, matched: u8)
        -> Result<(), Self::Error>;

    /// Switch the controller into memory-mapped mode using `cmd` as the
    /// read command template
    fn enable_memory_mapped(&mut self, cmd: &QspiCommand) -> Result<(), Self::Error>;

    /// Abort memory-mapped mode so indirect commands can be issued
    fn disable_memory_mapped(&mut self) -> Result<(), Self::Error>;

    /// The memory-mapped window, or `None` while not in memory-mapped mode
    fn mapped(&self) -> Option<&[u8]>;
}
