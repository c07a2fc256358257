//! Latched device error code
//!
//! Subsystems that give up on a peripheral record why here; the UI and
//! the network status report read it back.

use portable_atomic::{AtomicU8, Ordering};

/// Device-level error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    /// Everything is fine
    NoError = 0,
    /// Unclassified failure
    Unknown = 1,
    /// WiFi module did not respond
    WifiModule = 2,
    /// Display controller failure
    Oled = 3,
    /// EEPROM unreadable or history ring unusable
    Eeprom = 4,
    /// External flash unreadable or full
    Flash = 5,
}

impl ErrorCode {
    /// Get the code as a byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create a code from a byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::NoError),
            1 => Some(ErrorCode::Unknown),
            2 => Some(ErrorCode::WifiModule),
            3 => Some(ErrorCode::Oled),
            4 => Some(ErrorCode::Eeprom),
            5 => Some(ErrorCode::Flash),
            _ => None,
        }
    }
}

/// Shared device status
///
/// Lives in a `static`; safe to update from any task or interrupt.
pub struct DeviceStatus {
    error: AtomicU8,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStatus {
    /// Status with no error recorded
    pub const fn new() -> Self {
        Self {
            error: AtomicU8::new(ErrorCode::NoError as u8),
        }
    }

    /// Record an error
    ///
    /// The latest error wins. `NoError` is ignored, so a latched error
    /// cannot be cleared by accident.
    pub fn set_error(&self, code: ErrorCode) {
        if code != ErrorCode::NoError {
            self.error.store(code.as_u8(), Ordering::Release);
        }
    }

    /// Currently latched error
    pub fn error(&self) -> ErrorCode {
        ErrorCode::from_u8(self.error.load(Ordering::Acquire)).unwrap_or(ErrorCode::Unknown)
    }

    /// Whether any error has been latched
    pub fn has_error(&self) -> bool {
        self.error() != ErrorCode::NoError
    }
}
