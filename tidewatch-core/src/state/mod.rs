//! Device-wide status

mod status;

pub use status::{DeviceStatus, ErrorCode};
