//! Tidewatch Hardware Abstraction Layer
//!
//! This crate defines the hardware-facing traits the storage core is
//! written against. A board support crate implements them on top of the
//! vendor HAL; the drivers in `tidewatch-drivers` only ever see the traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  tidewatch-storage (config, history)    │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  tidewatch-drivers (eeprom, flash)      │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  tidewatch-hal (this crate - traits)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Traits
//!
//! - [`gpio::OutputPin`] - Digital output (EEPROM write-protect line)
//! - [`i2c::I2cMemory`] - Memory-addressed I2C transfers, direct and DMA
//! - [`qspi::QspiBus`] - Quad-SPI indirect commands and memory-mapped mode
//! - [`context::ExecutionContext`] - Scheduler/interrupt state queries

#![no_std]
#![deny(unsafe_code)]

pub mod context;
pub mod gpio;
pub mod i2c;
pub mod qspi;

// Re-export key traits at crate root for convenience
pub use context::ExecutionContext;
pub use gpio::OutputPin;
pub use i2c::I2cMemory;
pub use qspi::{QspiBus, QspiCommand, QspiLines};
