//! Non-volatile memory drivers
//!
//! This crate provides concrete implementations of the memory traits
//! defined in tidewatch-core:
//!
//! - 24LC512-class I2C EEPROM with direct and DMA transfer paths
//! - W25Q64-class QSPI NOR flash with a memory-mapped read window
//!
//! With the `mock` feature, [`mock`] provides host-side simulators of both
//! buses for tests.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

#[cfg(feature = "mock")]
extern crate std;

#[macro_use]
mod fmt;

pub mod eeprom;
pub mod flash;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
