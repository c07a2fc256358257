//! Persistent storage services
//!
//! - [`config`]: settings record kept in two redundant EEPROM copies,
//!   written page-by-page only where it changed
//! - [`history`]: minute-resolution water usage ring on EEPROM plus daily
//!   hourly roll-ups appended to NOR flash
//!
//! Both services reach their memories through `Guarded` handles created at
//! startup and are themselves meant to be wrapped in a `Guarded`.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod config;
pub mod history;
