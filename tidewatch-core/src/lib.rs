//! Board-agnostic building blocks for the leak detector storage core
//!
//! This crate contains everything the storage layer needs that does not
//! talk to hardware directly:
//!
//! - Named exclusive-access wrapper for shared drivers and services
//! - Execution-context tracking (scheduler started, interrupt nesting)
//! - STM32-compatible word CRC used by every persisted record
//! - Civil date/time arithmetic for day and hour bucketing
//! - Storage and clock traits implemented by drivers and collaborators
//! - The latched device error code

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod crc;
pub mod state;
pub mod sync;
pub mod time;
pub mod traits;
