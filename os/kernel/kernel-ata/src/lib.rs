//! # ATA PIO Disk Driver
//!
//! Drives the device on a legacy ATA channel through programmed I/O: task
//! file setup, IDENTIFY parsing, single and multiple sector transfers in
//! 28- or 48-bit addressing, cache flushes, software reset, and an
//! interrupt-driven completion path.
//!
//! ## Layers
//! ```text
//! AtaDriver<'buf, P, C>   commands, transfer cursor, command tag, IRQ dispatch
//!        │
//! AtaBus<P>               typed registers, device control shadow, bounded waits
//!        │
//! P: PortIo               in/out instructions, or a register model in tests
//! ```
//!
//! ## Polled and interrupt-driven operation
//! While interrupts are disabled every command completes before returning
//! [`Progress::Complete`]. Once [`AtaDriver::set_interrupts`] enabled them,
//! commands return [`Progress::Pending`] and are finished by
//! [`AtaDriver::on_interrupt`]:
//!
//! ```text
//! read(buf, lba, 3) ──► READ SECTORS issued, tag = Read
//! IRQ ──► sector 0 ──► DRQ still set
//! IRQ ──► sector 1 ──► DRQ still set
//! IRQ ──► sector 2 ──► BSY=0 DRQ=0 ──► tag = None, take_buffer() yields buf
//! ```
//!
//! At most one command is in flight; a second one is refused with
//! [`AtaError::CommandInProgress`]. A transfer that fails synchronously hands
//! the buffer back in its [`TransferError`]; one that already went to the
//! interrupt path is collected with [`AtaDriver::take_buffer`], which also
//! retires a command the device ended with an error.
//!
//! ## Waiting
//! All waits are bounded by [`Timings`], counted in register reads and
//! `io_wait` delays. A timed-out command stays active until
//! [`AtaDriver::software_reset`] or the next command finds the device idle.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod bus;
mod command;
mod config;
mod driver;
mod error;
mod identify;
mod irq;
pub mod regs;
mod transfer;

pub use bus::AtaBus;
pub use command::{CommandTag, Progress};
pub use config::{AtaConfig, Channel, PAGE_SIZE, Timings};
pub use driver::AtaDriver;
pub use error::{AtaError, StatusBit, TransferError};
pub use identify::{DEFAULT_SECTOR_WORDS, DeviceInfo, IDENTIFY_WORDS};
