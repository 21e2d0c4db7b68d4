//! # QEMU Debug Console Logging
//!
//! Routes the `log` facade to QEMU's debug console so drivers can report
//! register-level diagnostics before any console exists.
//!
//! ## Output path
//! ```text
//! debug!/warn!/... ──► QemuLogger (log::Log)
//!                          │ "[LEVEL] target: message\n"
//!                          ▼
//!                  DebugConsole<P: PortIo> (fmt::Write)
//!                          │ one outb per byte
//!                          ▼
//!                  port 0x402 ──► qemu -debugcon stdio
//! ```
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::LevelFilter;
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//! LOGGER.install().expect("logger installed twice");
//! ```
//!
//! With the `enabled` feature off, records are filtered as usual but never
//! leave the kernel.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{DebugConsole, QEMU_DEBUG_PORT, QemuLogger, write_record};

#[cfg(feature = "enabled")]
mod qemu_fmt {
    use crate::{DebugConsole, QEMU_DEBUG_PORT, write_record};
    use kernel_ports::X86Ports;

    #[inline]
    pub(crate) fn qemu_log(record: &log::Record) {
        // SAFETY: the debug console port is write-only and owned by nobody
        // else; the kernel runs at CPL0.
        let mut console = DebugConsole::new(unsafe { X86Ports::new() }, QEMU_DEBUG_PORT);
        // Best-effort debug output.
        let _ = write_record(&mut console, record);
    }
}

#[cfg(not(feature = "enabled"))]
mod qemu_fmt {
    #[inline]
    pub(crate) const fn qemu_log(_: &log::Record) {}
}
