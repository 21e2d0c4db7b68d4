//! # x86 I/O Port Access
//!
//! Port-mapped I/O for legacy devices (PIC, ATA, debug console), split into a
//! capability trait and the hardware implementation.
//!
//! ## Overview
//!
//! Drivers never issue `in`/`out` themselves. They are generic over
//! [`PortIo`], which is implemented by:
//!
//! - [`X86Ports`]: the real `in`/`out` instructions (feature `asm`).
//! - Software register models in host tests, so that whole device protocols
//!   can be exercised without hardware.
//!
//! ## Common Port Ranges
//! ```text
//! 0x0020-0x0021   Programmable Interrupt Controller (PIC) #1
//! 0x0080          POST diagnostic port (used for io_wait)
//! 0x00A0-0x00A1   PIC #2
//! 0x0170-0x0177   Secondary ATA channel, control at 0x0376
//! 0x01F0-0x01F7   Primary ATA channel, control at 0x03F6
//! 0x0402          QEMU debug console
//! ```
//!
//! ## Safety
//!
//! The trait methods are safe to call: the obligation moves to whoever
//! constructs an implementation that touches real hardware. See
//! [`X86Ports::new`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

/// Port used by [`PortIo::io_wait`]: POST codes are written here by firmware
/// and nothing listens to it after boot.
pub const POST_DIAGNOSTIC_PORT: u16 = 0x80;

/// Byte, word and double-word access to the I/O port space.
///
/// Every access is assumed to have device side effects (reading a status
/// register may acknowledge an interrupt, reading a data register consumes a
/// word), so implementations must never cache or reorder accesses.
pub trait PortIo {
    /// Read one byte from `port`.
    fn inb(&mut self, port: u16) -> u8;

    /// Read one 16-bit word from `port`.
    fn inw(&mut self, port: u16) -> u16;

    /// Read one 32-bit double word from `port`.
    fn inl(&mut self, port: u16) -> u32;

    /// Write one byte to `port`.
    fn outb(&mut self, port: u16, value: u8);

    /// Write one 16-bit word to `port`.
    fn outw(&mut self, port: u16, value: u16);

    /// Write one 32-bit double word to `port`.
    fn outl(&mut self, port: u16, value: u32);

    /// A short fixed delay (roughly 1-4µs on real hardware) used to let
    /// device signals settle between register accesses.
    fn io_wait(&mut self) {
        self.outb(POST_DIAGNOSTIC_PORT, 0);
    }
}

impl<T: PortIo + ?Sized> PortIo for &mut T {
    #[inline]
    fn inb(&mut self, port: u16) -> u8 {
        (**self).inb(port)
    }

    #[inline]
    fn inw(&mut self, port: u16) -> u16 {
        (**self).inw(port)
    }

    #[inline]
    fn inl(&mut self, port: u16) -> u32 {
        (**self).inl(port)
    }

    #[inline]
    fn outb(&mut self, port: u16, value: u8) {
        (**self).outb(port, value);
    }

    #[inline]
    fn outw(&mut self, port: u16, value: u16) {
        (**self).outw(port, value);
    }

    #[inline]
    fn outl(&mut self, port: u16, value: u32) {
        (**self).outl(port, value);
    }

    #[inline]
    fn io_wait(&mut self) {
        (**self).io_wait();
    }
}

/// The CPU's I/O port space, accessed with `in`/`out`.
#[cfg(feature = "asm")]
#[derive(Debug)]
pub struct X86Ports {
    _private: (),
}

#[cfg(feature = "asm")]
impl X86Ports {
    /// Obtain a handle to the port space.
    ///
    /// # Safety
    /// You must uphold **all** of the following for as long as the handle is used:
    /// - **Privilege:** Execute at CPL0 **or** have I/O permission (IOPL/IO bitmap)
    ///   for every port accessed; otherwise the CPU raises `#GP`.
    /// - **Ownership:** The driver using this handle is the only code driving
    ///   the device behind the ports it touches. Interleaved accesses from
    ///   another driver or CPU tear multi-register handshakes.
    /// - **Device presence:** Some platforms hang on accesses to ports nothing
    ///   decodes.
    /// - **Ordering:** `in`/`out` are ordered among themselves but are **not**
    ///   a general memory fence.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(feature = "asm")]
impl PortIo for X86Ports {
    #[inline]
    fn inb(&mut self, port: u16) -> u8 {
        let v: u8;
        unsafe {
            core::arch::asm!("in al, dx", in("dx") port, out("al") v, options(nomem, nostack, preserves_flags));
        }
        v
    }

    #[inline]
    fn inw(&mut self, port: u16) -> u16 {
        let v: u16;
        unsafe {
            core::arch::asm!("in ax, dx", in("dx") port, out("ax") v, options(nomem, nostack, preserves_flags));
        }
        v
    }

    #[inline]
    fn inl(&mut self, port: u16) -> u32 {
        let v: u32;
        unsafe {
            core::arch::asm!("in eax, dx", in("dx") port, out("eax") v, options(nomem, nostack, preserves_flags));
        }
        v
    }

    #[inline]
    fn outb(&mut self, port: u16, value: u8) {
        unsafe {
            core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
        }
    }

    #[inline]
    fn outw(&mut self, port: u16, value: u16) {
        unsafe {
            core::arch::asm!("out dx, ax", in("dx") port, in("ax") value, options(nomem, nostack, preserves_flags));
        }
    }

    #[inline]
    fn outl(&mut self, port: u16, value: u32) {
        unsafe {
            core::arch::asm!("out dx, eax", in("dx") port, in("eax") value, options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        writes: Vec<(u16, u8)>,
    }

    impl PortIo for Log {
        fn inb(&mut self, _port: u16) -> u8 {
            0
        }
        fn inw(&mut self, _port: u16) -> u16 {
            0
        }
        fn inl(&mut self, _port: u16) -> u32 {
            0
        }
        fn outb(&mut self, port: u16, value: u8) {
            self.writes.push((port, value));
        }
        fn outw(&mut self, _port: u16, _value: u16) {}
        fn outl(&mut self, _port: u16, _value: u32) {}
    }

    #[test]
    fn io_wait_writes_post_port() {
        let mut log = Log::default();
        log.io_wait();
        assert_eq!(log.writes, vec![(POST_DIAGNOSTIC_PORT, 0)]);
    }

    #[test]
    fn mut_ref_forwards() {
        let mut log = Log::default();
        {
            let mut r = &mut log;
            r.outb(0x1F7, 0xEC);
            r.io_wait();
        }
        assert_eq!(log.writes, vec![(0x1F7, 0xEC), (POST_DIAGNOSTIC_PORT, 0)]);
    }
}
