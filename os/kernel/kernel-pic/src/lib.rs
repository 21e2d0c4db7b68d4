//! # Interrupt Line Control
//!
//! Device drivers need three things from the interrupt controller: keep their
//! line quiet while they reconfigure the device, let it through again, and
//! acknowledge a delivered interrupt. [`InterruptController`] captures exactly
//! that, and [`ChainedPics`] implements it for the legacy cascaded 8259 pair.
//!
//! ## 8259 layout
//!
//! ```text
//!   IRQ 0-7  ──► master (cmd 0x20, data 0x21) ──► CPU INTR
//!   IRQ 8-15 ──► slave  (cmd 0xA0, data 0xA1) ──► master IRQ 2
//! ```
//!
//! Mask registers are one bit per line; a set bit disables the line. An
//! interrupt that went through the slave needs an end-of-interrupt on both
//! chips.

#![cfg_attr(not(any(test, doctest)), no_std)]

use kernel_ports::PortIo;
use log::debug;

/// Master PIC command port.
pub const PIC1_CMD: u16 = 0x20;
/// Master PIC data (mask) port.
pub const PIC1_DATA: u16 = 0x21;
/// Slave PIC command port.
pub const PIC2_CMD: u16 = 0xA0;
/// Slave PIC data (mask) port.
pub const PIC2_DATA: u16 = 0xA1;

/// Lines served by the cascaded pair.
pub const LINES: u8 = 16;

/// Non-specific end-of-interrupt command.
const EOI: u8 = 0x20;

/// ICW1: initialization, ICW4 follows (edge triggered, cascade mode).
const ICW1_INIT_WITH_ICW4: u8 = 0x11;
/// ICW3 for the master: a slave hangs off line 2.
const ICW3_MASTER_SLAVE_ON_2: u8 = 1 << 2;
/// ICW3 for the slave: its cascade identity is 2.
const ICW3_SLAVE_ID: u8 = 2;
/// ICW4: 8086/88 mode, normal EOI, not buffered, not fully nested.
const ICW4_8086: u8 = 0x01;

/// Everything masked except the cascade line.
pub const DEFAULT_MASK: u16 = 0xFFFB;

/// Line of the primary ATA channel on a PC/AT.
pub const IRQ_PRIMARY_ATA: u8 = 14;
/// Line of the secondary ATA channel on a PC/AT.
pub const IRQ_SECONDARY_ATA: u8 = 15;

/// Per-line interrupt control consumed by device drivers.
pub trait InterruptController {
    /// Stop delivering `line`.
    fn mask(&mut self, line: u8);

    /// Resume delivering `line`.
    fn unmask(&mut self, line: u8);

    /// Acknowledge the interrupt currently being serviced on `line`.
    fn end_of_interrupt(&mut self, line: u8);
}

impl<T: InterruptController + ?Sized> InterruptController for &mut T {
    #[inline]
    fn mask(&mut self, line: u8) {
        (**self).mask(line);
    }

    #[inline]
    fn unmask(&mut self, line: u8) {
        (**self).unmask(line);
    }

    #[inline]
    fn end_of_interrupt(&mut self, line: u8) {
        (**self).end_of_interrupt(line);
    }
}

/// The master/slave 8259 pair.
pub struct ChainedPics<P> {
    ports: P,
}

impl<P: PortIo> ChainedPics<P> {
    pub const fn new(ports: P) -> Self {
        Self { ports }
    }

    /// Re-run the ICW1-ICW4 sequence so IRQ 0-7 land on `master_offset..` and
    /// IRQ 8-15 on `slave_offset..`, then apply [`DEFAULT_MASK`].
    ///
    /// The offsets must not overlap the CPU exception vectors (0-31).
    pub fn remap(&mut self, master_offset: u8, slave_offset: u8) {
        debug!("remapping PIC to {master_offset:#x}/{slave_offset:#x}");

        self.ports.outb(PIC1_CMD, ICW1_INIT_WITH_ICW4);
        self.ports.outb(PIC2_CMD, ICW1_INIT_WITH_ICW4);
        self.ports.io_wait();

        self.ports.outb(PIC1_DATA, master_offset);
        self.ports.io_wait();
        self.ports.outb(PIC2_DATA, slave_offset);
        self.ports.io_wait();

        self.ports.outb(PIC1_DATA, ICW3_MASTER_SLAVE_ON_2);
        self.ports.io_wait();
        self.ports.outb(PIC2_DATA, ICW3_SLAVE_ID);
        self.ports.io_wait();

        self.ports.outb(PIC1_DATA, ICW4_8086);
        self.ports.io_wait();
        self.ports.outb(PIC2_DATA, ICW4_8086);
        self.ports.io_wait();

        self.set_masks(DEFAULT_MASK);
    }

    /// Combined mask of both chips, slave in the high byte.
    #[must_use]
    pub fn masks(&mut self) -> u16 {
        (u16::from(self.ports.inb(PIC2_DATA)) << 8) | u16::from(self.ports.inb(PIC1_DATA))
    }

    /// Apply a combined mask; bit `n` set disables line `n`.
    pub fn set_masks(&mut self, mask: u16) {
        let [master, slave] = mask.to_le_bytes();
        self.ports.outb(PIC1_DATA, master);
        self.ports.io_wait();
        self.ports.outb(PIC2_DATA, slave);
    }

    /// Mask every line on both chips.
    pub fn disable(&mut self) {
        self.set_masks(0xFFFF);
    }

    pub fn into_inner(self) -> P {
        self.ports
    }

    /// Mask port and bit of `line`; `None` past the last slave line.
    const fn data_port(line: u8) -> Option<(u16, u8)> {
        match line {
            0..8 => Some((PIC1_DATA, line)),
            8..LINES => Some((PIC2_DATA, line - 8)),
            _ => None,
        }
    }

    fn update_mask(&mut self, line: u8, masked: bool) {
        let Some((port, bit)) = Self::data_port(line) else {
            debug!("ignoring mask change for nonexistent IRQ {line}");
            return;
        };
        let current = self.ports.inb(port);
        let value = if masked {
            current | (1 << bit)
        } else {
            current & !(1 << bit)
        };
        self.ports.outb(port, value);
    }
}

impl<P: PortIo> InterruptController for ChainedPics<P> {
    fn mask(&mut self, line: u8) {
        self.update_mask(line, true);
    }

    fn unmask(&mut self, line: u8) {
        self.update_mask(line, false);
    }

    fn end_of_interrupt(&mut self, line: u8) {
        if line >= LINES {
            debug!("ignoring end-of-interrupt for nonexistent IRQ {line}");
            return;
        }
        if line >= 8 {
            self.ports.outb(PIC2_CMD, EOI);
        }
        self.ports.outb(PIC1_CMD, EOI);
    }
}
