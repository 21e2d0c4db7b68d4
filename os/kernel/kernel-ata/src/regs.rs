//! # ATA Task-File Registers
//!
//! ```text
//! Command block (io_base + n)          Control block (control_base)
//!  +0  Data (16 bit)                    +0  read:  Alternate Status
//!  +1  read: Error   write: Features        write: Device Control
//!  +2  Sector Count
//!  +3  LBA Low
//!  +4  LBA Mid
//!  +5  LBA High
//!  +6  Drive/Head (device select)
//!  +7  read: Status  write: Command
//! ```
//!
//! Reading Status acknowledges a pending interrupt; reading Alternate Status
//! does not. The Device Control register is write-only, so the driver keeps a
//! shadow copy of the last value written.

use bitfield_struct::bitfield;

pub const DATA: u16 = 0;
pub const ERROR: u16 = 1;
pub const SECTOR_COUNT: u16 = 2;
pub const LBA_LOW: u16 = 3;
pub const LBA_MID: u16 = 4;
pub const LBA_HIGH: u16 = 5;
pub const DRIVE_HEAD: u16 = 6;
pub const STATUS: u16 = 7;
pub const COMMAND: u16 = 7;

/// The status byte, as read from Status or Alternate Status.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct Status {
    /// Bit 0: the previous command ended in error (ERR).
    pub err: bool,
    /// Bit 1: index, obsolete.
    pub idx: bool,
    /// Bit 2: corrected data, obsolete.
    pub corr: bool,
    /// Bit 3: the device is ready to transfer a data unit (DRQ).
    pub drq: bool,
    /// Bit 4: overlapped service request (SRV).
    pub srv: bool,
    /// Bit 5: device fault (DF).
    pub df: bool,
    /// Bit 6: the device accepts commands (DRDY).
    pub drdy: bool,
    /// Bit 7: the device owns the task file (BSY).
    pub bsy: bool,
}

impl Status {
    /// `ERR` or `DF` is set.
    #[inline]
    #[must_use]
    pub const fn has_error(self) -> bool {
        self.err() || self.df()
    }
}

/// The Device Control register.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct DeviceControl {
    #[bits(default = false)]
    _reserved_0: bool,
    /// Bit 1: mask the device's interrupt line (nIEN).
    pub nien: bool,
    /// Bit 2: software reset of both devices on the channel (SRST).
    pub srst: bool,
    #[bits(4, default = 0)]
    _reserved_3_6: u8,
    /// Bit 7: read back the previous byte of the 48-bit registers (HOB).
    pub hob: bool,
}

/// The Drive/Head register in LBA mode.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct DriveSelect {
    /// Bits 0-3: LBA bits 24-27 for 28-bit commands.
    #[bits(4)]
    pub lba_high_nibble: u8,
    /// Bit 4: device 1 selected (DEV).
    pub dev: bool,
    #[bits(default = true)]
    _obsolete_5: bool,
    /// Bit 6: the address registers hold an LBA (LBA).
    pub lba: bool,
    #[bits(default = true)]
    _obsolete_7: bool,
}

impl DriveSelect {
    /// Select `device` (0 or 1) in LBA mode with `lba_high_nibble` in the low
    /// bits.
    #[inline]
    #[must_use]
    pub const fn lba_mode(device: u8, lba_high_nibble: u8) -> Self {
        Self::new()
            .with_dev(device & 1 != 0)
            .with_lba(true)
            .with_lba_high_nibble(lba_high_nibble & 0x0F)
    }

    /// The selected device number.
    #[inline]
    #[must_use]
    pub const fn device(self) -> u8 {
        self.dev() as u8
    }
}

/// Command opcodes written to the Command register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    ReadSectors = 0x20,
    ReadSectorsExt = 0x24,
    ReadMultipleExt = 0x29,
    WriteSectors = 0x30,
    WriteSectorsExt = 0x34,
    WriteMultipleExt = 0x39,
    ReadMultiple = 0xC4,
    WriteMultiple = 0xC5,
    SetMultipleMode = 0xC6,
    FlushCache = 0xE7,
    FlushCacheExt = 0xEA,
    IdentifyDevice = 0xEC,
}

impl Opcode {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}
