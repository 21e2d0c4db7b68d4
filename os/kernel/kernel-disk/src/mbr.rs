//! # Master Boot Record
//!
//! ```text
//! 0x000  boot code (446 bytes)
//! 0x1BE  partition entry 0 ┐
//! 0x1CE  partition entry 1 │ 16 bytes each
//! 0x1DE  partition entry 2 │
//! 0x1EE  partition entry 3 ┘
//! 0x1FE  0x55 0xAA
//! ```
//!
//! Partition entry:
//! ```text
//! +0  boot flag (0x80: bootable)
//! +1  start head       +2  start sector/cylinder
//! +4  system id
//! +5  end head         +6  end sector/cylinder
//! +8  LBA offset (u32 LE)
//! +12 LBA size   (u32 LE)
//! ```

use crate::error::MbrError;
use bitfield_struct::bitfield;

pub const MAX_PARTITIONS: usize = 4;
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;
pub const MBR_BYTES: usize = 512;
const ENTRY_BYTES: usize = 16;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];
const BOOTABLE: u8 = 0x80;

/// The packed sector/cylinder word of a CHS address.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct SectorCylinder {
    /// Bits 0-5: sector, 1-based.
    #[bits(6)]
    pub sector: u8,
    /// Bits 6-7: cylinder bits 8-9.
    #[bits(2)]
    pub cylinder_high: u8,
    /// Bits 8-15: cylinder bits 0-7.
    pub cylinder_low: u8,
}

impl SectorCylinder {
    #[must_use]
    pub const fn cylinder(self) -> u16 {
        ((self.cylinder_high() as u16) << 8) | self.cylinder_low() as u16
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Chs {
    pub head: u8,
    pub sector_cylinder: SectorCylinder,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionEntry {
    pub boot_flag: u8,
    pub start: Chs,
    pub system_id: u8,
    pub end: Chs,
    pub lba_offset: u32,
    pub lba_size: u32,
}

impl PartitionEntry {
    #[must_use]
    pub fn parse(bytes: &[u8; ENTRY_BYTES]) -> Self {
        let word = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let dword = |i: usize| {
            u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
        };
        Self {
            boot_flag: bytes[0],
            start: Chs {
                head: bytes[1],
                sector_cylinder: SectorCylinder::from_bits(word(2)),
            },
            system_id: bytes[4],
            end: Chs {
                head: bytes[5],
                sector_cylinder: SectorCylinder::from_bits(word(6)),
            },
            lba_offset: dword(8),
            lba_size: dword(12),
        }
    }

    #[must_use]
    pub const fn is_bootable(&self) -> bool {
        self.boot_flag & BOOTABLE != 0
    }

    /// An unused slot.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.system_id == 0
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionTable {
    entries: [PartitionEntry; MAX_PARTITIONS],
}

impl PartitionTable {
    /// Parse the partition table out of sector 0.
    ///
    /// # Errors
    /// [`MbrError::TooShort`] or [`MbrError::MissingSignature`].
    pub fn parse(sector: &[u8]) -> Result<Self, MbrError> {
        let Some(mbr) = sector.get(..MBR_BYTES) else {
            return Err(MbrError::TooShort(sector.len()));
        };
        if mbr[MBR_BYTES - 2..] != SIGNATURE {
            return Err(MbrError::MissingSignature(u16::from_le_bytes([
                mbr[MBR_BYTES - 2],
                mbr[MBR_BYTES - 1],
            ])));
        }

        let mut entries = [PartitionEntry::default(); MAX_PARTITIONS];
        let table_end = PARTITION_TABLE_OFFSET + MAX_PARTITIONS * ENTRY_BYTES;
        let table = &mbr[PARTITION_TABLE_OFFSET..table_end];
        for (entry, bytes) in entries.iter_mut().zip(table.chunks_exact(ENTRY_BYTES)) {
            if let Ok(bytes) = bytes.try_into() {
                *entry = PartitionEntry::parse(bytes);
            }
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub const fn entries(&self) -> &[PartitionEntry; MAX_PARTITIONS] {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&PartitionEntry> {
        self.entries.get(index)
    }

    /// `false` for indices past the table.
    #[must_use]
    pub fn is_bootable(&self, index: usize) -> bool {
        self.entry(index).is_some_and(PartitionEntry::is_bootable)
    }

    #[must_use]
    pub fn first_bootable(&self) -> Option<usize> {
        self.entries.iter().position(PartitionEntry::is_bootable)
    }

    /// The partition to boot from: `preferred` if the boot loader named one,
    /// otherwise the first entry flagged bootable.
    ///
    /// # Errors
    /// [`MbrError::InvalidPartition`] for a preferred index past the table,
    /// [`MbrError::NoBootablePartition`] if nothing is flagged bootable.
    pub fn boot_partition(&self, preferred: Option<u32>) -> Result<usize, MbrError> {
        match preferred {
            Some(index) => usize::try_from(index)
                .ok()
                .filter(|i| *i < MAX_PARTITIONS)
                .ok_or(MbrError::InvalidPartition(index)),
            None => self.first_bootable().ok_or(MbrError::NoBootablePartition),
        }
    }
}
