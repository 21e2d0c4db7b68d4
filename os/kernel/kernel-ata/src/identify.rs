//! # IDENTIFY DEVICE Parsing
//!
//! Words consulted (bit numbers within the word):
//!
//! ```text
//!   0      bit 15 set: not an ATA device
//!  47      bits 0-7: max sectors per READ/WRITE MULTIPLE block
//!  49      bit 8: DMA       bit 9: LBA
//!  53      bit 2: word 88 valid
//!  59      bit 8: bits 0-7 hold the current multiple setting
//!  60-61   28-bit addressable sectors
//!  80      major version bitmap (0x0000 / 0xFFFF: not reported)
//!  83      bit 10: 48-bit   bit 12: FLUSH CACHE EXT   bit 13: FLUSH CACHE
//!  88      bits 0-6: UDMA modes supported   bits 8-14: UDMA mode selected
//! 100-103  48-bit addressable sectors (used when word 61 > 0x0FFF)
//! 117-118  logical sector size in words (ATA-8 and later)
//! ```

use crate::error::AtaError;

/// Words returned by IDENTIFY DEVICE.
pub const IDENTIFY_WORDS: usize = 256;

/// Words per sector assumed when the device reports no logical sector size.
pub const DEFAULT_SECTOR_WORDS: u32 = 256;

/// Capabilities of an identified device.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub has_multiple_cmd: bool,
    pub max_multiple: u8,
    /// Current READ/WRITE MULTIPLE block size in sectors; 0 when disabled.
    pub current_multiple: u8,
    pub has_dma: bool,
    pub has_lba48: bool,
    pub has_flush_ext: bool,
    /// Addressable sectors, low 32 bits.
    pub max_sectors_lower: u32,
    /// Addressable sectors, high 32 bits; 0 without 48-bit addressing.
    pub max_sectors_upper: u32,
    pub max_ata_version: Option<u8>,
    pub max_udma: Option<u8>,
    pub current_udma: Option<u8>,
    pub sector_words: u32,
}

impl DeviceInfo {
    pub(crate) const UNIDENTIFIED: Self = Self {
        has_multiple_cmd: false,
        max_multiple: 0,
        current_multiple: 0,
        has_dma: false,
        has_lba48: false,
        has_flush_ext: false,
        max_sectors_lower: 0,
        max_sectors_upper: 0,
        max_ata_version: None,
        max_udma: None,
        current_udma: None,
        sector_words: 0,
    };

    /// Parse an IDENTIFY DEVICE response.
    ///
    /// # Errors
    /// [`AtaError::NotAta`], [`AtaError::LbaUnsupported`] or
    /// [`AtaError::FlushUnsupported`] when the device cannot be driven.
    pub fn parse(words: &[u16; IDENTIFY_WORDS]) -> Result<Self, AtaError> {
        let word = |i: usize| words[i];
        let bit = |i: usize, b: u32| words[i] & (1 << b) != 0;
        let dword = |i: usize| u32::from(words[i]) | (u32::from(words[i + 1]) << 16);

        if bit(0, 15) {
            return Err(AtaError::NotAta(word(0)));
        }
        if !bit(49, 9) {
            return Err(AtaError::LbaUnsupported);
        }
        if !bit(83, 13) {
            return Err(AtaError::FlushUnsupported);
        }

        let [max_multiple, _] = word(47).to_le_bytes();
        let [current_multiple, _] = word(59).to_le_bytes();
        let max_ata_version = highest_ata_version(word(80));

        let (max_sectors_lower, max_sectors_upper) = if word(61) > 0x0FFF {
            (dword(100), dword(102))
        } else {
            (dword(60), 0)
        };

        let (max_udma, current_udma) = if bit(53, 2) && word(88) != 0 {
            let top = if max_ata_version >= Some(8) { 6 } else { 5 };
            let [supported, selected] = word(88).to_le_bytes();
            (highest_bit(supported, top), highest_bit(selected, top))
        } else {
            (None, None)
        };

        let sector_words = match dword(117) {
            n if max_ata_version >= Some(8) && n != 0 => n,
            _ => DEFAULT_SECTOR_WORDS,
        };

        Ok(Self {
            has_multiple_cmd: max_multiple != 0,
            max_multiple,
            current_multiple: if bit(59, 8) { current_multiple } else { 0 },
            has_dma: bit(49, 8),
            has_lba48: bit(83, 10),
            has_flush_ext: bit(83, 12),
            max_sectors_lower,
            max_sectors_upper,
            max_ata_version,
            max_udma,
            current_udma,
            sector_words,
        })
    }

    /// Total addressable sectors.
    #[must_use]
    pub const fn max_sectors(&self) -> u64 {
        ((self.max_sectors_upper as u64) << 32) | self.max_sectors_lower as u64
    }

    #[must_use]
    pub const fn sector_bytes(&self) -> usize {
        (self.sector_words as usize).saturating_mul(2)
    }

    /// READ/WRITE MULTIPLE can be used for transfers.
    #[must_use]
    pub const fn multiple_enabled(&self) -> bool {
        self.has_multiple_cmd && self.current_multiple > 0
    }
}

/// Highest major version in bits 3-8 of word 80.
fn highest_ata_version(word: u16) -> Option<u8> {
    if word == 0 || word == 0xFFFF {
        return None;
    }
    (3..=8u8).rev().find(|v| word & (1 << v) != 0)
}

fn highest_bit(bits: u8, top: u8) -> Option<u8> {
    (0..=top).rev().find(|b| bits & (1 << b) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk() -> [u16; IDENTIFY_WORDS] {
        let mut words = [0u16; IDENTIFY_WORDS];
        words[0] = 0x0040;
        words[49] = 1 << 9;
        words[83] = 1 << 13;
        words[60] = 0x5678;
        words[61] = 0x0012;
        words
    }

    #[test]
    fn minimal_disk() {
        let info = DeviceInfo::parse(&disk()).unwrap();
        assert_eq!(info.max_sectors(), 0x0012_5678);
        assert_eq!(info.sector_words, 256);
        assert_eq!(info.sector_bytes(), 512);
        assert!(!info.has_multiple_cmd);
        assert!(!info.has_lba48);
        assert_eq!(info.max_ata_version, None);
        assert_eq!(info.max_udma, None);
        assert_eq!(info.current_udma, None);
    }

    #[test]
    fn word0_bit15_rejects_device() {
        let mut words = disk();
        words[0] = 0x8000;
        assert_eq!(DeviceInfo::parse(&words), Err(AtaError::NotAta(0x8000)));

        // Bit 0 carries no meaning here.
        words[0] = 0x0001;
        assert!(DeviceInfo::parse(&words).is_ok());
    }

    #[test]
    fn lba_and_flush_are_required() {
        let mut words = disk();
        words[49] = 0;
        assert_eq!(DeviceInfo::parse(&words), Err(AtaError::LbaUnsupported));

        let mut words = disk();
        words[83] = 0;
        assert_eq!(DeviceInfo::parse(&words), Err(AtaError::FlushUnsupported));
    }

    #[test]
    fn large_word61_selects_48bit_count() {
        let mut words = disk();
        words[61] = 0x1000;
        words[100] = 0x0000;
        words[101] = 0x0010;
        words[102] = 0x0002;
        words[103] = 0x0000;
        let info = DeviceInfo::parse(&words).unwrap();
        assert_eq!(info.max_sectors_lower, 0x0010_0000);
        assert_eq!(info.max_sectors_upper, 0x0000_0002);
        assert_eq!(info.max_sectors(), 0x0002_0010_0000);
    }

    #[test]
    fn multiple_limits() {
        let mut words = disk();
        words[47] = 0x8010;
        words[59] = 0x0108;
        let info = DeviceInfo::parse(&words).unwrap();
        assert!(info.has_multiple_cmd);
        assert_eq!(info.max_multiple, 16);
        assert_eq!(info.current_multiple, 8);
        assert!(info.multiple_enabled());

        // Setting not valid without bit 8.
        words[59] = 0x0008;
        assert_eq!(DeviceInfo::parse(&words).unwrap().current_multiple, 0);
    }

    #[test]
    fn udma_tops_out_at_mode_5_before_ata8() {
        let mut words = disk();
        words[53] = 1 << 2;
        words[80] = 0x007E;
        words[88] = 0x407F;
        let info = DeviceInfo::parse(&words).unwrap();
        assert_eq!(info.max_ata_version, Some(6));
        assert_eq!(info.max_udma, Some(5));
        assert_eq!(info.current_udma, None);

        words[80] = 0x01FE;
        let info = DeviceInfo::parse(&words).unwrap();
        assert_eq!(info.max_ata_version, Some(8));
        assert_eq!(info.max_udma, Some(6));
        assert_eq!(info.current_udma, Some(6));
    }

    #[test]
    fn udma_ignored_without_word53_bit2() {
        let mut words = disk();
        words[88] = 0x043F;
        let info = DeviceInfo::parse(&words).unwrap();
        assert_eq!(info.max_udma, None);
    }

    #[test]
    fn logical_sector_size_from_ata8() {
        let mut words = disk();
        words[80] = 0x01F0;
        words[117] = 0x0800;
        assert_eq!(DeviceInfo::parse(&words).unwrap().sector_words, 2048);

        words[117] = 0;
        assert_eq!(DeviceInfo::parse(&words).unwrap().sector_words, 256);

        words[80] = 0x00F0;
        words[117] = 0x0800;
        assert_eq!(DeviceInfo::parse(&words).unwrap().sector_words, 256);
    }

    #[test]
    fn unreported_version() {
        assert_eq!(highest_ata_version(0xFFFF), None);
        assert_eq!(highest_ata_version(0x0006), None);
        assert_eq!(highest_ata_version(0x003E), Some(5));
    }
}
