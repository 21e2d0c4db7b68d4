use crate::error::{DiskError, MbrError};
use crate::mbr::{PartitionEntry, PartitionTable};
use kernel_ata::{AtaDriver, PAGE_SIZE, Progress, TransferError};
use kernel_pic::InterruptController;
use kernel_ports::PortIo;
use log::{debug, error, info};

/// Sectors per page until [`Disk::setup`] learned the real sector size.
const DEFAULT_SECTORS_PER_PAGE: u32 = 8;

/// The boot disk, addressed in pages.
pub struct Disk<'buf, P, C> {
    ata: AtaDriver<'buf, P, C>,
    sectors_per_page: u32,
    preferred_partition: Option<u32>,
    partitions: Option<PartitionTable>,
    boot_partition: Option<usize>,
}

impl<'buf, P: PortIo, C: InterruptController> Disk<'buf, P, C> {
    pub const fn new(ata: AtaDriver<'buf, P, C>) -> Self {
        Self {
            ata,
            sectors_per_page: DEFAULT_SECTORS_PER_PAGE,
            preferred_partition: None,
            partitions: None,
            boot_partition: None,
        }
    }

    /// Initialize the drive and derive the number of sectors per page.
    ///
    /// # Errors
    /// Any driver initialization failure, or sectors larger than a page.
    pub fn setup(&mut self) -> Result<(), DiskError> {
        self.ata
            .initialize()
            .inspect_err(|e| error!("disk setup failed: {e}"))?;

        let sector_bytes = self.ata.info().sector_bytes();
        let sectors_per_page = u32::try_from(sector_bytes)
            .ok()
            .filter(|&bytes| bytes > 0)
            .map_or(0, |bytes| PAGE_SIZE / bytes);
        if sectors_per_page == 0 {
            return Err(DiskError::SectorLargerThanPage(sector_bytes));
        }
        self.sectors_per_page = sectors_per_page;
        debug!("disk: {sectors_per_page} sectors per page");
        Ok(())
    }

    /// Read `pages` pages starting at page `start` into `buffer`.
    ///
    /// # Errors
    /// [`DiskError::PageRangeOverflow`] if the range does not fit one
    /// transfer, otherwise the driver's errors. The buffer comes back with
    /// the error.
    pub fn read_pages(
        &mut self,
        buffer: &'buf mut [u8],
        start: u32,
        pages: u16,
    ) -> Result<Progress<&'buf mut [u8]>, TransferError<'buf, DiskError>> {
        let (lba, count) = match self.sector_range(start, pages) {
            Ok(range) => range,
            Err(e) => return Err(TransferError::new(e, buffer)),
        };
        self.ata
            .read(buffer, lba, count)
            .map_err(TransferError::convert)
    }

    /// Write `pages` pages from `buffer` starting at page `start`.
    ///
    /// # Errors
    /// As for [`read_pages`](Self::read_pages).
    pub fn write_pages(
        &mut self,
        buffer: &'buf mut [u8],
        start: u32,
        pages: u16,
    ) -> Result<Progress<&'buf mut [u8]>, TransferError<'buf, DiskError>> {
        let (lba, count) = match self.sector_range(start, pages) {
            Ok(range) => range,
            Err(e) => return Err(TransferError::new(e, buffer)),
        };
        self.ata
            .write(buffer, lba, count)
            .map_err(TransferError::convert)
    }

    fn sector_range(&self, start: u32, pages: u16) -> Result<(u32, u16), DiskError> {
        let overflow = DiskError::PageRangeOverflow { start, pages };
        let lba = start.checked_mul(self.sectors_per_page).ok_or(overflow)?;
        let count = u32::from(pages)
            .checked_mul(self.sectors_per_page)
            .and_then(|count| u16::try_from(count).ok())
            .ok_or(overflow)?;
        Ok((lba, count))
    }

    /// Forward the disk interrupt to the driver.
    ///
    /// # Errors
    /// The driver's interrupt errors.
    pub fn on_interrupt(&mut self) -> Result<(), DiskError> {
        Ok(self.ata.on_interrupt()?)
    }

    /// The buffer of a finished interrupt-driven transfer.
    pub fn take_buffer(&mut self) -> Option<&'buf mut [u8]> {
        self.ata.take_buffer()
    }

    /// Record the partition the boot loader started from. Takes precedence
    /// over the boot flags when the partition table is read.
    pub const fn set_boot_partition(&mut self, index: u32) {
        self.preferred_partition = Some(index);
    }

    /// Read the partition table from page 0 into `scratch` and pick the
    /// boot partition.
    ///
    /// The read is polled; interrupts are restored afterwards. `scratch` must
    /// hold one page.
    ///
    /// # Errors
    /// Read failures, a malformed table, or no usable boot partition.
    pub fn read_partition_table(&mut self, scratch: &mut [u8]) -> Result<(), MbrError> {
        let (lba, count) = self.sector_range(0, 1)?;
        self.ata
            .read_blocking(scratch, lba, count)
            .inspect_err(|e| error!("failed to read MBR: {e}"))?;

        let table = PartitionTable::parse(scratch)?;
        let index = table
            .boot_partition(self.preferred_partition)
            .inspect_err(|e| error!("MBR: {e}"))?;

        let entry = table.entries()[index];
        info!(
            "boot partition {index}: system id {:#04x}, start {:#x}, {:#x} sectors",
            entry.system_id, entry.lba_offset, entry.lba_size
        );
        self.partitions = Some(table);
        self.boot_partition = Some(index);
        Ok(())
    }

    #[must_use]
    pub const fn partition_table(&self) -> Option<&PartitionTable> {
        self.partitions.as_ref()
    }

    #[must_use]
    pub const fn boot_partition_index(&self) -> Option<usize> {
        self.boot_partition
    }

    #[must_use]
    pub fn boot_partition(&self) -> Option<&PartitionEntry> {
        self.partitions.as_ref()?.entry(self.boot_partition?)
    }

    /// `false` before the partition table was read.
    #[must_use]
    pub fn is_partition_bootable(&self, index: usize) -> bool {
        self.partitions
            .as_ref()
            .is_some_and(|table| table.is_bootable(index))
    }

    #[must_use]
    pub const fn sectors_per_page(&self) -> u32 {
        self.sectors_per_page
    }

    #[must_use]
    pub const fn ata(&self) -> &AtaDriver<'buf, P, C> {
        &self.ata
    }

    pub const fn ata_mut(&mut self) -> &mut AtaDriver<'buf, P, C> {
        &mut self.ata
    }
}
