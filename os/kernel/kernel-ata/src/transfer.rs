//! PIO sector transfers.
//!
//! A transfer moves in units: one sector for READ/WRITE SECTORS, up to the
//! current block size for READ/WRITE MULTIPLE. The device raises `DRQ` once
//! per unit. Polled transfers walk the caller's buffer unit by unit before
//! returning; interrupt-driven ones park the buffer in a [`Cursor`] that
//! [`on_interrupt`](AtaDriver::on_interrupt) advances.

use crate::bus::AtaBus;
use crate::command::{CommandTag, Progress};
use crate::driver::AtaDriver;
use crate::error::{AtaError, TransferError};
use crate::regs::{self, DriveSelect, Opcode};
use kernel_pic::InterruptController;
use kernel_ports::PortIo;
use log::{debug, warn};

/// Position of an interrupt-driven transfer within the caller's buffer.
pub(crate) struct Cursor<'buf> {
    buffer: Option<&'buf mut [u8]>,
    offset: usize,
    remaining: u32,
}

impl<'buf> Cursor<'buf> {
    pub(crate) const fn new() -> Self {
        Self {
            buffer: None,
            offset: 0,
            remaining: 0,
        }
    }

    /// Park `buffer` for a transfer of `sectors` sectors.
    ///
    /// A buffer nobody collected yet stays parked and `buffer` is handed
    /// back.
    pub(crate) fn start(
        &mut self,
        buffer: &'buf mut [u8],
        sectors: u32,
    ) -> Result<(), &'buf mut [u8]> {
        if self.buffer.is_some() {
            return Err(buffer);
        }
        self.buffer = Some(buffer);
        self.offset = 0;
        self.remaining = sectors;
        Ok(())
    }

    /// Count `sectors` sectors as moved without touching the buffer.
    fn skip(&mut self, sectors: u32, sector_bytes: usize) {
        let sectors = sectors.min(self.remaining);
        self.offset += sectors as usize * sector_bytes;
        self.remaining -= sectors;
    }

    pub(crate) const fn remaining(&self) -> u32 {
        self.remaining
    }

    pub(crate) const fn is_parked(&self) -> bool {
        self.buffer.is_some()
    }

    /// Length of the parked buffer, 0 if there is none.
    fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.len())
    }

    /// Claim the next `sectors` sectors of the buffer.
    fn next_unit(&mut self, sectors: u32, sector_bytes: usize) -> Option<&mut [u8]> {
        let start = self.offset;
        let end = start + sectors as usize * sector_bytes;
        if sectors > self.remaining || self.buffer.as_ref().is_none_or(|b| b.len() < end) {
            return None;
        }
        self.offset = end;
        self.remaining -= sectors;
        self.buffer.as_deref_mut().map(|b| &mut b[start..end])
    }

    /// Stop the transfer; the buffer stays parked for [`Cursor::take`].
    pub(crate) const fn abort(&mut self) {
        self.remaining = 0;
    }

    pub(crate) fn take(&mut self) -> Option<&'buf mut [u8]> {
        self.offset = 0;
        self.remaining = 0;
        self.buffer.take()
    }
}

/// Move one unit through the Data register, little-endian.
fn pio<P: PortIo>(bus: &mut AtaBus<P>, write: bool, unit: &mut [u8]) {
    for pair in unit.chunks_exact_mut(2) {
        if write {
            bus.write_data(u16::from_le_bytes([pair[0], pair[1]]));
        } else {
            pair.copy_from_slice(&bus.read_data().to_le_bytes());
        }
    }
}

const fn transfer_command(write: bool, multiple: bool, lba48: bool) -> (CommandTag, Opcode) {
    match (write, multiple, lba48) {
        (false, false, false) => (CommandTag::Read, Opcode::ReadSectors),
        (false, false, true) => (CommandTag::Read, Opcode::ReadSectorsExt),
        (false, true, false) => (CommandTag::ReadMultiple, Opcode::ReadMultiple),
        (false, true, true) => (CommandTag::ReadMultiple, Opcode::ReadMultipleExt),
        (true, false, false) => (CommandTag::Write, Opcode::WriteSectors),
        (true, false, true) => (CommandTag::Write, Opcode::WriteSectorsExt),
        (true, true, false) => (CommandTag::WriteMultiple, Opcode::WriteMultiple),
        (true, true, true) => (CommandTag::WriteMultiple, Opcode::WriteMultipleExt),
    }
}

impl<'buf, P: PortIo, C: InterruptController> AtaDriver<'buf, P, C> {
    /// Read `count` sectors starting at `lba` into `buffer`.
    ///
    /// Polled reads return the filled buffer. With interrupts enabled the
    /// read returns [`Progress::Pending`] and the buffer comes back through
    /// [`take_buffer`](Self::take_buffer) once the last sector arrived.
    ///
    /// # Errors
    /// Range and buffer checks fail before anything reaches the device;
    /// otherwise busy, timeout and device errors. The buffer comes back in
    /// the [`TransferError`]. [`AtaError::BufferNotCollected`] if the buffer
    /// of an earlier interrupt-driven transfer is still parked.
    pub fn read(
        &mut self,
        buffer: &'buf mut [u8],
        lba: u32,
        count: u16,
    ) -> Result<Progress<&'buf mut [u8]>, TransferError<'buf>> {
        self.transfer(false, buffer, lba, count)
    }

    /// Write `count` sectors from `buffer` starting at `lba`.
    ///
    /// With interrupts enabled the first unit is sent before returning
    /// [`Progress::Pending`]; the rest follow from
    /// [`on_interrupt`](Self::on_interrupt).
    ///
    /// # Errors
    /// As for [`read`](Self::read).
    pub fn write(
        &mut self,
        buffer: &'buf mut [u8],
        lba: u32,
        count: u16,
    ) -> Result<Progress<&'buf mut [u8]>, TransferError<'buf>> {
        self.transfer(true, buffer, lba, count)
    }

    /// Flush the device's write cache.
    ///
    /// # Errors
    /// [`AtaError::Busy`], a timeout, or a device error.
    pub fn flush(&mut self) -> Result<Progress<()>, AtaError> {
        self.ensure_idle()?;
        self.bus
            .wait_command_ready()
            .inspect_err(|e| warn!("FLUSH CACHE: {e}"))?;

        let opcode = if self.info.has_flush_ext {
            Opcode::FlushCacheExt
        } else {
            Opcode::FlushCache
        };
        self.command = CommandTag::FlushCache;
        self.bus.command(opcode);
        self.bus.settle();
        self.check_issued()?;

        if self.interrupts_enabled {
            return Ok(Progress::Pending);
        }

        self.bus.wait_not_busy()?;
        self.fail_on_error()?;
        self.command = CommandTag::None;
        Ok(Progress::Complete(()))
    }

    fn transfer(
        &mut self,
        write: bool,
        buffer: &'buf mut [u8],
        lba: u32,
        count: u16,
    ) -> Result<Progress<&'buf mut [u8]>, TransferError<'buf>> {
        if let Err(error) = self.check_transfer(buffer.len(), lba, count) {
            return Err(TransferError::new(error, buffer));
        }
        if self.cursor.is_parked() {
            warn!("refusing transfer: previous buffer not collected");
            return Err(TransferError::new(AtaError::BufferNotCollected, buffer));
        }
        if let Err(error) = self.issue_transfer(write, lba, count) {
            return Err(TransferError::new(error, buffer));
        }

        if !self.interrupts_enabled {
            return match self.run_polled(write, buffer, count) {
                Ok(()) => Ok(Progress::Complete(buffer)),
                Err(error) => Err(TransferError::new(error, buffer)),
            };
        }

        // PIO data-out raises no interrupt before the first unit.
        let sectors = u32::from(count);
        let first = if write {
            let first = self.unit_sectors(sectors);
            let bytes = usize::from(first) * self.info.sector_bytes();
            if let Err(error) = self.await_unit() {
                return Err(TransferError::new(error, buffer));
            }
            pio(&mut self.bus, true, &mut buffer[..bytes]);
            u32::from(first)
        } else {
            0
        };
        if let Err(buffer) = self.cursor.start(buffer, sectors) {
            self.abort_transfer();
            return Err(TransferError::new(AtaError::BufferNotCollected, buffer));
        }
        self.cursor.skip(first, self.info.sector_bytes());
        Ok(Progress::Pending)
    }

    /// Read `count` sectors starting at `lba` into `buffer`, polled, whether
    /// or not interrupts are enabled. Interrupts are masked for the duration
    /// and restored afterwards.
    ///
    /// # Errors
    /// As for [`read`](Self::read).
    pub fn read_blocking(
        &mut self,
        buffer: &mut [u8],
        lba: u32,
        count: u16,
    ) -> Result<(), AtaError> {
        let restore = self.interrupts_enabled;
        if restore {
            self.set_interrupts(false);
        }
        let result = self
            .check_transfer(buffer.len(), lba, count)
            .and_then(|()| self.issue_transfer(false, lba, count))
            .and_then(|()| self.run_polled(false, buffer, count));
        if restore {
            self.set_interrupts(true);
        }
        result
    }

    /// Everything that can be refused before the device is touched.
    fn check_transfer(&mut self, len: usize, lba: u32, count: u16) -> Result<(), AtaError> {
        if !self.identified {
            return Err(AtaError::NotIdentified);
        }
        self.ensure_idle()?;

        if count == 0 || (!self.info.has_lba48 && count > 256) {
            return Err(AtaError::InvalidSectorCount(u32::from(count)));
        }
        let start = u64::from(lba);
        let end = start + u64::from(count);
        let limit = self.info.max_sectors();
        if end > limit {
            return Err(AtaError::OutOfRange { start, end, limit });
        }
        let needed = usize::from(count).saturating_mul(self.info.sector_bytes());
        if len < needed {
            return Err(AtaError::BufferTooSmall { len, needed });
        }
        Ok(())
    }

    fn issue_transfer(&mut self, write: bool, lba: u32, count: u16) -> Result<(), AtaError> {
        let (tag, opcode) =
            transfer_command(write, self.info.multiple_enabled(), self.info.has_lba48);
        self.bus
            .wait_command_ready()
            .inspect_err(|e| warn!("{tag}: {e}"))?;

        self.program_task_file(lba, count);
        self.command = tag;
        self.bus.command(opcode);
        self.bus.settle();
        self.check_issued()?;
        debug!("{tag}: {count} sectors at {lba}");
        Ok(())
    }

    /// Move every unit of an issued transfer and wait for the device to
    /// finish.
    fn run_polled(
        &mut self,
        write: bool,
        buffer: &mut [u8],
        count: u16,
    ) -> Result<(), AtaError> {
        let sector_bytes = self.info.sector_bytes();
        let needed = usize::from(count) * sector_bytes;
        let unit_bytes = usize::from(self.unit_sectors(u32::from(count))) * sector_bytes;
        for unit in buffer[..needed].chunks_mut(unit_bytes) {
            self.await_unit()?;
            pio(&mut self.bus, write, unit);
        }

        self.bus.wait_not_busy()?;
        self.fail_on_error()?;
        self.command = CommandTag::None;
        Ok(())
    }

    fn program_task_file(&mut self, lba: u32, count: u16) {
        let [lba0, lba1, lba2, lba3] = lba.to_le_bytes();
        let [count_low, count_high] = count.to_le_bytes();

        if self.info.has_lba48 {
            // Previous bytes first: count 15:8, LBA 31:24, 39:32, 47:40.
            self.bus.select(DriveSelect::lba_mode(self.drive, 0));
            self.bus.write_reg(regs::SECTOR_COUNT, count_high);
            self.bus.write_reg(regs::LBA_LOW, lba3);
            self.bus.write_reg(regs::LBA_MID, 0);
            self.bus.write_reg(regs::LBA_HIGH, 0);
        } else {
            self.bus.select(DriveSelect::lba_mode(self.drive, lba3));
        }
        self.bus.write_reg(regs::SECTOR_COUNT, count_low);
        self.bus.write_reg(regs::LBA_LOW, lba0);
        self.bus.write_reg(regs::LBA_MID, lba1);
        self.bus.write_reg(regs::LBA_HIGH, lba2);
    }

    /// Sectors in the next unit of the active transfer.
    fn unit_sectors(&self, remaining: u32) -> u8 {
        let block = if self.command.is_multiple() {
            self.info.current_multiple
        } else {
            1
        };
        u8::try_from(remaining).map_or(block, |r| r.min(block))
    }

    /// Wait until the device requests the next unit of a polled transfer.
    fn await_unit(&mut self) -> Result<(), AtaError> {
        self.bus.wait_not_busy()?;
        self.fail_on_error()?;
        self.bus.wait_data_request(true)?;
        self.check_data_ready()
    }

    /// The device must be idle with `DRQ` raised before a unit moves.
    ///
    /// A missing `DRQ` ends the active command.
    pub(crate) fn check_data_ready(&mut self) -> Result<(), AtaError> {
        let status = self.bus.alt_status();
        if status.bsy() {
            debug!("{}: device busy (status {:#04x})", self.command, status.into_bits());
            return Err(AtaError::Busy {
                status: status.into_bits(),
            });
        }
        if !status.drq() {
            warn!(
                "{}: device stopped requesting data (status {:#04x})",
                self.command,
                status.into_bits()
            );
            self.abort_transfer();
            return Err(AtaError::NoDataRequest {
                status: status.into_bits(),
            });
        }
        Ok(())
    }

    /// Move the next unit of an interrupt-driven transfer.
    pub(crate) fn transfer_unit(&mut self) -> Result<(), AtaError> {
        self.check_data_ready()?;

        let sectors = u32::from(self.unit_sectors(self.cursor.remaining()));
        let sector_bytes = self.info.sector_bytes();
        let write = self.command.is_data_out();
        let len = self.cursor.capacity();
        let Some(unit) = self.cursor.next_unit(sectors, sector_bytes) else {
            let needed = self.cursor.offset + sectors as usize * sector_bytes;
            warn!("{}: buffer exhausted", self.command);
            self.abort_transfer();
            return Err(AtaError::BufferTooSmall { len, needed });
        };
        pio(&mut self.bus, write, unit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_hands_out_consecutive_units() {
        let mut storage = [0u8; 6];
        let mut cursor = Cursor::new();
        cursor.start(&mut storage, 3).unwrap();

        cursor.next_unit(2, 2).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(cursor.remaining(), 1);
        cursor.next_unit(1, 2).unwrap().copy_from_slice(&[5, 6]);
        assert_eq!(cursor.remaining(), 0);
        assert!(cursor.next_unit(1, 2).is_none());

        assert_eq!(cursor.take().unwrap(), &[1, 2, 3, 4, 5, 6]);
        assert!(cursor.take().is_none());
    }

    #[test]
    fn cursor_refuses_units_beyond_remaining() {
        let mut storage = [0u8; 8];
        let mut cursor = Cursor::new();
        cursor.start(&mut storage, 2).unwrap();
        assert!(cursor.next_unit(3, 2).is_none());
        assert_eq!(cursor.remaining(), 2);
    }

    #[test]
    fn parked_buffer_is_not_overwritten() {
        let mut first = [1u8; 4];
        let mut second = [2u8; 4];
        let mut cursor = Cursor::new();
        cursor.start(&mut first, 2).unwrap();
        cursor.abort();

        let refused = cursor.start(&mut second, 2).unwrap_err();
        assert_eq!(refused, &[2, 2, 2, 2]);
        assert_eq!(cursor.take().unwrap(), &[1, 1, 1, 1]);
    }

    #[test]
    fn skipped_sectors_are_not_handed_out_again() {
        let mut storage = [0u8; 6];
        let mut cursor = Cursor::new();
        cursor.start(&mut storage, 3).unwrap();
        cursor.skip(2, 2);
        assert_eq!(cursor.remaining(), 1);
        cursor.next_unit(1, 2).unwrap().copy_from_slice(&[7, 8]);
        assert_eq!(cursor.take().unwrap(), &[0, 0, 0, 0, 7, 8]);
    }

    #[test]
    fn opcodes_follow_addressing_and_block_mode() {
        assert_eq!(
            transfer_command(false, false, false),
            (CommandTag::Read, Opcode::ReadSectors)
        );
        assert_eq!(
            transfer_command(true, true, true),
            (CommandTag::WriteMultiple, Opcode::WriteMultipleExt)
        );
        assert_eq!(transfer_command(false, true, true).1.into_bits(), 0x29);
        assert_eq!(transfer_command(true, false, false).1.into_bits(), 0x30);
    }
}
