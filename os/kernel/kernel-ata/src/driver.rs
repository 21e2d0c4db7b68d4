use crate::bus::AtaBus;
use crate::command::{CommandTag, Progress};
use crate::config::AtaConfig;
use crate::error::{AtaError, StatusBit};
use crate::identify::{DeviceInfo, IDENTIFY_WORDS};
use crate::regs::{self, DriveSelect, Opcode};
use crate::transfer::Cursor;
use kernel_pic::InterruptController;
use kernel_ports::PortIo;
use log::{debug, error, info, warn};

/// Driver for the device on one ATA channel.
///
/// `'buf` is the lifetime of the caller's transfer buffers: with interrupts
/// enabled a buffer stays lent to the driver until the transfer is done and
/// it is handed back by [`take_buffer`](Self::take_buffer).
pub struct AtaDriver<'buf, P, C> {
    pub(crate) bus: AtaBus<P>,
    pub(crate) irqs: C,
    pub(crate) config: AtaConfig,
    pub(crate) info: DeviceInfo,
    pub(crate) identified: bool,
    pub(crate) interrupts_enabled: bool,
    pub(crate) drive: u8,
    pub(crate) command: CommandTag,
    pub(crate) cursor: Cursor<'buf>,
    pub(crate) pending_multiple: u8,
}

impl<'buf, P: PortIo, C: InterruptController> AtaDriver<'buf, P, C> {
    /// Nothing is written to the device until [`initialize`](Self::initialize).
    pub const fn new(ports: P, irqs: C, config: AtaConfig) -> Self {
        Self {
            bus: AtaBus::new(ports, config.channel, config.timings),
            irqs,
            config,
            info: DeviceInfo::UNIDENTIFIED,
            identified: false,
            interrupts_enabled: false,
            drive: 0,
            command: CommandTag::None,
            cursor: Cursor::new(),
            pending_multiple: 0,
        }
    }

    /// Bring the device into a known state: reset it, identify it, enable
    /// multiple-sector blocks of `multiple_block_bytes`, discard stale data,
    /// and finally enable interrupts if configured.
    ///
    /// # Errors
    /// Any failure of the reset or identify steps, or a device that never
    /// leaves `BSY`.
    pub fn initialize(&mut self) -> Result<(), AtaError> {
        let base = self.config.channel.io_base;
        self.bus
            .wait_busy(false)
            .inspect_err(|e| error!("ATA {base:#x}: device never became idle: {e}"))?;

        self.set_interrupts(false);
        self.software_reset()
            .inspect_err(|e| error!("ATA {base:#x}: reset failed: {e}"))?;

        // Interrupts are off, so IDENTIFY completes here.
        match self.identify() {
            Ok(Progress::Complete(())) => {}
            Ok(Progress::Pending) => return Err(AtaError::NotIdentified),
            Err(e) => {
                error!("ATA {base:#x}: IDENTIFY failed: {e}");
                return Err(e);
            }
        }

        if self.info.has_multiple_cmd {
            let sector_bytes = self.info.sector_words.saturating_mul(2).max(1);
            let block = u8::try_from(self.config.multiple_block_bytes / sector_bytes)
                .unwrap_or(u8::MAX);
            match self.set_multiple_mode(block) {
                Ok(Progress::Complete(n)) => debug!("ATA {base:#x}: {n} sectors per block"),
                Ok(Progress::Pending) => {}
                Err(e) => warn!("ATA {base:#x}: multiple mode unavailable: {e}"),
            }
        }

        self.current_drive()?;
        self.drain();

        if self.config.irq_mode {
            self.set_interrupts(true);
        }

        info!(
            "ATA {base:#x}: drive {}, {} sectors of {} bytes, lba48={}, multiple={}",
            self.drive,
            self.info.max_sectors(),
            self.info.sector_bytes(),
            self.info.has_lba48,
            self.info.current_multiple
        );
        Ok(())
    }

    /// Issue IDENTIFY DEVICE. On success [`info`](Self::info) is replaced; on
    /// any failure it is left untouched.
    ///
    /// # Errors
    /// [`AtaError::Busy`] if the device does not accept commands, a device or
    /// timeout error, or a parse failure of the response.
    pub fn identify(&mut self) -> Result<Progress<()>, AtaError> {
        self.ensure_idle()?;
        self.bus
            .wait_command_ready()
            .inspect_err(|e| warn!("IDENTIFY: {e}"))?;

        self.command = CommandTag::Identify;
        self.bus.command(Opcode::IdentifyDevice);
        self.bus.settle();
        self.check_issued()?;

        if self.interrupts_enabled {
            return Ok(Progress::Pending);
        }

        self.bus.wait_not_busy()?;
        self.fail_on_error()?;
        self.read_identify()?;
        Ok(Progress::Complete(()))
    }

    /// Read and parse the 256 IDENTIFY words once the device requests the
    /// transfer.
    pub(crate) fn read_identify(&mut self) -> Result<(), AtaError> {
        self.check_data_ready()?;

        let mut words = [0u16; IDENTIFY_WORDS];
        for word in &mut words {
            *word = self.bus.read_data();
        }
        self.command = CommandTag::None;

        let info =
            DeviceInfo::parse(&words).inspect_err(|e| warn!("IDENTIFY response rejected: {e}"))?;
        debug!("IDENTIFY: {info:?}");
        self.info = info;
        self.identified = true;
        Ok(())
    }

    /// Set the READ/WRITE MULTIPLE block size, clamped to the device maximum.
    ///
    /// Devices without multiple-sector support, and a request of 0, are left
    /// alone and report the current setting.
    ///
    /// # Errors
    /// [`AtaError::Busy`], or a device error if the size was refused.
    pub fn set_multiple_mode(&mut self, sectors: u8) -> Result<Progress<u8>, AtaError> {
        if !self.info.has_multiple_cmd || sectors == 0 {
            return Ok(Progress::Complete(self.info.current_multiple));
        }
        let sectors = sectors.min(self.info.max_multiple);

        self.ensure_idle()?;
        self.bus
            .wait_command_ready()
            .inspect_err(|e| warn!("SET MULTIPLE MODE: {e}"))?;

        self.bus.write_reg(regs::SECTOR_COUNT, sectors);
        self.command = CommandTag::SetMultiple;
        self.pending_multiple = sectors;
        self.bus.command(Opcode::SetMultipleMode);
        self.bus.settle();
        self.check_issued()?;

        if self.interrupts_enabled {
            return Ok(Progress::Pending);
        }

        self.bus.wait_not_busy()?;
        self.fail_on_error()?;
        self.info.current_multiple = sectors;
        self.command = CommandTag::None;
        Ok(Progress::Complete(sectors))
    }

    /// Select device 0 or 1 on the channel.
    ///
    /// # Errors
    /// [`AtaError::Busy`] if a transfer is underway, a timeout if the device
    /// stays busy after selection, or a device error.
    pub fn select_drive(&mut self, device: u8) -> Result<(), AtaError> {
        self.ensure_idle()?;
        let status = self.bus.alt_status();
        if status.bsy() || status.drq() {
            return Err(AtaError::Busy {
                status: status.into_bits(),
            });
        }

        self.bus.select(DriveSelect::lba_mode(device, 0));
        self.bus.settle();
        for _ in 0..self.bus.timings().select_attempts {
            if !self.bus.is_busy() {
                break;
            }
            self.bus.settle();
        }
        if self.bus.is_busy() {
            return Err(AtaError::Timeout {
                bit: StatusBit::Busy,
                expected: false,
                status: self.bus.alt_status().into_bits(),
            });
        }
        self.bus.check_error()?;

        self.drive = device & 1;
        Ok(())
    }

    /// Read back the selected device from the Drive/Head register.
    ///
    /// # Errors
    /// [`AtaError::Timeout`] if the device stays busy.
    pub fn current_drive(&mut self) -> Result<u8, AtaError> {
        self.bus.wait_busy(false)?;
        self.drive = self.bus.drive_select().device();
        Ok(self.drive)
    }

    /// Pulse `SRST`, resetting both devices on the channel.
    ///
    /// Interrupts are disabled while the reset runs and re-enabled afterwards
    /// if they were enabled before. Any command in flight is abandoned.
    ///
    /// # Errors
    /// [`AtaError::Timeout`] if the device stays busy before or after the
    /// reset, or a device error reported once it completes.
    pub fn software_reset(&mut self) -> Result<(), AtaError> {
        self.bus
            .wait_busy(false)
            .inspect_err(|e| warn!("reset: device busy: {e}"))?;

        let restore = self.interrupts_enabled;
        self.set_interrupts(false);
        self.command = CommandTag::SoftReset;

        let control = self.bus.control();
        self.bus.write_control(control.with_srst(true));
        for _ in 0..self.bus.timings().reset_hold_waits {
            self.bus.io_wait();
        }
        self.bus.write_control(control.with_srst(false));

        let timings = *self.bus.timings();
        for _ in 0..timings.reset_rounds {
            if !self.bus.is_busy() {
                break;
            }
            for _ in 0..timings.reset_round_waits {
                self.bus.io_wait();
            }
        }
        if self.bus.is_busy() {
            let status = self.bus.alt_status().into_bits();
            warn!("reset: device still busy (status {status:#04x})");
            return Err(AtaError::Timeout {
                bit: StatusBit::Busy,
                expected: false,
                status,
            });
        }

        let status = self.bus.status();
        self.command = CommandTag::None;
        self.cursor.abort();
        if status.has_error() {
            let error = self.bus.error();
            warn!(
                "reset: device error (status {:#04x}, error {error:#04x})",
                status.into_bits()
            );
            return Err(AtaError::Device {
                status: status.into_bits(),
                error,
            });
        }

        self.set_interrupts(restore);
        Ok(())
    }

    /// Enable or disable the channel's interrupt, both at the device
    /// (`nIEN`) and at the interrupt controller.
    pub fn set_interrupts(&mut self, enabled: bool) {
        let line = self.config.channel.irq;
        if enabled {
            self.bus.write_control(self.bus.control().with_nien(false));
            self.irqs.unmask(line);
        } else {
            self.irqs.mask(line);
            self.bus.write_control(self.bus.control().with_nien(true));
        }
        self.interrupts_enabled = enabled;
    }

    /// Discard data the device still offers from a previous command.
    fn drain(&mut self) {
        let mut drained = 0u32;
        while drained < self.bus.timings().drain_words
            && !self.bus.is_busy()
            && self.bus.is_data_request()
        {
            self.bus.read_data();
            drained += 1;
        }
        if drained > 0 {
            debug!("discarded {drained} stale data words");
        }
    }

    /// Return the buffer of an interrupt-driven transfer once the driver is
    /// done with it: after completion, after a reset, or after the device
    /// ended the command with an error.
    ///
    /// `None` while the transfer is still running or when no buffer is held.
    pub fn take_buffer(&mut self) -> Option<&'buf mut [u8]> {
        if self.ensure_idle().is_err() {
            return None;
        }
        self.cursor.take()
    }

    /// Reject a new command while another is active.
    ///
    /// A command whose device side has ended without the driver seeing it
    /// (an error interrupt, or a polled command abandoned after a timeout)
    /// is retired here instead.
    pub(crate) fn ensure_idle(&mut self) -> Result<(), AtaError> {
        if self.command == CommandTag::None {
            return Ok(());
        }
        let status = self.bus.alt_status();
        let ended = !status.bsy()
            && !status.drq()
            && (status.has_error() || !self.interrupts_enabled);
        if ended {
            debug!(
                "retiring {} (status {:#04x})",
                self.command,
                status.into_bits()
            );
            self.finish_command();
            Ok(())
        } else {
            Err(AtaError::CommandInProgress(self.command))
        }
    }

    /// Fail a just-issued command the device rejected outright.
    pub(crate) fn check_issued(&mut self) -> Result<(), AtaError> {
        let status = self.bus.alt_status();
        if !status.bsy() && status.has_error() {
            let error = self.bus.error();
            warn!(
                "{} rejected (status {:#04x}, error {error:#04x})",
                self.command,
                status.into_bits()
            );
            self.abort_transfer();
            return Err(AtaError::Device {
                status: status.into_bits(),
                error,
            });
        }
        Ok(())
    }

    /// Fail the active command if the device reports an error.
    pub(crate) fn fail_on_error(&mut self) -> Result<(), AtaError> {
        if let Err(e) = self.bus.check_error() {
            warn!("{}: {e}", self.command);
            self.abort_transfer();
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn abort_transfer(&mut self) {
        self.command = CommandTag::None;
        self.cursor.abort();
    }

    pub(crate) fn finish_command(&mut self) {
        if self.command.is_data_transfer() && self.cursor.remaining() > 0 {
            warn!(
                "{} ended with {} sectors outstanding",
                self.command,
                self.cursor.remaining()
            );
        }
        self.abort_transfer();
    }

    #[must_use]
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[must_use]
    pub const fn is_identified(&self) -> bool {
        self.identified
    }

    #[must_use]
    pub const fn active_command(&self) -> CommandTag {
        self.command
    }

    #[must_use]
    pub const fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// The selected device, 0 or 1.
    #[must_use]
    pub const fn drive(&self) -> u8 {
        self.drive
    }

    /// Sectors an interrupt-driven transfer has yet to move.
    #[must_use]
    pub const fn remaining_sectors(&self) -> u32 {
        self.cursor.remaining()
    }

    #[must_use]
    pub const fn config(&self) -> &AtaConfig {
        &self.config
    }

    /// The Error register.
    pub fn error_register(&mut self) -> u8 {
        self.bus.error()
    }

    /// The Alternate Status register, without acknowledging interrupts.
    pub fn alt_status(&mut self) -> u8 {
        self.bus.alt_status().into_bits()
    }

    /// Release the port and interrupt controller handles.
    pub fn into_parts(self) -> (P, C) {
        (self.bus.into_inner(), self.irqs)
    }
}
