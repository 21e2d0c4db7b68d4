use crate::command::CommandTag;
use crate::driver::AtaDriver;
use crate::error::AtaError;
use crate::regs::Status;
use kernel_pic::InterruptController;
use kernel_ports::PortIo;
use log::{debug, warn};

impl<P: PortIo, C: InterruptController> AtaDriver<'_, P, C> {
    /// Service the channel's interrupt.
    ///
    /// Reads Status (acknowledging the device), continues the active
    /// command, and always signals end-of-interrupt. On a device error the
    /// active command is left in place so the caller can inspect it.
    ///
    /// # Errors
    /// [`AtaError::Device`] when the device reports an error, or a failure
    /// moving the next unit.
    pub fn on_interrupt(&mut self) -> Result<(), AtaError> {
        let status = self.bus.status();
        let result = if status.has_error() {
            let error = self.bus.error();
            warn!(
                "{} failed (status {:#04x}, error {error:#04x})",
                self.command,
                status.into_bits()
            );
            Err(AtaError::Device {
                status: status.into_bits(),
                error,
            })
        } else {
            self.service(status)
        };

        self.irqs.end_of_interrupt(self.config.channel.irq);
        result
    }

    fn service(&mut self, status: Status) -> Result<(), AtaError> {
        let moved_data_in = match self.command {
            CommandTag::None => {
                debug!("spurious interrupt (status {:#04x})", status.into_bits());
                return Ok(());
            }
            CommandTag::Read
            | CommandTag::ReadMultiple
            | CommandTag::Write
            | CommandTag::WriteMultiple => {
                if self.cursor.remaining() == 0 {
                    false
                } else {
                    self.transfer_unit()?;
                    !self.command.is_data_out()
                }
            }
            CommandTag::Identify => {
                self.read_identify()?;
                true
            }
            CommandTag::SetMultiple | CommandTag::FlushCache | CommandTag::SoftReset => false,
        };

        // Nothing follows the last unit read, so look again after draining it.
        let settled = if moved_data_in {
            self.bus.alt_status()
        } else {
            status
        };
        if !settled.bsy() && !settled.drq() {
            if self.command == CommandTag::SetMultiple {
                self.info.current_multiple = self.pending_multiple;
                debug!("{} sectors per block", self.pending_multiple);
            }
            self.finish_command();
        }
        Ok(())
    }
}
