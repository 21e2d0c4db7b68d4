use core::fmt;

/// The command the driver believes the device is executing.
///
/// Set when a command is written to the device and cleared back to
/// [`CommandTag::None`] only once the device stops reporting `BSY` and `DRQ`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CommandTag {
    #[default]
    None,
    Read,
    ReadMultiple,
    Write,
    WriteMultiple,
    Identify,
    FlushCache,
    SetMultiple,
    SoftReset,
}

impl CommandTag {
    /// READ or WRITE, single or multiple.
    #[must_use]
    pub const fn is_data_transfer(self) -> bool {
        matches!(
            self,
            Self::Read | Self::ReadMultiple | Self::Write | Self::WriteMultiple
        )
    }

    /// The host sends data for this command.
    #[must_use]
    pub const fn is_data_out(self) -> bool {
        matches!(self, Self::Write | Self::WriteMultiple)
    }

    #[must_use]
    pub const fn is_multiple(self) -> bool {
        matches!(self, Self::ReadMultiple | Self::WriteMultiple)
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Read => "READ SECTORS",
            Self::ReadMultiple => "READ MULTIPLE",
            Self::Write => "WRITE SECTORS",
            Self::WriteMultiple => "WRITE MULTIPLE",
            Self::Identify => "IDENTIFY DEVICE",
            Self::FlushCache => "FLUSH CACHE",
            Self::SetMultiple => "SET MULTIPLE MODE",
            Self::SoftReset => "software reset",
        })
    }
}

/// Outcome of issuing a command.
///
/// With interrupts enabled a command only starts on the device and is
/// finished by [`on_interrupt`](crate::AtaDriver::on_interrupt); polled
/// commands always complete before returning.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub enum Progress<T> {
    Complete(T),
    Pending,
}

impl<T> Progress<T> {
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// The completed value, if any.
    #[must_use]
    pub fn complete(self) -> Option<T> {
        match self {
            Self::Complete(value) => Some(value),
            Self::Pending => None,
        }
    }
}
