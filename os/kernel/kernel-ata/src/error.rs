use crate::command::CommandTag;
use core::fmt;

/// A status bit a wait can be blocked on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusBit {
    Busy,
    DataRequest,
    DeviceReady,
}

impl fmt::Display for StatusBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Busy => "BSY",
            Self::DataRequest => "DRQ",
            Self::DeviceReady => "DRDY",
        })
    }
}

/// Errors raised by the ATA driver.
///
/// Raw status and error register values are carried for diagnostics.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AtaError {
    #[error("timed out waiting for {bit}={expected} (status {status:#04x})")]
    Timeout {
        bit: StatusBit,
        expected: bool,
        status: u8,
    },

    #[error("device reported an error (status {status:#04x}, error {error:#04x})")]
    Device { status: u8, error: u8 },

    #[error("device busy (status {status:#04x})")]
    Busy { status: u8 },

    #[error("device is not requesting data (status {status:#04x})")]
    NoDataRequest { status: u8 },

    #[error("{0} still in progress")]
    CommandInProgress(CommandTag),

    #[error("not an ATA device (IDENTIFY word 0 = {0:#06x})")]
    NotAta(u16),

    #[error("device does not support LBA addressing")]
    LbaUnsupported,

    #[error("device does not support FLUSH CACHE")]
    FlushUnsupported,

    #[error("sectors {start}..{end} exceed the device's {limit} sectors")]
    OutOfRange { start: u64, end: u64, limit: u64 },

    #[error("sector count {0} cannot be encoded")]
    InvalidSectorCount(u32),

    #[error("buffer of {len} bytes cannot hold {needed} bytes")]
    BufferTooSmall { len: usize, needed: usize },

    #[error("device has not been identified")]
    NotIdentified,

    #[error("the buffer of an earlier transfer was not collected")]
    BufferNotCollected,
}

/// A transfer that failed before the driver took charge of the buffer, or
/// while it was still moving data synchronously. The caller's buffer comes
/// back with the error.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct TransferError<'buf, E = AtaError> {
    pub error: E,
    pub buffer: &'buf mut [u8],
}

impl<'buf, E> TransferError<'buf, E> {
    pub const fn new(error: E, buffer: &'buf mut [u8]) -> Self {
        Self { error, buffer }
    }

    /// Convert the error, keeping the buffer.
    #[must_use]
    pub fn convert<F: From<E>>(self) -> TransferError<'buf, F> {
        TransferError {
            error: F::from(self.error),
            buffer: self.buffer,
        }
    }

    #[must_use]
    pub fn into_buffer(self) -> &'buf mut [u8] {
        self.buffer
    }
}
