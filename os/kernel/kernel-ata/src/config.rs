use kernel_pic::{IRQ_PRIMARY_ATA, IRQ_SECONDARY_ATA};

/// One of the legacy ATA channels: its two register blocks and its interrupt
/// line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    /// Port of the Data register; the command block spans `io_base..io_base + 8`.
    pub io_base: u16,
    /// Port of the Alternate Status / Device Control register.
    pub control_base: u16,
    /// Legacy IRQ line.
    pub irq: u8,
}

impl Channel {
    pub const PRIMARY: Self = Self {
        io_base: 0x1F0,
        control_base: 0x3F6,
        irq: IRQ_PRIMARY_ATA,
    };

    pub const SECONDARY: Self = Self {
        io_base: 0x170,
        control_base: 0x376,
        irq: IRQ_SECONDARY_ATA,
    };

    /// Absolute port of a command block register.
    #[inline]
    #[must_use]
    pub const fn port(&self, register: u16) -> u16 {
        self.io_base + register
    }
}

/// Polling budgets. Every budget counts register reads or [`io_wait`]
/// delays, never wall-clock time.
///
/// [`io_wait`]: kernel_ports::PortIo::io_wait
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timings {
    /// Polls per status wait; each failed poll is followed by one `io_wait`.
    pub poll_attempts: u32,
    /// Alternate-status reads to spin while a command keeps the device busy.
    pub command_attempts: u32,
    /// Alternate-status reads that make up the 400ns settle delay.
    pub settle_reads: u32,
    /// Settle delays to wait for `BSY` to drop after selecting a drive.
    pub select_attempts: u32,
    /// `io_wait` delays to hold `SRST` asserted.
    pub reset_hold_waits: u32,
    /// Rounds to wait for `BSY` to drop after a reset.
    pub reset_rounds: u32,
    /// `io_wait` delays per reset round.
    pub reset_round_waits: u32,
    /// Data words drained at most when discarding stale output.
    pub drain_words: u32,
}

impl Timings {
    pub const REFERENCE: Self = Self {
        poll_attempts: 3000,
        command_attempts: 100_000,
        settle_reads: 20,
        select_attempts: 5,
        reset_hold_waits: 400,
        reset_rounds: 2,
        reset_round_waits: 140_000,
        drain_words: 65_536,
    };
}

impl Default for Timings {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// Bytes in one memory page; the disk layer moves data in pages.
pub const PAGE_SIZE: u32 = 4096;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AtaConfig {
    pub channel: Channel,
    pub timings: Timings,
    /// Leave interrupts enabled after initialization and complete
    /// transfers from [`on_interrupt`](crate::AtaDriver::on_interrupt).
    pub irq_mode: bool,
    /// Bytes per READ/WRITE MULTIPLE block requested during initialization.
    pub multiple_block_bytes: u32,
}

impl AtaConfig {
    /// Primary channel, reference timings, polled transfers, page-sized
    /// multiple blocks.
    pub const PRIMARY: Self = Self {
        channel: Channel::PRIMARY,
        timings: Timings::REFERENCE,
        irq_mode: false,
        multiple_block_bytes: PAGE_SIZE,
    };

    #[must_use]
    pub const fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub const fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub const fn with_irq_mode(mut self, irq_mode: bool) -> Self {
        self.irq_mode = irq_mode;
        self
    }

    #[must_use]
    pub const fn with_multiple_block_bytes(mut self, bytes: u32) -> Self {
        self.multiple_block_bytes = bytes;
        self
    }
}

impl Default for AtaConfig {
    fn default() -> Self {
        Self::PRIMARY
    }
}
