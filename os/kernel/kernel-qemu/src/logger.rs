use core::fmt::{self, Write};
use kernel_ports::PortIo;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// QEMU's `-debugcon` port.
pub const QEMU_DEBUG_PORT: u16 = 0x402;

/// A byte-at-a-time `fmt::Write` sink over a single output port.
pub struct DebugConsole<P> {
    ports: P,
    port: u16,
}

impl<P: PortIo> DebugConsole<P> {
    pub const fn new(ports: P, port: u16) -> Self {
        Self { ports, port }
    }

    pub fn into_inner(self) -> P {
        self.ports
    }
}

impl<P: PortIo> Write for DebugConsole<P> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.ports.outb(self.port, b);
        }
        Ok(())
    }
}

/// Format one record as `"[LEVEL] target: message\n"`.
///
/// # Errors
/// Propagates the sink's formatting error.
pub fn write_record<W: Write>(sink: &mut W, record: &Record) -> fmt::Result {
    writeln!(
        sink,
        "[{}] {}: {}",
        record.level(),
        record.target(),
        record.args()
    )
}

pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Register as the global logger. Call once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed first.
    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        crate::qemu_fmt::qemu_log(record);
    }

    fn flush(&self) {}
}
