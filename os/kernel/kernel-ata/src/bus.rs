//! Register-level access to one channel: typed reads and writes, the
//! device control shadow, and bounded status waits.

use crate::config::{Channel, Timings};
use crate::error::{AtaError, StatusBit};
use crate::regs::{self, DeviceControl, DriveSelect, Opcode, Status};
use kernel_ports::PortIo;
use log::debug;

pub struct AtaBus<P> {
    ports: P,
    channel: Channel,
    timings: Timings,
    control: DeviceControl,
}

impl<P: PortIo> AtaBus<P> {
    /// The device control shadow starts out all-zero, matching the register
    /// after power-up; nothing is written to the device.
    pub const fn new(ports: P, channel: Channel, timings: Timings) -> Self {
        Self {
            ports,
            channel,
            timings,
            control: DeviceControl::new(),
        }
    }

    #[inline]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    #[inline]
    pub const fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn into_inner(self) -> P {
        self.ports
    }

    #[inline]
    pub fn read_reg(&mut self, register: u16) -> u8 {
        self.ports.inb(self.channel.port(register))
    }

    #[inline]
    pub fn write_reg(&mut self, register: u16, value: u8) {
        self.ports.outb(self.channel.port(register), value);
    }

    /// Read the Status register. Acknowledges a pending interrupt.
    #[inline]
    pub fn status(&mut self) -> Status {
        Status::from_bits(self.read_reg(regs::STATUS))
    }

    /// Read the Alternate Status register, leaving the interrupt pending.
    #[inline]
    pub fn alt_status(&mut self) -> Status {
        Status::from_bits(self.ports.inb(self.channel.control_base))
    }

    #[inline]
    pub fn error(&mut self) -> u8 {
        self.read_reg(regs::ERROR)
    }

    #[inline]
    pub fn read_data(&mut self) -> u16 {
        self.ports.inw(self.channel.port(regs::DATA))
    }

    #[inline]
    pub fn write_data(&mut self, word: u16) {
        self.ports.outw(self.channel.port(regs::DATA), word);
    }

    #[inline]
    pub fn command(&mut self, opcode: Opcode) {
        self.write_reg(regs::COMMAND, opcode.into_bits());
    }

    #[inline]
    pub fn select(&mut self, select: DriveSelect) {
        self.write_reg(regs::DRIVE_HEAD, select.into_bits());
    }

    #[inline]
    pub fn drive_select(&mut self) -> DriveSelect {
        DriveSelect::from_bits(self.read_reg(regs::DRIVE_HEAD))
    }

    /// The last value written to Device Control.
    #[inline]
    pub const fn control(&self) -> DeviceControl {
        self.control
    }

    pub fn write_control(&mut self, control: DeviceControl) {
        self.control = control;
        self.ports.outb(self.channel.control_base, control.into_bits());
    }

    #[inline]
    pub fn io_wait(&mut self) {
        self.ports.io_wait();
    }

    #[inline]
    pub fn is_busy(&mut self) -> bool {
        self.alt_status().bsy()
    }

    #[inline]
    pub fn is_data_request(&mut self) -> bool {
        self.alt_status().drq()
    }

    #[inline]
    pub fn is_device_ready(&mut self) -> bool {
        self.alt_status().drdy()
    }

    #[inline]
    pub fn has_error(&mut self) -> bool {
        self.alt_status().has_error()
    }

    /// The 400ns delay the device needs before its status is valid.
    pub fn settle(&mut self) {
        for _ in 0..self.timings.settle_reads {
            self.alt_status();
        }
    }

    /// Wait for `bit` to read as `expected`.
    ///
    /// Each poll reads Alternate Status once; each failed poll is followed
    /// by exactly one `io_wait`.
    ///
    /// # Errors
    /// [`AtaError::Timeout`] once `poll_attempts` polls have failed.
    pub fn wait_for(&mut self, bit: StatusBit, expected: bool) -> Result<(), AtaError> {
        let mut status = Status::new();
        for _ in 0..self.timings.poll_attempts {
            status = self.alt_status();
            let value = match bit {
                StatusBit::Busy => status.bsy(),
                StatusBit::DataRequest => status.drq(),
                StatusBit::DeviceReady => status.drdy(),
            };
            if value == expected {
                return Ok(());
            }
            self.io_wait();
        }

        debug!(
            "{bit}={expected} not reached after {} polls (status {:#04x})",
            self.timings.poll_attempts,
            status.into_bits()
        );
        Err(AtaError::Timeout {
            bit,
            expected,
            status: status.into_bits(),
        })
    }

    /// # Errors
    /// [`AtaError::Timeout`]
    #[inline]
    pub fn wait_busy(&mut self, expected: bool) -> Result<(), AtaError> {
        self.wait_for(StatusBit::Busy, expected)
    }

    /// # Errors
    /// [`AtaError::Timeout`]
    #[inline]
    pub fn wait_data_request(&mut self, expected: bool) -> Result<(), AtaError> {
        self.wait_for(StatusBit::DataRequest, expected)
    }

    /// # Errors
    /// [`AtaError::Timeout`]
    #[inline]
    pub fn wait_device_ready(&mut self, expected: bool) -> Result<(), AtaError> {
        self.wait_for(StatusBit::DeviceReady, expected)
    }

    /// The device accepts a new command: not busy, no data pending, ready.
    ///
    /// # Errors
    /// [`AtaError::Busy`] with the last status read.
    pub fn wait_command_ready(&mut self) -> Result<(), AtaError> {
        let ready = self.wait_busy(false).is_ok()
            && self.wait_data_request(false).is_ok()
            && self.wait_device_ready(true).is_ok();
        if ready {
            Ok(())
        } else {
            Err(AtaError::Busy {
                status: self.alt_status().into_bits(),
            })
        }
    }

    /// Spin on Alternate Status for up to `command_attempts` reads while the
    /// device is busy executing a command.
    pub fn spin_while_busy(&mut self) {
        for _ in 0..self.timings.command_attempts {
            if !self.alt_status().bsy() {
                return;
            }
        }
    }

    /// Wait out a command's busy phase: spin, then poll with `io_wait`.
    ///
    /// # Errors
    /// [`AtaError::Timeout`] if `BSY` never drops.
    pub fn wait_not_busy(&mut self) -> Result<(), AtaError> {
        self.spin_while_busy();
        self.wait_busy(false)
    }

    /// The status after a command settled, as [`AtaError::Device`] if it
    /// reports an error.
    ///
    /// # Errors
    /// [`AtaError::Device`]
    pub fn check_error(&mut self) -> Result<Status, AtaError> {
        let status = self.alt_status();
        if status.has_error() {
            Err(AtaError::Device {
                status: status.into_bits(),
                error: self.error(),
            })
        } else {
            Ok(status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Alternate status returns a fixed byte; counts reads and delays.
    struct Fixed {
        status: u8,
        reads: u32,
        waits: u32,
        control: Vec<u8>,
    }

    impl Fixed {
        fn new(status: u8) -> Self {
            Self {
                status,
                reads: 0,
                waits: 0,
                control: Vec::new(),
            }
        }
    }

    impl PortIo for Fixed {
        fn inb(&mut self, port: u16) -> u8 {
            if port == Channel::PRIMARY.control_base {
                self.reads += 1;
            }
            self.status
        }
        fn inw(&mut self, _port: u16) -> u16 {
            0
        }
        fn inl(&mut self, _port: u16) -> u32 {
            0
        }
        fn outb(&mut self, port: u16, value: u8) {
            if port == Channel::PRIMARY.control_base {
                self.control.push(value);
            }
        }
        fn outw(&mut self, _port: u16, _value: u16) {}
        fn outl(&mut self, _port: u16, _value: u32) {}
        fn io_wait(&mut self) {
            self.waits += 1;
        }
    }

    fn bus(status: u8) -> AtaBus<Fixed> {
        AtaBus::new(Fixed::new(status), Channel::PRIMARY, Timings::REFERENCE)
    }

    #[test]
    fn satisfied_wait_costs_one_read_and_no_delay() {
        let mut bus = bus(0x50);
        assert_eq!(bus.wait_busy(false), Ok(()));
        let ports = bus.into_inner();
        assert_eq!((ports.reads, ports.waits), (1, 0));
    }

    #[test]
    fn failed_wait_spends_exact_budget() {
        let mut bus = bus(0x80);
        assert_eq!(
            bus.wait_busy(false),
            Err(AtaError::Timeout {
                bit: StatusBit::Busy,
                expected: false,
                status: 0x80
            })
        );
        let ports = bus.into_inner();
        assert_eq!((ports.reads, ports.waits), (3000, 3000));
    }

    #[test]
    fn settle_reads_alt_status_only() {
        let mut bus = bus(0x50);
        bus.settle();
        let ports = bus.into_inner();
        assert_eq!((ports.reads, ports.waits), (20, 0));
    }

    #[test]
    fn busy_device_is_not_command_ready() {
        let mut bus = bus(0x80);
        assert_eq!(bus.wait_command_ready(), Err(AtaError::Busy { status: 0x80 }));
    }

    #[test]
    fn status_predicates_read_alt_status() {
        let mut bus = bus(0x58);
        assert!(!bus.is_busy());
        assert!(bus.is_data_request());
        assert!(bus.is_device_ready());
        assert!(!bus.has_error());
        assert_eq!(bus.into_inner().reads, 4);

        assert!(self::bus(0x41).has_error());
        // device fault counts as an error
        let mut faulted = self::bus(0x60);
        assert!(faulted.has_error());
        assert!(!faulted.is_data_request());
    }

    #[test]
    fn control_writes_update_shadow() {
        let mut bus = bus(0x50);
        bus.write_control(bus.control().with_nien(true));
        bus.write_control(bus.control().with_srst(true));
        assert!(bus.control().nien());
        let ports = bus.into_inner();
        assert_eq!(ports.control, vec![0x02, 0x06]);
    }
}
