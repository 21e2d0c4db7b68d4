//! # Simulated ATA Channel
//!
//! A register-level model of one ATA channel with a single PIO device,
//! implementing [`PortIo`] so the real driver code can run against it on the
//! host.
//!
//! ## What is modelled
//! - The task-file registers, including the two-deep FIFO behind the sector
//!   count and LBA registers that 48-bit commands rely on.
//! - `BSY`/`DRQ`/`DRDY`/`ERR` sequencing for IDENTIFY, READ/WRITE (single and
//!   multiple, 28- and 48-bit), SET MULTIPLE MODE and FLUSH CACHE.
//! - `INTRQ`: raised when the device wants service and `nIEN` is clear,
//!   acknowledged by reading the status register (the alternate status
//!   register leaves it alone).
//! - `SRST` through the device control register.
//!
//! ## Test knobs
//! [`SimChannel::set_stuck_busy`], [`SimChannel::set_latency`] and
//! [`SimChannel::fail_next_command`] provoke the driver's timeout, polling and
//! error paths. One-shot faults on the next device selection or reset, a
//! held `BSY` and a dropped `DRQ` reach the rarer branches. Counters for
//! alternate-status reads and `io_wait` calls make polling budgets
//! observable.

#![allow(clippy::cast_possible_truncation, clippy::missing_panics_doc)]

use kernel_pic::InterruptController;
use kernel_ports::PortIo;
use std::cell::RefCell;
use std::rc::Rc;

pub const STATUS_ERR: u8 = 1 << 0;
pub const STATUS_DRQ: u8 = 1 << 3;
pub const STATUS_DRDY: u8 = 1 << 6;
pub const STATUS_BSY: u8 = 1 << 7;

const CONTROL_NIEN: u8 = 1 << 1;
const CONTROL_SRST: u8 = 1 << 2;

/// Error register value for an aborted command.
pub const ERROR_ABRT: u8 = 1 << 2;
/// Error register value for an address beyond the medium.
pub const ERROR_IDNF: u8 = 1 << 4;

/// Sectors beyond this are reported by IDENTIFY but have no backing store;
/// commands touching them abort with [`ERROR_IDNF`].
pub const MAX_BACKED_SECTORS: u64 = 1 << 14;

/// The 256 words a device returns for IDENTIFY DEVICE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentifyData {
    words: [u16; 256],
}

impl IdentifyData {
    /// A 28-bit LBA disk with `sectors` 512-byte sectors, FLUSH CACHE,
    /// a 16-sector READ/WRITE MULTIPLE limit, ATA-6 and UDMA 0-5 (mode 2
    /// selected).
    #[must_use]
    pub fn disk(sectors: u32) -> Self {
        let mut words = [0u16; 256];
        words[0] = 0x0040;
        words[47] = 0x8010;
        words[49] = (1 << 9) | (1 << 8);
        words[53] = 1 << 2;
        words[60] = sectors as u16;
        words[61] = (sectors >> 16) as u16;
        words[80] = 0x007E;
        words[83] = 1 << 13;
        words[88] = 0x003F | (1 << 10);
        Self { words }
    }

    /// As [`IdentifyData::disk`], additionally reporting 48-bit addressing
    /// with `sectors` in words 100-103 and FLUSH CACHE EXT.
    #[must_use]
    pub fn disk48(sectors: u64) -> Self {
        let lba28 = u32::try_from(sectors).unwrap_or(0x0FFF_FFFF).min(0x0FFF_FFFF);
        let mut data = Self::disk(lba28);
        data.words[83] |= (1 << 10) | (1 << 12);
        for (i, word) in data.words[100..104].iter_mut().enumerate() {
            *word = (sectors >> (16 * i)) as u16;
        }
        data
    }

    /// Override a single word.
    #[must_use]
    pub const fn with_word(mut self, index: usize, value: u16) -> Self {
        self.words[index] = value;
        self
    }

    #[must_use]
    pub const fn words(&self) -> &[u16; 256] {
        &self.words
    }

    fn sector_words(&self) -> usize {
        let version8 = self.words[80] != 0xFFFF && self.words[80] & (1 << 8) != 0;
        let logical = u32::from(self.words[117]) | (u32::from(self.words[118]) << 16);
        if version8 && logical != 0 {
            logical as usize
        } else {
            256
        }
    }

    fn total_sectors(&self) -> u64 {
        if self.words[83] & (1 << 10) != 0 {
            self.words[100..104]
                .iter()
                .enumerate()
                .fold(0, |acc, (i, w)| acc | (u64::from(*w) << (16 * i)))
        } else {
            u64::from(self.words[60]) | (u64::from(self.words[61]) << 16)
        }
    }
}

struct Transfer {
    next_lba: u64,
    remaining: u64,
    block: u64,
}

enum Phase {
    Idle,
    DataIn {
        words: Vec<u16>,
        pos: usize,
        transfer: Option<Transfer>,
    },
    DataOut {
        words: Vec<u16>,
        expected: usize,
        transfer: Transfer,
    },
}

/// A one-shot misbehaviour of the device.
#[derive(Clone, Copy)]
enum Fault {
    /// Stay `BSY` for this many status reads.
    Busy(u32),
    /// Report `ERR` with this error register value.
    Error(u8),
}

struct Deferred {
    phase: Phase,
    status: u8,
    raise: bool,
}

struct Device {
    io_base: u16,
    control_base: u16,
    identify: IdentifyData,
    storage: Vec<u16>,
    sector_words: usize,
    multiple: u8,

    count: [u8; 2],
    lba: [[u8; 2]; 3],
    drive_head: u8,
    control: u8,
    status: u8,
    error: u8,

    phase: Phase,
    deferred: Option<Deferred>,
    countdown: u32,
    latency: u32,
    stuck_busy: bool,
    fail_next: Option<u8>,
    select_fault: Option<Fault>,
    reset_fault: Option<Fault>,
    irq_pending: bool,

    io_waits: u64,
    alt_reads: u64,
    status_reads: u64,
    commands: Vec<u8>,
    register_writes: Vec<(u16, u8)>,
}

impl Device {
    fn new(io_base: u16, control_base: u16, identify: IdentifyData) -> Self {
        let sector_words = identify.sector_words();
        let sectors = identify.total_sectors().min(MAX_BACKED_SECTORS) as usize;
        let multiple = if identify.words[59] & 0x100 != 0 {
            identify.words[59] as u8
        } else {
            0
        };
        Self {
            io_base,
            control_base,
            identify,
            storage: vec![0; sectors * sector_words],
            sector_words,
            multiple,
            count: [0; 2],
            lba: [[0; 2]; 3],
            drive_head: 0xA0,
            control: 0,
            status: STATUS_DRDY,
            error: 0,
            phase: Phase::Idle,
            deferred: None,
            countdown: 0,
            latency: 0,
            stuck_busy: false,
            fail_next: None,
            select_fault: None,
            reset_fault: None,
            irq_pending: false,
            io_waits: 0,
            alt_reads: 0,
            status_reads: 0,
            commands: Vec::new(),
            register_writes: Vec::new(),
        }
    }

    fn sectors(&self) -> u64 {
        (self.storage.len() / self.sector_words) as u64
    }

    fn raise(&mut self) {
        if self.control & CONTROL_NIEN == 0 {
            self.irq_pending = true;
        }
    }

    /// Enter `phase` with `status`, after `latency` status reads of `BSY`.
    fn schedule(&mut self, phase: Phase, status: u8, raise: bool) {
        self.phase = Phase::Idle;
        let deferred = Deferred { phase, status, raise };
        if self.latency == 0 {
            self.apply(deferred);
        } else {
            self.status = STATUS_BSY;
            self.countdown = self.latency;
            self.deferred = Some(deferred);
        }
    }

    fn apply(&mut self, deferred: Deferred) {
        self.phase = deferred.phase;
        self.status = deferred.status;
        if deferred.raise {
            self.raise();
        }
    }

    fn tick(&mut self) {
        if self.deferred.is_none() {
            return;
        }
        if self.countdown == 0 {
            if let Some(deferred) = self.deferred.take() {
                self.apply(deferred);
            }
        } else {
            self.countdown -= 1;
        }
    }

    /// Report `BSY` for `reads` status reads, then resume the current
    /// phase with its status.
    fn hold_busy(&mut self, reads: u32) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.deferred = Some(Deferred {
            phase,
            status: self.status,
            raise: false,
        });
        self.countdown = reads;
        self.status = STATUS_BSY;
    }

    fn apply_fault(&mut self, fault: Option<Fault>) {
        match fault {
            Some(Fault::Busy(reads)) => self.hold_busy(reads),
            Some(Fault::Error(error)) => {
                self.error = error;
                self.status |= STATUS_ERR;
            }
            None => {}
        }
    }

    fn poll_status(&mut self) -> u8 {
        self.tick();
        if self.stuck_busy {
            STATUS_BSY
        } else {
            self.status
        }
    }

    fn abort(&mut self, error: u8) {
        self.error = error;
        self.schedule(Phase::Idle, STATUS_DRDY | STATUS_ERR, true);
    }

    fn decode(&self, ext: bool) -> (u64, u64) {
        let current = |i: usize| u64::from(self.lba[i][0]);
        let previous = |i: usize| u64::from(self.lba[i][1]);
        if ext {
            let lba = current(0)
                | (current(1) << 8)
                | (current(2) << 16)
                | (previous(0) << 24)
                | (previous(1) << 32)
                | (previous(2) << 40);
            let count = u64::from(self.count[0]) | (u64::from(self.count[1]) << 8);
            (lba, if count == 0 { 65536 } else { count })
        } else {
            let lba = current(0)
                | (current(1) << 8)
                | (current(2) << 16)
                | (u64::from(self.drive_head & 0x0F) << 24);
            let count = u64::from(self.count[0]);
            (lba, if count == 0 { 256 } else { count })
        }
    }

    fn load_block(&self, transfer: &Transfer) -> Vec<u16> {
        let sectors = transfer.remaining.min(transfer.block) as usize;
        let start = transfer.next_lba as usize * self.sector_words;
        self.storage[start..start + sectors * self.sector_words].to_vec()
    }

    fn command(&mut self, op: u8) {
        self.commands.push(op);
        self.irq_pending = false;
        if let Some(error) = self.fail_next.take() {
            self.abort(error);
            return;
        }
        self.error = 0;

        match op {
            0xEC => {
                let words = self.identify.words.to_vec();
                self.schedule(
                    Phase::DataIn { words, pos: 0, transfer: None },
                    STATUS_DRDY | STATUS_DRQ,
                    true,
                );
            }
            0x20 | 0x24 | 0xC4 | 0x29 | 0x30 | 0x34 | 0xC5 | 0x39 => {
                let ext = matches!(op, 0x24 | 0x29 | 0x34 | 0x39);
                let multiple = matches!(op, 0xC4 | 0x29 | 0xC5 | 0x39);
                let write = matches!(op, 0x30 | 0x34 | 0xC5 | 0x39);
                if multiple && self.multiple == 0 {
                    self.abort(ERROR_ABRT);
                    return;
                }
                let (lba, count) = self.decode(ext);
                if lba + count > self.sectors() {
                    self.abort(ERROR_IDNF);
                    return;
                }
                let transfer = Transfer {
                    next_lba: lba,
                    remaining: count,
                    block: if multiple { u64::from(self.multiple) } else { 1 },
                };
                if write {
                    let expected =
                        transfer.remaining.min(transfer.block) as usize * self.sector_words;
                    self.schedule(
                        Phase::DataOut { words: Vec::new(), expected, transfer },
                        STATUS_DRDY | STATUS_DRQ,
                        false,
                    );
                } else {
                    let words = self.load_block(&transfer);
                    self.schedule(
                        Phase::DataIn { words, pos: 0, transfer: Some(transfer) },
                        STATUS_DRDY | STATUS_DRQ,
                        true,
                    );
                }
            }
            0xC6 => {
                let n = self.count[0];
                let max = self.identify.words[47] as u8;
                if n == 0 || n > max || !n.is_power_of_two() {
                    self.abort(ERROR_ABRT);
                } else {
                    self.multiple = n;
                    self.schedule(Phase::Idle, STATUS_DRDY, true);
                }
            }
            0xE7 | 0xEA => self.schedule(Phase::Idle, STATUS_DRDY, true),
            _ => self.abort(ERROR_ABRT),
        }
    }

    fn read_data(&mut self) -> u16 {
        let Phase::DataIn { words, pos, .. } = &mut self.phase else {
            return 0;
        };
        let word = words[*pos];
        *pos += 1;
        if *pos == words.len() {
            self.finish_data_in();
        }
        word
    }

    fn finish_data_in(&mut self) {
        let Phase::DataIn {
            words, transfer, ..
        } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };
        let Some(mut transfer) = transfer else {
            self.status = STATUS_DRDY;
            return;
        };
        let moved = (words.len() / self.sector_words) as u64;
        transfer.remaining -= moved;
        transfer.next_lba += moved;
        if transfer.remaining == 0 {
            self.status = STATUS_DRDY;
        } else {
            let words = self.load_block(&transfer);
            self.schedule(
                Phase::DataIn { words, pos: 0, transfer: Some(transfer) },
                STATUS_DRDY | STATUS_DRQ,
                true,
            );
        }
    }

    fn write_data(&mut self, value: u16) {
        let Phase::DataOut { words, expected, .. } = &mut self.phase else {
            return;
        };
        words.push(value);
        if words.len() == *expected {
            self.finish_data_out();
        }
    }

    fn finish_data_out(&mut self) {
        let Phase::DataOut {
            words,
            mut transfer,
            ..
        } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };
        let start = transfer.next_lba as usize * self.sector_words;
        self.storage[start..start + words.len()].copy_from_slice(&words);
        let moved = (words.len() / self.sector_words) as u64;
        transfer.remaining -= moved;
        transfer.next_lba += moved;
        if transfer.remaining == 0 {
            self.schedule(Phase::Idle, STATUS_DRDY, true);
        } else {
            let expected = transfer.remaining.min(transfer.block) as usize * self.sector_words;
            self.schedule(
                Phase::DataOut { words: Vec::new(), expected, transfer },
                STATUS_DRDY | STATUS_DRQ,
                true,
            );
        }
    }

    fn write_control(&mut self, value: u8) {
        let old = self.control;
        self.control = value;
        if value & CONTROL_SRST != 0 && old & CONTROL_SRST == 0 {
            self.phase = Phase::Idle;
            self.deferred = None;
            self.irq_pending = false;
            self.status = STATUS_BSY;
        } else if value & CONTROL_SRST == 0 && old & CONTROL_SRST != 0 {
            self.status = STATUS_DRDY;
            self.error = 0x01;
            self.drive_head = 0xA0;
            self.count = [1, 0];
            self.lba = [[1, 0], [0, 0], [0, 0]];
            let fault = self.reset_fault.take();
            self.apply_fault(fault);
        }
    }
}

/// A shared handle to the simulated channel.
///
/// Cloning yields another handle to the same device, so a test can keep one
/// for inspection while the driver owns the other.
#[derive(Clone)]
pub struct SimChannel {
    device: Rc<RefCell<Device>>,
}

impl SimChannel {
    /// A device on the primary channel (`0x1F0`/`0x3F6`).
    #[must_use]
    pub fn primary(identify: IdentifyData) -> Self {
        Self::new(0x1F0, 0x3F6, identify)
    }

    #[must_use]
    pub fn new(io_base: u16, control_base: u16, identify: IdentifyData) -> Self {
        Self {
            device: Rc::new(RefCell::new(Device::new(io_base, control_base, identify))),
        }
    }

    /// Keep `BSY` asserted on every status read.
    pub fn set_stuck_busy(&self, stuck: bool) {
        self.device.borrow_mut().stuck_busy = stuck;
    }

    /// Number of status reads each command or block stays `BSY` before the
    /// device advances.
    pub fn set_latency(&self, reads: u32) {
        self.device.borrow_mut().latency = reads;
    }

    /// Abort the next command with `error` in the error register.
    pub fn fail_next_command(&self, error: u8) {
        self.device.borrow_mut().fail_next = Some(error);
    }

    /// Stay `BSY` for `reads` status reads after the next write to the
    /// Drive/Head register.
    pub fn busy_after_next_select(&self, reads: u32) {
        self.device.borrow_mut().select_fault = Some(Fault::Busy(reads));
    }

    /// Report `ERR` with `error` after the next write to the Drive/Head
    /// register.
    pub fn fail_next_select(&self, error: u8) {
        self.device.borrow_mut().select_fault = Some(Fault::Error(error));
    }

    /// Stay `BSY` for `reads` status reads after the next `SRST` pulse.
    pub fn busy_after_next_reset(&self, reads: u32) {
        self.device.borrow_mut().reset_fault = Some(Fault::Busy(reads));
    }

    /// Report `ERR` with `error` once the next `SRST` pulse ends.
    pub fn fail_next_reset(&self, error: u8) {
        self.device.borrow_mut().reset_fault = Some(Fault::Error(error));
    }

    /// Go `BSY` now for `reads` status reads, then carry on where the
    /// device left off.
    pub fn hold_busy(&self, reads: u32) {
        self.device.borrow_mut().hold_busy(reads);
    }

    /// Abandon the current data phase: `DRQ` drops without an interrupt and
    /// without an error.
    pub fn drop_data_request(&self) {
        let mut device = self.device.borrow_mut();
        device.phase = Phase::Idle;
        device.deferred = None;
        device.status = STATUS_DRDY;
    }

    /// Whether `INTRQ` is asserted and unacknowledged.
    #[must_use]
    pub fn irq_pending(&self) -> bool {
        self.device.borrow().irq_pending
    }

    /// The status byte as the device currently reports it, without side
    /// effects.
    #[must_use]
    pub fn peek_status(&self) -> u8 {
        let device = self.device.borrow();
        if device.stuck_busy { STATUS_BSY } else { device.status }
    }

    #[must_use]
    pub fn io_waits(&self) -> u64 {
        self.device.borrow().io_waits
    }

    #[must_use]
    pub fn alt_status_reads(&self) -> u64 {
        self.device.borrow().alt_reads
    }

    #[must_use]
    pub fn status_reads(&self) -> u64 {
        self.device.borrow().status_reads
    }

    /// Reset the access counters.
    pub fn reset_counters(&self) {
        let mut device = self.device.borrow_mut();
        device.io_waits = 0;
        device.alt_reads = 0;
        device.status_reads = 0;
    }

    /// Every command opcode written so far.
    #[must_use]
    pub fn commands(&self) -> Vec<u8> {
        self.device.borrow().commands.clone()
    }

    /// Every byte written to a command block register other than the
    /// command register, as `(offset, value)`.
    #[must_use]
    pub fn register_writes(&self) -> Vec<(u16, u8)> {
        self.device.borrow().register_writes.clone()
    }

    pub fn clear_register_writes(&self) {
        self.device.borrow_mut().register_writes.clear();
    }

    /// The current READ/WRITE MULTIPLE block size.
    #[must_use]
    pub fn multiple(&self) -> u8 {
        self.device.borrow().multiple
    }

    /// The contents of one sector, little-endian.
    #[must_use]
    pub fn sector(&self, lba: u64) -> Vec<u8> {
        let device = self.device.borrow();
        let start = lba as usize * device.sector_words;
        device.storage[start..start + device.sector_words]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    /// Overwrite one sector. `bytes` must hold exactly one sector.
    pub fn set_sector(&self, lba: u64, bytes: &[u8]) {
        let mut device = self.device.borrow_mut();
        let start = lba as usize * device.sector_words;
        let words = device.sector_words;
        assert_eq!(bytes.len(), words * 2, "sector size mismatch");
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            device.storage[start + i] = u16::from_le_bytes([pair[0], pair[1]]);
        }
    }
}

impl PortIo for SimChannel {
    fn inb(&mut self, port: u16) -> u8 {
        let mut device = self.device.borrow_mut();
        if port == device.control_base {
            device.alt_reads += 1;
            return device.poll_status();
        }
        match port.wrapping_sub(device.io_base) {
            1 => device.error,
            2 => device.count[0],
            3 => device.lba[0][0],
            4 => device.lba[1][0],
            5 => device.lba[2][0],
            6 => device.drive_head,
            7 => {
                device.status_reads += 1;
                let status = device.poll_status();
                device.irq_pending = false;
                status
            }
            _ => 0xFF,
        }
    }

    fn inw(&mut self, port: u16) -> u16 {
        let mut device = self.device.borrow_mut();
        if port == device.io_base {
            device.read_data()
        } else {
            0xFFFF
        }
    }

    fn inl(&mut self, _port: u16) -> u32 {
        0xFFFF_FFFF
    }

    fn outb(&mut self, port: u16, value: u8) {
        let mut device = self.device.borrow_mut();
        if port == device.control_base {
            device.write_control(value);
            return;
        }
        let offset = port.wrapping_sub(device.io_base);
        if (1..=6).contains(&offset) {
            device.register_writes.push((offset, value));
        }
        match offset {
            2 => device.count = [value, device.count[0]],
            3..=5 => {
                let reg = &mut device.lba[usize::from(offset - 3)];
                *reg = [value, reg[0]];
            }
            6 => {
                device.drive_head = value;
                let fault = device.select_fault.take();
                device.apply_fault(fault);
            }
            7 => device.command(value),
            _ => {}
        }
    }

    fn outw(&mut self, port: u16, value: u16) {
        let mut device = self.device.borrow_mut();
        if port == device.io_base {
            device.write_data(value);
        }
    }

    fn outl(&mut self, _port: u16, _value: u32) {}

    fn io_wait(&mut self) {
        self.device.borrow_mut().io_waits += 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PicEvent {
    Mask(u8),
    Unmask(u8),
    EndOfInterrupt(u8),
}

/// An [`InterruptController`] that only records what it was asked to do.
#[derive(Clone, Default)]
pub struct RecordingPic {
    events: Rc<RefCell<Vec<PicEvent>>>,
}

impl RecordingPic {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<PicEvent> {
        self.events.borrow().clone()
    }

    #[must_use]
    pub fn end_of_interrupts(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, PicEvent::EndOfInterrupt(_)))
            .count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl InterruptController for RecordingPic {
    fn mask(&mut self, line: u8) {
        self.events.borrow_mut().push(PicEvent::Mask(line));
    }

    fn unmask(&mut self, line: u8) {
        self.events.borrow_mut().push(PicEvent::Unmask(line));
    }

    fn end_of_interrupt(&mut self, line: u8) {
        self.events.borrow_mut().push(PicEvent::EndOfInterrupt(line));
    }
}
