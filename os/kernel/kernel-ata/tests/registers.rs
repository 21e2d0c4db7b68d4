mod common;

use common::Rig;
use kernel_ata::{AtaConfig, AtaError, CommandTag, StatusBit, regs};
use kernel_ata_sim::{ERROR_ABRT, ERROR_IDNF, IdentifyData, PicEvent};
use kernel_pic::IRQ_PRIMARY_ATA;

#[test]
fn lba28_task_file_carries_high_nibble_in_drive_select() {
    let mut buffer = vec![0u8; 512];
    let rig = Rig::new(IdentifyData::disk(0x0200_0000));
    let mut ata = rig.initialized(AtaConfig::PRIMARY);
    rig.sim.clear_register_writes();

    // beyond the simulated backing store, so the device rejects it
    assert_eq!(
        ata.read(&mut buffer, 0x0123_4567, 1).unwrap_err().error,
        AtaError::Device {
            status: 0x41,
            error: ERROR_IDNF
        }
    );
    assert_eq!(
        rig.sim.register_writes(),
        vec![
            (regs::DRIVE_HEAD, 0xE1),
            (regs::SECTOR_COUNT, 0x01),
            (regs::LBA_LOW, 0x67),
            (regs::LBA_MID, 0x45),
            (regs::LBA_HIGH, 0x23),
        ]
    );
}

#[test]
fn lba48_task_file_writes_previous_bytes_first() {
    let mut buffer = vec![0u8; 512];
    let rig = Rig::new(IdentifyData::disk48(1 << 33).with_word(61, 0x1000));
    let mut ata = rig.initialized(AtaConfig::PRIMARY);
    assert_eq!(ata.info().max_sectors(), 1 << 33);
    rig.sim.clear_register_writes();

    assert!(ata.read(&mut buffer, 0xAB00_0102, 1).is_err());
    assert_eq!(
        rig.sim.register_writes(),
        vec![
            (regs::DRIVE_HEAD, 0xE0),
            (regs::SECTOR_COUNT, 0x00),
            (regs::LBA_LOW, 0xAB),
            (regs::LBA_MID, 0x00),
            (regs::LBA_HIGH, 0x00),
            (regs::SECTOR_COUNT, 0x01),
            (regs::LBA_LOW, 0x02),
            (regs::LBA_MID, 0x01),
            (regs::LBA_HIGH, 0x00),
        ]
    );
    assert_eq!(rig.sim.commands().last(), Some(&0x29));
}

#[test]
fn full_28bit_count_encodes_as_zero() {
    let mut buffer = vec![0u8; 256 * 512];
    let rig = Rig::new(IdentifyData::disk(1024));
    let mut ata = rig.initialized(AtaConfig::PRIMARY);
    rig.sim.clear_register_writes();

    assert!(ata.read(&mut buffer, 0, 256).unwrap().complete().is_some());
    assert_eq!(rig.sim.register_writes()[1], (regs::SECTOR_COUNT, 0x00));
}

#[test]
fn select_drive_updates_drive_and_task_file() {
    let mut buffer = vec![0u8; 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(AtaConfig::PRIMARY);

    assert_eq!(ata.select_drive(1), Ok(()));
    assert_eq!(ata.drive(), 1);
    assert_eq!(ata.current_drive(), Ok(1));

    rig.sim.clear_register_writes();
    assert!(ata.read(&mut buffer, 3, 1).is_ok());
    assert_eq!(rig.sim.register_writes()[0], (regs::DRIVE_HEAD, 0xF0));

    assert_eq!(ata.select_drive(0), Ok(()));
    assert_eq!(ata.current_drive(), Ok(0));
}

#[test]
fn select_drive_refused_mid_transfer() {
    let mut buffer = vec![0u8; 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(AtaConfig::PRIMARY.with_irq_mode(true));

    assert!(ata.read(&mut buffer, 0, 1).unwrap().is_pending());
    assert_eq!(
        ata.select_drive(1),
        Err(AtaError::CommandInProgress(CommandTag::ReadMultiple))
    );
}

#[test]
fn software_reset_restores_interrupt_state() {
    let mut buffer = vec![0u8; 2 * 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(AtaConfig::PRIMARY.with_irq_mode(true));

    // abandon a transfer halfway
    assert!(ata.read(&mut buffer, 0, 2).unwrap().is_pending());
    rig.pic.clear();
    rig.sim.reset_counters();

    assert_eq!(ata.software_reset(), Ok(()));
    assert_eq!(ata.active_command(), CommandTag::None);
    assert_eq!(ata.remaining_sectors(), 0);
    assert!(ata.interrupts_enabled());
    assert_eq!(
        rig.pic.events(),
        vec![
            PicEvent::Mask(IRQ_PRIMARY_ATA),
            PicEvent::Unmask(IRQ_PRIMARY_ATA)
        ]
    );
    // SRST is held for the configured delay
    assert_eq!(rig.sim.io_waits(), 400);
    assert!(!rig.sim.irq_pending());

    // the parked buffer can be recovered
    assert_eq!(ata.take_buffer().map(|b| b.len()), Some(1024));
}

#[test]
fn software_reset_gives_up_on_a_busy_device() {
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(AtaConfig::PRIMARY);
    rig.sim.set_stuck_busy(true);

    assert!(matches!(
        ata.software_reset(),
        Err(AtaError::Timeout { status: 0x80, .. })
    ));
    assert_eq!(ata.active_command(), CommandTag::None);
}

#[test]
fn select_drive_waits_out_a_short_busy_phase() {
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(AtaConfig::PRIMARY);

    // longer than the first settle, shorter than the retry rounds
    rig.sim.busy_after_next_select(30);
    assert_eq!(ata.select_drive(1), Ok(()));
    assert_eq!(ata.drive(), 1);
}

#[test]
fn select_drive_times_out_on_a_device_that_stays_busy() {
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(AtaConfig::PRIMARY);

    rig.sim.busy_after_next_select(1000);
    assert_eq!(
        ata.select_drive(1),
        Err(AtaError::Timeout {
            bit: StatusBit::Busy,
            expected: false,
            status: 0x80
        })
    );
    assert_eq!(ata.drive(), 0);
}

#[test]
fn select_drive_fails_on_error_after_selection() {
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(AtaConfig::PRIMARY);

    rig.sim.fail_next_select(ERROR_ABRT);
    assert_eq!(
        ata.select_drive(1),
        Err(AtaError::Device {
            status: 0x41,
            error: ERROR_ABRT
        })
    );
    assert_eq!(ata.drive(), 0);
}

#[test]
fn software_reset_times_out_after_srst_is_released() {
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(AtaConfig::PRIMARY.with_irq_mode(true));
    rig.sim.reset_counters();

    rig.sim.busy_after_next_reset(10);
    assert_eq!(
        ata.software_reset(),
        Err(AtaError::Timeout {
            bit: StatusBit::Busy,
            expected: false,
            status: 0x80
        })
    );
    // SRST hold, then both wait rounds
    assert_eq!(rig.sim.io_waits(), 400 + 2 * 140_000);
    assert_eq!(ata.active_command(), CommandTag::SoftReset);
    assert!(!ata.interrupts_enabled());
    assert_eq!(rig.pic.events().last(), Some(&PicEvent::Mask(IRQ_PRIMARY_ATA)));

    // once the device comes back the stale reset is retired
    while ata.alt_status() & 0x80 != 0 {}
    assert!(ata.flush().unwrap().complete().is_some());
    assert_eq!(ata.active_command(), CommandTag::None);
}

#[test]
fn software_reset_reports_error_status() {
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(AtaConfig::PRIMARY.with_irq_mode(true));

    rig.sim.fail_next_reset(ERROR_ABRT);
    assert_eq!(
        ata.software_reset(),
        Err(AtaError::Device {
            status: 0x41,
            error: ERROR_ABRT
        })
    );
    assert_eq!(ata.active_command(), CommandTag::None);
    // interrupts are only restored by a successful reset
    assert!(!ata.interrupts_enabled());
}
