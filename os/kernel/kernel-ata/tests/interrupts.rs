mod common;

use common::{Rig, assert_command_tag_consistent, pattern};
use kernel_ata::{AtaConfig, AtaError, CommandTag, Progress};
use kernel_ata_sim::{ERROR_ABRT, IdentifyData, PicEvent};
use kernel_pic::IRQ_PRIMARY_ATA;

fn irq_config() -> AtaConfig {
    AtaConfig::PRIMARY.with_irq_mode(true)
}

#[test]
fn initialize_leaves_interrupts_enabled() {
    let rig = Rig::new(IdentifyData::disk(64));
    let ata = rig.initialized(irq_config());

    assert!(ata.interrupts_enabled());
    assert_eq!(
        rig.pic.events().last(),
        Some(&PicEvent::Unmask(IRQ_PRIMARY_ATA))
    );
    // nothing was pending while the device was polled
    assert!(!rig.sim.irq_pending());
}

#[test]
fn single_sector_read_completes_one_sector_per_interrupt() {
    let mut buffer = vec![0u8; 3 * 512];
    let rig = Rig::new(IdentifyData::disk(64).with_word(47, 0));
    for lba in 4..7 {
        rig.sim.set_sector(lba, &pattern(512, lba as u8));
    }
    let mut ata = rig.initialized(irq_config());

    assert_eq!(ata.read(&mut buffer, 4, 3), Ok(Progress::Pending));
    assert_eq!(ata.active_command(), CommandTag::Read);
    assert_eq!(ata.remaining_sectors(), 3);
    assert!(ata.take_buffer().is_none());

    assert_eq!(rig.run_interrupts(&mut ata), 3);
    assert_eq!(ata.active_command(), CommandTag::None);
    assert_eq!(ata.remaining_sectors(), 0);
    assert_eq!(rig.pic.end_of_interrupts(), 3);

    let filled = ata.take_buffer().unwrap();
    for (i, lba) in (4..7u64).enumerate() {
        assert_eq!(filled[i * 512..(i + 1) * 512], pattern(512, lba as u8)[..]);
    }
}

#[test]
fn write_multiple_three_sectors_in_blocks_of_two() {
    let mut data = pattern(3 * 512, 5);
    let expected = data.clone();
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config().with_multiple_block_bytes(1024));
    assert_eq!(ata.info().current_multiple, 2);

    // the first block goes out with the command
    assert_eq!(ata.write(&mut data, 0, 3), Ok(Progress::Pending));
    assert_eq!(ata.active_command(), CommandTag::WriteMultiple);
    assert_eq!(ata.remaining_sectors(), 1);
    assert_eq!(rig.sim.sector(1), expected[512..1024]);

    assert_eq!(rig.run_interrupts(&mut ata), 2);
    assert_eq!(ata.active_command(), CommandTag::None);
    for lba in 0..3 {
        let start = lba as usize * 512;
        assert_eq!(rig.sim.sector(lba), expected[start..start + 512]);
    }
    assert_eq!(ata.take_buffer().unwrap(), &expected[..]);
}

#[test]
fn read_multiple_in_interrupt_mode() {
    let mut data = pattern(11 * 512, 8);
    let mut back = vec![0u8; 11 * 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    assert_eq!(ata.write(&mut data, 20, 11), Ok(Progress::Pending));
    rig.run_interrupts(&mut ata);
    let written = ata.take_buffer().unwrap();

    // 8 + 3 sectors
    assert_eq!(ata.read(&mut back, 20, 11), Ok(Progress::Pending));
    assert_eq!(rig.run_interrupts(&mut ata), 2);
    assert_eq!(ata.take_buffer().unwrap(), written);
}

#[test]
fn second_command_is_refused_while_one_is_active() {
    let mut first = vec![0u8; 2 * 512];
    let mut second = vec![0u8; 512];
    let mut third = vec![0u8; 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    assert!(ata.read(&mut first, 0, 2).unwrap().is_pending());
    assert_eq!(
        ata.read(&mut second, 0, 1).unwrap_err().error,
        AtaError::CommandInProgress(CommandTag::ReadMultiple)
    );
    assert_eq!(
        ata.flush().unwrap_err(),
        AtaError::CommandInProgress(CommandTag::ReadMultiple)
    );

    rig.run_interrupts(&mut ata);
    assert!(ata.take_buffer().is_some());
    assert!(ata.read(&mut third, 0, 1).unwrap().is_pending());
}

#[test]
fn spurious_interrupt_is_acknowledged() {
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    assert_eq!(ata.on_interrupt(), Ok(()));
    assert_eq!(
        rig.pic.events().last(),
        Some(&PicEvent::EndOfInterrupt(IRQ_PRIMARY_ATA))
    );
    assert_eq!(ata.active_command(), CommandTag::None);
}

#[test]
fn error_interrupt_keeps_the_failed_command_visible() {
    let mut buffer = vec![0u8; 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    // the abort only shows up after the command was accepted
    rig.sim.set_latency(50);
    rig.sim.fail_next_command(ERROR_ABRT);
    assert_eq!(ata.flush(), Ok(Progress::Pending));
    while !rig.sim.irq_pending() {
        ata.alt_status();
    }
    rig.sim.set_latency(0);

    assert_eq!(
        ata.on_interrupt(),
        Err(AtaError::Device {
            status: 0x41,
            error: ERROR_ABRT
        })
    );
    assert_eq!(ata.active_command(), CommandTag::FlushCache);
    assert_eq!(rig.pic.end_of_interrupts(), 1);

    // the next command retires it
    assert!(ata.read(&mut buffer, 0, 1).unwrap().is_pending());
    assert_eq!(ata.active_command(), CommandTag::ReadMultiple);
}

#[test]
fn identify_and_set_multiple_complete_from_interrupts() {
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    assert_eq!(ata.identify(), Ok(Progress::Pending));
    assert_eq!(ata.active_command(), CommandTag::Identify);
    assert_eq!(rig.run_interrupts(&mut ata), 1);
    assert!(ata.is_identified());
    assert_eq!(ata.active_command(), CommandTag::None);

    assert_eq!(ata.set_multiple_mode(4), Ok(Progress::Pending));
    assert_eq!(ata.info().current_multiple, 8);
    assert_eq!(rig.run_interrupts(&mut ata), 1);
    assert_eq!(ata.info().current_multiple, 4);
    assert_eq!(rig.sim.multiple(), 4);
}

#[test]
fn flush_completes_from_interrupt() {
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    assert_eq!(ata.flush(), Ok(Progress::Pending));
    assert_eq!(ata.active_command(), CommandTag::FlushCache);
    assert_command_tag_consistent(&rig.sim, &ata);
    assert_eq!(rig.run_interrupts(&mut ata), 1);
    assert_eq!(ata.active_command(), CommandTag::None);
}

#[test]
fn disabling_interrupts_returns_to_polling() {
    let mut buffer = vec![0u8; 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());
    rig.pic.clear();

    ata.set_interrupts(false);
    assert_eq!(rig.pic.events(), vec![PicEvent::Mask(IRQ_PRIMARY_ATA)]);
    assert!(ata.read(&mut buffer, 0, 1).unwrap().complete().is_some());
    assert!(!rig.sim.irq_pending());
}

#[test]
fn buffer_comes_back_after_an_error_interrupt() {
    let mut data = vec![0xAAu8; 512];
    let mut other = vec![0u8; 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    rig.sim.set_latency(50);
    rig.sim.fail_next_command(ERROR_ABRT);
    assert_eq!(ata.read(&mut data, 0, 1), Ok(Progress::Pending));
    while !rig.sim.irq_pending() {
        ata.alt_status();
    }
    rig.sim.set_latency(0);
    assert!(matches!(ata.on_interrupt(), Err(AtaError::Device { .. })));
    assert_eq!(ata.active_command(), CommandTag::ReadMultiple);

    // a new transfer must not displace the uncollected buffer
    let refused = ata.read(&mut other, 0, 1).unwrap_err();
    assert_eq!(refused.error, AtaError::BufferNotCollected);
    assert_eq!(ata.active_command(), CommandTag::None);

    let recovered = ata.take_buffer().unwrap();
    assert!(recovered.iter().all(|&b| b == 0xAA));

    // and it can be used for a retry
    rig.sim.set_sector(0, &pattern(512, 4));
    assert_eq!(ata.read(recovered, 0, 1), Ok(Progress::Pending));
    rig.run_interrupts(&mut ata);
    assert_eq!(ata.take_buffer().unwrap(), &pattern(512, 4)[..]);
}

#[test]
fn take_buffer_retires_the_failed_command() {
    let mut data = vec![0u8; 2 * 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    rig.sim.set_latency(50);
    rig.sim.fail_next_command(ERROR_ABRT);
    assert!(ata.read(&mut data, 0, 2).unwrap().is_pending());
    while !rig.sim.irq_pending() {
        ata.alt_status();
    }
    assert!(ata.on_interrupt().is_err());

    assert_eq!(ata.take_buffer().map(|b| b.len()), Some(1024));
    assert_eq!(ata.active_command(), CommandTag::None);
    assert_eq!(ata.remaining_sectors(), 0);
}

#[test]
fn uncollected_buffer_blocks_the_next_transfer() {
    let mut first = vec![0u8; 512];
    let mut second = vec![9u8; 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    assert!(ata.read(&mut first, 0, 1).unwrap().is_pending());
    rig.run_interrupts(&mut ata);

    let refused = ata.write(&mut second, 0, 1).unwrap_err();
    assert_eq!(refused.error, AtaError::BufferNotCollected);
    assert_eq!(refused.buffer[0], 9);
    assert_eq!(rig.sim.commands().last(), Some(&0xC4));

    assert!(ata.take_buffer().is_some());
    assert!(ata.write(refused.into_buffer(), 0, 1).unwrap().is_pending());
}

#[test]
fn busy_device_at_interrupt_keeps_the_command() {
    let mut buffer = vec![0u8; 2 * 512];
    let rig = Rig::new(IdentifyData::disk(64).with_word(47, 0));
    for lba in 0..2 {
        rig.sim.set_sector(lba, &pattern(512, lba as u8 + 1));
    }
    let mut ata = rig.initialized(irq_config());

    assert!(ata.read(&mut buffer, 0, 2).unwrap().is_pending());
    rig.sim.hold_busy(2);
    assert_eq!(ata.on_interrupt(), Err(AtaError::Busy { status: 0x80 }));
    assert_eq!(ata.active_command(), CommandTag::Read);
    assert_eq!(ata.remaining_sectors(), 2);
    assert_eq!(rig.pic.end_of_interrupts(), 1);

    // the retried interrupt finds the data ready
    assert_eq!(ata.on_interrupt(), Ok(()));
    assert_eq!(ata.remaining_sectors(), 1);
    assert_eq!(rig.run_interrupts(&mut ata), 1);

    let filled = ata.take_buffer().unwrap();
    assert_eq!(filled[..512], pattern(512, 1)[..]);
    assert_eq!(filled[512..], pattern(512, 2)[..]);
}

#[test]
fn interrupt_after_drq_dropped_ends_the_command() {
    let mut buffer = vec![0u8; 2 * 512];
    let rig = Rig::new(IdentifyData::disk(64));
    let mut ata = rig.initialized(irq_config());

    assert!(ata.read(&mut buffer, 0, 2).unwrap().is_pending());
    rig.sim.drop_data_request();
    assert_eq!(
        ata.on_interrupt(),
        Err(AtaError::NoDataRequest { status: 0x40 })
    );
    assert_eq!(ata.active_command(), CommandTag::None);
    assert_eq!(rig.pic.end_of_interrupts(), 1);
    assert_eq!(ata.take_buffer().map(|b| b.len()), Some(1024));
}
