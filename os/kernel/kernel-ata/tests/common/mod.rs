#![allow(dead_code)]

use kernel_ata::{AtaConfig, AtaDriver, CommandTag};
use kernel_ata_sim::{IdentifyData, RecordingPic, STATUS_BSY, STATUS_DRQ, SimChannel};

pub type SimDriver<'buf> = AtaDriver<'buf, SimChannel, RecordingPic>;

pub struct Rig {
    pub sim: SimChannel,
    pub pic: RecordingPic,
}

impl Rig {
    pub fn new(identify: IdentifyData) -> Self {
        Self {
            sim: SimChannel::primary(identify),
            pic: RecordingPic::new(),
        }
    }

    pub fn driver<'buf>(&self, config: AtaConfig) -> SimDriver<'buf> {
        AtaDriver::new(self.sim.clone(), self.pic.clone(), config)
    }

    pub fn initialized<'buf>(&self, config: AtaConfig) -> SimDriver<'buf> {
        let mut ata = self.driver(config);
        ata.initialize().expect("initialize");
        ata
    }

    /// Deliver interrupts while the device asserts its line, checking after
    /// each that the driver never idles while the device is mid-command.
    pub fn run_interrupts(&self, ata: &mut SimDriver<'_>) -> usize {
        let mut delivered = 0;
        while self.sim.irq_pending() {
            ata.on_interrupt().expect("interrupt");
            delivered += 1;
            assert_command_tag_consistent(&self.sim, ata);
            assert!(delivered < 10_000, "interrupt storm");
        }
        delivered
    }
}

pub fn assert_command_tag_consistent(sim: &SimChannel, ata: &SimDriver<'_>) {
    if ata.active_command() == CommandTag::None {
        assert_eq!(
            sim.peek_status() & (STATUS_BSY | STATUS_DRQ),
            0,
            "command tag cleared while the device is still busy"
        );
    }
}

/// Distinct, position-dependent bytes.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed).wrapping_add((i >> 8) as u8))
        .collect()
}
