//! # Disk Layer
//!
//! Page-granular access to the boot disk on top of [`kernel_ata`], plus the
//! MBR partition table.
//!
//! A page is [`PAGE_SIZE`](kernel_ata::PAGE_SIZE) bytes; with 512-byte
//! sectors page `n` covers sectors `8n..8n + 8`.
//!
//! ```rust,ignore
//! let mut disk = Disk::new(AtaDriver::new(ports, pics, AtaConfig::PRIMARY));
//! disk.setup()?;
//! disk.set_boot_partition(boot_info.partition);
//! disk.read_partition_table(&mut scratch)?;
//! let page = disk.read_pages(buffer, 1, 1).map_err(|failed| failed.error)?;
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod disk;
mod error;
pub mod mbr;

pub use disk::Disk;
pub use error::{DiskError, MbrError};
pub use mbr::{PartitionEntry, PartitionTable};
