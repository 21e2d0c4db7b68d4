use kernel_ata::AtaError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DiskError {
    #[error(transparent)]
    Ata(#[from] AtaError),

    #[error("{pages} pages from page {start} do not fit one transfer")]
    PageRangeOverflow { start: u32, pages: u16 },

    #[error("sectors of {0} bytes do not fit a page")]
    SectorLargerThanPage(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MbrError {
    #[error(transparent)]
    Disk(#[from] DiskError),

    #[error(transparent)]
    Ata(#[from] AtaError),

    #[error("MBR needs 512 bytes, got {0}")]
    TooShort(usize),

    #[error("missing MBR signature (found {0:#06x})")]
    MissingSignature(u16),

    #[error("no bootable partition")]
    NoBootablePartition,

    #[error("partition index {0} out of range")]
    InvalidPartition(u32),
}
