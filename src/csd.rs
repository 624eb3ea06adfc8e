use crate::consts::{BLOCK_SIZE_U64, REGISTER_SIZE};

use bitfield::bitfield;
use size::Size;

/// Card Specific Data block.
pub type CsdData = [u8; REGISTER_SIZE];

bitfield! {
    /// Card Specific Data, version 1 (SD v1.xx and MMC).
    #[derive(Clone, Copy)]
    pub struct CsdV1(u128);
    pub u8, version, _: 127, 126;
    pub u8, data_read_access_time1, _: 119, 112;
    pub u8, data_read_access_time2, _: 111, 104;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, _: 83, 80;
    pub read_partial_blocks, _: 79;
    pub dsr_implemented, _: 76;
    pub u16, device_size, _: 73, 62;
    pub u8, device_size_multiplier, _: 49, 47;
    pub copy_flag, _: 14;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, crc, _: 7, 1;
}

bitfield! {
    /// Card Specific Data, version 2 (SD v2.00 high capacity).
    #[derive(Clone, Copy)]
    pub struct CsdV2(u128);
    pub u8, version, _: 127, 126;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, _: 83, 80;
    pub u16, device_size, _: 63, 48;
    pub copy_flag, _: 14;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, crc, _: 7, 1;
}

/// Card Specific Data, generic container.
#[derive(Clone, Copy)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

/// Represents capacity provider.
pub trait CapacityProvider {
    /// Returns the card capacity in bytes.
    fn card_capacity(&self) -> Size {
        Size::from_bytes(u64::from(self.card_capacity_blocks()) * BLOCK_SIZE_U64)
    }

    /// Returns the card capacity in 512-byte blocks.
    fn card_capacity_blocks(&self) -> u32;
}

impl From<CsdData> for CsdV1 {
    fn from(csd_data: CsdData) -> Self {
        CsdV1(u128::from_be_bytes(csd_data))
    }
}

impl From<CsdData> for CsdV2 {
    fn from(csd_data: CsdData) -> Self {
        CsdV2(u128::from_be_bytes(csd_data))
    }
}

impl From<CsdData> for Csd {
    /// Picks the layout by the structure version field (`csd[0] >> 6`).
    fn from(csd_data: CsdData) -> Self {
        match csd_data[0] >> 6 {
            1 => Csd::V2(CsdV2::from(csd_data)),
            _ => Csd::V1(CsdV1::from(csd_data)),
        }
    }
}

impl CapacityProvider for CsdV1 {
    fn card_capacity_blocks(&self) -> u32 {
        let shift = u32::from(self.read_block_length()) + u32::from(self.device_size_multiplier()) + 2;
        let size = u64::from(self.device_size()) + 1;

        ((size << shift) >> 9) as u32
    }
}

impl CapacityProvider for CsdV2 {
    fn card_capacity_blocks(&self) -> u32 {
        (u32::from(self.device_size()) + 1) << 10
    }
}

impl CapacityProvider for Csd {
    fn card_capacity_blocks(&self) -> u32 {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }
}
