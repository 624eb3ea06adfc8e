/// Size of one sector in bytes.
pub const BLOCK_SIZE: usize = 512;
/// Size of one sector in bytes, as `u32`.
pub const BLOCK_SIZE_U32: u32 = BLOCK_SIZE as u32;
/// Size of one sector in bytes, as `u64`.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;
/// Max count of sectors in one read/write request.
pub const MAX_BLOCKS_PER_REQUEST: usize = 255;
/// Size of CSD and CID registers.
pub const REGISTER_SIZE: usize = 16;

pub mod commands {
    /// CMD base value.
    pub const CMD_BASE: u8 = 0x40;
    /// GO_IDLE_STATE - init card in spi mode if CS low.
    pub const CMD0: u8 = CMD_BASE;
    /// SEND_OP_COND - initiate initialization process (MMC).
    pub const CMD1: u8 = CMD_BASE + 1;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = CMD_BASE + 8;
    /// SEND_CSD - read the Card Specific Data (CSD register).
    pub const CMD9: u8 = CMD_BASE + 9;
    /// SEND_CID - read the Card Identification (CID register).
    pub const CMD10: u8 = CMD_BASE + 10;
    /// STOP_TRANSMISSION - end multiple block read sequence.
    pub const CMD12: u8 = CMD_BASE + 12;
    /// SET_BLOCKLEN - set R/W block length.
    pub const CMD16: u8 = CMD_BASE + 16;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = CMD_BASE + 17;
    /// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card.
    pub const CMD18: u8 = CMD_BASE + 18;
    /// SET_WR_BLK_ERASE_COUNT - pre-erase count for the next multiple block write (ACMD).
    pub const ACMD23: u8 = CMD_BASE + 23;
    /// WRITE_BLOCK - write a single data block to the card.
    pub const CMD24: u8 = CMD_BASE + 24;
    /// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRANSMISSION.
    pub const CMD25: u8 = CMD_BASE + 25;
    /// SD_SEND_OP_COMD - Sends host capacity support information and activates
    /// the card's initialization process (ACMD).
    pub const ACMD41: u8 = CMD_BASE + 41;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = CMD_BASE + 55;
    /// READ_OCR - read the OCR register of a card.
    pub const CMD58: u8 = CMD_BASE + 58;

    /// Argument of SEND_IF_COND: 2.7-3.6V window and `0xAA` check pattern.
    pub const CMD8_ARG: u32 = 0x0000_01AA;
    /// High capacity support bit of SD_SEND_OP_COMD argument.
    pub const ACMD41_HCS: u32 = 1 << 30;

    /// Valid CRC of GO_IDLE_STATE with zero argument.
    pub const CMD0_CRC: u8 = 0x95;
    /// Valid CRC of SEND_IF_COND with [`CMD8_ARG`].
    pub const CMD8_CRC: u8 = 0x87;
    /// Filler sent in place of CRC once the card ignores it.
    pub const DUMMY_CRC: u8 = 0xFF;

    /// Index of the command, without the transmission bit.
    pub const fn index(cmd: u8) -> u8 {
        cmd - CMD_BASE
    }
}

pub mod tokens {
    /// Idle bus / card not busy.
    pub const AVAILABLE: u8 = 0xFF;
    /// Start data token for read or write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Stop token for write multiple blocks.
    pub const STOP_TRAN: u8 = 0xFD;
    /// Start data token for write multiple blocks.
    pub const WRITE_MULTIPLE: u8 = 0xFC;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x1F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
    /// Echo of SEND_IF_COND: voltage accepted.
    pub const CMD8_VOLTAGE: u8 = 0x01;
    /// Echo of SEND_IF_COND: check pattern.
    pub const CMD8_PATTERN: u8 = 0xAA;
    /// Card capacity status bit in the first OCR byte.
    pub const OCR_CCS: u8 = 0x40;
}

/// Numeric control codes of [`SdMmcSpi::control`](crate::SdMmcSpi::control).
pub mod ioctl {
    /// Wait until the card finished internal writes.
    pub const CTRL_SYNC: u8 = 0;
    /// Sector count, `u32` little-endian.
    pub const GET_SECTOR_COUNT: u8 = 1;
    /// Sector size, `u16` little-endian.
    pub const GET_SECTOR_SIZE: u8 = 2;
    /// Power control, sub-code in the first byte.
    pub const CTRL_POWER: u8 = 4;
    /// Card type flags, 1 byte.
    pub const MMC_GET_TYPE: u8 = 10;
    /// CSD register, 16 bytes.
    pub const MMC_GET_CSD: u8 = 11;
    /// CID register, 16 bytes.
    pub const MMC_GET_CID: u8 = 12;
    /// OCR register, 4 bytes.
    pub const MMC_GET_OCR: u8 = 13;

    /// `CTRL_POWER` sub-code: power off.
    pub const POWER_OFF: u8 = 0;
    /// `CTRL_POWER` sub-code: power on.
    pub const POWER_ON: u8 = 1;
    /// `CTRL_POWER` sub-code: power state into the second byte.
    pub const POWER_GET: u8 = 2;
}
