use core::fmt;

use bitflags::bitflags;

use super::sdmmc_constant::SDIO_BLOCK_SIZE;
use super::SdmmcError;

pub(crate) struct Sdcard {
    pub manufacture_info: Cid,
    pub card_specific_data: Csd,
    pub card_version: SdVersion,
    pub relative_card_addr: u16,
    pub ocr: Ocr,
    pub cid_raw: [u8; 16],
    pub csd_raw: [u8; 16],
}

impl Sdcard {
    pub fn card_type(&self) -> SdCardType {
        if self.ocr.contains(Ocr::CCS) {
            SdCardType::Sdhc
        } else {
            SdCardType::Sdsc
        }
    }
}

// Beware this enum tracks the CSD structure version, not the physical layer version
// the card complies with. CSD 2.0 is used by SDHC and SDXC cards.
#[derive(Debug, PartialEq, Eq)]
pub enum SdVersion {
    V1_0 = 1,
    V2_0 = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdCardType {
    /// Standard capacity, byte addressed
    Sdsc,
    /// High or extended capacity, block addressed
    Sdhc,
}

bitflags! {
    /// Operating Conditions Register, as returned by ACMD41.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ocr: u32 {
        /// Power-up routine finished. The card answers with this clear while still busy.
        const POWER_UP_DONE = 1 << 31;
        /// Card capacity status, set for SDHC/SDXC
        const CCS = 1 << 30;
        const UHS2 = 1 << 29;
        const S18A = 1 << 24;
        const VDD_35_36 = 1 << 23;
        const VDD_34_35 = 1 << 22;
        const VDD_33_34 = 1 << 21;
        const VDD_32_33 = 1 << 20;
        const VDD_31_32 = 1 << 19;
        const VDD_30_31 = 1 << 18;
        const VDD_29_30 = 1 << 17;
        const VDD_28_29 = 1 << 16;
        const VDD_27_28 = 1 << 15;
    }
}

bitflags! {
    /// Card status carried in R1 replies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        const OUT_OF_RANGE = 1 << 31;
        const ADDRESS_ERROR = 1 << 30;
        const BLOCK_LEN_ERROR = 1 << 29;
        const ERASE_SEQ_ERROR = 1 << 28;
        const ERASE_PARAM = 1 << 27;
        const WP_VIOLATION = 1 << 26;
        const CARD_IS_LOCKED = 1 << 25;
        const LOCK_UNLOCK_FAILED = 1 << 24;
        const COM_CRC_ERROR = 1 << 23;
        const ILLEGAL_COMMAND = 1 << 22;
        const CARD_ECC_FAILED = 1 << 21;
        const CC_ERROR = 1 << 20;
        const ERROR = 1 << 19;
        const CSD_OVERWRITE = 1 << 16;
        const WP_ERASE_SKIP = 1 << 15;
        const CARD_ECC_DISABLED = 1 << 14;
        const ERASE_RESET = 1 << 13;
        const CURRENT_STATE = 0xF << 9;
        const READY_FOR_DATA = 1 << 8;
        const APP_CMD = 1 << 5;
        const AKE_SEQ_ERROR = 1 << 3;
    }
}

impl CardStatus {
    /// Card state machine position: 0 idle, 1 ready, 2 ident, 3 stby, 4 tran, 5 data,
    /// 6 rcv, 7 prg, 8 dis.
    pub fn current_state(&self) -> u8 {
        ((self.bits() & Self::CURRENT_STATE.bits()) >> 9) as u8
    }
}

// R2 payloads carry register bits 127..8 in bytes 0..15 followed by the CRC byte,
// which lines up with a big-endian read of the whole 16 bytes.
fn register_bits(raw: &[u8; 16]) -> u128 {
    u128::from_be_bytes(*raw)
}

pub struct Cid {
    manufacturer_id: u8,
    oem_id: u16,
    product_name: [u8; 5],
    product_revision: u8,
    serial_number: u32,
    manufacturing_date: (u32, u8), // (year, month)
}

impl Cid {
    pub fn new(raw: &[u8; 16]) -> Cid {
        let cid = register_bits(raw);

        let manufacturer_id = ((cid >> 120) & 0xFF) as u8;
        let oem_id = ((cid >> 104) & 0xFFFF) as u16;

        // Product name, which is 5 bytes (40 bits)
        let product_name = [
            ((cid >> 96) & 0xFF) as u8,
            ((cid >> 88) & 0xFF) as u8,
            ((cid >> 80) & 0xFF) as u8,
            ((cid >> 72) & 0xFF) as u8,
            ((cid >> 64) & 0xFF) as u8,
        ];

        let product_revision = ((cid >> 56) & 0xFF) as u8;
        let serial_number = ((cid >> 24) & 0xFFFF_FFFF) as u32;

        // Year offset from 2000 in bits 19..12, month in bits 11..8
        let year = ((cid >> 12) & 0xFF) as u32 + 2000;
        let month = ((cid >> 8) & 0x0F) as u8;

        Cid {
            manufacturer_id,
            oem_id,
            product_name,
            product_revision,
            serial_number,
            manufacturing_date: (year, month),
        }
    }

    pub fn manufacturer_id(&self) -> u8 {
        self.manufacturer_id
    }

    pub fn oem_id(&self) -> u16 {
        self.oem_id
    }

    pub fn product_name(&self) -> [u8; 5] {
        self.product_name
    }

    pub fn product_revision(&self) -> u8 {
        self.product_revision
    }

    pub fn serial_number(&self) -> u32 {
        self.serial_number
    }

    pub fn manufacturing_date(&self) -> (u32, u8) {
        self.manufacturing_date
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MID {:#04x} OID {:#06x} PNM {} PRV {}.{} PSN {:#010x} MDT {}-{:02}",
            self.manufacturer_id,
            self.oem_id,
            core::str::from_utf8(&self.product_name).unwrap_or("?????"),
            self.product_revision >> 4,
            self.product_revision & 0x0F,
            self.serial_number,
            self.manufacturing_date.0,
            self.manufacturing_date.1,
        )
    }
}

pub struct Csd {
    csd_structure: u8,
    card_capacity: u64,
    max_read_block_len: u16,
    max_write_block_len: u16,
    erase_sector_size: u32,
    supports_partial_write: bool,
}

impl Csd {
    pub fn new(raw: &[u8; 16]) -> Result<(Csd, SdVersion), SdmmcError> {
        let csd = register_bits(raw);

        // Bits 126–127
        let csd_structure = ((csd >> 126) & 0x3) as u8;
        let sd_version = match csd_structure {
            0 => SdVersion::V1_0,
            1 => SdVersion::V2_0,
            _ => {
                log::debug!("unsupported CSD structure {}", csd_structure);
                return Err(SdmmcError::EUNSUPPORTEDCARD);
            }
        };

        let (card_capacity, erase_sector_size) = match sd_version {
            SdVersion::V1_0 => {
                let c_size = ((csd >> 62) & 0xFFF) as u64; // Bits 62–73
                let c_size_mult = ((csd >> 47) & 0x7) as u64; // Bits 47–49
                let read_bl_len = ((csd >> 80) & 0xF) as u64; // Bits 80–83
                let card_capacity = (c_size + 1) * (1 << (c_size_mult + 2)) * (1 << read_bl_len);

                // In write blocks
                let sector_size = ((csd >> 39) & 0x7F) as u32 + 1; // Bits 39–45
                (card_capacity, sector_size)
            }
            SdVersion::V2_0 => {
                let c_size = ((csd >> 48) & 0x3F_FFFF) as u64; // Bits 48–69
                let card_capacity = (c_size + 1) * 512 * 1024;

                let sector_size = (((csd >> 39) & 0x7F) as u32 + 1) * SDIO_BLOCK_SIZE as u32;
                (card_capacity, sector_size)
            }
        };

        let read_bl_len = ((csd >> 80) & 0xF) as u16; // Bits 80–83
        let max_read_block_len = 1 << read_bl_len;

        let write_bl_len = ((csd >> 22) & 0xF) as u16; // Bits 22–25
        let max_write_block_len = 1 << write_bl_len;

        let supports_partial_write = ((csd >> 21) & 0x1) != 0; // Bit 21

        Ok((
            Csd {
                csd_structure,
                card_capacity,
                max_read_block_len,
                max_write_block_len,
                erase_sector_size,
                supports_partial_write,
            },
            sd_version,
        ))
    }

    pub fn csd_structure(&self) -> u8 {
        self.csd_structure
    }

    /// Capacity in bytes.
    pub fn card_capacity(&self) -> u64 {
        self.card_capacity
    }

    /// Capacity in 512-byte sectors.
    pub fn sector_count(&self) -> u32 {
        (self.card_capacity / SDIO_BLOCK_SIZE as u64) as u32
    }

    pub fn max_read_block_len(&self) -> u16 {
        self.max_read_block_len
    }

    pub fn max_write_block_len(&self) -> u16 {
        self.max_write_block_len
    }

    pub fn erase_sector_size(&self) -> u32 {
        self.erase_sector_size
    }

    pub fn supports_partial_write(&self) -> bool {
        self.supports_partial_write
    }
}
