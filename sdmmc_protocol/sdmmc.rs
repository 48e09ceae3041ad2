use core::fmt;

use sdcard::{CardStatus, Cid, Csd, Ocr, SdCardType, SdVersion, Sdcard};
use sdmmc_constant::{
    MMC_CMD_ALL_SEND_CID, MMC_CMD_APP_CMD, MMC_CMD_GO_IDLE_STATE, MMC_CMD_READ_MULTIPLE_BLOCK,
    MMC_CMD_READ_SINGLE_BLOCK, MMC_CMD_SELECT_CARD, MMC_CMD_SEND_CSD, MMC_CMD_SEND_STATUS,
    MMC_CMD_SET_BLOCKLEN, MMC_CMD_STOP_TRANSMISSION, MMC_CMD_WRITE_MULTIPLE_BLOCK,
    MMC_CMD_WRITE_SINGLE_BLOCK, SDIO_BLOCK_SIZE, SDIO_MAX_BLOCKS, SD_BUSY_TIMEOUT_MS,
    SD_BUS_WIDTH_4, SD_CMD_APP_SEND_OP_COND, SD_CMD_APP_SET_BUS_WIDTH,
    SD_CMD_APP_SET_WR_BLK_ERASE_COUNT, SD_CMD_SEND_IF_COND, SD_CMD_SEND_RELATIVE_ADDR,
    SD_IF_COND_PATTERN, SD_INIT_RETRIES, SD_OP_COND_ARG, SD_OP_COND_TIMEOUT_MS,
};

use crate::sdmmc_traits::{DataDirection, SdmmcHardware};

mod command;
pub mod crc;
pub mod sdcard;
mod sdio_engine;
pub mod sdmmc_constant;
#[cfg(test)]
mod sim;
mod transfer;

pub use sdio_engine::{EngineAccess, SdioEngine, SharedEngine};
pub use transfer::{Transfer, TransferState};

/// Reply format a command expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    None,
    /// 48-bit card status (also covers R1b, R6 and R7 which share the layout)
    R1,
    /// 136-bit CID or CSD
    R2,
    /// 48-bit OCR without CRC
    R3,
}

/// A decoded reply. Only replies that passed validation are ever constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    None,
    R1(u32),
    /// Register bits 127..8 in the first 15 bytes, then the CRC byte
    R2([u8; 16]),
    R3(u32),
}

pub struct SdmmcCmd {
    pub cmdidx: u8,
    pub resp_type: ResponseKind,
    pub cmdarg: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdmmcError {
    // Result not ready yet, poll again
    EBUSY,
    // No reply within the command timeout
    ERESPONSETIMEOUT,
    ERESPONSECRC,
    // Reply carried the wrong command index or R2 code
    ERESPONSECODE,
    // At least one data block failed its CRC16 check
    EDATACRC,
    EDATATIMEOUT,
    EINVAL,
    EUNSUPPORTEDCARD,
    ENOCARD,
    // The block transfer succeed, but fail to stop the read/write process
    ESTOPCMD,
}

impl fmt::Display for SdmmcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SdmmcError::EBUSY => "transfer in progress",
            SdmmcError::ERESPONSETIMEOUT => "command response timeout",
            SdmmcError::ERESPONSECRC => "command response CRC mismatch",
            SdmmcError::ERESPONSECODE => "unexpected command response code",
            SdmmcError::EDATACRC => "data block CRC mismatch",
            SdmmcError::EDATATIMEOUT => "data transfer timeout",
            SdmmcError::EINVAL => "invalid argument",
            SdmmcError::EUNSUPPORTEDCARD => "unsupported card",
            SdmmcError::ENOCARD => "no card",
            SdmmcError::ESTOPCMD => "stop transmission failed",
        };
        f.write_str(msg)
    }
}

// Record where an error surfaced before handing it to the caller.
macro_rules! check {
    ($self:ident, $e:expr) => {
        match $e {
            Ok(value) => value,
            Err(err) => return $self.record(err, line!()),
        }
    };
}

/// SD memory card session on top of the SDIO engine.
///
/// Owns the card identity gathered during [`SdmmcProtocol::setup_card`] and turns sector
/// requests into bracketed command + block transfer sequences. `A` is how the engine is
/// reached: `&mut SdioEngine` when the caller owns it, `&SharedEngine` when the DMA
/// interrupt shares it.
pub struct SdmmcProtocol<A: EngineAccess> {
    engine: A,
    card: Option<Sdcard>,
    error_code: Option<SdmmcError>,
    error_line: u32,
}

impl<H: SdmmcHardware, A: EngineAccess<Hardware = H>> SdmmcProtocol<A> {
    pub fn new(engine: A) -> Self {
        SdmmcProtocol {
            engine,
            card: None,
            error_code: None,
            error_line: 0,
        }
    }

    /// Bring the card from power-up to selected, 4-bit, transfer state.
    pub fn setup_card(&mut self) -> Result<(), SdmmcError> {
        self.card = None;
        self.error_code = None;
        self.error_line = 0;

        check!(self, self.engine.with_engine(SdioEngine::init));

        // Cards fresh out of power-up may miss the first few commands
        let mut if_cond = Err(SdmmcError::ENOCARD);
        for _ in 0..SD_INIT_RETRIES {
            self.engine
                .with_engine(|engine| engine.hardware_mut().usleep(1000));

            if let Err(err) = self.command_none(MMC_CMD_GO_IDLE_STATE, 0) {
                log::debug!("CMD0 failed: {}", err);
            }

            if_cond = self.command_r1(SD_CMD_SEND_IF_COND, SD_IF_COND_PATTERN);
            if if_cond == Ok(SD_IF_COND_PATTERN) {
                break;
            }
        }

        match if_cond {
            Ok(SD_IF_COND_PATTERN) => {}
            Ok(echo) => {
                log::debug!("CMD8 echo {:#x}, card not SD 2.0 compliant", echo);
                return self.record(SdmmcError::EUNSUPPORTEDCARD, line!());
            }
            Err(SdmmcError::ERESPONSETIMEOUT) => return self.record(SdmmcError::ENOCARD, line!()),
            Err(err) => return self.record(err, line!()),
        }

        let ocr = check!(self, self.wait_power_up());

        let cid_raw = check!(self, self.command_r2(MMC_CMD_ALL_SEND_CID, 0));

        let rca_reply = check!(self, self.command_r1(SD_CMD_SEND_RELATIVE_ADDR, 0));
        let relative_card_addr = (rca_reply >> 16) as u16;
        let rca_arg = (relative_card_addr as u32) << 16;

        // CSD can only be read in stand-by state, so before the card gets selected
        let csd_raw = check!(self, self.command_r2(MMC_CMD_SEND_CSD, rca_arg));
        let (csd, card_version) = check!(self, Csd::new(&csd_raw));

        check!(self, self.command_r1(MMC_CMD_SELECT_CARD, rca_arg));

        check!(self, self.command_r1(MMC_CMD_APP_CMD, rca_arg));
        check!(
            self,
            self.command_r1(SD_CMD_APP_SET_BUS_WIDTH, SD_BUS_WIDTH_4)
        );

        let card = Sdcard {
            manufacture_info: Cid::new(&cid_raw),
            card_specific_data: csd,
            card_version,
            relative_card_addr,
            ocr,
            cid_raw,
            csd_raw,
        };

        log::info!(
            "SD card ready: {:?}, {} sectors, {}",
            card.card_type(),
            card.card_specific_data.sector_count(),
            card.manufacture_info
        );

        self.card = Some(card);
        Ok(())
    }

    // ACMD41 until the card reports power-up done
    fn wait_power_up(&mut self) -> Result<Ocr, SdmmcError> {
        let start = self.millis();
        loop {
            self.command_r1(MMC_CMD_APP_CMD, 0)?;
            let ocr = Ocr::from_bits_retain(
                self.command_r3(SD_CMD_APP_SEND_OP_COND, SD_OP_COND_ARG)?,
            );

            if ocr.contains(Ocr::POWER_UP_DONE) {
                return Ok(ocr);
            }

            if self.timed_out(start, SD_OP_COND_TIMEOUT_MS) {
                log::debug!("ACMD41 timeout, last OCR {:#010x}", ocr.bits());
                return Err(SdmmcError::EUNSUPPORTEDCARD);
            }
        }
    }

    /// Read `buf.len() / 512` sectors starting at `sector`.
    ///
    /// `progress` is called with the running byte count whenever it advances.
    pub fn read_blocks(
        &mut self,
        sector: u32,
        buf: &mut [u8],
        progress: Option<&mut dyn FnMut(u32)>,
    ) -> Result<(), SdmmcError> {
        if buf.is_empty() || buf.len() % SDIO_BLOCK_SIZE != 0 {
            return self.record(SdmmcError::EINVAL, line!());
        }

        let mut ignore = |_: u32| {};
        let progress: &mut dyn FnMut(u32) = match progress {
            Some(report) => report,
            None => &mut ignore,
        };

        let mut done: u32 = 0;
        for chunk in buf.chunks_mut(SDIO_MAX_BLOCKS * SDIO_BLOCK_SIZE) {
            let chunk_sector = sector + done / SDIO_BLOCK_SIZE as u32;
            let chunk_len = chunk.len() as u32;
            self.read_chunk(chunk_sector, chunk, done, &mut *progress)?;
            done += chunk_len;
        }
        Ok(())
    }

    fn read_chunk(
        &mut self,
        sector: u32,
        buf: &mut [u8],
        base: u32,
        progress: &mut dyn FnMut(u32),
    ) -> Result<(), SdmmcError> {
        let blocks = (buf.len() / SDIO_BLOCK_SIZE) as u32;
        let address = check!(self, self.data_address(sector));

        check!(
            self,
            self.command_r1(MMC_CMD_SET_BLOCKLEN, SDIO_BLOCK_SIZE as u32)
        );

        let cmd = if blocks == 1 {
            MMC_CMD_READ_SINGLE_BLOCK
        } else {
            MMC_CMD_READ_MULTIPLE_BLOCK
        };

        // Armed before the read command so no part of the first block can be missed
        let mut commanded = false;
        let status = self.engine.start_receive(buf, blocks, |transfer| {
            transfer.command_r1(cmd, address)?;
            commanded = true;
            finish_transfer(transfer, base, progress)
        });

        match status {
            // Nothing reached the card, so there is nothing to stop
            Err(err) if !commanded => self.record(err, line!()),
            status => self.end_transfer(blocks, status),
        }
    }

    /// Write `buf.len() / 512` sectors starting at `sector`.
    pub fn write_blocks(
        &mut self,
        sector: u32,
        buf: &[u8],
        progress: Option<&mut dyn FnMut(u32)>,
    ) -> Result<(), SdmmcError> {
        if buf.is_empty() || buf.len() % SDIO_BLOCK_SIZE != 0 {
            return self.record(SdmmcError::EINVAL, line!());
        }

        let mut ignore = |_: u32| {};
        let progress: &mut dyn FnMut(u32) = match progress {
            Some(report) => report,
            None => &mut ignore,
        };

        let mut done: u32 = 0;
        for chunk in buf.chunks(SDIO_MAX_BLOCKS * SDIO_BLOCK_SIZE) {
            let chunk_sector = sector + done / SDIO_BLOCK_SIZE as u32;
            self.write_chunk(chunk_sector, chunk, done, &mut *progress)?;
            done += chunk.len() as u32;
        }
        Ok(())
    }

    fn write_chunk(
        &mut self,
        sector: u32,
        buf: &[u8],
        base: u32,
        progress: &mut dyn FnMut(u32),
    ) -> Result<(), SdmmcError> {
        let blocks = (buf.len() / SDIO_BLOCK_SIZE) as u32;
        let address = check!(self, self.data_address(sector));
        let rca_arg = check!(self, self.rca_arg());

        check!(
            self,
            self.command_r1(MMC_CMD_SET_BLOCKLEN, SDIO_BLOCK_SIZE as u32)
        );

        if blocks == 1 {
            check!(
                self,
                self.command_r1(MMC_CMD_WRITE_SINGLE_BLOCK, address)
            );
        } else {
            // Pre-erase hint, lets the card prepare the whole range up front
            check!(self, self.command_r1(MMC_CMD_APP_CMD, rca_arg));
            check!(
                self,
                self.command_r1(SD_CMD_APP_SET_WR_BLK_ERASE_COUNT, blocks)
            );
            check!(
                self,
                self.command_r1(MMC_CMD_WRITE_MULTIPLE_BLOCK, address)
            );
        }

        // The card is waiting for data from here on
        let status = self
            .engine
            .start_transmit(buf, blocks, |transfer| finish_transfer(transfer, base, progress));
        self.end_transfer(blocks, status)
    }

    // Multi-block transfers end with CMD12 whatever the data phase reported. A data error
    // wins over a failed stop.
    fn end_transfer(
        &mut self,
        blocks: u32,
        status: Result<(), SdmmcError>,
    ) -> Result<(), SdmmcError> {
        let stopped = if blocks > 1 {
            self.stop_transmission(true)
        } else {
            Ok(())
        };
        check!(self, status);
        stopped
    }

    /// Force the engine idle and send CMD12. With `blocking`, also wait for the card to
    /// release D0.
    pub fn stop_transmission(&mut self, blocking: bool) -> Result<(), SdmmcError> {
        self.engine.with_engine(SdioEngine::stop);

        if let Err(err) = self.command_r1(MMC_CMD_STOP_TRANSMISSION, 0) {
            log::debug!("CMD12 failed: {}", err);
            return self.record(SdmmcError::ESTOPCMD, line!());
        }

        if blocking {
            let start = self.millis();
            while self.is_busy() {
                if self.timed_out(start, SD_BUSY_TIMEOUT_MS) {
                    log::debug!("card still busy after CMD12");
                    return self.record(SdmmcError::ESTOPCMD, line!());
                }
            }
        }
        Ok(())
    }

    /// CMD13
    pub fn card_status(&mut self) -> Result<CardStatus, SdmmcError> {
        let rca_arg = check!(self, self.rca_arg());
        let status = check!(self, self.command_r1(MMC_CMD_SEND_STATUS, rca_arg));
        Ok(CardStatus::from_bits_retain(status))
    }

    /// True while the card holds D0 low.
    pub fn is_busy(&mut self) -> bool {
        self.engine
            .with_engine(|engine| engine.hardware().sdmmc_data_line_busy())
    }

    pub fn card_type(&self) -> Option<SdCardType> {
        self.card.as_ref().map(Sdcard::card_type)
    }

    pub fn card_version(&self) -> Option<&SdVersion> {
        self.card.as_ref().map(|card| &card.card_version)
    }

    pub fn ocr(&self) -> Option<Ocr> {
        self.card.as_ref().map(|card| card.ocr)
    }

    pub fn relative_card_addr(&self) -> Option<u16> {
        self.card.as_ref().map(|card| card.relative_card_addr)
    }

    pub fn cid(&self) -> Option<&Cid> {
        self.card.as_ref().map(|card| &card.manufacture_info)
    }

    pub fn csd(&self) -> Option<&Csd> {
        self.card.as_ref().map(|card| &card.card_specific_data)
    }

    /// Raw CID as received, including the trailing CRC byte.
    pub fn cid_raw(&self) -> Option<&[u8; 16]> {
        self.card.as_ref().map(|card| &card.cid_raw)
    }

    pub fn csd_raw(&self) -> Option<&[u8; 16]> {
        self.card.as_ref().map(|card| &card.csd_raw)
    }

    pub fn sector_count(&self) -> Result<u32, SdmmcError> {
        self.card
            .as_ref()
            .map(|card| card.card_specific_data.sector_count())
            .ok_or(SdmmcError::ENOCARD)
    }

    /// Last error reported by this session, if any.
    pub fn error_code(&self) -> Option<SdmmcError> {
        self.error_code
    }

    /// Source line where the last error was reported.
    pub fn error_line(&self) -> u32 {
        self.error_line
    }

    fn rca_arg(&self) -> Result<u32, SdmmcError> {
        self.card
            .as_ref()
            .map(|card| (card.relative_card_addr as u32) << 16)
            .ok_or(SdmmcError::ENOCARD)
    }

    // SDSC cards are byte addressed, SDHC/SDXC block addressed
    fn data_address(&self, sector: u32) -> Result<u32, SdmmcError> {
        match self.card_type() {
            Some(SdCardType::Sdhc) => Ok(sector),
            Some(SdCardType::Sdsc) => sector
                .checked_mul(SDIO_BLOCK_SIZE as u32)
                .ok_or(SdmmcError::EINVAL),
            None => Err(SdmmcError::ENOCARD),
        }
    }

    fn record<V>(&mut self, err: SdmmcError, line: u32) -> Result<V, SdmmcError> {
        self.error_code = Some(err);
        self.error_line = line;
        Err(err)
    }

    fn command_none(&mut self, cmdidx: u8, arg: u32) -> Result<(), SdmmcError> {
        self.engine
            .with_engine(|engine| engine.command_none(cmdidx, arg))
    }

    fn command_r1(&mut self, cmdidx: u8, arg: u32) -> Result<u32, SdmmcError> {
        self.engine
            .with_engine(|engine| engine.command_r1(cmdidx, arg))
    }

    fn command_r2(&mut self, cmdidx: u8, arg: u32) -> Result<[u8; 16], SdmmcError> {
        self.engine
            .with_engine(|engine| engine.command_r2(cmdidx, arg))
    }

    fn command_r3(&mut self, cmdidx: u8, arg: u32) -> Result<u32, SdmmcError> {
        self.engine
            .with_engine(|engine| engine.command_r3(cmdidx, arg))
    }

    fn millis(&mut self) -> u32 {
        self.engine.with_engine(|engine| engine.hardware().millis())
    }

    fn timed_out(&mut self, start: u32, budget_ms: u32) -> bool {
        self.engine
            .with_engine(|engine| engine.hardware().timed_out(start, budget_ms))
    }
}

// Poll a session to its terminal status, reporting byte progress as it moves
fn finish_transfer<A: EngineAccess + ?Sized>(
    transfer: &mut Transfer<'_, '_, A>,
    base: u32,
    progress: &mut dyn FnMut(u32),
) -> Result<(), SdmmcError> {
    let mut reported = 0;
    loop {
        let mut bytes = 0;
        let status = match transfer.direction() {
            DataDirection::Receive => transfer.rx_poll(Some(&mut bytes)),
            DataDirection::Transmit => transfer.tx_poll(Some(&mut bytes)),
        };

        if bytes != reported {
            reported = bytes;
            progress(base + bytes);
        }

        match status {
            Err(SdmmcError::EBUSY) => continue,
            other => return other,
        }
    }
}
