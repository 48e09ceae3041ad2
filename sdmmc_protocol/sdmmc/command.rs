//! Command framing and response decoding.
//!
//! The command state machine consumes a command as two words:
//! - word 0: `[31:24]` bit count to send minus one, then the first three frame bytes
//!   (start/direction/index, argument bits 31..16)
//! - word 1: argument bits 15..0, the CRC7 byte with its end bit, then `[7:0]` the reply
//!   length in bits minus one (zero when no reply is expected)
//!
//! Replies come back MSB first. A 48-bit reply arrives as one full word plus a word whose
//! low 16 bits hold the tail, a 136-bit reply as four full words plus a last word holding
//! the final byte.

use super::crc::crc7;
use super::sdmmc_constant::{
    SDIO_CMD_TIMEOUT_MS, SDIO_R1_BITS, SDIO_R2_BITS, SDIO_R2_CODE, SDIO_R2_WORDS,
    SD_CMD_APP_SEND_OP_COND,
};
use super::{Response, ResponseKind, SdioEngine, SdmmcCmd, SdmmcError, TransferState};
use crate::sdmmc_traits::{DmaRequest, SdmmcHardware};

// Cards answer ACMD41 during power-up without echoing the command index
const ANONYMOUS_REPLY_CMD: u8 = SD_CMD_APP_SEND_OP_COND;

impl SdmmcCmd {
    pub fn new(cmdidx: u8, resp_type: ResponseKind, cmdarg: u32) -> SdmmcCmd {
        SdmmcCmd {
            cmdidx,
            resp_type,
            cmdarg,
        }
    }

    fn response_bits(&self) -> u32 {
        match self.resp_type {
            ResponseKind::None => 0,
            ResponseKind::R1 | ResponseKind::R3 => SDIO_R1_BITS,
            ResponseKind::R2 => SDIO_R2_BITS,
        }
    }

    /// The two words the command state machine shifts out for this command.
    pub fn frame(&self) -> [u32; 2] {
        let arg = self.cmdarg;

        let word0 = (47 << 24) // Number of bits in command minus one
            | (1 << 22) // Transfer direction from host to card
            | ((self.cmdidx as u32 & 0x3F) << 16)
            | (((arg >> 24) & 0xFF) << 8)
            | ((arg >> 16) & 0xFF);

        let mut word1 = (((arg >> 8) & 0xFF) << 24)
            | ((arg & 0xFF) << 16)
            | (1 << 8); // End bit

        let response_bits = self.response_bits();
        if response_bits != 0 {
            word1 |= response_bits - 1;
        }

        // Checksum in transmission order (big-endian)
        let crc = crc7(&[
            (word0 >> 16) as u8,
            (word0 >> 8) as u8,
            word0 as u8,
            (word1 >> 24) as u8,
            (word1 >> 16) as u8,
        ]);
        word1 |= (crc as u32) << 8;

        [word0, word1]
    }
}

/// Validate a 48-bit R1 reply and extract the 32-bit card status.
pub(crate) fn decode_r1(cmdidx: u8, resp0: u32, resp1: u32) -> Result<u32, SdmmcError> {
    let crc = crc7(&[
        (resp0 >> 24) as u8,
        (resp0 >> 16) as u8,
        (resp0 >> 8) as u8,
        resp0 as u8,
        (resp1 >> 8) as u8,
    ]);

    // Lowest bit is the end bit, not part of the CRC
    let actual_crc = (resp1 & 0xFE) as u8;
    if crc != actual_crc {
        log::debug!(
            "CMD{} reply CRC error, calculated {:#04x} packet has {:#04x}",
            cmdidx,
            crc,
            actual_crc
        );
        return Err(SdmmcError::ERESPONSECRC);
    }

    let response_cmd = (resp0 >> 24) as u8;
    if response_cmd != cmdidx && cmdidx != ANONYMOUS_REPLY_CMD {
        log::debug!("CMD{} received reply for CMD{}", cmdidx, response_cmd);
        return Err(SdmmcError::ERESPONSECODE);
    }

    Ok(payload_48(resp0, resp1))
}

/// Extract the OCR from an R3 reply. R3 has no valid CRC and no command echo.
pub(crate) fn decode_r3(resp0: u32, resp1: u32) -> u32 {
    payload_48(resp0, resp1)
}

fn payload_48(resp0: u32, resp1: u32) -> u32 {
    ((resp0 & 0xFF_FFFF) << 8) | ((resp1 >> 8) & 0xFF)
}

/// Validate a 136-bit R2 reply captured as five words.
pub(crate) fn decode_r2(cmdidx: u8, buf: &[u32; SDIO_R2_WORDS]) -> Result<[u8; 16], SdmmcError> {
    let mut response = [0u8; 16];
    response[..3].copy_from_slice(&buf[0].to_be_bytes()[1..]);
    for (i, word) in buf[1..4].iter().enumerate() {
        response[3 + 4 * i..7 + 4 * i].copy_from_slice(&word.to_be_bytes());
    }
    response[15] = buf[4] as u8;

    let crc = crc7(&response[..15]);
    let actual_crc = response[15] & 0xFE;
    if crc != actual_crc {
        log::debug!(
            "CMD{} R2 CRC error, calculated {:#04x} packet has {:#04x}",
            cmdidx,
            crc,
            actual_crc
        );
        return Err(SdmmcError::ERESPONSECRC);
    }

    let response_cmd = (buf[0] >> 24) as u8;
    if response_cmd != SDIO_R2_CODE {
        log::debug!("CMD{} expected R2 code 0x3F, got {:#04x}", cmdidx, response_cmd);
        return Err(SdmmcError::ERESPONSECODE);
    }

    Ok(response)
}

impl<H: SdmmcHardware> SdioEngine<H> {
    /// Send `cmd` and wait (busy, bounded) for the reply it expects.
    pub fn send_command(&mut self, cmd: &SdmmcCmd) -> Result<Response, SdmmcError> {
        match cmd.resp_type {
            ResponseKind::None => self
                .command_none(cmd.cmdidx, cmd.cmdarg)
                .map(|_| Response::None),
            ResponseKind::R1 => self.command_r1(cmd.cmdidx, cmd.cmdarg).map(Response::R1),
            ResponseKind::R2 => self.command_r2(cmd.cmdidx, cmd.cmdarg).map(Response::R2),
            ResponseKind::R3 => self.command_r3(cmd.cmdidx, cmd.cmdarg).map(Response::R3),
        }
    }

    /// Send a command that expects no reply. The state machine still pushes a marker word
    /// once the frame is out, which is waited for and dropped.
    pub fn command_none(&mut self, cmdidx: u8, arg: u32) -> Result<(), SdmmcError> {
        self.transmit_command(&SdmmcCmd::new(cmdidx, ResponseKind::None, arg));
        self.wait_command_words(cmdidx, 1)?;
        self.hardware.sdmmc_cmd_get();
        Ok(())
    }

    pub fn command_r1(&mut self, cmdidx: u8, arg: u32) -> Result<u32, SdmmcError> {
        self.transmit_command(&SdmmcCmd::new(cmdidx, ResponseKind::R1, arg));
        self.wait_command_words(cmdidx, 2)?;
        let resp0 = self.hardware.sdmmc_cmd_get();
        let resp1 = self.hardware.sdmmc_cmd_get();
        decode_r1(cmdidx, resp0, resp1)
    }

    pub fn command_r3(&mut self, cmdidx: u8, arg: u32) -> Result<u32, SdmmcError> {
        self.transmit_command(&SdmmcCmd::new(cmdidx, ResponseKind::R3, arg));
        self.wait_command_words(cmdidx, 2)?;
        let resp0 = self.hardware.sdmmc_cmd_get();
        let resp1 = self.hardware.sdmmc_cmd_get();
        Ok(decode_r3(resp0, resp1))
    }

    /// R2 is longer than the command FIFO, so the reply is captured by DMA. The DMA
    /// channel is shared with block transfers, which rules out an active session.
    pub fn command_r2(&mut self, cmdidx: u8, arg: u32) -> Result<[u8; 16], SdmmcError> {
        if self.session.state() != TransferState::Idle {
            return Err(SdmmcError::EINVAL);
        }

        let mut buf = [0u32; SDIO_R2_WORDS];

        self.hardware.sdmmc_cmd_clear_fifos();
        // SAFETY: `buf` outlives the transfer, which is either complete or aborted before
        // this function returns
        unsafe {
            self.hardware.sdmmc_dma_start(DmaRequest::CmdRx {
                dst: buf.as_mut_ptr(),
                words: SDIO_R2_WORDS as u32,
            });
        }

        self.transmit_command(&SdmmcCmd::new(cmdidx, ResponseKind::R2, arg));

        let start = self.hardware.millis();
        while self.hardware.sdmmc_dma_busy() {
            if self.hardware.timed_out(start, SDIO_CMD_TIMEOUT_MS) {
                self.hardware.sdmmc_dma_abort();
                return Err(self.command_timeout(cmdidx));
            }
        }
        self.hardware.sdmmc_dma_abort();

        decode_r2(cmdidx, &buf)
    }

    fn transmit_command(&mut self, cmd: &SdmmcCmd) {
        let [word0, word1] = cmd.frame();
        self.hardware.sdmmc_cmd_clear_fifos();
        self.hardware.sdmmc_cmd_put(word0);
        self.hardware.sdmmc_cmd_put(word1);
    }

    fn wait_command_words(&mut self, cmdidx: u8, words: u32) -> Result<(), SdmmcError> {
        let start = self.hardware.millis();
        while self.hardware.sdmmc_cmd_rx_level() < words {
            if self.hardware.timed_out(start, SDIO_CMD_TIMEOUT_MS) {
                return Err(self.command_timeout(cmdidx));
            }
        }
        Ok(())
    }

    fn command_timeout(&mut self, cmdidx: u8) -> SdmmcError {
        log::debug!(
            "CMD{} response timeout, PC {} RXF {} TXF {}",
            cmdidx,
            self.hardware.sdmmc_cmd_pc(),
            self.hardware.sdmmc_cmd_rx_level(),
            self.hardware.sdmmc_cmd_tx_level()
        );
        self.hardware.sdmmc_cmd_reset();
        SdmmcError::ERESPONSETIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::super::sim::{r1_reply, r2_reply, SimCard};
    use super::super::sdmmc_constant::{
        MMC_CMD_ALL_SEND_CID, MMC_CMD_GO_IDLE_STATE, MMC_CMD_READ_SINGLE_BLOCK,
        SD_CMD_SEND_IF_COND,
    };
    use super::*;
    use crate::sdmmc_os::MonotonicClock;

    #[test]
    fn frame_cmd0() {
        let cmd = SdmmcCmd::new(MMC_CMD_GO_IDLE_STATE, ResponseKind::None, 0);
        assert_eq!(cmd.frame(), [0x2f40_0000, 0x0000_9500]);
    }

    #[test]
    fn frame_carries_argument_crc_and_reply_length() {
        let cmd = SdmmcCmd::new(SD_CMD_SEND_IF_COND, ResponseKind::R1, 0x1AA);
        assert_eq!(cmd.frame(), [0x2f48_0000, 0x01aa_872f]);

        let cmd = SdmmcCmd::new(SD_CMD_APP_SEND_OP_COND, ResponseKind::R3, 0xD004_0000);
        assert_eq!(cmd.frame(), [0x2f69_d004, 0x0000_4b2f]);

        let cmd = SdmmcCmd::new(MMC_CMD_ALL_SEND_CID, ResponseKind::R2, 0);
        assert_eq!(cmd.frame()[1] & 0xFF, 135);
    }

    #[test]
    fn r1_round_trip() {
        let [resp0, resp1] = r1_reply(MMC_CMD_READ_SINGLE_BLOCK, 0x900);
        assert_eq!(resp0, 0x1100_0009);
        assert_eq!(resp1, 0x0067);
        assert_eq!(decode_r1(MMC_CMD_READ_SINGLE_BLOCK, resp0, resp1), Ok(0x900));
    }

    #[test]
    fn r1_any_corrupted_byte_is_a_crc_error() {
        let status = 0x0000_0920;
        let [resp0, resp1] = r1_reply(MMC_CMD_READ_SINGLE_BLOCK, status);

        for byte in 0..5 {
            // Complementing a byte flips all 8 bits, which a 7-bit CRC always catches
            let (r0, r1) = if byte < 4 {
                (resp0 ^ (0xFF << (8 * (3 - byte))), resp1)
            } else {
                (resp0, resp1 ^ 0xFF00)
            };
            assert_eq!(
                decode_r1(MMC_CMD_READ_SINGLE_BLOCK, r0, r1),
                Err(SdmmcError::ERESPONSECRC),
                "byte {byte}"
            );
        }

        for bit in 1..8 {
            assert_eq!(
                decode_r1(MMC_CMD_READ_SINGLE_BLOCK, resp0, resp1 ^ (1 << bit)),
                Err(SdmmcError::ERESPONSECRC)
            );
        }

        // The end bit is not covered
        assert_eq!(
            decode_r1(MMC_CMD_READ_SINGLE_BLOCK, resp0, resp1 ^ 1),
            Ok(status)
        );
    }

    #[test]
    fn r1_echo_mismatch_is_a_code_error() {
        let [resp0, resp1] = r1_reply(SD_CMD_SEND_IF_COND, 0x1AA);
        assert_eq!(
            decode_r1(MMC_CMD_READ_SINGLE_BLOCK, resp0, resp1),
            Err(SdmmcError::ERESPONSECODE)
        );
        // ... except for the anonymous reply to ACMD41
        assert_eq!(decode_r1(SD_CMD_APP_SEND_OP_COND, resp0, resp1), Ok(0x1AA));
    }

    #[test]
    fn r2_decode_checks_crc_and_code() {
        let payload: [u8; 15] = core::array::from_fn(|i| 0x10 + i as u8);
        let words = r2_reply(&payload);

        let response = decode_r2(MMC_CMD_ALL_SEND_CID, &words).unwrap();
        assert_eq!(&response[..15], &payload);
        assert_eq!(response[15], crc7(&payload) | 1);

        let mut bad = words;
        bad[2] ^= 0x0000_0100;
        assert_eq!(
            decode_r2(MMC_CMD_ALL_SEND_CID, &bad),
            Err(SdmmcError::ERESPONSECRC)
        );

        let mut bad = words;
        bad[0] &= 0x00FF_FFFF;
        assert_eq!(
            decode_r2(MMC_CMD_ALL_SEND_CID, &bad),
            Err(SdmmcError::ERESPONSECODE)
        );
    }

    #[test]
    fn r3_skips_crc() {
        // OCR 0xC0FF8000 with all ones in place of the CRC
        assert_eq!(decode_r3(0x3FC0_FF80, 0x00FF), 0xC0FF_8000);
        assert_eq!(decode_r3(0x3F00_FF80, 0x20FF), 0x00FF_8020);
    }

    #[test]
    fn send_command_times_out_without_reply() {
        let mut engine = SdioEngine::new(SimCard::new());
        engine.init().unwrap();
        engine.hardware_mut().set_silent(true);

        let start = engine.hardware().millis();
        let result = engine.send_command(&SdmmcCmd::new(
            MMC_CMD_READ_SINGLE_BLOCK,
            ResponseKind::R1,
            0,
        ));
        let elapsed = engine.hardware().millis().wrapping_sub(start);

        assert_eq!(result, Err(SdmmcError::ERESPONSETIMEOUT));
        assert!(elapsed <= SDIO_CMD_TIMEOUT_MS + 3, "took {elapsed} ms");
        // The state machine was sent back to its entry point
        assert_eq!(engine.hardware().cmd_resets(), 1);
    }

    #[test]
    fn r2_times_out_and_releases_dma() {
        let mut engine = SdioEngine::new(SimCard::new());
        engine.init().unwrap();
        engine.hardware_mut().set_silent(true);

        assert_eq!(
            engine.command_r2(MMC_CMD_ALL_SEND_CID, 0),
            Err(SdmmcError::ERESPONSETIMEOUT)
        );
        assert!(!engine.hardware().dma_busy());
        assert_eq!(engine.hardware().cmd_resets(), 1);
    }

    #[test]
    fn send_command_round_trips_through_card() {
        let mut engine = SdioEngine::new(SimCard::new());
        engine.init().unwrap();

        assert_eq!(
            engine.send_command(&SdmmcCmd::new(MMC_CMD_GO_IDLE_STATE, ResponseKind::None, 0)),
            Ok(Response::None)
        );
        assert_eq!(
            engine.send_command(&SdmmcCmd::new(SD_CMD_SEND_IF_COND, ResponseKind::R1, 0x1AA)),
            Ok(Response::R1(0x1AA))
        );
        match engine.send_command(&SdmmcCmd::new(MMC_CMD_ALL_SEND_CID, ResponseKind::R2, 0)) {
            Ok(Response::R2(cid)) => assert_eq!(cid[0], 0x03),
            other => panic!("unexpected {other:?}"),
        }
    }
}
