//! A simulated SD card wired to a simulated SDIO host, for host-side tests.
//!
//! The command side decodes every frame, checks its CRC7 and answers like a card in SD
//! mode. The data side moves blocks when DMA is stepped: read blocks arrive followed by
//! their CRC16x4 trailer, written blocks are checked against the trailer the driver
//! appends. The clock moves forward on every read so timeouts fire without real time.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::ptr;
use std::slice;

use super::crc::{crc16_4bit, crc7};
use super::sdcard::Ocr;
use super::sdmmc_constant::{
    MMC_CMD_ALL_SEND_CID, MMC_CMD_APP_CMD, MMC_CMD_GO_IDLE_STATE, MMC_CMD_READ_MULTIPLE_BLOCK,
    MMC_CMD_READ_SINGLE_BLOCK, MMC_CMD_SEND_CSD, MMC_CMD_SEND_STATUS, MMC_CMD_STOP_TRANSMISSION,
    MMC_CMD_WRITE_MULTIPLE_BLOCK, MMC_CMD_WRITE_SINGLE_BLOCK, SDIO_BLOCK_SIZE, SDIO_BLOCK_WORDS,
    SDIO_R2_CODE, SDIO_R2_WORDS, SDIO_TX_END_TOKEN, SDIO_TX_START_TOKEN,
    SD_CMD_APP_SEND_OP_COND, SD_CMD_SEND_IF_COND, SD_CMD_SEND_RELATIVE_ADDR,
};
use super::SdmmcError;
use crate::sdmmc_os::{MonotonicClock, Sleep};
use crate::sdmmc_traits::{
    BlockDma, CmdChannel, DataChannel, DataDirection, DmaRequest, SdmmcHardware,
};

pub(crate) const SIM_RCA: u16 = 0xB368;
const SIM_C_SIZE: u32 = 0x3FF;
pub(crate) const SIM_SECTORS: u32 = (SIM_C_SIZE + 1) * 1024;

// Clock advance on every read
const CLOCK_TICK_US: u64 = 250;
// tran state, ready for data
const STATUS_TRAN: u32 = (4 << 9) | (1 << 8);
const STATUS_APP_CMD: u32 = 1 << 5;
const OCR_VOLTAGE_WINDOW: u32 = 0x00FF_8000;

/// R1 reply words as the command state machine pushes them.
pub(crate) fn r1_reply(cmd: u8, status: u32) -> [u32; 2] {
    let crc = crc7(&[
        cmd,
        (status >> 24) as u8,
        (status >> 16) as u8,
        (status >> 8) as u8,
        status as u8,
    ]);
    [
        ((cmd as u32) << 24) | (status >> 8),
        ((status & 0xFF) << 8) | crc as u32 | 1,
    ]
}

/// R2 reply words for register bits 127..8.
pub(crate) fn r2_reply(payload: &[u8; 15]) -> [u32; SDIO_R2_WORDS] {
    let mut wire = [0u8; 17];
    wire[0] = SDIO_R2_CODE;
    wire[1..16].copy_from_slice(payload);
    wire[16] = crc7(payload) | 1;

    let mut words = [0u32; SDIO_R2_WORDS];
    for (word, chunk) in words.iter_mut().zip(wire.chunks(4)) {
        *word = chunk.iter().fold(0, |acc, &b| (acc << 8) | b as u32);
    }
    words
}

// R3 carries no CRC, the card sends all ones in its place
fn r3_reply(ocr: u32) -> [u32; 2] {
    [(0x3F << 24) | (ocr >> 8), ((ocr & 0xFF) << 8) | 0xFF]
}

pub(crate) fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}

pub(crate) fn bytes(words: &[u32]) -> &[u8] {
    // SAFETY: u32 has no padding and u8 has alignment 1
    unsafe { slice::from_raw_parts(words.as_ptr().cast(), words.len() * 4) }
}

pub(crate) fn bytes_mut(words: &mut [u32]) -> &mut [u8] {
    // SAFETY: as above, and every byte pattern is a valid u32
    unsafe { slice::from_raw_parts_mut(words.as_mut_ptr().cast(), words.len() * 4) }
}

fn cid_payload() -> [u8; 15] {
    let mut cid = [0u8; 15];
    cid[0] = 0x03;
    cid[1..3].copy_from_slice(b"SD");
    cid[3..8].copy_from_slice(b"SIMSD");
    cid[8] = 0x10;
    cid[9..13].copy_from_slice(&0xC0FF_EE01u32.to_be_bytes());
    // 2022-10
    cid[13] = 0x01;
    cid[14] = 0x6A;
    cid
}

fn csd_payload() -> [u8; 15] {
    let bits: u128 = (1 << 126) | (9 << 80) | ((SIM_C_SIZE as u128) << 48) | (9 << 22);
    let mut csd = [0u8; 15];
    csd.copy_from_slice(&bits.to_be_bytes()[..15]);
    csd
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DmaKind {
    DataRx,
    DataTx,
    CmdRx,
}

/// Host side operations with an effect, in the order the driver issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SimOp {
    CmdPut(u32),
    CmdGet,
    CmdClear,
    CmdReset,
    DataInit(DataDirection),
    DataRestart(DataDirection),
    DataEnable(bool),
    DataRelease,
    DataPut(u32),
    DataGet,
    DmaStart(DmaKind, u32),
    DmaAbort,
    DmaAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Idle,
    Read { next: u32, single: bool },
    Write { next: u32, single: bool },
}

enum Reply {
    None,
    Short([u32; 2]),
    Long([u32; SDIO_R2_WORDS]),
}

struct SimState {
    // Host
    cmd_frame: Vec<u32>,
    cmd_rx: VecDeque<u32>,
    cmd_resets: u32,
    data_dir: Option<DataDirection>,
    data_enabled: bool,
    pins_driven: bool,
    data_rx: VecDeque<u32>,
    data_tx: VecDeque<u32>,
    dma: Option<DmaRequest>,
    dma_complete: bool,
    now_us: u64,
    ops: Vec<SimOp>,
    exception_context: bool,
    auto_dma: bool,

    // Card
    silent: bool,
    dropped_cmd: Option<u8>,
    ignore_if_cond: u32,
    app_cmd: bool,
    op_cond_polls: u32,
    stream: Stream,
    stream_blocks: u32,
    corrupt_read_crc: Option<u32>,
    stall_data: bool,
    hold_busy: bool,
    pending_write: Option<Vec<u32>>,
    last_write_trailer: Option<u64>,
    bad_write_trailers: usize,
    sectors: BTreeMap<u32, Vec<u8>>,
    commands: Vec<u8>,
}

pub(crate) struct SimCard {
    state: RefCell<SimState>,
}

impl SimCard {
    pub fn new() -> SimCard {
        SimCard {
            state: RefCell::new(SimState {
                cmd_frame: Vec::new(),
                cmd_rx: VecDeque::new(),
                cmd_resets: 0,
                data_dir: None,
                data_enabled: false,
                pins_driven: false,
                data_rx: VecDeque::new(),
                data_tx: VecDeque::new(),
                dma: None,
                dma_complete: false,
                now_us: 0,
                ops: Vec::new(),
                exception_context: false,
                auto_dma: false,
                silent: false,
                dropped_cmd: None,
                ignore_if_cond: 0,
                app_cmd: false,
                op_cond_polls: 0,
                stream: Stream::Idle,
                stream_blocks: 0,
                corrupt_read_crc: None,
                stall_data: false,
                hold_busy: false,
                pending_write: None,
                last_write_trailer: None,
                bad_write_trailers: 0,
                sectors: BTreeMap::new(),
                commands: Vec::new(),
            }),
        }
    }

    /// Pretend every driver call happens inside an exception handler.
    pub fn set_exception_context(&mut self, inside: bool) {
        self.state.get_mut().exception_context = inside;
    }

    /// Complete runnable DMA whenever the driver looks at the completion flag.
    pub fn set_auto_dma(&mut self, auto: bool) {
        self.state.get_mut().auto_dma = auto;
    }

    /// No card on the bus.
    pub fn set_silent(&mut self, silent: bool) {
        self.state.get_mut().silent = silent;
    }

    /// Leave the next `count` CMD8s unanswered.
    pub fn ignore_if_cond(&mut self, count: u32) {
        self.state.get_mut().ignore_if_cond = count;
    }

    /// Never answer `cmd`.
    pub fn drop_command(&mut self, cmd: u8) {
        self.state.get_mut().dropped_cmd = Some(cmd);
    }

    /// Flip a bit in the CRC trailer of block `block` of every read stream.
    pub fn corrupt_read_crc(&mut self, block: u32) {
        self.state.get_mut().corrupt_read_crc = Some(block);
    }

    /// Accept data commands but never move a data block.
    pub fn stall_data(&mut self, stall: bool) {
        self.state.get_mut().stall_data = stall;
    }

    /// Hold D0 low.
    pub fn hold_busy(&mut self, busy: bool) {
        self.state.get_mut().hold_busy = busy;
    }

    pub fn load_image(&mut self, first_sector: u32, image: &[u8]) {
        let sectors = &mut self.state.get_mut().sectors;
        for (i, block) in image.chunks(SDIO_BLOCK_SIZE).enumerate() {
            let mut sector = vec![0u8; SDIO_BLOCK_SIZE];
            sector[..block.len()].copy_from_slice(block);
            sectors.insert(first_sector + i as u32, sector);
        }
    }

    pub fn sector(&self, sector: u32) -> Vec<u8> {
        self.state.borrow().read_sector(sector)
    }

    /// Command indices in the order they were sent, answered or not.
    pub fn commands(&self) -> Vec<u8> {
        self.state.borrow().commands.clone()
    }

    pub fn ops(&self) -> Vec<SimOp> {
        self.state.borrow().ops.clone()
    }

    pub fn clear_ops(&mut self) {
        self.state.get_mut().ops.clear();
    }

    pub fn cmd_resets(&self) -> u32 {
        self.state.borrow().cmd_resets
    }

    pub fn dma_busy(&self) -> bool {
        self.state.borrow().dma.is_some()
    }

    pub fn data_enabled(&self) -> bool {
        self.state.borrow().data_enabled
    }

    pub fn pins_driven(&self) -> bool {
        self.state.borrow().pins_driven
    }

    pub fn bad_write_trailers(&self) -> usize {
        self.state.borrow().bad_write_trailers
    }

    pub fn last_write_trailer(&self) -> Option<u64> {
        self.state.borrow().last_write_trailer
    }

    /// Let the pending DMA transfer run to completion if the bus allows it.
    pub fn step_dma(&self) -> bool {
        self.state.borrow_mut().advance_dma()
    }
}

impl SimState {
    fn log(&mut self, op: SimOp) {
        self.ops.push(op);
    }

    fn read_sector(&self, sector: u32) -> Vec<u8> {
        self.sectors
            .get(&sector)
            .cloned()
            .unwrap_or_else(|| vec![0u8; SDIO_BLOCK_SIZE])
    }

    fn command(&mut self, word0: u32, word1: u32) {
        assert_eq!(word0 >> 24, 47, "frame bit count");
        assert_ne!(word0 & (1 << 22), 0, "transmission bit");

        let cmd = ((word0 >> 16) & 0x3F) as u8;
        let arg = ((word0 & 0xFFFF) << 16) | (word1 >> 16);
        let frame = [
            (word0 >> 16) as u8,
            (word0 >> 8) as u8,
            word0 as u8,
            (word1 >> 24) as u8,
            (word1 >> 16) as u8,
        ];
        assert_eq!(((word1 >> 8) & 0xFF) as u8, crc7(&frame) | 1, "CMD{cmd} CRC");

        self.commands.push(cmd);

        let reply_bits = word1 & 0xFF;
        if reply_bits == 0 {
            // Pushed by the state machine once the frame is out, card or not
            self.cmd_rx.push_back(0);
        }

        if self.silent || self.dropped_cmd == Some(cmd) {
            return;
        }

        let app = core::mem::take(&mut self.app_cmd);
        match self.card_reply(cmd, arg, app) {
            _ if reply_bits == 0 => {}
            Reply::None => {}
            Reply::Short(words) => self.cmd_rx.extend(words),
            Reply::Long(words) => match self.dma {
                Some(DmaRequest::CmdRx { dst, words: count }) => {
                    assert_eq!(count as usize, SDIO_R2_WORDS);
                    // SAFETY: the driver keeps the capture buffer alive until DMA is idle
                    unsafe { ptr::copy_nonoverlapping(words.as_ptr(), dst, SDIO_R2_WORDS) };
                    self.dma = None;
                    self.dma_complete = true;
                }
                _ => self.cmd_rx.extend(words),
            },
        }
    }

    fn card_reply(&mut self, cmd: u8, arg: u32, app: bool) -> Reply {
        match cmd {
            MMC_CMD_GO_IDLE_STATE => {
                self.stream = Stream::Idle;
                self.op_cond_polls = 0;
                Reply::None
            }
            SD_CMD_SEND_IF_COND if self.ignore_if_cond > 0 => {
                self.ignore_if_cond -= 1;
                Reply::None
            }
            SD_CMD_SEND_IF_COND => Reply::Short(r1_reply(cmd, arg & 0xFFF)),
            MMC_CMD_APP_CMD => {
                self.app_cmd = true;
                Reply::Short(r1_reply(cmd, STATUS_TRAN | STATUS_APP_CMD))
            }
            SD_CMD_APP_SEND_OP_COND if app => {
                // Busy on the first poll
                self.op_cond_polls += 1;
                let mut ocr = OCR_VOLTAGE_WINDOW;
                if self.op_cond_polls > 1 {
                    ocr |= (Ocr::POWER_UP_DONE | Ocr::CCS).bits();
                }
                Reply::Short(r3_reply(ocr))
            }
            MMC_CMD_ALL_SEND_CID => Reply::Long(r2_reply(&cid_payload())),
            SD_CMD_SEND_RELATIVE_ADDR => {
                Reply::Short(r1_reply(cmd, ((SIM_RCA as u32) << 16) | 0x0500))
            }
            MMC_CMD_SEND_CSD if arg >> 16 == SIM_RCA as u32 => {
                Reply::Long(r2_reply(&csd_payload()))
            }
            MMC_CMD_SEND_CSD => Reply::None,
            MMC_CMD_READ_SINGLE_BLOCK | MMC_CMD_READ_MULTIPLE_BLOCK => {
                self.stream = Stream::Read {
                    next: arg,
                    single: cmd == MMC_CMD_READ_SINGLE_BLOCK,
                };
                self.stream_blocks = 0;
                Reply::Short(r1_reply(cmd, STATUS_TRAN))
            }
            MMC_CMD_WRITE_SINGLE_BLOCK | MMC_CMD_WRITE_MULTIPLE_BLOCK => {
                self.stream = Stream::Write {
                    next: arg,
                    single: cmd == MMC_CMD_WRITE_SINGLE_BLOCK,
                };
                self.pending_write = None;
                Reply::Short(r1_reply(cmd, STATUS_TRAN))
            }
            MMC_CMD_STOP_TRANSMISSION => {
                self.stream = Stream::Idle;
                self.pending_write = None;
                Reply::Short(r1_reply(cmd, STATUS_TRAN))
            }
            MMC_CMD_SEND_STATUS => Reply::Short(r1_reply(cmd, STATUS_TRAN)),
            _ if app => Reply::Short(r1_reply(cmd, STATUS_TRAN | STATUS_APP_CMD)),
            _ => Reply::Short(r1_reply(cmd, STATUS_TRAN)),
        }
    }

    fn advance_dma(&mut self) -> bool {
        let Some(request) = self.dma else {
            return false;
        };

        match request {
            DmaRequest::DataRx { dst, words } => {
                if !self.data_enabled
                    || self.data_dir != Some(DataDirection::Receive)
                    || self.stall_data
                {
                    return false;
                }
                let Stream::Read { next, single } = self.stream else {
                    return false;
                };
                assert_eq!(words as usize, SDIO_BLOCK_WORDS);

                let block: Vec<u32> = self
                    .read_sector(next)
                    .chunks(4)
                    .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
                    .collect();
                // SAFETY: the driver keeps the block alive until the DMA completes
                unsafe { ptr::copy_nonoverlapping(block.as_ptr(), dst, SDIO_BLOCK_WORDS) };

                let mut crc = crc16_4bit(&block);
                if self.corrupt_read_crc == Some(self.stream_blocks) {
                    crc ^= 1 << 17;
                }
                self.data_rx.push_back((crc >> 32) as u32);
                self.data_rx.push_back(crc as u32);

                self.stream_blocks += 1;
                self.stream = if single {
                    Stream::Idle
                } else {
                    Stream::Read {
                        next: next + 1,
                        single,
                    }
                };
            }
            DmaRequest::DataTx { src, words } => {
                if !self.data_enabled
                    || self.data_dir != Some(DataDirection::Transmit)
                    || self.stall_data
                    || self.pending_write.is_some()
                {
                    return false;
                }
                if !matches!(self.stream, Stream::Write { .. }) {
                    return false;
                }
                assert_eq!(words as usize, SDIO_BLOCK_WORDS);

                if self.data_tx.pop_front() != Some(SDIO_TX_START_TOKEN) {
                    self.bad_write_trailers += 1;
                }
                // SAFETY: as for receive
                let block = unsafe { slice::from_raw_parts(src, SDIO_BLOCK_WORDS) };
                self.pending_write = Some(block.to_vec());
            }
            // Completes when the card answers
            DmaRequest::CmdRx { .. } => return false,
        }

        self.dma = None;
        self.dma_complete = true;
        true
    }

    // A written block is committed once its trailer and end token are through
    fn take_write_trailer(&mut self) {
        if self.pending_write.is_none() || self.data_tx.len() < 3 {
            return;
        }
        let block = self.pending_write.take().unwrap();
        let high = self.data_tx.pop_front().unwrap() as u64;
        let low = self.data_tx.pop_front().unwrap() as u64;
        let end = self.data_tx.pop_front().unwrap();

        let crc = (high << 32) | low;
        self.last_write_trailer = Some(crc);
        if end != SDIO_TX_END_TOKEN || crc != crc16_4bit(&block) {
            self.bad_write_trailers += 1;
            return;
        }

        if let Stream::Write { next, single } = self.stream {
            let data: Vec<u8> = block.iter().flat_map(|w| w.to_ne_bytes()).collect();
            self.sectors.insert(next, data);
            self.stream = if single {
                Stream::Idle
            } else {
                Stream::Write {
                    next: next + 1,
                    single,
                }
            };
        }
    }
}

impl CmdChannel for SimCard {
    fn sdmmc_cmd_put(&mut self, word: u32) {
        let state = self.state.get_mut();
        state.log(SimOp::CmdPut(word));
        state.cmd_frame.push(word);
        if state.cmd_frame.len() == 2 {
            let (word0, word1) = (state.cmd_frame[0], state.cmd_frame[1]);
            state.cmd_frame.clear();
            state.command(word0, word1);
        }
    }

    fn sdmmc_cmd_get(&mut self) -> u32 {
        let state = self.state.get_mut();
        state.log(SimOp::CmdGet);
        state.cmd_rx.pop_front().unwrap_or(0)
    }

    fn sdmmc_cmd_rx_level(&self) -> u32 {
        self.state.borrow().cmd_rx.len() as u32
    }

    fn sdmmc_cmd_tx_level(&self) -> u32 {
        self.state.borrow().cmd_frame.len() as u32
    }

    fn sdmmc_cmd_clear_fifos(&mut self) {
        let state = self.state.get_mut();
        state.log(SimOp::CmdClear);
        state.cmd_frame.clear();
        state.cmd_rx.clear();
    }

    fn sdmmc_cmd_reset(&mut self) {
        let state = self.state.get_mut();
        state.log(SimOp::CmdReset);
        state.cmd_resets += 1;
        state.cmd_frame.clear();
        state.cmd_rx.clear();
    }

    fn sdmmc_cmd_pc(&self) -> u32 {
        0
    }
}

impl DataChannel for SimCard {
    fn sdmmc_data_init(&mut self, direction: DataDirection) {
        let state = self.state.get_mut();
        state.log(SimOp::DataInit(direction));
        state.data_dir = Some(direction);
        state.data_enabled = false;
        state.pins_driven = direction == DataDirection::Transmit;
        state.data_rx.clear();
        state.data_tx.clear();
    }

    fn sdmmc_data_restart(&mut self, direction: DataDirection) {
        let state = self.state.get_mut();
        state.log(SimOp::DataRestart(direction));
        assert!(!state.data_enabled, "restart while running");
        state.data_dir = Some(direction);
    }

    fn sdmmc_data_set_enabled(&mut self, enabled: bool) {
        let state = self.state.get_mut();
        state.log(SimOp::DataEnable(enabled));
        state.data_enabled = enabled;
    }

    fn sdmmc_data_release_pins(&mut self) {
        let state = self.state.get_mut();
        state.log(SimOp::DataRelease);
        state.pins_driven = false;
    }

    fn sdmmc_data_put(&mut self, word: u32) {
        let state = self.state.get_mut();
        state.log(SimOp::DataPut(word));
        state.data_tx.push_back(word);
        state.take_write_trailer();
    }

    fn sdmmc_data_get(&mut self) -> u32 {
        let state = self.state.get_mut();
        state.log(SimOp::DataGet);
        state.data_rx.pop_front().unwrap_or(0)
    }

    fn sdmmc_data_rx_level(&self) -> u32 {
        self.state.borrow().data_rx.len() as u32
    }

    fn sdmmc_data_tx_level(&self) -> u32 {
        self.state.borrow().data_tx.len() as u32
    }

    fn sdmmc_data_tx_drained(&self) -> bool {
        let state = self.state.borrow();
        state.data_tx.is_empty() && state.pending_write.is_none()
    }

    fn sdmmc_data_line_busy(&self) -> bool {
        self.state.borrow().hold_busy
    }

    fn sdmmc_data_pc(&self) -> u32 {
        0
    }
}

impl BlockDma for SimCard {
    unsafe fn sdmmc_dma_start(&mut self, request: DmaRequest) {
        let state = self.state.get_mut();
        let op = match request {
            DmaRequest::DataRx { words, .. } => SimOp::DmaStart(DmaKind::DataRx, words),
            DmaRequest::DataTx { words, .. } => SimOp::DmaStart(DmaKind::DataTx, words),
            DmaRequest::CmdRx { words, .. } => SimOp::DmaStart(DmaKind::CmdRx, words),
        };
        state.log(op);
        assert!(state.dma.is_none(), "DMA started while busy");
        state.dma = Some(request);
    }

    fn sdmmc_dma_busy(&self) -> bool {
        self.dma_busy()
    }

    fn sdmmc_dma_abort(&mut self) {
        let state = self.state.get_mut();
        state.log(SimOp::DmaAbort);
        state.dma = None;
    }

    fn sdmmc_dma_complete(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.auto_dma {
            state.advance_dma();
        }
        state.dma_complete
    }

    fn sdmmc_dma_ack(&mut self) {
        let state = self.state.get_mut();
        state.log(SimOp::DmaAck);
        state.dma_complete = false;
    }

    fn sdmmc_dma_remaining(&self) -> u32 {
        match self.state.borrow().dma {
            Some(DmaRequest::DataRx { words, .. })
            | Some(DmaRequest::DataTx { words, .. })
            | Some(DmaRequest::CmdRx { words, .. }) => words,
            None => 0,
        }
    }
}

impl MonotonicClock for SimCard {
    fn millis(&self) -> u32 {
        let mut state = self.state.borrow_mut();
        state.now_us += CLOCK_TICK_US;
        (state.now_us / 1000) as u32
    }
}

impl Sleep for SimCard {
    fn usleep(&mut self, time_us: u32) {
        self.state.get_mut().now_us += time_us as u64;
    }
}

impl SdmmcHardware for SimCard {
    fn sdmmc_init(&mut self) -> Result<(), SdmmcError> {
        let state = self.state.get_mut();
        state.cmd_frame.clear();
        state.cmd_rx.clear();
        state.data_enabled = false;
        state.pins_driven = false;
        Ok(())
    }

    fn sdmmc_in_exception_context(&self) -> bool {
        self.state.borrow().exception_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_match_card_captures() {
        assert_eq!(r1_reply(17, 0x900), [0x1100_0009, 0x0067]);
        assert_eq!(r1_reply(8, 0x1AA), [0x0800_0001, 0xaa13]);
        assert_eq!(r1_reply(55, 0x120), [0x3700_0001, 0x2083]);
        assert_eq!(r2_reply(&cid_payload())[0] >> 24, 0x3F);
    }
}
