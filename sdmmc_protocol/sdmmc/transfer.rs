//! Block transfer sessions.
//!
//! A session streams 1..=256 blocks of 512 bytes between a caller buffer and the card.
//! DMA moves one block at a time. Every block is followed on the wire by a 64-bit CRC16x4
//! trailer: on receive the data state machine leaves the card's trailer in its FIFO, on
//! transmit the completion handler appends the trailer computed ahead of time.
//!
//! A session lives exactly as long as the closure its [`Transfer`] handle is lent to, and
//! whatever is still in flight when that closure returns is stopped before the buffer
//! borrow ends.
//!
//! Checksum work runs beside the data path, on the caller's side of the engine. Received
//! blocks are verified one per poll and the rest once the last block is in. Transmit
//! checksums are all computed right after the first block starts streaming.

use core::marker::PhantomData;
use core::ptr;
use core::slice;

use super::crc::crc16_4bit;
use super::sdmmc_constant::{
    SDIO_BLOCK_SIZE, SDIO_BLOCK_WORDS, SDIO_DATA_FIFO_DEPTH, SDIO_HANDLER_MAX_SPIN,
    SDIO_MAX_BLOCKS, SDIO_TRANSFER_TIMEOUT_MS, SDIO_TX_END_TOKEN, SDIO_TX_START_TOKEN,
    SDIO_TX_TRAILER_WORDS,
};
use super::{EngineAccess, SdioEngine, SdmmcError};
use crate::sdmmc_traits::{DataDirection, DmaRequest, SdmmcHardware};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Receiving,
    Transmitting,
}

impl TransferState {
    fn active(direction: DataDirection) -> TransferState {
        match direction {
            DataDirection::Receive => TransferState::Receiving,
            DataDirection::Transmit => TransferState::Transmitting,
        }
    }
}

/// What the completion handler does after a block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum NextBlock {
    Start(u32),
    Finished,
}

/// Handle to an armed session, lent to the closure given to
/// [`EngineAccess::start_receive`] or [`EngineAccess::start_transmit`].
pub struct Transfer<'e, 'b, A: EngineAccess + ?Sized> {
    access: &'e mut A,
    direction: DataDirection,
    generation: u32,
    data: *mut u32,
    _buf: PhantomData<&'b mut [u8]>,
}

impl<'e, 'b, A: EngineAccess + ?Sized> Transfer<'e, 'b, A> {
    pub(super) fn receive<R>(
        access: &'e mut A,
        buf: &'b mut [u8],
        blocks: u32,
        session: impl FnOnce(&mut Self) -> Result<R, SdmmcError>,
    ) -> Result<R, SdmmcError> {
        check_request(buf.as_ptr() as usize, buf.len(), blocks)?;
        let data = buf.as_mut_ptr().cast::<u32>();

        let generation = access.with_engine(|engine| engine.arm_receive(data, blocks))?;

        let mut transfer = Transfer {
            access,
            direction: DataDirection::Receive,
            generation,
            data,
            _buf: PhantomData,
        };
        session(&mut transfer)
    }

    pub(super) fn transmit<R>(
        access: &'e mut A,
        buf: &'b [u8],
        blocks: u32,
        session: impl FnOnce(&mut Self) -> Result<R, SdmmcError>,
    ) -> Result<R, SdmmcError> {
        check_request(buf.as_ptr() as usize, buf.len(), blocks)?;
        // The buffer is only ever read through this pointer
        let data = buf.as_ptr().cast_mut().cast::<u32>();

        // Block 0's trailer is due as soon as its DMA drains
        // SAFETY: block 0 lies inside `buf`, which nothing writes during the session
        let first = crc16_4bit(unsafe { block_words(data, 0) });
        let generation =
            access.with_engine(|engine| engine.arm_transmit(data, blocks, first))?;

        let mut transfer = Transfer {
            access,
            direction: DataDirection::Transmit,
            generation,
            data,
            _buf: PhantomData,
        };
        while transfer.checksum_next() {}
        session(&mut transfer)
    }

    pub fn direction(&self) -> DataDirection {
        self.direction
    }

    /// Send an R1 command with the session armed. A receive is started this way, with
    /// its read command.
    pub fn command_r1(&mut self, cmdidx: u8, arg: u32) -> Result<u32, SdmmcError> {
        self.access
            .with_engine(|engine| engine.command_r1(cmdidx, arg))
    }

    /// Progress of a receive session. `bytes` is set to the count of bytes received so far.
    ///
    /// `EBUSY` while blocks are still coming in, then exactly one terminal status: `Ok`,
    /// `EDATACRC` if any block failed verification, or `EDATATIMEOUT`. `EINVAL` after
    /// that, or once another session has been armed on the engine.
    pub fn rx_poll(&mut self, bytes: Option<&mut u32>) -> Result<(), SdmmcError> {
        let generation = self.generation;
        let all_in = self
            .access
            .with_engine(|engine| engine.rx_progress(generation, bytes))?;

        if !all_in {
            self.verify_next();
            return Err(SdmmcError::EBUSY);
        }

        while self.verify_next() {}
        self.access
            .with_engine(|engine| engine.rx_settle(generation))
    }

    /// Progress of a transmit session. `bytes` is set to the count of bytes handed to the
    /// bus so far. `Ok` once the last trailer has left the data FIFO.
    pub fn tx_poll(&mut self, bytes: Option<&mut u32>) -> Result<(), SdmmcError> {
        let generation = self.generation;
        let drained = self
            .access
            .with_engine(|engine| engine.tx_progress(generation, bytes))?;

        if drained {
            return Ok(());
        }
        self.checksum_next();
        Err(SdmmcError::EBUSY)
    }

    #[cfg(test)]
    pub(super) fn engine(&mut self) -> &mut A {
        &mut *self.access
    }

    fn verify_next(&mut self) -> bool {
        let generation = self.generation;
        let Some(block) = self
            .access
            .with_engine(|engine| engine.rx_unverified(generation))
        else {
            return false;
        };

        // SAFETY: DMA is done with every block below blocks_done
        let crc = crc16_4bit(unsafe { block_words(self.data, block) });
        self.access
            .with_engine(|engine| engine.rx_record(generation, block, crc));
        true
    }

    fn checksum_next(&mut self) -> bool {
        let generation = self.generation;
        let Some(block) = self
            .access
            .with_engine(|engine| engine.tx_unchecksummed(generation))
        else {
            return false;
        };

        // SAFETY: block is in range and transmit DMA only reads the buffer
        let crc = crc16_4bit(unsafe { block_words(self.data, block) });
        self.access
            .with_engine(|engine| engine.tx_record(generation, block, crc));
        true
    }
}

impl<'e, 'b, A: EngineAccess + ?Sized> Drop for Transfer<'e, 'b, A> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.access
            .with_engine(|engine| engine.release(generation));
    }
}

fn check_request(addr: usize, len: usize, blocks: u32) -> Result<(), SdmmcError> {
    if blocks == 0 || blocks as usize > SDIO_MAX_BLOCKS {
        return Err(SdmmcError::EINVAL);
    }
    if addr % 4 != 0 || len < blocks as usize * SDIO_BLOCK_SIZE {
        return Err(SdmmcError::EINVAL);
    }
    Ok(())
}

/// # Safety
/// `block` must lie inside the buffer at `data` and DMA must not be writing it.
unsafe fn block_words<'a>(data: *const u32, block: u32) -> &'a [u32] {
    slice::from_raw_parts(data.add(block as usize * SDIO_BLOCK_WORDS), SDIO_BLOCK_WORDS)
}

/// The single session of an engine.
///
/// `checksums[i]` belongs to the completion handler while block `i` is on the bus and to
/// the polling side after.
pub(super) struct TransferSession {
    state: TransferState,
    blocks_done: u32,
    pub(super) direction: DataDirection,
    pub(super) total_blocks: u32,
    pub(super) blocks_checksummed: u32,
    pub(super) checksum_errors: u32,
    pub(super) checksums: [u64; SDIO_MAX_BLOCKS],
    data_buf: *mut u32,
    pub(super) start_time: u32,
    // Armed inside an exception handler: the completion interrupt cannot be taken, so the
    // poll call runs the handler itself
    pub(super) polling_only: bool,
    // A terminal status has not been reported yet
    pub(super) armed: bool,
    // Cut short by `stop` or a timeout
    pub(super) aborted: bool,
    // Stamped on every arm, a handle only reaches the session it armed
    generation: u32,
}

// SAFETY: `data_buf` is only followed while the `Transfer` borrowing its buffer is alive,
// from whichever context runs the completion handler
unsafe impl Send for TransferSession {}

impl TransferSession {
    pub(super) const fn new() -> Self {
        TransferSession {
            state: TransferState::Idle,
            blocks_done: 0,
            direction: DataDirection::Receive,
            total_blocks: 0,
            blocks_checksummed: 0,
            checksum_errors: 0,
            checksums: [0; SDIO_MAX_BLOCKS],
            data_buf: ptr::null_mut(),
            start_time: 0,
            polling_only: false,
            armed: false,
            aborted: false,
            generation: 0,
        }
    }

    pub(super) fn reset(&mut self) {
        let generation = self.generation;
        *self = TransferSession::new();
        self.generation = generation;
    }

    pub(super) fn state(&self) -> TransferState {
        self.state
    }

    pub(super) fn set_state(&mut self, state: TransferState) {
        self.state = state;
    }

    pub(super) fn blocks_done(&self) -> u32 {
        self.blocks_done
    }

    pub(super) fn checksum(&self, block: u32) -> Option<u64> {
        let recorded = match self.direction {
            DataDirection::Receive => self.blocks_done,
            DataDirection::Transmit => self.blocks_checksummed,
        };
        (block < recorded).then(|| self.checksums[block as usize])
    }

    fn owned_by(&self, generation: u32, direction: DataDirection) -> bool {
        self.armed && self.generation == generation && self.direction == direction
    }

    fn arm(
        &mut self,
        direction: DataDirection,
        data_buf: *mut u32,
        blocks: u32,
        now: u32,
        polling_only: bool,
    ) -> u32 {
        self.generation = self.generation.wrapping_add(1);
        self.direction = direction;
        self.total_blocks = blocks;
        self.blocks_checksummed = 0;
        self.checksum_errors = 0;
        self.blocks_done = 0;
        self.data_buf = data_buf;
        self.start_time = now;
        self.polling_only = polling_only;
        self.armed = true;
        self.aborted = false;
        self.state = TransferState::active(direction);
        self.generation
    }

    /// Record the end of the block currently on the bus.
    ///
    /// `checksum` is the trailer the card sent for it, if any. Once the last block is in
    /// the session drops to `Idle`. Calls beyond the last block change nothing.
    pub(super) fn complete_block(&mut self, checksum: Option<u64>) -> NextBlock {
        let done = self.blocks_done;
        if done >= self.total_blocks {
            return NextBlock::Finished;
        }

        if let Some(checksum) = checksum {
            self.checksums[done as usize] = checksum;
        }

        let done = done + 1;
        self.blocks_done = done;

        if done < self.total_blocks {
            NextBlock::Start(done)
        } else {
            self.state = TransferState::Idle;
            NextBlock::Finished
        }
    }

    fn block_ptr(&self, block: u32) -> *mut u32 {
        self.data_buf
            .wrapping_add(block as usize * SDIO_BLOCK_WORDS)
    }
}

impl<H: SdmmcHardware> SdioEngine<H> {
    fn check_idle(&self) -> Result<(), SdmmcError> {
        if self.session.state() != TransferState::Idle {
            log::debug!("transfer armed while {:?}", self.session.state());
            return Err(SdmmcError::EINVAL);
        }
        Ok(())
    }

    fn arm_receive(&mut self, data: *mut u32, blocks: u32) -> Result<u32, SdmmcError> {
        self.check_idle()?;

        let polling_only = self.hardware.sdmmc_in_exception_context();
        let now = self.hardware.millis();

        // Drop a completion left over from a response capture
        self.hardware.sdmmc_dma_ack();

        let generation =
            self.session
                .arm(DataDirection::Receive, data, blocks, now, polling_only);

        self.hardware.sdmmc_data_init(DataDirection::Receive);
        self.rx_start_block(0);
        Ok(generation)
    }

    fn arm_transmit(
        &mut self,
        data: *mut u32,
        blocks: u32,
        first_checksum: u64,
    ) -> Result<u32, SdmmcError> {
        self.check_idle()?;

        let polling_only = self.hardware.sdmmc_in_exception_context();
        let now = self.hardware.millis();

        self.hardware.sdmmc_dma_ack();

        let generation =
            self.session
                .arm(DataDirection::Transmit, data, blocks, now, polling_only);
        self.session.checksums[0] = first_checksum;
        self.session.blocks_checksummed = 1;

        self.hardware.sdmmc_data_init(DataDirection::Transmit);
        self.tx_queue_block(0);
        self.hardware.sdmmc_data_set_enabled(true);
        Ok(generation)
    }

    // The handle of session `generation` is going away
    fn release(&mut self, generation: u32) {
        if self.session.generation != generation {
            return;
        }
        if self.session.armed {
            self.stop();
            self.session.armed = false;
        }
        self.session.data_buf = ptr::null_mut();
    }

    // Common head of both polls: check the session is still the caller's, run the
    // completion handler if this session has to do it by hand, report progress.
    fn poll_dispatch(
        &mut self,
        generation: u32,
        direction: DataDirection,
        bytes: Option<&mut u32>,
    ) -> Result<TransferState, SdmmcError> {
        if !self.session.owned_by(generation, direction) {
            return Err(SdmmcError::EINVAL);
        }

        if self.session.polling_only
            && self.session.state() == TransferState::active(direction)
            && self.hardware.sdmmc_dma_complete()
        {
            self.on_dma_irq();
        }

        if let Some(bytes) = bytes {
            *bytes = self.session.blocks_done() * SDIO_BLOCK_SIZE as u32;
        }

        Ok(self.session.state())
    }

    // `Ok(true)` once every block is in
    fn rx_progress(
        &mut self,
        generation: u32,
        bytes: Option<&mut u32>,
    ) -> Result<bool, SdmmcError> {
        let state = self.poll_dispatch(generation, DataDirection::Receive, bytes)?;

        if state == TransferState::Idle {
            if self.session.aborted {
                self.session.armed = false;
                return Err(SdmmcError::EDATATIMEOUT);
            }
            return Ok(true);
        }

        if self
            .hardware
            .timed_out(self.session.start_time, SDIO_TRANSFER_TIMEOUT_MS)
        {
            return Err(self.transfer_timeout());
        }
        Ok(false)
    }

    fn rx_settle(&mut self, generation: u32) -> Result<(), SdmmcError> {
        if !self.session.owned_by(generation, DataDirection::Receive) {
            return Err(SdmmcError::EINVAL);
        }
        self.session.armed = false;

        if self.session.checksum_errors != 0 {
            log::debug!(
                "{} of {} blocks failed CRC",
                self.session.checksum_errors,
                self.session.total_blocks
            );
            return Err(SdmmcError::EDATACRC);
        }
        Ok(())
    }

    fn rx_unverified(&self, generation: u32) -> Option<u32> {
        let block = self.session.blocks_checksummed;
        (self.session.owned_by(generation, DataDirection::Receive)
            && block < self.session.blocks_done())
        .then_some(block)
    }

    fn rx_record(&mut self, generation: u32, block: u32, crc: u64) {
        if !self.session.owned_by(generation, DataDirection::Receive)
            || block != self.session.blocks_checksummed
        {
            return;
        }

        let expected = self.session.checksums[block as usize];
        if crc != expected {
            if self.session.checksum_errors == 0 {
                log::warn!(
                    "block {} CRC mismatch, calculated {:#018x} card sent {:#018x}",
                    block,
                    crc,
                    expected
                );
            }
            self.session.checksum_errors += 1;
        }
        self.session.blocks_checksummed += 1;
    }

    // `Ok(true)` once the last trailer has left the data FIFO
    fn tx_progress(
        &mut self,
        generation: u32,
        bytes: Option<&mut u32>,
    ) -> Result<bool, SdmmcError> {
        let state = self.poll_dispatch(generation, DataDirection::Transmit, bytes)?;

        if state == TransferState::Idle {
            if self.session.aborted {
                self.session.armed = false;
                return Err(SdmmcError::EDATATIMEOUT);
            }

            if self.hardware.sdmmc_data_tx_drained() {
                self.hardware.sdmmc_data_set_enabled(false);
                self.hardware.sdmmc_data_release_pins();
                self.session.armed = false;
                return Ok(true);
            }
        }

        if self
            .hardware
            .timed_out(self.session.start_time, SDIO_TRANSFER_TIMEOUT_MS)
        {
            return Err(self.transfer_timeout());
        }
        Ok(false)
    }

    fn tx_unchecksummed(&self, generation: u32) -> Option<u32> {
        let block = self.session.blocks_checksummed;
        (self.session.owned_by(generation, DataDirection::Transmit)
            && block < self.session.total_blocks)
            .then_some(block)
    }

    fn tx_record(&mut self, generation: u32, block: u32, crc: u64) {
        if self.session.owned_by(generation, DataDirection::Transmit)
            && block == self.session.blocks_checksummed
        {
            self.session.checksums[block as usize] = crc;
            self.session.blocks_checksummed += 1;
        }
    }

    fn transfer_timeout(&mut self) -> SdmmcError {
        log::debug!(
            "data timeout {:?} {}/{} blocks, PC {} RXF {} TXF {} DMA remaining {}",
            self.session.state(),
            self.session.blocks_done(),
            self.session.total_blocks,
            self.hardware.sdmmc_data_pc(),
            self.hardware.sdmmc_data_rx_level(),
            self.hardware.sdmmc_data_tx_level(),
            self.hardware.sdmmc_dma_remaining()
        );
        self.stop();
        self.session.armed = false;
        SdmmcError::EDATATIMEOUT
    }

    // Bounded busy wait on a FIFO condition inside the completion handler
    fn spin_until(&self, ready: impl Fn(&H) -> bool) -> bool {
        (0..SDIO_HANDLER_MAX_SPIN).any(|_| ready(&self.hardware))
    }

    fn rx_start_block(&mut self, block: u32) {
        self.hardware.sdmmc_data_set_enabled(false);
        self.hardware.sdmmc_data_restart(DataDirection::Receive);

        let request = DmaRequest::DataRx {
            dst: self.session.block_ptr(block),
            words: SDIO_BLOCK_WORDS as u32,
        };
        // SAFETY: the block lies inside the buffer validated at arm time, which the
        // `Transfer` handle keeps borrowed until DMA is stopped
        unsafe { self.hardware.sdmmc_dma_start(request) };

        self.hardware.sdmmc_data_set_enabled(true);
    }

    pub(super) fn rx_block_complete(&mut self) {
        self.hardware.sdmmc_dma_ack();

        // The card's trailer lands in the FIFO right behind the block
        if !self.spin_until(|hw| hw.sdmmc_data_rx_level() >= 2) {
            log::warn!(
                "block {} CRC trailer missing, RXF {}",
                self.session.blocks_done(),
                self.hardware.sdmmc_data_rx_level()
            );
        }
        let high = self.hardware.sdmmc_data_get() as u64;
        let low = self.hardware.sdmmc_data_get() as u64;

        match self.session.complete_block(Some((high << 32) | low)) {
            NextBlock::Start(block) => self.rx_start_block(block),
            NextBlock::Finished => self.hardware.sdmmc_data_set_enabled(false),
        }
    }

    fn tx_queue_block(&mut self, block: u32) {
        self.hardware.sdmmc_data_put(SDIO_TX_START_TOKEN);

        let request = DmaRequest::DataTx {
            src: self.session.block_ptr(block).cast_const(),
            words: SDIO_BLOCK_WORDS as u32,
        };
        // SAFETY: as for receive, the buffer stays borrowed for the whole session
        unsafe { self.hardware.sdmmc_dma_start(request) };
    }

    pub(super) fn tx_block_complete(&mut self) {
        self.hardware.sdmmc_dma_ack();

        let block = self.session.blocks_done();
        if block >= self.session.total_blocks {
            return;
        }

        let room = SDIO_DATA_FIFO_DEPTH - SDIO_TX_TRAILER_WORDS;
        if !self.spin_until(|hw| hw.sdmmc_data_tx_level() <= room) {
            log::warn!(
                "block {} no FIFO room for trailer, TXF {}",
                block,
                self.hardware.sdmmc_data_tx_level()
            );
        }

        let crc = self.session.checksums[block as usize];
        self.hardware.sdmmc_data_put((crc >> 32) as u32);
        self.hardware.sdmmc_data_put(crc as u32);
        self.hardware.sdmmc_data_put(SDIO_TX_END_TOKEN);

        if let NextBlock::Start(next) = self.session.complete_block(None) {
            self.tx_queue_block(next);
        }
    }
}
