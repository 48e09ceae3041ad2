use core::cell::RefCell;

use critical_section::Mutex;

use super::transfer::{Transfer, TransferSession, TransferState};
use super::SdmmcError;
use crate::sdmmc_traits::SdmmcHardware;

/// The SDIO host: one bus (command state machine, data state machine, DMA channel) and
/// the single block transfer session that may be active on it.
///
/// Commands are synchronous. Block transfers are armed through [`EngineAccess`] and driven
/// to completion with the handle's `rx_poll`/`tx_poll`. Per-block progress happens in the
/// DMA completion handler, which runs either from the DMA interrupt
/// ([`SharedEngine::on_dma_irq`]) or from inside the poll call when the session was armed
/// in an exception handler.
pub struct SdioEngine<H: SdmmcHardware> {
    pub(super) hardware: H,
    pub(super) session: TransferSession,
}

impl<H: SdmmcHardware> SdioEngine<H> {
    pub const fn new(hardware: H) -> Self {
        SdioEngine {
            hardware,
            session: TransferSession::new(),
        }
    }

    /// Bring the bus up. Safe to call again, for example to recover from a removed card.
    pub fn init(&mut self) -> Result<(), SdmmcError> {
        if self.session.state() != TransferState::Idle {
            self.stop();
        }
        self.session.reset();
        self.hardware.sdmmc_init()
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    /// DMA completion handler.
    pub fn on_dma_irq(&mut self) {
        match self.session.state() {
            TransferState::Receiving => self.rx_block_complete(),
            TransferState::Transmitting => self.tx_block_complete(),
            // Response captures and aborts also raise the flag
            TransferState::Idle => self.hardware.sdmmc_dma_ack(),
        }
    }

    /// Force the engine idle: abort DMA, stop the data state machine and release the bus.
    /// A session cut short this way reports `EDATATIMEOUT` to its next poll.
    pub fn stop(&mut self) {
        self.hardware.sdmmc_dma_abort();
        self.hardware.sdmmc_dma_ack();
        self.hardware.sdmmc_data_set_enabled(false);
        self.hardware.sdmmc_data_release_pins();

        if self.session.state() != TransferState::Idle {
            self.session.aborted = true;
        }
        self.session.set_state(TransferState::Idle);
    }

    pub fn transfer_state(&self) -> TransferState {
        self.session.state()
    }

    /// Blocks fully moved by DMA in the current or last session.
    pub fn blocks_done(&self) -> u32 {
        self.session.blocks_done()
    }

    /// Checksum recorded for `block` of the current or last session: the trailer the card
    /// sent when receiving, the locally computed one when transmitting.
    pub fn block_checksum(&self, block: u32) -> Option<u64> {
        self.session.checksum(block)
    }
}

/// How a caller reaches the engine.
///
/// An engine owned by the caller hands itself out directly. [`SharedEngine`] lends its
/// engine for one step at a time, so the DMA interrupt gets in between the steps of a
/// block transfer.
pub trait EngineAccess {
    type Hardware: SdmmcHardware;

    fn with_engine<R>(&mut self, f: impl FnOnce(&mut SdioEngine<Self::Hardware>) -> R) -> R;

    /// Arm a receive session for `blocks` blocks into `buf`, then run `session` with its
    /// handle.
    ///
    /// Arm before the read command goes out, the card starts streaming right after its
    /// reply. `buf` has to be word aligned and hold at least `blocks * 512` bytes.
    /// Whatever is still in flight when `session` returns is stopped before `buf` is
    /// released.
    fn start_receive<'b, R>(
        &mut self,
        buf: &'b mut [u8],
        blocks: u32,
        session: impl FnOnce(&mut Transfer<'_, 'b, Self>) -> Result<R, SdmmcError>,
    ) -> Result<R, SdmmcError> {
        Transfer::receive(self, buf, blocks, session)
    }

    /// Arm a transmit session for `blocks` blocks out of `buf`, after the card accepted
    /// the write command. Every block checksum is computed before `session` runs.
    fn start_transmit<'b, R>(
        &mut self,
        buf: &'b [u8],
        blocks: u32,
        session: impl FnOnce(&mut Transfer<'_, 'b, Self>) -> Result<R, SdmmcError>,
    ) -> Result<R, SdmmcError> {
        Transfer::transmit(self, buf, blocks, session)
    }
}

impl<H: SdmmcHardware> EngineAccess for SdioEngine<H> {
    type Hardware = H;

    fn with_engine<R>(&mut self, f: impl FnOnce(&mut SdioEngine<H>) -> R) -> R {
        f(self)
    }
}

impl<A: EngineAccess + ?Sized> EngineAccess for &mut A {
    type Hardware = A::Hardware;

    fn with_engine<R>(&mut self, f: impl FnOnce(&mut SdioEngine<Self::Hardware>) -> R) -> R {
        (**self).with_engine(f)
    }
}

/// An engine reachable from both thread mode and the DMA interrupt.
///
/// Every access runs inside a critical section. Checksum work on the caller's buffer
/// happens outside of it.
pub struct SharedEngine<H: SdmmcHardware> {
    engine: Mutex<RefCell<SdioEngine<H>>>,
}

impl<H: SdmmcHardware> SharedEngine<H> {
    pub const fn new(engine: SdioEngine<H>) -> Self {
        SharedEngine {
            engine: Mutex::new(RefCell::new(engine)),
        }
    }

    pub fn lock<R>(&self, f: impl FnOnce(&mut SdioEngine<H>) -> R) -> R {
        critical_section::with(|cs| f(&mut *self.engine.borrow_ref_mut(cs)))
    }

    /// DMA completion interrupt entry.
    pub fn on_dma_irq(&self) {
        self.lock(SdioEngine::on_dma_irq)
    }
}

impl<H: SdmmcHardware> EngineAccess for &SharedEngine<H> {
    type Hardware = H;

    fn with_engine<R>(&mut self, f: impl FnOnce(&mut SdioEngine<H>) -> R) -> R {
        self.lock(f)
    }
}
