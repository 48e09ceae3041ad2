#![cfg_attr(not(test), no_std)] // Don't link the standard library

//! Board glue: one SDIO host on the default pins, shared between the firmware's main
//! flow and the DMA_IRQ_1 vector.
//!
//! Every engine access runs in a `critical-section` critical section, so the firmware has
//! to link an implementation of it (the RP2040 HAL or `cortex-m`'s single core one).
//!
//! ```ignore
//! #[interrupt]
//! fn DMA_IRQ_1() {
//!     sdmmc_driver::dma_irq_handler();
//! }
//!
//! let mut card = sdmmc_driver::take_sdcard().unwrap();
//! card.setup_card()?;
//! card.read_blocks(0, &mut buf, None)?;
//! ```

use core::sync::atomic::{AtomicBool, Ordering};

use sdmmc_hal::{Rp2040Sdio, SdioConfig};
use sdmmc_protocol::sdmmc::{SdioEngine, SdmmcProtocol, SharedEngine};

pub use sdmmc_hal::PioBlock;
pub use sdmmc_protocol::sdmmc::{EngineAccess, SdmmcError, Transfer, TransferState};

pub type Engine = SharedEngine<Rp2040Sdio>;
pub type Sdcard = SdmmcProtocol<&'static Engine>;

static ENGINE: Engine = SharedEngine::new(SdioEngine::new(Rp2040Sdio::new(SdioConfig::DEFAULT)));

static SESSION_TAKEN: AtomicBool = AtomicBool::new(false);

/// The card session on the default SDIO pins. Only the first call gets it.
pub fn take_sdcard() -> Option<Sdcard> {
    let taken = critical_section::with(|_| {
        let taken = SESSION_TAKEN.load(Ordering::Relaxed);
        SESSION_TAKEN.store(true, Ordering::Relaxed);
        taken
    });
    if taken {
        log::warn!("SD card session already handed out");
        return None;
    }
    Some(SdmmcProtocol::new(&ENGINE))
}

/// DMA_IRQ_1 entry. Call it from the firmware's vector for that interrupt.
pub fn dma_irq_handler() {
    ENGINE.on_dma_irq();
}
