#![cfg_attr(not(test), no_std)]

//! RP2040 SDIO host built from two PIO state machines and one DMA channel.
//!
//! The command state machine runs `cmd_clk` for as long as the bus is up and is the only
//! source of CLK. The data state machine is reconfigured for each transfer direction.
//! Completion of the DMA channel is signalled on DMA_IRQ_1; the firmware routes that
//! vector to the engine's interrupt entry.

mod rp2040_regs;
mod sdio_programs;

use core::sync::atomic::{AtomicBool, Ordering};

use rp2040_regs::{
    DmaChannel, DmaRegisters, PioRegisters, PioStateMachine, CTRL, DMA_CTRL, DMA_IRQ_1, FDEBUG,
    FSTAT, SM_CLKDIV, SM_EXECCTRL, SM_PINCTRL, SM_SHIFTCTRL,
};
use sdio_programs::{
    exec_jmp, exec_out_y, exec_pull, exec_set_pindirs, exec_set_pins, Placement, ProgramLayout,
    DATA_RX_NIBBLES, DATA_TX_NIBBLES, DATA_TX_OUT_SLOT, INSTRUCTION_SLOTS,
};
use sdmmc_protocol::{
    sdmmc::SdmmcError,
    sdmmc_os::{MonotonicClock, Sleep},
    sdmmc_traits::{
        BlockDma, CmdChannel, DataChannel, DataDirection, DmaRequest, SdmmcHardware,
    },
};
use tock_registers::{
    fields::FieldValue,
    interfaces::{ReadWriteable, Readable, Writeable},
};

// Only one host may own the state machines and the DMA channel.
static RESOURCES_CLAIMED: AtomicBool = AtomicBool::new(false);

const NUM_STATE_MACHINES: u8 = 4;
const NUM_DMA_CHANNELS: u8 = 12;
const NUM_GPIOS: u8 = 30;

// Lowest priority, the handler only moves trailers in and out of the FIFO
const DMA_IRQ_PRIORITY: u8 = 0xff;

// Spin budget while the stall flag of a drained transmit is re-raised
const TX_STALL_PROBES: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PioBlock {
    Pio0,
    Pio1,
}

impl PioBlock {
    const fn index(self) -> u32 {
        match self {
            PioBlock::Pio0 => 0,
            PioBlock::Pio1 => 1,
        }
    }

    const fn base(self) -> usize {
        match self {
            PioBlock::Pio0 => rp2040_regs::PIO0_BASE,
            PioBlock::Pio1 => rp2040_regs::PIO1_BASE,
        }
    }

    const fn gpio_function(self) -> u32 {
        match self {
            PioBlock::Pio0 => rp2040_regs::GPIO_FUNC_PIO0,
            PioBlock::Pio1 => rp2040_regs::GPIO_FUNC_PIO1,
        }
    }

    const fn reset_mask(self) -> u32 {
        match self {
            PioBlock::Pio0 => rp2040_regs::RESET_PIO0,
            PioBlock::Pio1 => rp2040_regs::RESET_PIO1,
        }
    }
}

/// Bus resources and pins of one SDIO host. D0..D3 are four consecutive GPIOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdioConfig {
    pub pio: PioBlock,
    pub cmd_sm: u8,
    pub data_sm: u8,
    pub dma_channel: u8,
    pub clk_pin: u8,
    pub cmd_pin: u8,
    pub d0_pin: u8,
    /// PIO clock divider. Each SD clock takes 5 PIO cycles.
    pub clk_div: u16,
}

impl SdioConfig {
    pub const DEFAULT: SdioConfig = SdioConfig {
        pio: PioBlock::Pio1,
        cmd_sm: 0,
        data_sm: 1,
        dma_channel: 1,
        clk_pin: 18,
        cmd_pin: 19,
        d0_pin: 20,
        clk_div: 5,
    };

    pub const fn with_pio(mut self, pio: PioBlock) -> Self {
        self.pio = pio;
        self
    }

    pub const fn with_state_machines(mut self, cmd_sm: u8, data_sm: u8) -> Self {
        self.cmd_sm = cmd_sm;
        self.data_sm = data_sm;
        self
    }

    pub const fn with_dma_channel(mut self, channel: u8) -> Self {
        self.dma_channel = channel;
        self
    }

    pub const fn with_pins(mut self, clk_pin: u8, cmd_pin: u8, d0_pin: u8) -> Self {
        self.clk_pin = clk_pin;
        self.cmd_pin = cmd_pin;
        self.d0_pin = d0_pin;
        self
    }

    pub const fn with_clk_div(mut self, clk_div: u16) -> Self {
        self.clk_div = clk_div;
        self
    }

    fn validate(&self) -> Result<(), SdmmcError> {
        let data_pins = self.d0_pin..self.d0_pin.saturating_add(4);
        let valid = self.cmd_sm < NUM_STATE_MACHINES
            && self.data_sm < NUM_STATE_MACHINES
            && self.cmd_sm != self.data_sm
            && self.dma_channel < NUM_DMA_CHANNELS
            && self.clk_pin < NUM_GPIOS
            && self.cmd_pin < NUM_GPIOS
            && data_pins.end <= NUM_GPIOS
            && self.clk_pin != self.cmd_pin
            && !data_pins.contains(&self.clk_pin)
            && !data_pins.contains(&self.cmd_pin)
            && self.clk_div != 0;

        if valid {
            Ok(())
        } else {
            log::warn!("invalid SDIO configuration {:?}", self);
            Err(SdmmcError::EINVAL)
        }
    }

    /// DMA request line pacing transfers to or from the FIFO of `sm`.
    fn dreq(&self, sm: u8, rx: bool) -> u32 {
        let fifo = if rx { 4 } else { 0 };
        self.pio.index() * 8 + fifo + sm as u32
    }

    fn dma_bit(&self) -> u32 {
        1 << self.dma_channel
    }
}

impl Default for SdioConfig {
    fn default() -> Self {
        SdioConfig::DEFAULT
    }
}

/// Register values for one state machine, applied as a whole.
#[derive(Clone, Copy)]
struct SmConfig {
    clkdiv: FieldValue<u32, SM_CLKDIV::Register>,
    execctrl: FieldValue<u32, SM_EXECCTRL::Register>,
    shiftctrl: FieldValue<u32, SM_SHIFTCTRL::Register>,
    pinctrl: FieldValue<u32, SM_PINCTRL::Register>,
}

pub struct Rp2040Sdio {
    config: SdioConfig,
    layout: ProgramLayout,
    claimed: bool,
    // Program the data state machine was last set up for
    data_direction: DataDirection,
}

impl Rp2040Sdio {
    /// No hardware is touched until `sdmmc_init`.
    pub const fn new(config: SdioConfig) -> Self {
        Rp2040Sdio {
            config,
            layout: ProgramLayout::empty(),
            claimed: false,
            data_direction: DataDirection::Receive,
        }
    }

    pub fn config(&self) -> &SdioConfig {
        &self.config
    }

    fn pio(&self) -> &'static PioRegisters {
        // SAFETY: `base()` is one of the two fixed RP2040 PIO block addresses
        unsafe { PioRegisters::new(self.config.pio.base()) }
    }

    fn dma(&self) -> &'static DmaRegisters {
        // SAFETY: DMA_BASE is the fixed address of the RP2040 DMA block
        unsafe { DmaRegisters::new(rp2040_regs::DMA_BASE) }
    }

    fn channel(&self) -> &'static DmaChannel {
        &self.dma().ch[self.config.dma_channel as usize]
    }

    fn sm(&self, sm: u8) -> &'static PioStateMachine {
        &self.pio().sm[sm as usize]
    }

    fn exec(&self, sm: u8, instruction: u16) {
        self.sm(sm).instr.set(instruction as u32);
    }

    fn set_sm_enabled(&self, sm: u8, enabled: bool) {
        let mask = 1u32 << sm;
        let current = self.pio().ctrl.read(CTRL::SM_ENABLE);
        let next = if enabled {
            current | mask
        } else {
            current & !mask
        };
        self.pio().ctrl.modify(CTRL::SM_ENABLE.val(next));
    }

    // Flip the join twice, which empties both FIFOs whatever the join setting is
    fn clear_fifos(&self, sm: u8) {
        let shiftctrl = &self.sm(sm).shiftctrl;
        let joined = shiftctrl.is_set(SM_SHIFTCTRL::FJOIN_RX);
        shiftctrl.modify(SM_SHIFTCTRL::FJOIN_RX.val(!joined as u32));
        shiftctrl.modify(SM_SHIFTCTRL::FJOIN_RX.val(joined as u32));
    }

    fn restart_sm(&self, sm: u8) {
        let mask = 1u32 << sm;
        // Both restart bits self clear
        self.pio()
            .ctrl
            .modify(CTRL::SM_RESTART.val(mask) + CTRL::CLKDIV_RESTART.val(mask));
    }

    /// Disable `sm`, load `config` and leave it parked at `entry`.
    fn init_sm(&self, sm: u8, config: &SmConfig, entry: u8) {
        self.set_sm_enabled(sm, false);

        let regs = self.sm(sm);
        regs.clkdiv.write(config.clkdiv);
        regs.execctrl.write(config.execctrl);
        regs.shiftctrl.write(config.shiftctrl);
        regs.pinctrl.write(config.pinctrl);

        self.clear_fifos(sm);
        let stalls = FDEBUG::RXSTALL.val(1 << sm)
            + FDEBUG::RXUNDER.val(1 << sm)
            + FDEBUG::TXOVER.val(1 << sm)
            + FDEBUG::TXSTALL.val(1 << sm);
        self.pio().fdebug.write(stalls);

        self.restart_sm(sm);
        self.exec(sm, exec_jmp(entry));
    }

    /// Point the SET pins of `sm` at `base..base + count`, force `pindirs` and put
    /// the pin mapping back.
    fn set_pindirs(&self, sm: u8, base: u8, count: u8, outputs: bool) {
        let pinctrl = &self.sm(sm).pinctrl;
        let saved = pinctrl.get();
        pinctrl.write(SM_PINCTRL::SET_BASE.val(base as u32) + SM_PINCTRL::SET_COUNT.val(count as u32));
        let bits = if outputs { (1u8 << count) - 1 } else { 0 };
        self.exec(sm, exec_set_pindirs(bits));
        pinctrl.set(saved);
    }

    fn clkdiv(&self) -> FieldValue<u32, SM_CLKDIV::Register> {
        SM_CLKDIV::INT.val(self.config.clk_div as u32) + SM_CLKDIV::FRAC.val(0)
    }

    fn wrap(placement: &Placement) -> FieldValue<u32, SM_EXECCTRL::Register> {
        SM_EXECCTRL::WRAP_TOP.val(placement.wrap_top as u32)
            + SM_EXECCTRL::WRAP_BOTTOM.val(placement.wrap_bottom as u32)
    }

    fn cmd_sm_config(&self) -> SmConfig {
        let cmd = self.config.cmd_pin as u32;
        SmConfig {
            clkdiv: self.clkdiv(),
            // `mov y, !status` is zero until both frame words are queued
            execctrl: Self::wrap(&self.layout.cmd_clk)
                + SM_EXECCTRL::JMP_PIN.val(cmd)
                + SM_EXECCTRL::STATUS_SEL::TxLevel
                + SM_EXECCTRL::STATUS_N.val(2),
            shiftctrl: SM_SHIFTCTRL::OUT_SHIFTDIR::Left
                + SM_SHIFTCTRL::IN_SHIFTDIR::Left
                + SM_SHIFTCTRL::AUTOPULL::SET
                + SM_SHIFTCTRL::AUTOPUSH::SET
                + SM_SHIFTCTRL::PULL_THRESH.val(0)
                + SM_SHIFTCTRL::PUSH_THRESH.val(0),
            pinctrl: SM_PINCTRL::OUT_BASE.val(cmd)
                + SM_PINCTRL::OUT_COUNT.val(1)
                + SM_PINCTRL::SET_BASE.val(cmd)
                + SM_PINCTRL::SET_COUNT.val(1)
                + SM_PINCTRL::IN_BASE.val(cmd)
                + SM_PINCTRL::SIDESET_BASE.val(self.config.clk_pin as u32)
                + SM_PINCTRL::SIDESET_COUNT.val(1),
        }
    }

    /// Data state machine setup for `direction`. `joined` selects the deep FIFO
    /// used while streaming; the unjoined form is needed to preload Y.
    fn data_sm_config(&self, direction: DataDirection, joined: bool) -> SmConfig {
        let d0 = self.config.d0_pin as u32;
        let pins = SM_PINCTRL::SET_BASE.val(d0)
            + SM_PINCTRL::SET_COUNT.val(4)
            + SM_PINCTRL::IN_BASE.val(d0);

        match direction {
            DataDirection::Receive => SmConfig {
                clkdiv: self.clkdiv(),
                execctrl: Self::wrap(&self.layout.data_rx),
                shiftctrl: SM_SHIFTCTRL::IN_SHIFTDIR::Left
                    + SM_SHIFTCTRL::OUT_SHIFTDIR::Left
                    + SM_SHIFTCTRL::AUTOPUSH::SET
                    + SM_SHIFTCTRL::PUSH_THRESH.val(0)
                    + SM_SHIFTCTRL::FJOIN_RX.val(joined as u32),
                pinctrl: pins,
            },
            DataDirection::Transmit => SmConfig {
                clkdiv: self.clkdiv(),
                execctrl: Self::wrap(&self.layout.data_tx),
                shiftctrl: SM_SHIFTCTRL::OUT_SHIFTDIR::Left
                    + SM_SHIFTCTRL::IN_SHIFTDIR::Left
                    + SM_SHIFTCTRL::AUTOPULL::SET
                    + SM_SHIFTCTRL::PULL_THRESH.val(0)
                    + SM_SHIFTCTRL::FJOIN_TX.val(joined as u32),
                pinctrl: pins + SM_PINCTRL::OUT_BASE.val(d0) + SM_PINCTRL::OUT_COUNT.val(4),
            },
        }
    }

    fn data_entry(&self, direction: DataDirection) -> u8 {
        match direction {
            DataDirection::Receive => self.layout.data_rx.offset,
            DataDirection::Transmit => self.layout.data_tx.offset,
        }
    }

    // Raw SM_ADDR of the data state machine, relative to the program it is running
    fn data_pc_of(&self, addr: u32) -> u32 {
        addr.wrapping_sub(self.data_entry(self.data_direction) as u32)
    }

    fn claim_resources(&mut self) -> Result<(), SdmmcError> {
        if self.claimed {
            return Ok(());
        }
        // Single core bring-up, a load/store pair is enough
        if RESOURCES_CLAIMED.load(Ordering::Acquire) {
            log::warn!("SDIO state machines and DMA channel are owned by another host");
            return Err(SdmmcError::EINVAL);
        }
        RESOURCES_CLAIMED.store(true, Ordering::Release);
        self.claimed = true;

        rp2040_regs::unreset_blocks(
            self.config.pio.reset_mask()
                | rp2040_regs::RESET_DMA
                | rp2040_regs::RESET_IO_BANK0
                | rp2040_regs::RESET_PADS_BANK0
                | rp2040_regs::RESET_TIMER,
        );
        Ok(())
    }

    fn load_programs(&mut self) -> Result<(), SdmmcError> {
        let pio = self.pio();
        for slot in pio.instr_mem.iter().take(INSTRUCTION_SLOTS) {
            slot.set(0);
        }
        self.layout = sdio_programs::load(self.config.clk_pin, |slot, word| {
            pio.instr_mem[slot].set(word as u32)
        })?;
        Ok(())
    }

    fn route_pins(&self) {
        let function = self.config.pio.gpio_function();
        let config = &self.config;

        rp2040_regs::pad_configure(config.clk_pin, false);
        rp2040_regs::gpio_set_function(config.clk_pin, function);
        for pin in core::iter::once(config.cmd_pin).chain(config.d0_pin..config.d0_pin + 4) {
            rp2040_regs::pad_configure(pin, true);
            rp2040_regs::gpio_set_function(pin, function);
        }
    }

    fn setup_dma_irq(&self) {
        let dma = self.dma();
        let bit = self.config.dma_bit();
        dma.ints1.set(bit);
        dma.inte1.set(dma.inte1.get() | bit);
        rp2040_regs::nvic_enable(DMA_IRQ_1, DMA_IRQ_PRIORITY);
    }
}

impl SdmmcHardware for Rp2040Sdio {
    fn sdmmc_init(&mut self) -> Result<(), SdmmcError> {
        self.config.validate()?;
        self.claim_resources()?;

        let cmd_sm = self.config.cmd_sm;
        let data_sm = self.config.data_sm;
        self.set_sm_enabled(cmd_sm, false);
        self.set_sm_enabled(data_sm, false);
        self.sdmmc_dma_abort();

        self.load_programs()?;

        let cmd_config = self.cmd_sm_config();
        self.init_sm(cmd_sm, &cmd_config, self.layout.cmd_clk.offset);
        self.set_pindirs(cmd_sm, self.config.clk_pin, 1, true);
        self.set_sm_enabled(cmd_sm, true);

        self.sdmmc_data_init(DataDirection::Receive);

        // CLK is driven by this PIO block, sampling it unsynchronized is safe
        let pio = self.pio();
        pio.input_sync_bypass
            .set(pio.input_sync_bypass.get() | 1 << self.config.clk_pin);

        self.route_pins();
        self.setup_dma_irq();

        log::debug!(
            "SDIO up on PIO{} SM{}/{} DMA{}, CLK {} CMD {} D0 {}",
            self.config.pio.index(),
            cmd_sm,
            data_sm,
            self.config.dma_channel,
            self.config.clk_pin,
            self.config.cmd_pin,
            self.config.d0_pin
        );
        Ok(())
    }

    fn sdmmc_in_exception_context(&self) -> bool {
        rp2040_regs::in_exception_context()
    }
}

impl CmdChannel for Rp2040Sdio {
    fn sdmmc_cmd_put(&mut self, word: u32) {
        self.pio().txf[self.config.cmd_sm as usize].set(word);
    }

    fn sdmmc_cmd_get(&mut self) -> u32 {
        self.pio().rxf[self.config.cmd_sm as usize].get()
    }

    fn sdmmc_cmd_rx_level(&self) -> u32 {
        fifo_level(self.pio().flevel.get(), self.config.cmd_sm, true)
    }

    fn sdmmc_cmd_tx_level(&self) -> u32 {
        fifo_level(self.pio().flevel.get(), self.config.cmd_sm, false)
    }

    fn sdmmc_cmd_clear_fifos(&mut self) {
        self.clear_fifos(self.config.cmd_sm);
    }

    fn sdmmc_cmd_reset(&mut self) {
        self.clear_fifos(self.config.cmd_sm);
        self.exec(self.config.cmd_sm, exec_jmp(self.layout.cmd_clk.offset));
    }

    fn sdmmc_cmd_pc(&self) -> u32 {
        self.sm(self.config.cmd_sm)
            .addr
            .get()
            .wrapping_sub(self.layout.cmd_clk.offset as u32)
    }
}

impl DataChannel for Rp2040Sdio {
    fn sdmmc_data_init(&mut self, direction: DataDirection) {
        let sm = self.config.data_sm;
        let entry = self.data_entry(direction);
        self.data_direction = direction;

        // Y is loaded through the TX FIFO, which a receive join would hide
        let unjoined = self.data_sm_config(direction, false);
        self.init_sm(sm, &unjoined, entry);
        let nibbles = match direction {
            DataDirection::Receive => DATA_RX_NIBBLES,
            DataDirection::Transmit => DATA_TX_NIBBLES,
        };
        self.pio().txf[sm as usize].set(nibbles - 1);
        self.exec(sm, exec_pull());
        self.exec(sm, exec_out_y());

        // Changing the join empties both FIFOs
        let joined = self.data_sm_config(direction, true);
        self.sm(sm).shiftctrl.write(joined.shiftctrl);
        self.exec(sm, exec_jmp(entry));

        match direction {
            DataDirection::Receive => self.exec(sm, exec_set_pindirs(0)),
            DataDirection::Transmit => {
                // Idle high before the lines are driven
                self.exec(sm, exec_set_pins(0xf));
                self.exec(sm, exec_set_pindirs(0xf));
            }
        }
    }

    fn sdmmc_data_restart(&mut self, direction: DataDirection) {
        let sm = self.config.data_sm;
        self.data_direction = direction;
        self.restart_sm(sm);
        self.exec(sm, exec_jmp(self.data_entry(direction)));
    }

    fn sdmmc_data_set_enabled(&mut self, enabled: bool) {
        self.set_sm_enabled(self.config.data_sm, enabled);
    }

    fn sdmmc_data_release_pins(&mut self) {
        self.set_pindirs(self.config.data_sm, self.config.d0_pin, 4, false);
    }

    fn sdmmc_data_put(&mut self, word: u32) {
        self.pio().txf[self.config.data_sm as usize].set(word);
    }

    fn sdmmc_data_get(&mut self) -> u32 {
        self.pio().rxf[self.config.data_sm as usize].get()
    }

    fn sdmmc_data_rx_level(&self) -> u32 {
        fifo_level(self.pio().flevel.get(), self.config.data_sm, true)
    }

    fn sdmmc_data_tx_level(&self) -> u32 {
        fifo_level(self.pio().flevel.get(), self.config.data_sm, false)
    }

    fn sdmmc_data_tx_drained(&self) -> bool {
        let sm = self.config.data_sm;
        let pio = self.pio();
        let stall_slot = self.layout.data_tx.slot(DATA_TX_OUT_SLOT) as u32;

        let empty = pio.fstat.read(FSTAT::TXEMPTY) & (1 << sm) != 0;
        if !empty || self.sm(sm).addr.get() != stall_slot {
            return false;
        }

        // The stall flag is sticky and may be left over from an earlier block. Clear it
        // and see whether the state machine raises it again.
        pio.fdebug.write(FDEBUG::TXSTALL.val(1 << sm));
        (0..TX_STALL_PROBES).any(|_| pio.fdebug.read(FDEBUG::TXSTALL) & (1 << sm) != 0)
            && self.sm(sm).addr.get() == stall_slot
    }

    fn sdmmc_data_line_busy(&self) -> bool {
        !rp2040_regs::gpio_in(self.config.d0_pin)
    }

    fn sdmmc_data_pc(&self) -> u32 {
        self.data_pc_of(self.sm(self.config.data_sm).addr.get())
    }
}

impl BlockDma for Rp2040Sdio {
    unsafe fn sdmmc_dma_start(&mut self, request: DmaRequest) {
        let pio = self.pio();
        let data_sm = self.config.data_sm;
        let cmd_sm = self.config.cmd_sm;

        let (read, write, words, treq, swap, incr_read, incr_write) = match request {
            DmaRequest::DataRx { dst, words } => (
                &pio.rxf[data_sm as usize] as *const _ as usize,
                dst as usize,
                words,
                self.config.dreq(data_sm, true),
                true,
                false,
                true,
            ),
            DmaRequest::DataTx { src, words } => (
                src as usize,
                &pio.txf[data_sm as usize] as *const _ as usize,
                words,
                self.config.dreq(data_sm, false),
                true,
                true,
                false,
            ),
            DmaRequest::CmdRx { dst, words } => (
                &pio.rxf[cmd_sm as usize] as *const _ as usize,
                dst as usize,
                words,
                self.config.dreq(cmd_sm, true),
                false,
                false,
                true,
            ),
        };

        let channel = self.channel();
        channel.read_addr.set(read as u32);
        channel.write_addr.set(write as u32);
        channel.trans_count.set(words);
        // Chaining to itself means no chaining
        channel.ctrl_trig.write(
            DMA_CTRL::EN::SET
                + DMA_CTRL::DATA_SIZE::Word
                + DMA_CTRL::INCR_READ.val(incr_read as u32)
                + DMA_CTRL::INCR_WRITE.val(incr_write as u32)
                + DMA_CTRL::CHAIN_TO.val(self.config.dma_channel as u32)
                + DMA_CTRL::TREQ_SEL.val(treq)
                + DMA_CTRL::BSWAP.val(swap as u32),
        );
    }

    fn sdmmc_dma_busy(&self) -> bool {
        self.channel().ctrl_trig.is_set(DMA_CTRL::BUSY)
    }

    fn sdmmc_dma_abort(&mut self) {
        let dma = self.dma();
        let bit = self.config.dma_bit();
        dma.chan_abort.set(bit);
        while dma.chan_abort.get() & bit != 0 {}
    }

    fn sdmmc_dma_complete(&self) -> bool {
        self.dma().intr.get() & self.config.dma_bit() != 0
    }

    fn sdmmc_dma_ack(&mut self) {
        self.dma().ints1.set(self.config.dma_bit());
    }

    fn sdmmc_dma_remaining(&self) -> u32 {
        self.channel().trans_count.get()
    }
}

impl MonotonicClock for Rp2040Sdio {
    fn millis(&self) -> u32 {
        (rp2040_regs::timer_us() / 1000) as u32
    }
}

impl Sleep for Rp2040Sdio {
    fn usleep(&mut self, time_us: u32) {
        let start = rp2040_regs::timer_us();
        while rp2040_regs::timer_us().wrapping_sub(start) < time_us as u64 {}
    }
}

/// FLEVEL packs a 4-bit TX level then a 4-bit RX level per state machine.
fn fifo_level(flevel: u32, sm: u8, rx: bool) -> u32 {
    let shift = sm as u32 * 8 + (if rx { 4 } else { 0 });
    (flevel >> shift) & 0xf
}
