//! Radio gateway - a thin typed wrapper over chip strobes, FIFO I/O,
//! and energy accounting.
//!
//! The chip itself (its SPI framing, status polling, register map) is an
//! external collaborator: `RadioChip` is the trait a real driver
//! implements once. `RadioGateway<R>` is the in-scope component: it
//! never does SPI itself, only sequences the primitives `R` exposes
//! and tracks which of `{Idle, Listen, Transmit}` the radio is in, the
//! way Contiki's `ENERGEST_ON`/`ENERGEST_OFF` macros did.

use crate::error::GlossyError;

/// The four strobes Glossy ever issues, independent of the concrete
/// chip's opcode values (`STXON`, `SRXON`, `SFLUSHTX`, `SFLUSHRX` on a
/// CC2420; a driver maps these onto whatever its own chip calls them).
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum Strobe {
    RxOn,
    TxOn,
    FlushTx,
    FlushRx,
}

/// Required external primitives for the radio chip: strobe, read FIFO
/// byte, write FIFO, poll status, FIFO pin level, SFD pin level. A
/// concrete chip driver implements this once; the slot engine is
/// generic over it and never assumes a particular part.
pub trait RadioChip {
    /// Issue a strobe command (`FASTSPI_STROBE`).
    fn strobe(&mut self, strobe: Strobe) -> Result<(), GlossyError>;
    /// Read one byte out of the RX FIFO (`FASTSPI_READ_FIFO_BYTE`).
    fn read_fifo_byte(&mut self) -> Result<u8, GlossyError>;
    /// Drain `buf.len()` remaining bytes out of the RX FIFO without
    /// waiting on the FIFO pin (`FASTSPI_READ_FIFO_NO_WAIT`).
    fn read_fifo_into(&mut self, buf: &mut [u8]) -> Result<(), GlossyError>;
    /// Push `buf` into the TX FIFO (`FASTSPI_WRITE_FIFO`).
    fn write_fifo(&mut self, buf: &[u8]) -> Result<(), GlossyError>;
    /// Poll the chip status register (`FASTSPI_UPD_STATUS`), used only
    /// to check the crystal-stable bit while turning the radio on.
    fn crystal_is_stable(&mut self) -> Result<bool, GlossyError>;
    /// FIFO pin level: true once at least one byte is buffered.
    fn fifo_is_high(&self) -> bool;
    /// SFD pin level: true for the duration of an on-air frame.
    fn sfd_is_high(&self) -> bool;
}

/// Iteration budget for the crystal-stable poll in [`RadioGateway::on`].
/// A calibration point, not expected to be frozen. Raise it if a
/// slower crystal needs more spins.
const CRYSTAL_STABLE_MAX_ITERS: u32 = 100_000;

/// Which of the three mutually exclusive radio activities is current.
/// Mirrors `ENERGEST_TYPE_LISTEN` / `ENERGEST_TYPE_TRANSMIT`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, defmt::Format)]
pub enum EnergyMode {
    #[default]
    Idle,
    Listen,
    Transmit,
}

/// Running tally of ticks (caller-supplied, e.g. DCO ticks) spent in
/// each [`EnergyMode`], the Rust-side equivalent of Contiki's energest.
#[derive(Clone, Copy, Default, Debug, defmt::Format)]
pub struct EnergyAccounting {
    pub listen_ticks: u32,
    pub transmit_ticks: u32,
    mode: EnergyMode,
    mode_start: u32,
}

impl EnergyAccounting {
    pub const fn new() -> Self {
        Self {
            listen_ticks: 0,
            transmit_ticks: 0,
            mode: EnergyMode::Idle,
            mode_start: 0,
        }
    }

    fn switch(&mut self, now: u32, mode: EnergyMode) {
        match self.mode {
            EnergyMode::Listen => self.listen_ticks = self.listen_ticks.wrapping_add(now.wrapping_sub(self.mode_start)),
            EnergyMode::Transmit => {
                self.transmit_ticks = self.transmit_ticks.wrapping_add(now.wrapping_sub(self.mode_start))
            }
            EnergyMode::Idle => {}
        }
        self.mode = mode;
        self.mode_start = now;
    }

    pub fn mode(&self) -> EnergyMode {
        self.mode
    }
}

/// The in-scope radio gateway. Owns no radio state beyond energy
/// accounting; `R` does the actual chip I/O.
pub struct RadioGateway<R: RadioChip> {
    chip: R,
    pub energy: EnergyAccounting,
}

impl<R: RadioChip> RadioGateway<R> {
    pub const fn new(chip: R) -> Self {
        Self {
            chip,
            energy: EnergyAccounting::new(),
        }
    }

    pub fn chip_mut(&mut self) -> &mut R {
        &mut self.chip
    }

    pub fn chip(&self) -> &R {
        &self.chip
    }

    /// Turn the radio on and block until the crystal-stable status bit
    /// asserts.
    pub fn on(&mut self, now: u32) -> Result<(), GlossyError> {
        self.chip.strobe(Strobe::RxOn)?;
        let mut iters = 0;
        while !self.chip.crystal_is_stable()? {
            iters += 1;
            if iters >= CRYSTAL_STABLE_MAX_ITERS {
                return Err(GlossyError::BusyTimeout);
            }
        }
        self.energy.switch(now, EnergyMode::Listen);
        Ok(())
    }

    pub fn off(&mut self, now: u32) -> Result<(), GlossyError> {
        self.energy.switch(now, EnergyMode::Idle);
        self.chip.strobe(Strobe::RxOn)?; // select RX path before turning the PA off, as on the CC2420.
        self.flush_rx()
    }

    pub fn flush_tx(&mut self) -> Result<(), GlossyError> {
        self.chip.strobe(Strobe::FlushTx)
    }

    pub fn flush_rx(&mut self) -> Result<(), GlossyError> {
        // A dummy read drains any byte already latched before the flush
        // strobes take effect.
        let _ = self.chip.read_fifo_byte();
        self.chip.strobe(Strobe::FlushRx)?;
        self.chip.strobe(Strobe::FlushRx)
    }

    pub fn start_tx(&mut self, now: u32) -> Result<(), GlossyError> {
        self.energy.switch(now, EnergyMode::Transmit);
        self.chip.strobe(Strobe::TxOn)
    }

    pub fn write_tx(&mut self, buf: &[u8]) -> Result<(), GlossyError> {
        self.chip.write_fifo(buf)
    }

    /// Abort an in-flight reception. This both flushes RX *and* commits
    /// the `Aborted` state transition. The caller (the state machine /
    /// dispatcher) supplies the shared `state` cell so the gateway
    /// doesn't need anything beyond a store into it.
    pub fn abort_rx(&mut self, state: &crate::state::AtomicSlotState) -> Result<(), GlossyError> {
        state.store(crate::state::SlotState::Aborted);
        self.flush_rx()
    }

    /// Abort a scheduled relay TX after a bad CRC: switch back to RX and
    /// roll the energy accounting back to listen.
    pub fn abort_tx(&mut self, now: u32) -> Result<(), GlossyError> {
        self.chip.strobe(Strobe::RxOn)?;
        if self.energy.mode() == EnergyMode::Transmit {
            self.energy.switch(now, EnergyMode::Listen);
        }
        self.flush_rx()
    }
}
