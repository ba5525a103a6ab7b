//! Timer gateway - capture-compare channels: SFD capture, initiator
//! timeout, rx timeout.
//!
//! Timer B itself (its clock-source mux, its five capture/compare
//! channels, the cause register) is external hardware (`TBCCR1`,
//! `TBCCR4`/`TBCCR5`, `TBIV`); `TimerChip` is the trait a concrete MCU
//! timer binding implements once. `TimerGateway<T>` adds Glossy-specific
//! naming (`arm_rx_timeout`/`disarm_rx_timeout`/`arm_initiator_timeout`/
//! `disarm_initiator_timeout`/`now_dco`) on top of the raw channels.

/// Which capture/compare channel produced the pending interrupt. The
/// Rust-side equivalent of reading `TBIV`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum TimerCause {
    /// Channel 1: SFD capture (rising or falling edge).
    SfdCapture,
    /// Channel 4 compare: initiator retransmit timeout.
    InitiatorTimeout,
    /// Channel 5 compare: per-reception watchdog.
    RxTimeout,
    /// No pending cause (spurious wakeup, or an already-serviced vector).
    None,
}

/// Required external primitives for Timer B. A binding owns the actual
/// MSP430/Cortex-M timer peripheral; the gateway only ever calls these
/// six operations.
pub trait TimerChip {
    /// Free-running DCO tick count (`RTIMER_NOW_DCO()`).
    fn now_dco(&self) -> u32;
    /// Latched SFD-capture value (`TBCCR1`).
    fn capture_sfd(&self) -> u32;
    /// Arm the initiator-retransmit compare channel (`TBCCR4`/`TBCCTL4`).
    fn arm_compare4(&mut self, deadline: u32);
    fn disarm_compare4(&mut self);
    /// Arm the RX-watchdog compare channel (`TBCCR5`/`TBCCTL5`).
    fn arm_compare5(&mut self, deadline: u32);
    fn disarm_compare5(&mut self);
    /// Read and clear the pending cause (`TBIV`).
    fn take_cause(&mut self) -> TimerCause;
    /// Switch Timer B onto the DCO for cycle-accurate capture during a
    /// flood.
    fn set_source_dco(&mut self);
    /// Switch Timer B back onto the 32 kHz clock once the flood ends.
    fn set_source_lf(&mut self);
}

/// The low-frequency clock used for coarse reference timestamps outside
/// a flood (`now_lf()`, capture `(t_cap_h, t_cap_l)` on the next LF
/// edge). Kept as a separate trait from `TimerChip` because on real
/// hardware it is frequently a distinct peripheral (an RTC) rather than
/// Timer B itself.
pub trait LfClock {
    fn now_lf(&self) -> u32;
    /// Block until the next LF tick, then return the paired
    /// high-resolution and low-resolution timestamps of that edge
    /// (`CAPTURE_NEXT_CLOCK_TICK`).
    fn capture_next_tick(&mut self) -> (u32, u32);
}

/// The in-scope timer gateway.
pub struct TimerGateway<T: TimerChip> {
    chip: T,
}

impl<T: TimerChip> TimerGateway<T> {
    pub const fn new(chip: T) -> Self {
        Self { chip }
    }

    pub fn chip_mut(&mut self) -> &mut T {
        &mut self.chip
    }

    pub fn now_dco(&self) -> u32 {
        self.chip.now_dco()
    }

    pub fn capture_sfd(&self) -> u32 {
        self.chip.capture_sfd()
    }

    pub fn arm_initiator_timeout(&mut self, deadline: u32) {
        self.chip.arm_compare4(deadline);
    }

    pub fn disarm_initiator_timeout(&mut self) {
        self.chip.disarm_compare4();
    }

    pub fn arm_rx_timeout(&mut self, deadline: u32) {
        self.chip.arm_compare5(deadline);
    }

    pub fn disarm_rx_timeout(&mut self) {
        self.chip.disarm_compare5();
    }

    pub fn take_cause(&mut self) -> TimerCause {
        self.chip.take_cause()
    }

    /// Switch Timer B onto the DCO and mask out everything but this
    /// single interrupt vector, for the duration of a flood. Other
    /// interrupts are masked at start and restored at stop.
    pub fn begin_flood(&mut self) {
        self.chip.set_source_dco();
    }

    pub fn end_flood(&mut self) {
        self.disarm_initiator_timeout();
        self.disarm_rx_timeout();
        self.chip.set_source_lf();
    }
}
