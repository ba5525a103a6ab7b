//! Interrupt dispatcher - the single entry point driven by Timer B,
//! demultiplexing on `(state, SFD level, cause)`.
//!
//! This is the only place that reads [`TimerChip::take_cause`] and the
//! SFD pin together; every other component only ever sees the state
//! transitions this produces. A concrete binding calls
//! [`GlossyEngine::dispatch`] from its Timer B1 interrupt vector with
//! every other interrupt source masked for the duration.

#[cfg(not(test))]
use defmt::warn;

use crate::flood::GlossyEngine;
use crate::radio::RadioChip;
use crate::state::SlotState;
use crate::timer::{LfClock, TimerCause, TimerChip};

/// Fixed ISR entry-to-measurement cost, in DCO ticks, assumed constant by
/// the `T_irq` formula below. Re-measure if the dispatcher's prologue
/// changes.
pub const ISR_PROLOGUE_TICKS: u32 = 21;

/// Upper bound on `T_irq`, in DCO half-ticks, beyond which a relay is
/// dropped rather than risk desynchronized on-air timing.
pub const LATENCY_BUDGET_HALF_TICKS: u32 = 8;

/// Fixed pad, in DCO ticks, added on top of the measured `T_irq` before
/// the relay TX strobe fires. Absorbs MCU/radio clock asynchrony; a
/// calibration point for a given board, not expected to be frozen.
pub const RELAY_STROBE_PAD_TICKS: u32 = 40;

impl<R: RadioChip, T: TimerChip, L: LfClock, const WINDOW: u32> GlossyEngine<R, T, L, WINDOW> {
    /// Call from the Timer B1 vector. Reads and clears the pending cause,
    /// reads the SFD pin level, and dispatches on `(state, SFD, cause)`.
    pub fn dispatch(&mut self) {
        let capture = self.timer.capture_sfd();
        let cause = self.timer.take_cause();
        let sfd_high = self.radio.chip().sfd_is_high();
        let state = self.state.load();

        match (state, sfd_high, cause) {
            (SlotState::Receiving, false, TimerCause::SfdCapture) => {
                self.t_irq = Self::measure_t_irq(self.timer.now_dco(), capture);
                self.end_rx();
                // `end_rx` already dropped to `Waiting`/`Off` on a bad
                // CRC or an exhausted `tx_max`; only relay when it left
                // us in `Received` with a frame ready in the TX mirror.
                if self.state.load() == SlotState::Received {
                    if self.t_irq <= LATENCY_BUDGET_HALF_TICKS {
                        self.relay_with_latency_compensation(capture);
                    } else {
                        self.debug.latency_exceeded += 1;
                        #[cfg(not(test))]
                        warn!("dispatch: latency budget exceeded, t_irq {}", self.t_irq);
                        let _ = self.radio.flush_rx();
                        self.state.store(SlotState::Waiting);
                    }
                }
            }
            (SlotState::Waiting, true, TimerCause::SfdCapture) => {
                self.begin_rx();
            }
            (SlotState::Received, true, TimerCause::SfdCapture) => {
                self.begin_tx();
            }
            (SlotState::Transmitting, false, TimerCause::SfdCapture) => {
                self.end_tx();
            }
            (SlotState::Aborted, _, TimerCause::SfdCapture) => {
                self.state.store(SlotState::Waiting);
            }
            (SlotState::Waiting, _, TimerCause::InitiatorTimeout) => {
                self.on_initiator_timeout();
            }
            (SlotState::Receiving, _, TimerCause::RxTimeout) => {
                self.on_rx_timeout();
            }
            (_, _, TimerCause::RxTimeout) => {
                // Channel 5 fired outside `Receiving`: nothing to abort,
                // just disarm.
                self.timer.disarm_rx_timeout();
            }
            (SlotState::Off, _, _) | (_, _, TimerCause::None) => {}
            _ => {
                // An unlisted `(state, cause)` pair: flush RX and force
                // WAITING rather than leave the engine in an
                // unrecognized phase.
                let _ = self.radio.flush_rx();
                self.state.store(SlotState::Waiting);
            }
        }
    }

    /// Variable part of the dispatch latency, in DCO half-ticks:
    /// `((now - capture) - prologue) << 1`.
    fn measure_t_irq(now: u32, capture: u32) -> u32 {
        now.wrapping_sub(capture)
            .wrapping_sub(ISR_PROLOGUE_TICKS)
            .wrapping_shl(1)
    }

    /// Turn an RX-end event into a TX strobe at a node-invariant offset
    /// from `capture`, so that every relay's radio starts emitting the
    /// same symbols within a fraction of a microsecond of each other.
    ///
    /// A NOP staircase sized by `T_irq` followed by a fixed pad would do
    /// this too, but that technique is tied to one compiler's code
    /// generation for one ISR prologue. This instead computes a deadline
    /// once and spins it out against the free-running DCO counter: the
    /// total elapsed time from `capture` to the strobe is always
    /// `RELAY_STROBE_PAD_TICKS + T_irq` regardless of how long dispatch
    /// took to reach this point, the same invariant a NOP staircase would
    /// maintain. This only spins a few ticks; `T_irq` is bounded by
    /// [`LATENCY_BUDGET_HALF_TICKS`] on entry.
    fn relay_with_latency_compensation(&mut self, capture: u32) {
        let deadline = capture
            .wrapping_add(RELAY_STROBE_PAD_TICKS)
            .wrapping_add(self.t_irq);
        while self.timer.now_dco().wrapping_sub(deadline) > u32::MAX / 2 {}
        let now = self.timer.now_dco();
        let _ = self.radio.start_tx(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_irq_zero_when_capture_matches_prologue() {
        let t = GlossyEngine::<crate::test_support::FakeRadio, crate::test_support::FakeTimer, crate::test_support::FakeLf>::measure_t_irq(
            1000 + ISR_PROLOGUE_TICKS,
            1000,
        );
        assert_eq!(t, 0);
    }

    #[test]
    fn t_irq_scales_by_two() {
        let t = GlossyEngine::<crate::test_support::FakeRadio, crate::test_support::FakeTimer, crate::test_support::FakeLf>::measure_t_irq(
            1000 + ISR_PROLOGUE_TICKS + 3,
            1000,
        );
        assert_eq!(t, 6);
    }

    use crate::flood::FloodConfig;
    use crate::packet::{self, packet_len};
    use crate::test_support::{test_engine, FakeLf, FakeRadio, FakeTimer};

    #[test]
    fn dispatch_begins_rx_on_sfd_rise_while_waiting() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        let data_len = 2u8;
        engine.cfg = FloodConfig {
            initiator: false,
            sync: false,
            tx_max: 2,
            data_len,
            header: 0,
            t_stop: 0,
            id: 0,
        };
        let len = packet_len(data_len, false);
        engine.packet_len = len;
        engine.packet_len_tmp = len;
        engine.state.store(SlotState::Waiting);
        engine.radio.chip_mut().sfd_high = true;
        engine.timer.chip_mut().cause = TimerCause::SfdCapture;
        engine
            .radio
            .chip_mut()
            .queue_rx_frame(&[len, packet::GLOSSY_HEADER, 0xAA, 0xBB, packet::FOOTER1_CRC_OK, 0x00]);

        engine.dispatch();

        assert_eq!(engine.state.load(), SlotState::Receiving);
    }

    #[test]
    fn dispatch_recovers_from_an_unlisted_state_cause_pair() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        engine.state.store(SlotState::Transmitting);
        engine.radio.chip_mut().sfd_high = true;
        engine.timer.chip_mut().cause = TimerCause::SfdCapture;

        engine.dispatch();

        assert_eq!(engine.state.load(), SlotState::Waiting);
    }

    #[test]
    fn dispatch_disarms_rx_timeout_outside_receiving() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        engine.state.store(SlotState::Received);
        engine.timer.chip_mut().cause = TimerCause::RxTimeout;
        engine.timer.chip_mut().compare5 = Some(12345);

        engine.dispatch();

        assert_eq!(engine.state.load(), SlotState::Received);
        assert_eq!(engine.timer.chip_mut().compare5, None);
    }
}
