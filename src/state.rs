//! Slot state machine:
//! `WAITING → RECEIVING → RECEIVED → TRANSMITTING → WAITING`, plus the
//! `OFF`/`ABORTED` terminal/recovery states.
//!
//! `SlotState` is the single shared variable mediating between the
//! dispatcher (running however the application's real ISR calls
//! [`crate::flood::GlossyEngine::dispatch`]) and the foreground. It's
//! modeled as an atomic cell rather than behind any lock; the ISR
//! side can never block on one, so no general-purpose mutex is
//! appropriate here.

use core::sync::atomic::{AtomicU8, Ordering};

#[cfg(not(test))]
use defmt::warn;

use crate::flood::GlossyEngine;
use crate::idlog;
use crate::packet::{self, PacketFields};
use crate::radio::RadioChip;
use crate::timer::{LfClock, TimerChip};

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum SlotState {
    Off = 0,
    Waiting = 1,
    Receiving = 2,
    Received = 3,
    Transmitting = 4,
    Aborted = 5,
}

impl SlotState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Off,
            1 => Self::Waiting,
            2 => Self::Receiving,
            3 => Self::Received,
            4 => Self::Transmitting,
            _ => Self::Aborted,
        }
    }
}

/// Atomic wrapper around [`SlotState`]. Reads from the foreground
/// observe monotone progression across flood phases; anything requiring
/// consistency across multiple fields must wait for `Off`.
pub struct AtomicSlotState(AtomicU8);

impl AtomicSlotState {
    pub const fn new(s: SlotState) -> Self {
        Self(AtomicU8::new(s as u8))
    }

    pub fn load(&self) -> SlotState {
        SlotState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, s: SlotState) {
        self.0.store(s as u8, Ordering::Release);
    }
}

impl<R: RadioChip, T: TimerChip, L: LfClock, const WINDOW: u32> GlossyEngine<R, T, L, WINDOW> {
    /// `WAITING → RECEIVING`, triggered by an SFD rising edge.
    pub(crate) fn begin_rx(&mut self) {
        self.t_rx_start = self.timer.capture_sfd();
        self.state.store(SlotState::Receiving);
        self.bytes_read = 0;

        if self.packet_len != 0 {
            self.t_rx_timeout = self.rx_deadline(self.packet_len_tmp);
            self.timer.arm_rx_timeout(self.t_rx_timeout);
        }

        // Spin on the FIFO pin until the length byte is latched, honoring
        // the deadline once it's known.
        while !self.radio.chip().fifo_is_high() {
            if self.packet_len != 0 && self.deadline_passed(self.t_rx_timeout) {
                self.abort_rx_watchdog();
                return;
            }
        }

        let len = match self.radio.chip_mut().read_fifo_byte() {
            Ok(b) => b,
            Err(_) => return,
        };

        let length_ok = if self.packet_len != 0 {
            len == self.packet_len_tmp
        } else {
            true
        } && (len as usize) >= packet::FOOTER_LEN
            && (len as usize) <= packet::MAX_PACKET_LEN;

        if !length_ok {
            self.debug.bad_length += 1;
            #[cfg(not(test))]
            warn!("rx: bad length field {}", len);
            let _ = self.radio.abort_rx(&self.state);
            return;
        }
        self.buf.set_length_field(len);
        self.bytes_read = 1;

        if self.packet_len == 0 {
            self.packet_len_tmp = len;
            self.t_rx_timeout = self.rx_deadline(self.packet_len_tmp);
        }

        // Header byte.
        while !self.radio.chip().fifo_is_high() {
            if self.deadline_passed(self.t_rx_timeout) {
                self.abort_rx_watchdog();
                return;
            }
        }
        let header = match self.radio.chip_mut().read_fifo_byte() {
            Ok(b) => b,
            Err(_) => return,
        };
        if header & packet::GLOSSY_HEADER_MASK != packet::GLOSSY_HEADER {
            self.debug.bad_header += 1;
            #[cfg(not(test))]
            warn!("rx: header mismatch {}", header);
            let _ = self.radio.abort_rx(&self.state);
            return;
        }
        self.buf.set_header_field(header);
        self.bytes_read = 2;

        // Stream the body in, stopping `TAIL_DRAIN_LEN` bytes short of
        // the end (the FIFO pipelining margin); the tail is drained in
        // one shot by `end_rx`.
        if self.packet_len_tmp > packet::TAIL_DRAIN_LEN {
            while self.bytes_read <= self.packet_len_tmp - packet::TAIL_DRAIN_LEN {
                while !self.radio.chip().fifo_is_high() {
                    if self.deadline_passed(self.t_rx_timeout) {
                        self.abort_rx_watchdog();
                        return;
                    }
                }
                let b = match self.radio.chip_mut().read_fifo_byte() {
                    Ok(b) => b,
                    Err(_) => return,
                };
                self.buf[self.bytes_read as usize] = b;
                self.bytes_read += 1;
            }
        }

        self.timer.arm_rx_timeout(self.t_rx_timeout);
    }

    /// `RECEIVING → RECEIVED` (success) or `RECEIVING → WAITING` (CRC
    /// failure), triggered by an SFD falling edge within the latency
    /// budget.
    pub(crate) fn end_rx(&mut self) {
        let t_rx_stop_tmp = self.timer.capture_sfd();
        let tail_start = self.bytes_read as usize;
        let tail_end = 1 + self.packet_len_tmp as usize;
        if tail_end > tail_start {
            let _ = self
                .radio
                .chip_mut()
                .read_fifo_into(&mut self.buf[tail_start..tail_end]);
        }
        self.bytes_read = self.packet_len_tmp + 1;

        if !self.buf.crc_ok(self.packet_len_tmp) {
            self.debug.bad_crc += 1;
            #[cfg(not(test))]
            warn!("rx: bad crc");
            let _ = self.radio.abort_tx(t_rx_stop_tmp);
            self.state.store(SlotState::Waiting);
            return;
        }

        let data_len = self.effective_data_len();

        if self.cfg.sync {
            let relay = self.buf.relay_cnt_field(data_len).wrapping_add(1);
            self.buf.set_relay_cnt_field(data_len, relay);
            idlog::append(self.buf, data_len, self.cfg.id);
        }

        if self.tx_cnt == self.cfg.tx_max {
            let now = self.timer.now_dco();
            let _ = self.radio.off(now);
            self.state.store(SlotState::Off);
        } else {
            let _ = self.write_fifo_mirror();
            self.state.store(SlotState::Received);
        }

        if self.rx_cnt == 0 {
            self.timing.t_first_rx_l = self.lf.now_lf();
            if self.cfg.sync {
                self.relay_cnt = self.buf.relay_cnt_field(data_len).wrapping_sub(1);
            }
        }
        self.rx_cnt += 1;

        if self.cfg.sync {
            self.estimate_slot_length(t_rx_stop_tmp);
        }
        self.t_rx_stop = t_rx_stop_tmp;

        if self.cfg.initiator {
            self.disarm_initiator_timeout();
        }

        if self.packet_len == 0 {
            self.packet_len = self.packet_len_tmp;
        }
    }

    /// `WAITING/RECEIVED → TRANSMITTING`, triggered by an SFD rising
    /// edge observed while `Received` (relay air-start).
    pub(crate) fn begin_tx(&mut self) {
        self.t_tx_start = self.timer.capture_sfd();
        self.state.store(SlotState::Transmitting);
        let data_len = self.effective_data_len();
        self.tx_relay_cnt_last = if self.cfg.sync {
            self.buf.relay_cnt_field(data_len)
        } else {
            0
        };

        if !self.cfg.initiator && self.rx_cnt == 1 {
            self.copy_payload_to_caller(data_len);
        }

        if self.cfg.sync && self.timing.t_slot_h > 0 && !self.timing.t_ref_l_updated && self.rx_cnt > 0 {
            self.compute_sync_reference_time();
        }
    }

    /// `TRANSMITTING → WAITING` or `→ OFF`, triggered by an SFD falling
    /// edge while `Transmitting`.
    pub(crate) fn end_tx(&mut self) {
        self.t_tx_stop = self.timer.capture_sfd();
        self.tx_cnt += 1;
        if self.tx_cnt == self.cfg.tx_max && (self.cfg.tx_max as i16 - self.cfg.initiator as i16) > 0 {
            let now = self.t_tx_stop;
            let _ = self.radio.off(now);
            self.state.store(SlotState::Off);
        } else {
            self.state.store(SlotState::Waiting);
        }
        let _ = self.radio.flush_tx();
    }

    fn effective_data_len(&self) -> u8 {
        if self.packet_len != 0 {
            self.cfg.data_len
        } else {
            let relay = if self.cfg.sync { packet::RELAY_CNT_LEN as u8 } else { 0 };
            self.packet_len_tmp
                .saturating_sub(packet::HEADER_LEN as u8 + packet::FOOTER_LEN as u8 + relay)
        }
    }

    fn rx_deadline(&self, packet_len_tmp: u8) -> u32 {
        // Airtime (32 us/byte at 250 kb/s, ~0.23 us/DCO tick) + 200 us margin.
        self.t_rx_start
            .wrapping_add((packet_len_tmp as u32 * 35 + 200).wrapping_mul(4))
    }

    fn deadline_passed(&self, deadline: u32) -> bool {
        self.timer.now_dco().wrapping_sub(deadline) < u32::MAX / 2
    }

    fn abort_rx_watchdog(&mut self) {
        self.debug.rx_timeout += 1;
        #[cfg(not(test))]
        warn!("rx: watchdog fired mid-reception");
        let _ = self.radio.abort_rx(&self.state);
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flood::{CallerBuf, FloodConfig};
    use crate::packet::{packet_len, FOOTER1_CRC_OK};
    use crate::test_support::{test_engine, FakeLf, FakeRadio, FakeTimer};

    fn receiver_cfg(data_len: u8) -> FloodConfig {
        FloodConfig {
            initiator: false,
            sync: false,
            tx_max: 2,
            data_len,
            header: 0,
            t_stop: 0,
            id: 0,
        }
    }

    #[test]
    fn begin_rx_then_end_rx_accepts_a_well_formed_frame() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        let data_len = 2u8;
        let len = packet_len(data_len, false);
        engine.cfg = receiver_cfg(data_len);
        engine.packet_len = len;
        engine.packet_len_tmp = len;

        let mut caller = [0u8; 2];
        engine.caller_data = Some(CallerBuf {
            ptr: caller.as_mut_ptr(),
            len: caller.len(),
        });

        engine
            .radio
            .chip_mut()
            .queue_rx_frame(&[len, packet::GLOSSY_HEADER, 0xAA, 0xBB, FOOTER1_CRC_OK, 0x00]);

        engine.begin_rx();
        assert_eq!(engine.state.load(), SlotState::Receiving);

        engine.end_rx();
        assert_eq!(engine.state.load(), SlotState::Received);
        assert_eq!(engine.rx_cnt, 1);
        assert_eq!(engine.debug.bad_crc, 0);
        assert_eq!(caller, [0u8; 2], "end_rx must not touch the caller's buffer");

        engine.begin_tx();
        assert_eq!(caller, [0xAA, 0xBB], "first relay opportunity delivers the payload");
    }

    #[test]
    fn end_rx_rejects_bad_crc_and_falls_back_to_waiting() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        let data_len = 2u8;
        let len = packet_len(data_len, false);
        engine.cfg = receiver_cfg(data_len);
        engine.packet_len = len;
        engine.packet_len_tmp = len;

        engine
            .radio
            .chip_mut()
            .queue_rx_frame(&[len, packet::GLOSSY_HEADER, 0xAA, 0xBB, 0x00, 0x00]);

        engine.begin_rx();
        engine.end_rx();

        assert_eq!(engine.state.load(), SlotState::Waiting);
        assert_eq!(engine.debug.bad_crc, 1);
        assert_eq!(engine.rx_cnt, 0);
    }

    #[test]
    fn begin_rx_rejects_a_foreign_header_and_aborts() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        let data_len = 2u8;
        let len = packet_len(data_len, false);
        engine.cfg = receiver_cfg(data_len);
        engine.packet_len = len;
        engine.packet_len_tmp = len;

        engine
            .radio
            .chip_mut()
            .queue_rx_frame(&[len, 0xff, 0xAA, 0xBB, FOOTER1_CRC_OK, 0x00]);

        engine.begin_rx();

        assert_eq!(engine.state.load(), SlotState::Aborted);
        assert_eq!(engine.debug.bad_header, 1);
    }

    #[test]
    fn begin_rx_rejects_a_mismatched_length_and_aborts() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        let data_len = 2u8;
        let len = packet_len(data_len, false);
        engine.cfg = receiver_cfg(data_len);
        engine.packet_len = len;
        engine.packet_len_tmp = len;

        // Length byte disagrees with the length learned at `start`.
        engine.radio.chip_mut().queue_rx_frame(&[len + 1]);

        engine.begin_rx();

        assert_eq!(engine.state.load(), SlotState::Aborted);
        assert_eq!(engine.debug.bad_length, 1);
    }

    #[test]
    fn begin_tx_transitions_from_received_to_transmitting() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        let data_len = 2u8;
        engine.cfg = receiver_cfg(data_len);
        engine.packet_len = packet_len(data_len, false);
        engine.packet_len_tmp = engine.packet_len;
        engine.rx_cnt = 1;
        engine.state.store(SlotState::Received);

        engine.begin_tx();

        assert_eq!(engine.state.load(), SlotState::Transmitting);
    }

    #[test]
    fn end_tx_returns_to_waiting_below_tx_max() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        engine.cfg = receiver_cfg(2);
        engine.cfg.tx_max = 2;
        engine.state.store(SlotState::Transmitting);
        engine.tx_cnt = 0;

        engine.end_tx();

        assert_eq!(engine.state.load(), SlotState::Waiting);
        assert_eq!(engine.tx_cnt, 1);
    }

    #[test]
    fn end_tx_turns_radio_off_once_tx_max_is_reached() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        engine.cfg = receiver_cfg(2);
        engine.cfg.tx_max = 1;
        engine.state.store(SlotState::Transmitting);
        engine.tx_cnt = 0;

        engine.end_tx();

        assert_eq!(engine.state.load(), SlotState::Off);
        assert_eq!(engine.tx_cnt, 1);
    }
}
