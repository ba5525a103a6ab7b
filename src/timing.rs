//! Timing pipeline: constant interrupt-latency compensation, the
//! slot-length estimator, and reference-time reconstruction.

use crate::flood::GlossyEngine;
use crate::packet::PacketFields;
use crate::radio::RadioChip;
use crate::timer::{LfClock, TimerChip};

/// Timing state carried for the lifetime of a `sync` session.
///
/// `WINDOW` selects the slot-length estimator's averaging window. Some
/// deployments compile this in or out entirely; `WINDOW == 1` reduces
/// the windowed formula to "use the latest sample", which covers the
/// un-windowed case with the same code path.
pub struct TimingPipeline<const WINDOW: u32 = 1> {
    pub t_slot_h: u32,
    pub t_ref_l: u32,
    pub t_ref_l_updated: bool,
    pub t_first_rx_l: u32,

    slot_sum: u32,
    win_cnt: u32,

    t_offset_h: u32,
}

impl<const WINDOW: u32> TimingPipeline<WINDOW> {
    pub const fn new() -> Self {
        Self {
            t_slot_h: 0,
            t_ref_l: 0,
            t_ref_l_updated: false,
            t_first_rx_l: 0,
            slot_sum: 0,
            win_cnt: 0,
            t_offset_h: 0,
        }
    }
}

impl<const WINDOW: u32> Default for TimingPipeline<WINDOW> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RadioChip, T: TimerChip, L: LfClock, const WINDOW: u32> GlossyEngine<R, T, L, WINDOW> {
    /// Triggered only when `rx_cnt > 1` and the just-received frame's
    /// relay counter is exactly `tx_relay_cnt_last + 2`: i.e. we
    /// transmitted and then heard the very next hop relay it straight
    /// back.
    pub(crate) fn estimate_slot_length(&mut self, t_rx_stop_tmp: u32) {
        let data_len = if self.packet_len != 0 {
            self.cfg.data_len
        } else {
            return;
        };
        let relay_cnt = self.buf.relay_cnt_field(data_len);
        if self.rx_cnt <= 1 || relay_cnt != self.tx_relay_cnt_last.wrapping_add(2) {
            return;
        }

        let t_w_rt = self.t_tx_start.wrapping_sub(self.t_rx_stop);
        let t_tx = self.t_tx_stop.wrapping_sub(self.t_tx_start);
        let t_w_tr = self.t_rx_start.wrapping_sub(self.t_tx_stop);
        let t_rx = t_rx_stop_tmp.wrapping_sub(self.t_rx_start);

        let airtime = (self.packet_len as u32).wrapping_mul(self.ticks_per_byte);
        let t_slot = (t_tx.wrapping_add(t_w_tr).wrapping_add(t_rx).wrapping_add(t_w_rt) / 2).wrapping_sub(airtime);

        if self.timing.win_cnt == 0 {
            // First sample: usable immediately, so the very next slot can
            // already be timed against it.
            self.timing.t_slot_h = t_slot;
        }
        self.timing.slot_sum = self.timing.slot_sum.wrapping_add(t_slot);
        self.timing.win_cnt += 1;
        if self.timing.win_cnt == WINDOW {
            self.timing.t_slot_h = self.timing.slot_sum / WINDOW;
            self.timing.slot_sum /= 2;
            self.timing.win_cnt /= 2;
        }
    }

    /// Reconstructs the LF-clock instant of slot 0's air start from the
    /// current relay counter, the slot-length estimate, and a captured
    /// `(t_cap_h, t_cap_l)` pair on the next LF tick. Runs at most once
    /// per session: only from `begin_tx`, on the first relay after the
    /// first successful RX.
    pub(crate) fn compute_sync_reference_time(&mut self) {
        let data_len = if self.packet_len != 0 {
            self.cfg.data_len
        } else {
            self.packet_len_tmp
        };
        let relay_cnt = self.buf.relay_cnt_field(data_len) as u32;

        let (t_cap_h, t_cap_l) = self.lf.capture_next_tick();

        let airtime = (self.packet_len as u32).wrapping_mul(self.ticks_per_byte);
        let t_ref_to_rx_h = relay_cnt.saturating_sub(1).wrapping_mul(self.timing.t_slot_h.wrapping_add(airtime));
        let t_ref_to_cap_h = t_ref_to_rx_h.wrapping_add(t_cap_h.wrapping_sub(self.t_rx_start));
        let t_ref_to_cap_l = 1 + t_ref_to_cap_h / self.clock_phi;

        self.timing.t_offset_h = (self.clock_phi - 1).wrapping_sub(t_ref_to_cap_h % self.clock_phi);
        self.timing.t_ref_l = t_cap_l.wrapping_sub(t_ref_to_cap_l);
        self.timing.t_ref_l_updated = true;
    }

    /// High-resolution offset of the reference time within its LF tick,
    /// computed alongside `t_ref_l` by [`Self::compute_sync_reference_time`].
    /// Exposed for higher-level sync protocols that need sub-LF-tick
    /// precision.
    pub fn t_offset_h(&self) -> u32 {
        self.timing.t_offset_h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flood::FloodConfig;
    use crate::test_support::{test_engine, FakeLf, FakeRadio, FakeTimer};

    fn sync_cfg(data_len: u8) -> FloodConfig {
        FloodConfig {
            initiator: false,
            sync: true,
            tx_max: 2,
            data_len,
            header: 0,
            t_stop: 0,
            id: 0,
        }
    }

    #[test]
    fn estimate_slot_length_averages_the_four_leg_round_trip() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        let data_len = 2u8;
        engine.cfg = sync_cfg(data_len);
        engine.packet_len = 6;
        engine.ticks_per_byte = 10;
        engine.rx_cnt = 2;
        engine.tx_relay_cnt_last = 0;
        engine.buf.set_relay_cnt_field(data_len, 2);

        engine.t_rx_stop = 100;
        engine.t_tx_start = 150;
        engine.t_tx_stop = 200;
        engine.t_rx_start = 250;

        engine.estimate_slot_length(300);

        assert_eq!(engine.timing.t_slot_h, 40);
    }

    #[test]
    fn estimate_slot_length_ignores_a_relay_that_is_not_the_next_hop_back() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        let data_len = 2u8;
        engine.cfg = sync_cfg(data_len);
        engine.packet_len = 6;
        engine.rx_cnt = 2;
        engine.tx_relay_cnt_last = 0;
        // relay_cnt != tx_relay_cnt_last + 2, so this sample is discarded.
        engine.buf.set_relay_cnt_field(data_len, 5);

        engine.estimate_slot_length(300);

        assert_eq!(engine.timing.t_slot_h, 0);
    }

    #[test]
    fn compute_sync_reference_time_reconstructs_the_lf_reference() {
        let mut engine = test_engine::<1>(FakeRadio::new(), FakeTimer::new(), FakeLf::new());
        let data_len = 2u8;
        engine.cfg = sync_cfg(data_len);
        engine.packet_len = 6;
        engine.ticks_per_byte = 10;
        engine.clock_phi = 1000;
        engine.t_rx_start = 50;
        engine.timing.t_slot_h = 40;
        engine.buf.set_relay_cnt_field(data_len, 3);
        engine.lf.next_tick = (500, 1000);

        engine.compute_sync_reference_time();

        assert_eq!(engine.t_offset_h(), 349);
        assert_eq!(engine.t_ref_l(), 999);
        assert!(engine.t_ref_l_updated());
    }
}
