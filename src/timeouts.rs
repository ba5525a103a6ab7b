//! Timeouts: the initiator retransmit timer and the per-reception
//! watchdog.

#[cfg(not(test))]
use defmt::warn;

use crate::flood::{GlossyEngine, INITIATOR_TIMEOUT_SLOTS};
use crate::packet::{self, PacketFields};
use crate::radio::RadioChip;
use crate::state::SlotState;
use crate::timer::{LfClock, TimerChip};

impl<R: RadioChip, T: TimerChip, L: LfClock, const WINDOW: u32> GlossyEngine<R, T, L, WINDOW> {
    /// One slot period in DCO ticks, used by the initiator timeout's
    /// deadline math: the estimated slot length plus on-air time when
    /// `sync` and a slot estimate exists, otherwise a conservative
    /// whole-packet-airtime-plus-margin estimate.
    fn slot_period(&self) -> u32 {
        if self.cfg.sync {
            self.timing
                .t_slot_h
                .wrapping_add((self.packet_len as u32).wrapping_mul(self.ticks_per_byte))
        } else {
            (self.packet_len as u32 * 35 + 400).wrapping_mul(4)
        }
    }

    pub(crate) fn schedule_initiator_timeout(&mut self) {
        let deadline = self
            .t_start
            .wrapping_add((self.n_timeouts + 1) * INITIATOR_TIMEOUT_SLOTS * self.slot_period());
        self.timer.arm_initiator_timeout(deadline);
    }

    pub(crate) fn disarm_initiator_timeout(&mut self) {
        self.timer.disarm_initiator_timeout();
    }

    /// Channel-4 compare fired while `Waiting`: retransmit if nothing
    /// has been heard yet, otherwise the flood is already progressing
    /// and the timeout is simply disarmed.
    pub(crate) fn on_initiator_timeout(&mut self) {
        self.n_timeouts += 1;
        if self.rx_cnt != 0 {
            self.disarm_initiator_timeout();
            return;
        }

        self.tx_cnt = 0;
        self.buf.set_length_field(self.packet_len_tmp);
        self.buf
            .set_header_field(packet::GLOSSY_HEADER | (self.cfg.header & !packet::GLOSSY_HEADER_MASK));
        if self.cfg.sync {
            let rc = (self.n_timeouts * INITIATOR_TIMEOUT_SLOTS) as u8;
            self.buf.set_relay_cnt_field(self.cfg.data_len, rc);
        }
        // Re-seed the TX FIFO mirror with the caller's data.
        if let Some(caller) = self.caller_data.as_ref() {
            let n = (self.cfg.data_len as usize).min(caller.len);
            // Safety: still within the flood's start()/stop() window.
            let src = unsafe { core::slice::from_raw_parts(caller.ptr, n) };
            self.buf.data_mut(self.cfg.data_len)[..n].copy_from_slice(src);
        }

        self.state.store(SlotState::Received);
        let _ = self.write_fifo_mirror();
        let now = self.timer.now_dco();
        let _ = self.radio.start_tx(now);
        self.schedule_initiator_timeout();
    }

    /// Channel-5 compare fired: the RX watchdog. Aborts a reception in
    /// progress; always disarmed afterward regardless of which state it
    /// fired in.
    pub(crate) fn on_rx_timeout(&mut self) {
        if self.state.load() == SlotState::Receiving {
            self.debug.rx_timeout += 1;
            #[cfg(not(test))]
            warn!("rx: watchdog compare fired mid-reception");
            let _ = self.radio.abort_rx(&self.state);
        }
        self.timer.disarm_rx_timeout();
    }

}
