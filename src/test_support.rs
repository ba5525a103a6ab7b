//! Host-side fakes of the three hardware traits, used only by
//! `#[cfg(test)]` unit tests. Never compiled into a real target; `std`
//! is pulled in solely for `Vec`/`VecDeque` under `cfg(test)` (see the
//! crate root).

use std::collections::VecDeque;

use crate::error::{DebugCounters, GlossyError};
use crate::flood::{FloodConfig, GlossyEngine};
use crate::packet::{PacketBuffer, BUFFER_LEN};
use crate::radio::{RadioChip, RadioGateway, Strobe};
use crate::state::{AtomicSlotState, SlotState};
use crate::timer::{LfClock, TimerCause, TimerChip, TimerGateway};
use crate::timing::TimingPipeline;

/// A software radio: FIFOs are plain queues, strobes are recorded rather
/// than acted on, and the SFD/FIFO pin levels are whatever the test last
/// set them to.
#[derive(Default)]
pub struct FakeRadio {
    pub tx_fifo: Vec<u8>,
    pub rx_fifo: VecDeque<u8>,
    pub sfd_high: bool,
    pub fifo_high: bool,
    pub crystal_stable: bool,
    pub strobes: Vec<Strobe>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self {
            crystal_stable: true,
            ..Default::default()
        }
    }

    /// Load `frame` into the RX FIFO as the bytes a real chip would
    /// stream out starting at the length field.
    pub fn queue_rx_frame(&mut self, frame: &[u8]) {
        self.rx_fifo.extend(frame.iter().copied());
        self.fifo_high = true;
    }
}

impl RadioChip for FakeRadio {
    fn strobe(&mut self, strobe: Strobe) -> Result<(), GlossyError> {
        self.strobes.push(strobe);
        Ok(())
    }

    fn read_fifo_byte(&mut self) -> Result<u8, GlossyError> {
        let b = self.rx_fifo.pop_front().ok_or(GlossyError::Chip)?;
        self.fifo_high = !self.rx_fifo.is_empty();
        Ok(b)
    }

    fn read_fifo_into(&mut self, buf: &mut [u8]) -> Result<(), GlossyError> {
        for slot in buf.iter_mut() {
            *slot = self.rx_fifo.pop_front().ok_or(GlossyError::Chip)?;
        }
        self.fifo_high = !self.rx_fifo.is_empty();
        Ok(())
    }

    fn write_fifo(&mut self, buf: &[u8]) -> Result<(), GlossyError> {
        self.tx_fifo.clear();
        self.tx_fifo.extend_from_slice(buf);
        Ok(())
    }

    fn crystal_is_stable(&mut self) -> Result<bool, GlossyError> {
        Ok(self.crystal_stable)
    }

    fn fifo_is_high(&self) -> bool {
        self.fifo_high
    }

    fn sfd_is_high(&self) -> bool {
        self.sfd_high
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ClockSource {
    Dco,
    Lf,
}

/// A software Timer B: `now`/`capture` are plain counters a test drives
/// directly; `take_cause` returns whatever the test queued and resets to
/// `None`.
pub struct FakeTimer {
    pub now: u32,
    pub capture: u32,
    pub cause: TimerCause,
    pub compare4: Option<u32>,
    pub compare5: Option<u32>,
    source: ClockSource,
}

impl Default for FakeTimer {
    fn default() -> Self {
        Self {
            now: 0,
            capture: 0,
            cause: TimerCause::None,
            compare4: None,
            compare5: None,
            source: ClockSource::Lf,
        }
    }
}

impl FakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dco_sourced(&self) -> bool {
        self.source == ClockSource::Dco
    }
}

impl TimerChip for FakeTimer {
    fn now_dco(&self) -> u32 {
        self.now
    }

    fn capture_sfd(&self) -> u32 {
        self.capture
    }

    fn arm_compare4(&mut self, deadline: u32) {
        self.compare4 = Some(deadline);
    }

    fn disarm_compare4(&mut self) {
        self.compare4 = None;
    }

    fn arm_compare5(&mut self, deadline: u32) {
        self.compare5 = Some(deadline);
    }

    fn disarm_compare5(&mut self) {
        self.compare5 = None;
    }

    fn take_cause(&mut self) -> TimerCause {
        core::mem::replace(&mut self.cause, TimerCause::None)
    }

    fn set_source_dco(&mut self) {
        self.source = ClockSource::Dco;
    }

    fn set_source_lf(&mut self) {
        self.source = ClockSource::Lf;
    }
}

/// A software LF clock: `now_lf`/the next-tick capture pair are both
/// settable directly by the test.
#[derive(Default)]
pub struct FakeLf {
    pub now_lf: u32,
    pub next_tick: (u32, u32),
}

impl FakeLf {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LfClock for FakeLf {
    fn now_lf(&self) -> u32 {
        self.now_lf
    }

    fn capture_next_tick(&mut self) -> (u32, u32) {
        self.next_tick
    }
}

/// Build a fully-initialized engine around the given fakes, without
/// going through [`crate::packet::take_packet_buffer`]. Each call
/// leaks a fresh buffer, so unlike the real singleton, tests can build
/// as many engines as they like without stepping on each other.
pub fn test_engine<const WINDOW: u32>(
    radio: FakeRadio,
    timer: FakeTimer,
    lf: FakeLf,
) -> GlossyEngine<FakeRadio, FakeTimer, FakeLf, WINDOW> {
    let buf: &'static mut PacketBuffer = Box::leak(Box::new([0u8; BUFFER_LEN]));
    GlossyEngine {
        radio: RadioGateway::new(radio),
        timer: TimerGateway::new(timer),
        lf,
        state: AtomicSlotState::new(SlotState::Off),
        cfg: FloodConfig::default(),
        buf,
        caller_data: None,
        tx_cnt: 0,
        rx_cnt: 0,
        relay_cnt: 0,
        tx_relay_cnt_last: 0,
        n_timeouts: 0,
        bytes_read: 0,
        packet_len: 0,
        packet_len_tmp: 0,
        t_start: 0,
        t_rx_start: 0,
        t_rx_stop: 0,
        t_tx_start: 0,
        t_tx_stop: 0,
        t_rx_timeout: 0,
        t_irq: 0,
        timing: TimingPipeline::new(),
        ticks_per_byte: 1,
        clock_phi: 1,
        debug: DebugCounters::new(),
    }
}
