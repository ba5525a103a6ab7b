//! Flood controller - public entry point. Arms the flood, chooses
//! the initiator vs. receiver path, enforces `tx_max`, and reports
//! results once the flood ends.
//!
//! This is also where [`GlossyEngine`] itself lives: its fields are
//! declared here, and its per-component behavior (the slot state
//! machine, the timing pipeline, the timeouts, the ID log) is
//! implemented in separate `impl GlossyEngine` blocks in their own
//! files.

use crate::error::GlossyError;
use crate::idlog::ID_LOG_CAPACITY;
use crate::packet::{self, take_packet_buffer, PacketBuffer, PacketFields};
use crate::radio::{RadioChip, RadioGateway};
use crate::state::{AtomicSlotState, SlotState};
use crate::timer::{LfClock, TimerChip, TimerGateway};
use crate::timing::TimingPipeline;
use crate::error::DebugCounters;

/// Upper bound on the initiator's retransmit cadence, in slot periods.
/// A calibration point, not expected to be frozen.
pub const INITIATOR_TIMEOUT_SLOTS: u32 = 3;

/// Required external primitives for the cooperative scheduler:
/// `poll(task)`, `wait_event_until(POLL)`, interrupt mask set/restore,
/// watchdog stop/start. The flood controller's busy-wait gate drives
/// this trait; it never talks to the OS scheduler directly.
pub trait Scheduler {
    /// Disable every interrupt source Glossy doesn't itself need, and
    /// return an opaque token that restores them on `Drop`/explicit
    /// restore (`glossy_disable_other_interrupts`/`..._enable...`).
    fn mask_other_interrupts(&mut self) -> InterruptMask;
    fn restore_interrupts(&mut self, mask: InterruptMask);
    /// Stop (at flood start) / restart (at flood stop) the watchdog.
    fn watchdog_stop(&mut self);
    fn watchdog_start(&mut self);
    /// Park the calling context until either `state == Off` or the LF
    /// clock passes `t_stop` (`PROCESS_WAIT_EVENT_UNTIL` / `poll`).
    fn busy_wait_until(&mut self, is_done: impl FnMut() -> bool);
}

/// Opaque token capturing whatever interrupt-enable state
/// `mask_other_interrupts` saved, so it can be restored symmetrically.
/// A concrete `Scheduler` impl defines its own representation; Glossy's
/// core never inspects it.
#[derive(Clone, Copy, Debug, Default)]
pub struct InterruptMask(pub u32);

/// Immutable-for-the-session flood parameters.
#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct FloodConfig {
    pub initiator: bool,
    pub sync: bool,
    /// Cap on this node's transmissions; must be in `[1, 255]`.
    pub tx_max: u8,
    /// Payload length in bytes. `0` on a receiver means "learn it from
    /// the first valid reception".
    pub data_len: u8,
    /// Two application-defined bits stored in the header byte.
    pub header: u8,
    /// LF-clock deadline after which the foreground forces `Off` and
    /// invokes the callback regardless of flood progress.
    pub t_stop: u32,
    /// This node's ID, appended to the activity log on relay (component H).
    pub id: u16,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            initiator: false,
            sync: false,
            tx_max: 2,
            data_len: 0,
            header: 0,
            t_stop: 0,
            id: 0,
        }
    }
}

impl FloodConfig {
    /// Reject configurations that can never produce a legal on-air frame
    /// or a useful flood, the way `configure.rs` validates modulation
    /// parameters before they reach the wire.
    pub fn validate(&self) -> Result<(), GlossyError> {
        if self.tx_max == 0 {
            return Err(GlossyError::Config);
        }
        if self.data_len > 0 {
            let len = packet::packet_len(self.data_len, self.sync);
            if (len as usize) > packet::MAX_PACKET_LEN || (len as usize) < packet::FOOTER_LEN {
                return Err(GlossyError::Config);
            }
        }
        if self.header & !0x03 != 0 {
            // Only the low 2 bits are application-defined; a caller
            // passing anything else is almost certainly a bug.
            return Err(GlossyError::Config);
        }
        Ok(())
    }
}

/// The slot engine. Generic over the three external collaborators it
/// drives: the radio chip, the Timer B binding, and the LF clock.
/// `WINDOW` selects the timing pipeline's averaging window (`1` = no
/// averaging).
pub struct GlossyEngine<R: RadioChip, T: TimerChip, L: LfClock, const WINDOW: u32 = 1> {
    pub(crate) radio: RadioGateway<R>,
    pub(crate) timer: TimerGateway<T>,
    pub(crate) lf: L,

    /// The sole synchronization token between the dispatcher and the
    /// foreground.
    pub(crate) state: AtomicSlotState,

    pub(crate) cfg: FloodConfig,
    pub(crate) buf: &'static mut PacketBuffer,

    /// Raw handle to the caller's data buffer, valid only while a flood
    /// is running. See the safety note on [`GlossyEngine::start`].
    pub(crate) caller_data: Option<CallerBuf>,

    pub(crate) tx_cnt: u8,
    pub(crate) rx_cnt: u8,
    pub(crate) relay_cnt: u8,
    pub(crate) tx_relay_cnt_last: u8,
    pub(crate) n_timeouts: u32,
    pub(crate) bytes_read: u8,
    /// `0` until learned from the first valid reception (receiver with
    /// `data_len == 0` at `start`).
    pub(crate) packet_len: u8,
    pub(crate) packet_len_tmp: u8,

    pub(crate) t_start: u32,
    pub(crate) t_rx_start: u32,
    pub(crate) t_rx_stop: u32,
    pub(crate) t_tx_start: u32,
    pub(crate) t_tx_stop: u32,
    pub(crate) t_rx_timeout: u32,
    pub(crate) t_irq: u32,

    pub(crate) timing: TimingPipeline<WINDOW>,

    /// DCO ticks per byte at 250 kb/s, i.e. the MCU clock frequency in Hz
    /// divided by 31250. Supplied at construction since it is a
    /// characteristic of the concrete MCU binding, not a Glossy
    /// parameter.
    pub(crate) ticks_per_byte: u32,
    /// DCO ticks per LF-clock tick, likewise MCU-specific.
    pub(crate) clock_phi: u32,

    pub(crate) debug: DebugCounters,
}

/// Raw (pointer, length) handle to the caller-owned data buffer passed
/// to [`GlossyEngine::start`].
///
/// # Safety invariant
/// This is not a Rust reference because its lifetime cannot be
/// expressed without pinning `GlossyEngine` to the lifetime of one
/// flood's buffer forever. The caller must not touch `data` again until
/// `stop()` returns, the same relaxed-alias contract an ISR has over a
/// pointer it was handed at the start of a session. The type system
/// cannot see the ISR-context write, so the contract is documented,
/// not enforced.
pub(crate) struct CallerBuf {
    pub(crate) ptr: *mut u8,
    pub(crate) len: usize,
}

impl CallerBuf {
    fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: valid for `len` bytes per the invariant above, and
        // exclusively owned by the engine for the duration of the flood.
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl<R: RadioChip, T: TimerChip, L: LfClock, const WINDOW: u32> GlossyEngine<R, T, L, WINDOW> {
    /// Construct the engine around its three hardware collaborators.
    /// Takes the single process-wide packet buffer (see
    /// [`packet::take_packet_buffer`]); a second engine built in the
    /// same process returns `None` rather than aliasing the first.
    pub fn new(radio: R, timer: T, lf: L, ticks_per_byte: u32, clock_phi: u32) -> Option<Self> {
        Some(Self {
            radio: RadioGateway::new(radio),
            timer: TimerGateway::new(timer),
            lf,
            state: AtomicSlotState::new(SlotState::Off),
            cfg: FloodConfig::default(),
            buf: take_packet_buffer()?,
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
            ticks_per_byte,
            clock_phi,
            debug: DebugCounters::new(),
        })
    }

    /// Arm and run a flood session.
    ///
    /// `data` must outlive the flood: it is read from (initiator) or
    /// written to (receiver, first relay TX) by `dispatch` until
    /// `stop()` is called, from whatever context the application wires
    /// its Timer B vector to. See [`CallerBuf`] for the aliasing
    /// contract this implies.
    pub fn start(
        &mut self,
        data: &mut [u8],
        cfg: FloodConfig,
        scheduler: &mut impl Scheduler,
    ) -> Result<(), GlossyError> {
        cfg.validate()?;
        if cfg.data_len as usize > data.len() {
            return Err(GlossyError::Config);
        }

        self.cfg = cfg;
        self.caller_data = Some(CallerBuf {
            ptr: data.as_mut_ptr(),
            len: data.len(),
        });

        scheduler.watchdog_stop();
        let mask = scheduler.mask_other_interrupts();
        self.timer.begin_flood();

        self.tx_cnt = 0;
        self.rx_cnt = 0;
        self.n_timeouts = 0;
        self.bytes_read = 0;
        self.t_start = self.timer.now_dco();

        if cfg.data_len > 0 {
            let len = packet::packet_len(cfg.data_len, cfg.sync);
            self.packet_len = len;
            self.packet_len_tmp = len;
            self.buf.set_length_field(len);
            self.buf
                .set_header_field(packet::GLOSSY_HEADER | (cfg.header & !packet::GLOSSY_HEADER_MASK));
        } else {
            self.packet_len = 0;
        }

        // Seed the TX FIFO mirror with the caller's payload regardless
        // of role. For a receiver this is later overwritten by a
        // successful RX; harmless but wasteful, preserved as-is.
        if cfg.data_len > 0 {
            self.buf.data_mut(cfg.data_len)[..cfg.data_len as usize]
                .copy_from_slice(&data[..cfg.data_len as usize]);
        }

        if cfg.sync {
            self.buf.set_relay_cnt_field(cfg.data_len, 0);
            self.timing.t_ref_l_updated = false;
        }

        self.radio.flush_rx().map_err(|_| GlossyError::Chip)?;
        self.radio.flush_tx().map_err(|_| GlossyError::Chip)?;

        if cfg.initiator {
            self.state.store(SlotState::Received);
            self.write_fifo_mirror()?;
            self.radio.start_tx(self.t_start).map_err(|_| GlossyError::Chip)?;
            if !cfg.sync || self.timing.t_slot_h > 0 {
                self.n_timeouts = 0;
                self.schedule_initiator_timeout();
            }
        } else {
            self.write_fifo_mirror()?;
            self.state.store(SlotState::Waiting);
            self.radio.on(self.t_start).map_err(|_| GlossyError::Chip)?;
        }

        scheduler.restore_interrupts(mask);
        Ok(())
    }

    /// Block until the flood is over, then return the receive count.
    /// Forces `Off` unconditionally once `t_stop` passes, even
    /// mid-reception.
    pub fn run_to_completion(&mut self, scheduler: &mut impl Scheduler) -> u8 {
        let t_stop = self.cfg.t_stop;
        let lf = &self.lf;
        scheduler.busy_wait_until(|| self.state.load() == SlotState::Off || lf.now_lf() >= t_stop);
        self.stop(scheduler)
    }

    /// Tear the flood down: disarm the initiator timeout, turn the
    /// radio off, flush, force `Off`, and hand Timer B and the other
    /// interrupt sources back to the scheduler.
    pub fn stop(&mut self, scheduler: &mut impl Scheduler) -> u8 {
        self.disarm_initiator_timeout();
        let now = self.timer.now_dco();
        let _ = self.radio.off(now);
        let _ = self.radio.flush_rx();
        let _ = self.radio.flush_tx();
        self.state.store(SlotState::Off);
        self.caller_data = None;
        self.timer.end_flood();
        scheduler.watchdog_start();
        self.rx_cnt
    }

    pub fn state(&self) -> SlotState {
        self.state.load()
    }

    pub fn rx_cnt(&self) -> u8 {
        self.rx_cnt
    }

    pub fn relay_cnt(&self) -> u8 {
        self.relay_cnt
    }

    pub fn t_slot_h(&self) -> u32 {
        self.timing.t_slot_h
    }

    pub fn t_ref_l(&self) -> u32 {
        self.timing.t_ref_l
    }

    pub fn t_ref_l_updated(&self) -> bool {
        self.timing.t_ref_l_updated
    }

    pub fn t_first_rx_l(&self) -> u32 {
        self.timing.t_first_rx_l
    }

    pub fn debug_counters(&self) -> DebugCounters {
        self.debug
    }

    /// Seed the reference time from a higher-level sync protocol (e.g.
    /// one that just rebroadcast a Glossy-carried time reference).
    pub fn set_t_ref_l(&mut self, t: u32) {
        self.timing.t_ref_l = t;
    }

    pub fn set_t_ref_l_updated(&mut self, updated: bool) {
        self.timing.t_ref_l_updated = updated;
    }

    /// Push the buffer's on-air bytes (length field, header, payload,
    /// relay_cnt) into the TX FIFO mirror. Excludes the 2-byte CRC
    /// footer; the radio appends that itself.
    pub(crate) fn write_fifo_mirror(&mut self) -> Result<(), GlossyError> {
        let n = 1 + self.packet_len_tmp as usize - packet::FOOTER_LEN;
        self.radio.write_tx(&self.buf[..n]).map_err(|_| GlossyError::Chip)
    }

    /// Copy the payload region of the internal buffer out to the
    /// caller-owned slice passed to [`GlossyEngine::start`].
    pub(crate) fn copy_payload_to_caller(&mut self, data_len: u8) {
        if let Some(caller) = self.caller_data.as_mut() {
            let n = (data_len as usize).min(caller.len);
            caller.as_mut_slice()[..n].copy_from_slice(&self.buf.data(data_len)[..n]);
        }
    }
}

const _: () = assert!(ID_LOG_CAPACITY <= packet::BUFFER_LEN);
