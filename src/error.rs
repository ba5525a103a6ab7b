//! Error and debug-counter types shared by every component.
//!
//! The slot engine itself never raises a failure out of the flood: a
//! bad length field, a bad header, a failed CRC, a blown latency budget
//! are all dropped or recovered in place (see [`DebugCounters`]).
//! `GlossyError` instead covers the edges of the crate: the gateway
//! calls that actually talk to the external radio and timer chips,
//! which can fail the way any SPI or register write can.

/// Failures that can be surfaced from the radio/timer gateways, or from
/// rejecting a malformed [`crate::flood::FloodConfig`] before a flood starts.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum GlossyError {
    /// The underlying chip I/O (SPI, strobe, register write) failed.
    Chip,
    /// `wait_on_busy`-style spin exceeded its iteration budget.
    BusyTimeout,
    /// A [`crate::flood::FloodConfig`] was invalid (e.g. `tx_max == 0`,
    /// or `packet_len` would exceed the 127-byte hardware MTU).
    Config,
}

/// Counters for conditions that are dropped rather than raised as
/// errors. Kept around (and reset at each `start`) purely for
/// observability. Nothing reads these to make a control-flow decision.
/// Always compiled in, at a cost of five `u16`s, rather than behind a
/// debug feature flag.
#[derive(Clone, Copy, Default, Debug, defmt::Format)]
pub struct DebugCounters {
    /// `RxTimeout`: the RX watchdog fired mid-reception.
    pub rx_timeout: u16,
    /// `LengthMismatch`: length byte outside `[FOOTER_LEN, 127]`, or it
    /// didn't match the length the flood was started with.
    pub bad_length: u16,
    /// `HeaderMismatch`: header magic bits didn't match `GLOSSY_HEADER`.
    pub bad_header: u16,
    /// `BadCRC`: footer CRC-OK bit was clear.
    pub bad_crc: u16,
    /// `LatencyExceeded`: ISR dispatch latency exceeded the half-tick
    /// budget, so the relay opportunity was dropped.
    pub latency_exceeded: u16,
}

impl DebugCounters {
    pub const fn new() -> Self {
        Self {
            rx_timeout: 0,
            bad_length: 0,
            bad_header: 0,
            bad_crc: 0,
            latency_exceeded: 0,
        }
    }
}
