//! On-air packet layout and the fixed packet buffer.
//!
//! Wire format:
//!
//! ```text
//!  offset  size  field
//!    0      1   length  (= total frame minus the length byte itself)
//!    1      1   header  (upper 6 bits = magic; lower 2 bits = app)
//!    2     dl   payload
//!    2+dl   1   relay_cnt   (only if sync)
//!    …      2   CRC footer  (footer byte 0 carries the CRC_OK bit)
//! ```
//!
//! App-defined bits live in the low 2 bits of the header byte, magic in
//! the upper 6, named after `GLOSSY_HEADER_MASK`, which covers the
//! upper bits.

/// Magic value carried in the upper 6 bits of the header byte.
pub const GLOSSY_HEADER: u8 = 0x00;
/// Masks the magic bits out of the header byte.
pub const GLOSSY_HEADER_MASK: u8 = 0xfc;

/// Length of the length field itself (not counted in the length value).
pub const LEN_FIELD_LEN: usize = 1;
/// Length of the header field.
pub const HEADER_LEN: usize = 1;
/// Length of the on-air relay counter field, present only when `sync`.
pub const RELAY_CNT_LEN: usize = 1;
/// Length of the CRC footer.
pub const FOOTER_LEN: usize = 2;
/// Bit in the first footer byte set by the radio when the CRC checked out.
pub const FOOTER1_CRC_OK: u8 = 0x80;

/// Hardware MTU: the largest value the length byte can legally hold.
pub const MAX_PACKET_LEN: usize = 127;

/// Radio FIFO pipelining margin: bytes are streamed out of the RXFIFO
/// as they arrive, but the last `TAIL_DRAIN_LEN` bytes of a frame are
/// drained in one shot at end-of-frame rather than streamed, mirroring
/// the CC2420's FIFO depth. Re-derive for a different radio.
pub const TAIL_DRAIN_LEN: u8 = 8;

/// Total buffer capacity, handed out once by `take_packet_buffer` below
/// rather than allocated per-flood.
pub const BUFFER_LEN: usize = 128;

/// A fixed 128-byte region used as the radio's TX/RX scratch packet.
/// Indices follow the on-air layout above directly: `buf[0]` is the
/// length byte, `buf[1]` the header, `buf[2..]` payload/relay_cnt/CRC.
pub type PacketBuffer = [u8; BUFFER_LEN];

use core::sync::atomic::{AtomicBool, Ordering};

static BUFFER_TAKEN: AtomicBool = AtomicBool::new(false);
static mut GLOSSY_BUFFER: PacketBuffer = [0; BUFFER_LEN];

/// Hand out the single process-wide packet buffer, once.
///
/// The buffer is a single fixed-size region, exclusively owned by
/// whichever of `{caller, radio}` the state machine designates at a
/// given moment. It's a `'static` array, handed out exactly once via an
/// atomic flag, in the same spirit as `cortex-m-rt`'s `singleton!`
/// macro. A second call (e.g. a second engine constructed in the same
/// process) returns `None`: re-entrancy across flood sessions is
/// forbidden by construction.
pub fn take_packet_buffer() -> Option<&'static mut PacketBuffer> {
    if BUFFER_TAKEN.swap(true, Ordering::AcqRel) {
        return None;
    }
    // Safety: `BUFFER_TAKEN` ensures this runs at most once, so the
    // `&'static mut` handed out here is never aliased.
    Some(unsafe { &mut *core::ptr::addr_of_mut!(GLOSSY_BUFFER) })
}

/// Typed accessors over the raw buffer bytes.
pub trait PacketFields {
    fn length_field(&self) -> u8;
    fn set_length_field(&mut self, v: u8);
    fn header_field(&self) -> u8;
    fn set_header_field(&mut self, v: u8);
    fn data(&self, data_len: u8) -> &[u8];
    fn data_mut(&mut self, data_len: u8) -> &mut [u8];
    fn relay_cnt_field(&self, data_len: u8) -> u8;
    fn set_relay_cnt_field(&mut self, data_len: u8, v: u8);
    fn crc_ok(&self, packet_len_tmp: u8) -> bool;
}

impl PacketFields for PacketBuffer {
    fn length_field(&self) -> u8 {
        self[0]
    }

    fn set_length_field(&mut self, v: u8) {
        self[0] = v;
    }

    fn header_field(&self) -> u8 {
        self[1]
    }

    fn set_header_field(&mut self, v: u8) {
        self[1] = v;
    }

    fn data(&self, data_len: u8) -> &[u8] {
        &self[2..2 + data_len as usize]
    }

    fn data_mut(&mut self, data_len: u8) -> &mut [u8] {
        &mut self[2..2 + data_len as usize]
    }

    fn relay_cnt_field(&self, data_len: u8) -> u8 {
        self[2 + data_len as usize]
    }

    fn set_relay_cnt_field(&mut self, data_len: u8, v: u8) {
        self[2 + data_len as usize] = v;
    }

    fn crc_ok(&self, packet_len_tmp: u8) -> bool {
        // Footer starts right after the length byte, at packet_len_tmp - 1
        // (FOOTER_LEN bytes, footer[0] holding the CRC_OK bit), offset by
        // the single length byte at index 0.
        let footer0 = 1 + (packet_len_tmp as usize - FOOTER_LEN);
        self[footer0] & FOOTER1_CRC_OK != 0
    }
}

/// Total on-air packet length (excluding the length byte itself) for a
/// given payload size and sync mode.
pub const fn packet_len(data_len: u8, sync: bool) -> u8 {
    data_len + HEADER_LEN as u8 + if sync { RELAY_CNT_LEN as u8 } else { 0 } + FOOTER_LEN as u8
}
