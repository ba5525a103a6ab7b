//! Glossy: a wireless network-flooding and time-synchronization
//! primitive for low-power radios.
//!
//! One node (the *initiator*) injects a short packet; every other node
//! that hears it immediately retransmits it, producing constructive
//! interference at the PHY, so that within a few tens of microseconds
//! the packet has reached every node in the collision domain and (when
//! `sync` is set) every node has acquired a shared time reference
//! accurate to a DCO tick.
//!
//! The crate is the per-node slot engine only: the radio chip, the
//! hardware timer, the cooperative scheduler, and the watchdog are all
//! external collaborators a binding supplies by implementing
//! [`radio::RadioChip`], [`timer::TimerChip`], [`timer::LfClock`], and
//! [`flood::Scheduler`]. [`flood::GlossyEngine`] is generic over the
//! first three and never talks to SPI or a register map directly.
//!
//! ```ignore
//! let mut engine = GlossyEngine::new(my_radio, my_timer, my_lf, ticks_per_byte, clock_phi)
//!     .expect("packet buffer already taken");
//! engine.start(&mut data, FloodConfig { initiator: true, tx_max: 2, ..Default::default() }, &mut sched)?;
//! let rx_cnt = engine.run_to_completion(&mut sched);
//! ```
//!
//! From the application's real Timer B1 interrupt vector, call
//! [`flood::GlossyEngine::dispatch`] on every fire; that single entry
//! point demultiplexes on slot state, SFD level, and timer cause and
//! drives every other component.

#![cfg_attr(not(test), no_std)]

mod dispatch;
mod idlog;
mod timing;

pub mod error;
pub mod flood;
pub mod packet;
pub mod radio;
pub mod state;
pub mod timeouts;
pub mod timer;

#[cfg(test)]
mod test_support;

pub use error::{DebugCounters, GlossyError};
pub use flood::{FloodConfig, GlossyEngine, InterruptMask, Scheduler};
pub use packet::{packet_len, PacketBuffer, PacketFields, MAX_PACKET_LEN};
pub use radio::{EnergyAccounting, EnergyMode, RadioChip, RadioGateway, Strobe};
pub use state::SlotState;
pub use timer::{LfClock, TimerCause, TimerChip, TimerGateway};
