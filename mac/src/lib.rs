//! A non-blocking class A LoRaWAN 1.0.x MAC for resource-constrained targets
//! driving an SX126x/SX127x class radio.
//!
//! The application owns the loop: it calls [`Mac::process`] whenever
//! [`Mac::ticks_until_next_event`] says something is due, forwards radio DIO
//! lines to [`Mac::interrupt`] from interrupt context, and receives the
//! stack's output through the [`Handler`] callback bound at construction.
//! All state mutation happens inside `process()` and the API entry points on
//! the caller's thread.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod fmt;

pub mod event;
pub mod mac;
pub mod platform;
pub mod radio;
pub mod region;

pub use mac::{Channel, Errno, Event, Handler, Mac, Op, Session, State, Window, MAX_PACKET, SESSION_BLOB_LEN};
pub use platform::{Identity, Platform};
pub use radio::{Mode, PacketMeta, Radio, RadioEvent, RxSettings, TxSettings};
pub use region::Region;

pub use loramac_codec as codec;

#[cfg(test)]
mod testutil;
