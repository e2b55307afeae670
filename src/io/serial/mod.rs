// src/io/serial/mod.rs
//
// Serial channel for the HMI link.
//
// Features:
// - Baud/line-discipline resolution (utils)
// - Background receiver thread framing raw bytes into lines (channel, framer)
//   and feeding a single-slot mailbox (mailbox)
// - Synchronous writes from the owning thread
// - Pluggable device backend: real ttys or in-memory devices (link, mock)

pub mod channel;
pub mod framer;
pub mod link;
pub mod mailbox;
pub mod mock;
pub mod utils;

pub use channel::{ChannelOptions, ChannelState, ChannelStats, LineCallback, SerialChannel, RX_BUFFER_SIZE};
pub use link::{LinkOpener, SerialLink, SystemOpener};
pub use mock::{MockDevice, MockOpener};
pub use utils::{BaudRate, DataBitsPolicy, LineParams, Parity, StopBits};
