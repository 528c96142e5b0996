//! STOMP 1.2 over WebSocket: frame codec and connection task.

pub mod client;
pub mod frame;

pub use client::{ClientCommand, ClientEvent, SocketOptions, StompHandle};
pub use frame::{Command, Frame};
