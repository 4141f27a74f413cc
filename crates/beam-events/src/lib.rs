#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Per-job pub/sub event bus ([`bus`]) and a subscriber-fanout registry
//! ([`fanout`]) that forwards bus events to write-capable transports
//! (WebSocket connections in a real deployment).

pub mod bus;
pub mod fanout;

pub use bus::{EventBus, Subscription};
pub use fanout::{Transport, TransportError, WSFanout};
