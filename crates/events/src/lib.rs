//! Session lifecycle events and the message-sink abstraction they travel on.
//!
//! Components that need to notify the outside world (audit log, realtime
//! fan-out) receive an `EventBus` handle explicitly; there is no global sink.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription};
pub use event::{CloseReason, Event, SessionEvent};
pub use in_memory_bus::InMemoryEventBus;
