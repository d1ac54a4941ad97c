//! Event delivery
//!
//! Event types are defined in `domain::events`. This module holds the
//! listener slot every component emits through and the broadcast bus used
//! when several collaborators need the stream.

pub mod event_bus;
pub mod listener;

#[cfg(test)]
pub(crate) use listener::testing;

pub use event_bus::{create_event_bus, EventBus, EventSubscriber, SharedEventBus};
pub use listener::{
    EventListener, EventSink, LoggingEventListener, SharedEventListener, SharedEventSink,
};
