//! Payment lifecycle notifications.
//!
//! The engine publishes an event whenever an order is paid or a refund is increased. Anything outside the engine
//! (audit logs, storefront webhooks) can hook into these by registering an async handler in [`EventHooks`].
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
