//! Domain events and the bus that distributes them.

pub mod bus;
pub mod domain;

pub use bus::{EventBus, EventHandler, SubscriptionId};
pub use domain::{DomainEvent, EventType};
