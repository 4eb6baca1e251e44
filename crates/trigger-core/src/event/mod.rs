//! Event-type subscribe/publish bus for event triggers (spec §3/§6).

mod bus;

pub use bus::{EventBus, EventEnvelope, UnsubscribeHandle};
