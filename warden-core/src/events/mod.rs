mod bus;

pub use bus::{EventBus, EventBusStats, EventFilter, EventHandler, FnHandler, Subscription};
