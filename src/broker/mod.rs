pub mod consumer;
pub mod memory;
pub mod message;
pub mod traits;

pub use consumer::{ConsumerLoop, Delivery, MessageHandler};
pub use memory::{MemoryBroker, MemorySubscription};
pub use message::{headers_from_map, Header, Headers, Message};
pub use traits::{BrokerError, MessageSource, Producer};
