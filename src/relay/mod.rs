//! Bidirectional event relay between the central bus and tenant queues.

mod cache;
mod event;
mod inbound;
mod outbound;

pub use cache::QueueCache;
pub use event::{BusEvent, QueueRecord};
pub use inbound::{InboundDisposition, InboundRelay};
pub use outbound::{OutboundMessage, OutboundRelay, OutboundReport};
