pub mod aggregate_store;
pub mod message_queue;
