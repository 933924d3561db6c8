pub mod batch;
pub mod ticket;
pub mod events;
