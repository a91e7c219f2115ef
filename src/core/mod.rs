pub mod credential;
pub mod error;
pub mod events;
pub mod model;
pub mod payload;
pub mod queue;
pub mod store;
