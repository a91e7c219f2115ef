pub mod auth;
pub mod registry;
pub mod youtube;
