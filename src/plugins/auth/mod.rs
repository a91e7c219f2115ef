pub mod cli;
pub mod command;
pub mod static_token;
