pub mod cli;
pub mod negotiator;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock_http;
