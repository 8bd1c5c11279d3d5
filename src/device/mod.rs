pub mod btle;
pub mod connection;
pub mod constants;
pub mod session;
pub mod transport;
pub mod types;
