pub mod connection;
mod worker;

pub use connection::ConnectionPhase;
pub use worker::WorkPhase;
