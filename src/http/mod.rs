pub mod client;
pub mod resolve;
pub mod traced_io;

pub use client::Client;
