pub mod config;
pub mod verifier;

pub use config::build_client_config;
