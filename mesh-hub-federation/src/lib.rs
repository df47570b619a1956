pub mod clients;
mod context;
mod controller;
pub mod eap;
mod error;
pub mod federation;
pub mod ip;
pub mod istio;
pub mod metrics;
pub mod resolver;
mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;
pub use runtime::{FederationConfig, start_federation_controller};

pub type Result<T, E = Error> = std::result::Result<T, E>;
