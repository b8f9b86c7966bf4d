pub mod api;
pub mod entries;
pub mod flow;
pub mod integration;
pub mod model;
pub mod sensor;

#[cfg(test)]
mod testing;

pub use api::Error;

pub const DOMAIN: &str = "portail_eau_fr";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
