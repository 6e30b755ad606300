pub mod config;
pub mod episode;
pub mod error;
pub mod fsops;
pub mod jail;
pub mod lookup;
pub mod rename;
pub mod service;
pub mod telemetry;

pub use error::{Error, Result};
