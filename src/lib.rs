pub mod cdc;
pub mod clock;
pub mod config;
pub mod error;
pub mod poller;
pub mod source;

pub mod kafka;
pub mod postgres;
pub mod sink;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use error::{Error, Result};
pub use poller::{Poller, PollerHandle, PollerSettings, PollerState};
