pub mod autodetection;
pub mod config;
pub mod datastore;
pub mod models;
pub mod startup;
pub mod tunnel;
pub mod utils;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::ClientConfig;
pub use datastore::{Datastore, LocalDatastore};
pub use startup::{NodeStartup, StartupError, StartupOptions, StartupReport};
