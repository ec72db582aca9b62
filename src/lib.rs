pub mod api;
pub mod config;
pub mod error;
pub mod panel;
pub mod poller;

pub use error::Error;
