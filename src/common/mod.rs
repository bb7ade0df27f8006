//! Common utilities shared by the backend and the host bridge

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
