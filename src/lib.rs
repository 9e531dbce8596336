pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod runner;
pub mod utils;

pub use error::{Error, Result};
