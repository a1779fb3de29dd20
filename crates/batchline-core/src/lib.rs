pub mod config;
pub mod error;
pub mod types;

pub use config::BatchlineConfig;
pub use error::{BatchlineError, Result};
