pub mod config;
pub mod error;
pub mod types;

pub use config::DibsConfig;
pub use error::{DibsError, Result};
pub use types::*;
