pub mod config;
pub mod error;
pub mod types;

pub use config::KiranaConfig;
pub use error::{KiranaError, Result};
pub use types::*;
