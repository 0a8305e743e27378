//! Utility functions and types for the tuning engine.

pub mod error;
mod logging;

pub use error::Error;
pub use logging::init_logging;

/// Re-export of commonly used types
pub mod prelude {
    pub use super::{
        error::{Error, Result},
        logging::init_logging,
    };
}

/// Common result type for utility functions
pub type Result<T> = std::result::Result<T, Error>;
