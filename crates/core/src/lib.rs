// Officepool Core - Domain, Ports & Supervision Services
// NO infrastructure dependencies (hexagonal layout)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{OfficeError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
