//! Data models for govwatch

pub mod alert;
pub mod baseline;
pub mod deployment;
pub mod limit;

pub use alert::*;
pub use baseline::*;
pub use deployment::*;
pub use limit::*;
