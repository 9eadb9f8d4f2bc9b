//! Annotation Client Types
//!
//! Credential and configuration data structures.

pub mod config;
pub mod credential;

pub use config::*;
pub use credential::*;
