//! Builders
//!
//! Fluent builder for annotation client configuration.

pub mod config;

pub use config::{annotation_config, env, AnnotationConfigBuilder};
