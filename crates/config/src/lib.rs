//! Configuration module for stillframe
//!
//! Handles loading configuration from TOML files and validating the result.

pub mod config;

pub use config::*;
