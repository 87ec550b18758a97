//! # LMIO Common Library
//!
//! Shared code for landmarker backends including:
//! - Error taxonomy (Error enum)
//! - Bootstrap configuration loading (TOML)
//! - Persisted preference store
//! - Event types (LmioEvent enum) and EventBus
//! - Path helpers for slash-separated remote paths

pub mod config;
pub mod error;
pub mod events;
pub mod paths;
pub mod preferences;

pub use error::{Error, Result};
pub use preferences::Preferences;
