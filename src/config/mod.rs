//! Configuration module for asyncvfs
//!
//! Engine settings, config files and CLI arguments.

mod settings;

pub use settings::*;
