//! # WSOD-Core
//!
//! Core types and utilities for the weakly-supervised object detection
//! (WSOD) system: error taxonomy, region box geometry, image-level
//! labels and the detector configuration surface.

pub mod config;
pub mod error;
pub mod geometry;
pub mod types;

pub use config::*;
pub use error::{Error, Result};
pub use geometry::*;
pub use types::*;
