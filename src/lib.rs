//! Adaptive image compression for web-friendly size reduction
//!
//! Plans compression parameters from a source image's size and type, drives a
//! lossy codec with a timeout and a single escalation pass, and always hands
//! back a usable image that is never larger than the original.

pub mod app;
pub mod codec;
pub mod compressor;
pub mod error;
pub mod mime;
pub mod models;
pub mod planner;

pub use error::{Error, Result};
