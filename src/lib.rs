#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod lifecycle;
pub mod models;
pub mod suggestions;

pub use error::{CuratorError, Result};
