//! Core functionality for keel-memory
//!
//! Fundamental building blocks shared by the pool modules:
//! - Alignment and size constants
//! - The [`Address`] handle type

pub mod types;

pub use types::{Address, alignment, size};
