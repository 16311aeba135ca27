//! # dataforge-core
//!
//! Core crate for Dataforge. Contains configuration schemas, typed
//! identifiers, pagination types, and the unified error system.
//!
//! This crate has **no** internal dependencies on other Dataforge crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
