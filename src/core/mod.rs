//! Core types for a test session: builder, context, and error handling.

pub mod builder;
pub mod context;
pub mod error;

pub use builder::{Session, SessionBuilder};
pub use context::Context;
pub use error::{Error, Result};
