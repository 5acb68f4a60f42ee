//! Common utilities and types shared across notecrypt crates.
//!
//! This module provides the error taxonomy every crypto operation reports
//! through, and the encoding types used at the API boundary.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Encoding, SensitiveBytes};
