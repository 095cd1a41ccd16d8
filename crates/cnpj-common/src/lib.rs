//! CNPJ Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the CNPJ loader workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CnpjError`] and the [`Result`] alias used by file-level code
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use cnpj_common::{CnpjError, Result};
//!
//! fn open_source(path: &str) -> Result<std::fs::File> {
//!     std::fs::File::open(path).map_err(|e| CnpjError::io(path, e))
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CnpjError, Result};
