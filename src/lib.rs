//! samex — structural addresses and sam-style edit commands
//!
//! Re-exports the `samex-core` engine and adds the string-in, string-out
//! entry points used by the `samex` and `samaddr` CLIs and the Python module.

mod edit;

#[cfg(feature = "pyo3")]
mod python;

pub use edit::{edit_text, edit_text_with, resolve_address, EditResult};
pub use samex_core::*;
