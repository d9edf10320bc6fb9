//! `quarterdeck-core` — shared types, configuration, and errors for the
//! Quarterdeck admin console.
//!
//! Every other crate in the workspace depends on this one. It deliberately
//! contains no I/O beyond config file loading: applications, releases,
//! version records, and downstream targets are plain data here, and the
//! subsystems that move them live in `quarterdeck-store`,
//! `quarterdeck-updater`, and `quarterdeck-upstream`.

pub mod config;
pub mod error;
pub mod types;

pub use error::{ConsoleError, Result};
