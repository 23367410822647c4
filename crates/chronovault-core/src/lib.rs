//! # Chronovault Core
//!
//! Configuration shared by the scheduler crate and the `chronovault` binary.

pub mod config;
pub mod error;

pub use config::{ContextConfig, ContextKind, SchedulerConfig};
pub use error::{CoreError, Result};
