//! LarkRelay Common - shared configuration and logging.
//!
//! Everything the server binary needs before it can do real work:
//! loading `~/.larkrelay/config.json` with environment overrides, and
//! installing the global tracing subscriber.

#![warn(clippy::all)]

pub mod config;
pub mod logging;

pub use config::Config;
pub use logging::{generate_trace_id, init_logging};
