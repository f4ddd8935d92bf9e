//! Bridge Host
//!
//! Native-side host for the message bridge: configuration loading and a demo
//! session that exercises both runtimes over the in-process link.

pub mod config;
pub mod session;

pub use config::{ConfigError, DemoConfig, HostConfig, LoggingConfig};
pub use session::{DemoReport, SessionError};
