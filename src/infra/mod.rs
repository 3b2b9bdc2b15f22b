//! Infrastructure - configuration, metrics, and session persistence
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `session` - File-backed identity store

pub mod config;
pub mod metrics;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
pub use session::{Session, SessionError, SessionStore};
