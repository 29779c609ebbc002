//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the podcast playback core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions, the dependency-injection surface
//! (`CoreConfig`) and the event broadcasting used by the playback engine.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
