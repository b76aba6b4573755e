//! xplat - multi-platform container builds
//!
//! Builds containers pinned to explicit OS/architecture targets, runs them
//! natively or under user-mode emulation, shares named cache volumes across
//! platforms, and publishes the per-platform results as one multi-platform
//! image from which consumers resolve exactly the variant they ask for.

pub mod cache;
pub mod cli;
pub mod config;
pub mod container;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod exec;
pub mod platform;
pub mod publish;
pub mod registry;
pub mod store;
pub mod ui;

pub use container::Container;
pub use engine::Engine;
pub use error::{XplatError, XplatResult};
pub use platform::Platform;
