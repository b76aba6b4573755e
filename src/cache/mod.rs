//! Platform-agnostic cache volumes
//!
//! Volumes live under the state directory and persist until explicitly
//! removed:
//!
//! ```text
//! <state>/volumes/<name>/
//! ├── volume.json   (name, created_at)
//! └── data/         (mounted into containers)
//! ```
//!
//! Writes from a running container land directly in `data/`, so they are
//! durable as soon as the command returns. Concurrent writers to distinct
//! paths never conflict; writers to the same path are last-writer-wins.
//! Callers namespace by path when they need isolation.

pub mod volume;

pub use volume::{format_bytes, validate_mount_path, validate_name, CacheVolume, CacheVolumes};
