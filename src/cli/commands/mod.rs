//! CLI command implementations

pub mod build;
pub mod cache;
pub mod config;
pub mod host;
pub mod inspect;
pub mod platforms;
pub mod run;

pub use build::execute as build;
pub use cache::execute as cache;
pub use config::execute as config;
pub use host::execute as host;
pub use inspect::execute as inspect;
pub use platforms::execute as platforms;
pub use run::execute as run;
