//! Execution backend abstraction
//!
//! A backend runs one command inside a materialized root filesystem. It
//! knows nothing about platforms beyond what the request carries; the
//! [`Executor`](crate::exec::Executor) decides whether a request may run
//! and in which mode.

use crate::error::XplatResult;
use crate::exec::{ExecMode, ExecOutput, ExecRequest};
use async_trait::async_trait;

/// Abstract process execution interface
#[async_trait]
pub trait ExecBackend: Send + Sync {
    /// Get the human-readable backend name for display
    fn name(&self) -> &'static str;

    /// Check if the backend is usable on this system
    async fn is_available(&self) -> XplatResult<bool>;

    /// Run the request's command to completion and capture its output.
    ///
    /// A non-zero exit is not an error at this level.
    async fn exec(&self, request: &ExecRequest, mode: &ExecMode) -> XplatResult<ExecOutput>;
}
