//! Terminal output for the CLI
//!
//! Uses `cliclack` log lines and spinners plus `indicatif` multi-line
//! progress for concurrent builds, with plain-text fallback when stdout is
//! not a terminal or a CI environment is detected.

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, key_value_status, outro, remark, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn_hint,
};
pub use progress::{BuildBoard, TaskSpinner};
pub use prompts::confirm;
