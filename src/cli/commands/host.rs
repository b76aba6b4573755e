//! Host command - report platform, backend and emulation status

use crate::config::Config;
use crate::error::XplatResult;
use crate::exec::create_executor;
use crate::platform::{Arch, Platform};
use crate::ui::{self, UiContext};

/// Execute the host command
pub async fn execute(config: &Config) -> XplatResult<()> {
    let ctx = UiContext::detect();
    let executor = create_executor(config)?;
    let host = executor.host().clone();

    ui::intro(&ctx, "xplat host");
    ui::key_value(&ctx, "Operating system", &Platform::host().to_string());
    ui::key_value(&ctx, "Container platform", &host.to_string());

    let backend = executor.backend();
    let ready = match backend.is_available().await {
        Ok(true) => {
            ui::step_ok(&ctx, &format!("{} backend available", backend.name()));
            true
        }
        Ok(false) => {
            ui::step_warn_hint(
                &ctx,
                &format!("{} backend not found", backend.name()),
                "Install rootless Podman 4.0 or newer",
            );
            false
        }
        Err(e) => {
            ui::step_error_detail(&ctx, &format!("{} backend", backend.name()), &e.to_string());
            false
        }
    };

    let emulator = executor.emulator();
    ui::step_info(&ctx, &format!("Emulation: {}", emulator.name()));
    for &arch in Arch::all() {
        if arch == host.arch() {
            ui::key_value_status(&ctx, arch.as_str(), "native", true);
            continue;
        }
        let registered = emulator.is_registered(arch).await;
        let status = if registered {
            "registered"
        } else if config.emulation.enabled && config.emulation.auto_install {
            "installs on first use"
        } else {
            "not registered"
        };
        ui::key_value_status(&ctx, arch.as_str(), status, registered);
    }

    ui::remark(&ctx, "Non-Linux variants can be inspected but not executed");
    if ready {
        ui::outro(&ctx, "Host is ready to build", true);
    } else {
        ui::outro(&ctx, "Host cannot execute containers yet", false);
    }
    Ok(())
}
