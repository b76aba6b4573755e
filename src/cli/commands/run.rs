//! Run command - execute one command in one platform variant

use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::container::Container;
use crate::engine::Engine;
use crate::error::XplatResult;
use crate::platform::Platform;
use crate::ui::{TaskSpinner, UiContext};
use tracing::info;

/// What to do for each platform: start point, mounts, env and command
#[derive(Debug, Clone)]
pub struct Recipe {
    pub image: Option<String>,
    pub caches: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    pub workdir: Option<String>,
    pub command: Vec<String>,
}

impl Recipe {
    /// The container definition for `platform`, not yet evaluated
    pub async fn define(&self, engine: &Engine, platform: Platform) -> XplatResult<Container> {
        let mut container = match self.image {
            Some(ref image) => engine.from_image(image, &platform).await?,
            None => engine.container(platform).await?,
        };

        for (key, value) in &self.env {
            container = container.with_env(key.as_str(), value.as_str());
        }
        if let Some(ref workdir) = self.workdir {
            container = container.with_workdir(workdir.as_str());
        }
        for (name, path) in &self.caches {
            let volume = engine.cache_volume(name)?;
            container = container.with_mounted_cache(path, &volume)?;
        }

        Ok(container.with_exec(self.command.iter().cloned()))
    }

    /// Define and evaluate for `platform`
    pub async fn build(&self, engine: &Engine, platform: Platform) -> XplatResult<Container> {
        let container = self.define(engine, platform).await?;
        engine.sync(&container).await
    }
}

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config) -> XplatResult<()> {
    let ctx = UiContext::detect();
    let platform = match args.platform {
        Some(ref text) => Platform::parse(text)?,
        None => config.default_platform()?,
    };

    let engine = Engine::new(config.clone())?;
    let recipe = Recipe {
        image: args.image,
        caches: args.cache,
        env: args.env,
        workdir: args.workdir,
        command: args.command,
    };

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Running {} on {}", recipe.command.join(" "), platform));

    let built = match recipe.build(&engine, platform.clone()).await {
        Ok(built) => built,
        Err(e) => {
            spinner.stop_error(&format!("{} failed", platform));
            return Err(e);
        }
    };
    let report = engine.exec_report(&built).await?;
    spinner.stop(&format!("{} ({}, host {})", platform, report.mode, report.host));

    print!("{}", report.stdout);
    eprint!("{}", report.stderr);
    if !report.stdout.is_empty() && !report.stdout.ends_with('\n') {
        println!();
    }

    if let Some(rootfs) = built.rootfs() {
        info!("{} rootfs {}", platform, rootfs);
    }
    Ok(())
}
