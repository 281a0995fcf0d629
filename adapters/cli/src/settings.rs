//! Engine configuration assembled from an optional JSON file and flag overrides.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use danmaku_core::{EngineConfig, Viewport};

use crate::Args;

/// Reads the configuration file, or the defaults when none is given.
pub(crate) fn load(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse(&contents).with_context(|| format!("invalid config file {}", path.display()))
}

fn parse(contents: &str) -> Result<EngineConfig> {
    let config: EngineConfig = serde_json::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Layers command-line flags over the loaded configuration.
pub(crate) fn apply_overrides(config: &mut EngineConfig, args: &Args) {
    if args.worker {
        config.worker_enabled = true;
    }
    if let Some(kernel) = args.kernel {
        config.kernel_mode = kernel;
    }
    config.viewport = Viewport::new(
        args.width.unwrap_or(config.viewport.width),
        args.height.unwrap_or(config.viewport.height),
    );
    if args.perf_window_ms.is_some() {
        config.perf_log_window_ms = args.perf_window_ms;
    }
    config.start_paused = false;
}
